//! サーバーのエンドポイント
//!
//! パスとクエリの形はサーバー側で固定されているため、ここ以外で組み立てない。

use url::form_urlencoded;

pub const LOGIN: &str = "/jsp/login/index.jsp";
pub const LOGOUT: &str = "/jsp/login/logoff.jsp";
pub const GAME_SHEET: &str = "/jsp/game/index.jsp";
pub const INVITATIONS: &str = "/jsp/invitation/index.jsp";
pub const SEND_MESSAGE: &str = "/jsp/message/new.jsp";

pub fn game_record(game_id: u64) -> String {
    format!("/servlet/sgf/{game_id}/game.hgf")
}

/// 着手の送信先。手はクエリに載り、チャットは本文 (`message=`) で送る。
pub fn send_move(game_id: u64, mv: &str) -> String {
    format!("/jsp/game/game.jsp?sendgame={game_id}&sendmove={}", encode(mv))
}

pub fn invitation_reply(invitation_id: u64, answer: &str) -> String {
    format!("/Invitation.action?{answer}=&invid={invitation_id}")
}

pub fn login_form(login: &str, password: &str) -> String {
    form(&[("login", login), ("password", password)])
}

pub fn move_form(message: &str) -> String {
    form(&[("message", message)])
}

pub fn message_form(to: &str, title: &str, message: &str) -> String {
    form(&[("messagetitle", title), ("message", message), ("plto", to)])
}

fn form(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
