//! ゲームサーバーの型付き API
//!
//! [`SessionClient`] の上に、ゲームシート・棋譜・招待・着手の各操作を載せる。
//! HTML や棋譜テキストはここで `lgbot-notation` の構造体に変換され、外には出ない。

use lgbot_notation::{GameRecord, GameSheet, Invitation, MoveToken};

use crate::endpoints;
use crate::error::BotResult;
use crate::session::SessionClient;
use crate::transport::Transport;

/// 招待への回答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationDecision {
    Accept,
    Refuse,
}

impl InvitationDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            InvitationDecision::Accept => "accept",
            InvitationDecision::Refuse => "refuse",
        }
    }
}

pub struct GameServer<T> {
    session: SessionClient<T>,
}

impl<T: Transport> GameServer<T> {
    pub fn new(session: SessionClient<T>) -> Self {
        Self { session }
    }

    pub fn login(&mut self) -> BotResult<()> {
        self.session.login()
    }

    pub fn logout(&mut self) -> BotResult<()> {
        self.session.logout()
    }

    pub fn game_sheet(&mut self) -> BotResult<GameSheet> {
        let html = self.session.fetch(endpoints::GAME_SHEET)?;
        Ok(GameSheet::parse(&html)?)
    }

    pub fn game_record(&mut self, game_id: u64) -> BotResult<GameRecord> {
        let raw = self.session.fetch(&endpoints::game_record(game_id))?;
        Ok(GameRecord::parse(game_id, &raw)?)
    }

    pub fn invitation(&mut self) -> BotResult<Invitation> {
        let page = self.session.fetch(endpoints::INVITATIONS)?;
        Ok(Invitation::parse(&page)?)
    }

    pub fn reply_invitation(
        &mut self,
        invitation_id: u64,
        decision: InvitationDecision,
    ) -> BotResult<()> {
        self.session.fetch(&endpoints::invitation_reply(invitation_id, decision.as_str()))?;
        Ok(())
    }

    pub fn send_message(&mut self, to: &str, title: &str, message: &str) -> BotResult<()> {
        self.session.post(endpoints::SEND_MESSAGE, &endpoints::message_form(to, title, message))?;
        Ok(())
    }

    /// 着手を送信する。サーバー側で冪等ではないので、この呼び出し自体を再試行しないこと。
    pub fn post_move(&mut self, game_id: u64, mv: &MoveToken, chat: &str) -> BotResult<()> {
        self.session
            .post(&endpoints::send_move(game_id, mv.as_str()), &endpoints::move_form(chat))?;
        Ok(())
    }
}
