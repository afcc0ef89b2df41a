//! ゲームシート / 招待ページの HTML 解析
//!
//! サーバーの HTML 構造は公開仕様ではないため、スクレイピングはすべてこのモジュールに閉じ込める。
//! 呼び出し側は [`GameSheet`] と [`Invitation`] だけを見る。

use std::sync::LazyLock;

use regex::Regex;

use crate::error::GameSheetFormatError;

/// 「あなたの手番」が 0 局であることを示す見出し
const NO_TURN_MARKER: &str = "Games where it is your turn [0]";
const INVITATION_MARKER: &str = "New invitations:";

static TURN_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)your turn.*your opponent").expect("invalid TURN_SECTION_RE pattern")
});
static GID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gid=(\d+)").expect("invalid GID_RE pattern"));
static DECISION_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Your decision.*?</table>").expect("invalid DECISION_TABLE_RE pattern")
});
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<td[^>]*>(.*?)</td>").expect("invalid CELL_RE pattern"));
static INVID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"invid=(\d+)").expect("invalid INVID_RE pattern"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid TAG_RE pattern"));

/// 招待テーブルの列位置
const OPPONENT_CELL: usize = 1;
const GAME_TYPE_CELL: usize = 2;
const DECISION_CELL: usize = 5;

/// ゲームシートから読み取った内容
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameSheet {
    /// 手番が来ている対局 ID (掲載順、重複なし)
    pub pending_ids: Vec<u64>,
    /// 未回答の招待があるか
    pub invitations_pending: bool,
}

impl GameSheet {
    pub fn parse(html: &str) -> Result<Self, GameSheetFormatError> {
        let invitations_pending = html.contains(INVITATION_MARKER);
        if html.contains(NO_TURN_MARKER) {
            return Ok(Self {
                pending_ids: Vec::new(),
                invitations_pending,
            });
        }

        let section = TURN_SECTION_RE
            .find(html)
            .ok_or(GameSheetFormatError::MissingTurnSection)?
            .as_str();
        let mut pending_ids: Vec<u64> = Vec::new();
        for caps in GID_RE.captures_iter(section) {
            // 桁あふれする ID は対局 ID ではない
            let Ok(id) = caps[1].parse::<u64>() else {
                continue;
            };
            if !pending_ids.contains(&id) {
                pending_ids.push(id);
            }
        }

        Ok(Self {
            pending_ids,
            invitations_pending,
        })
    }
}

/// 招待 1 件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub id: u64,
    /// 宣言されたゲーム種別 (例: `Hex 13x13`)
    pub game_type: String,
    pub opponent: String,
}

impl Invitation {
    /// 招待ページの「Your decision」表の先頭行を読む。
    pub fn parse(page: &str) -> Result<Self, GameSheetFormatError> {
        let table = DECISION_TABLE_RE
            .find(page)
            .ok_or(GameSheetFormatError::MissingDecisionTable)?
            .as_str();
        let cells: Vec<&str> = CELL_RE
            .captures_iter(table)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        if cells.len() <= DECISION_CELL {
            return Err(GameSheetFormatError::ShortInvitationRow {
                found: cells.len(),
                expected: DECISION_CELL + 1,
            });
        }

        let id = INVID_RE
            .captures(cells[DECISION_CELL])
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .ok_or(GameSheetFormatError::MissingInvitationId)?;

        Ok(Self {
            id,
            game_type: cell_text(cells[GAME_TYPE_CELL]),
            opponent: cell_text(cells[OPPONENT_CELL]),
        })
    }
}

fn cell_text(cell: &str) -> String {
    let text = TAG_RE.replace_all(cell, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ").replace("&nbsp;", " ").trim().to_string()
}
