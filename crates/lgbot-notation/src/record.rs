//! HGF 棋譜の解析
//!
//! サーバーの棋譜は SGF 風のテキストで、盤サイズは `SZ[13]`、手は `;B[fj]` / `;W[swap]`
//! のように並ぶ。必要なのは盤サイズと手順だけなので、その2つだけを抜き出す。

use std::sync::LazyLock;

use regex::Regex;

use crate::coord::{Color, MAX_BOARD_SIZE, Move};
use crate::error::RecordFormatError;

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SZ\[(.+?)\]").expect("invalid SIZE_RE pattern"));
static MOVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";\s*([BW])\[(.+?)\]").expect("invalid MOVE_RE pattern"));

/// 1局分の棋譜
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub game_id: u64,
    pub size: u32,
    /// 着手順
    pub moves: Vec<Move>,
}

impl GameRecord {
    /// 棋譜テキストを解析する。手が1つもない棋譜 (未着手の対局) はエラーではない。
    /// 盤サイズは 1..=[`MAX_BOARD_SIZE`] の範囲外ならエラー。
    pub fn parse(game_id: u64, raw: &str) -> Result<Self, RecordFormatError> {
        let size_text = SIZE_RE
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .ok_or(RecordFormatError::MissingSize)?;
        let size = size_text
            .parse::<u32>()
            .ok()
            .filter(|n| (1..=MAX_BOARD_SIZE).contains(n))
            .ok_or_else(|| RecordFormatError::InvalidSize(size_text.to_string()))?;

        let moves = MOVE_RE
            .captures_iter(raw)
            .filter_map(|caps| {
                let tag = caps[1].chars().next()?;
                Some(Move::new(Color::from_record_tag(tag)?, &caps[2]))
            })
            .collect();

        Ok(Self {
            game_id,
            size,
            moves,
        })
    }

    /// 次に指す側。swap も1手として数える。
    pub fn side_to_move(&self) -> Color {
        Color::for_ply(self.moves.len())
    }
}
