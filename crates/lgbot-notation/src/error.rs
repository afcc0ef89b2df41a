//! notation 層のエラー型

/// 座標変換の失敗
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// 形式として解釈できない座標
    #[error("malformed coordinate '{0}'")]
    Malformed(String),

    /// 盤外の座標
    #[error("coordinate '{coord}' is outside a board of size {size}")]
    OutOfRange { coord: String, size: u32 },

    /// swap は初手への応手としてしか現れない
    #[error("swap at move index {index}, only the opening response may swap")]
    MisplacedSwap { index: usize },

    /// 棋譜中に現れてはいけない手
    #[error("unexpected move token '{0}' in game history")]
    UnexpectedToken(String),
}

/// 棋譜 (HGF) の解析失敗
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordFormatError {
    #[error("record has no SZ[...] size property")]
    MissingSize,

    #[error("invalid board size '{0}'")]
    InvalidSize(String),
}

/// ゲームシート / 招待ページの解析失敗
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GameSheetFormatError {
    #[error("game sheet has no 'your turn' section")]
    MissingTurnSection,

    #[error("invitation page has no decision table")]
    MissingDecisionTable,

    #[error("invitation table has {found} cells, expected at least {expected}")]
    ShortInvitationRow { found: usize, expected: usize },

    #[error("invitation row carries no invid")]
    MissingInvitationId,
}
