//! client 層のエラー型

use std::time::Duration;

use lgbot_notation::{CoordError, GameSheetFormatError, RecordFormatError};

/// セッション・エンジン・解析のすべての失敗
#[derive(thiserror::Error, Debug)]
pub enum BotError {
    /// ログインが拒否された
    #[error("login rejected with HTTP {status}")]
    Auth { status: u16 },

    /// 再ログイン後も失敗した要求
    #[error("{method} {path} failed with HTTP {status} after re-login")]
    Fetch {
        method: &'static str,
        path: String,
        status: u16,
    },

    #[error("{method} {path} timed out")]
    NetworkTimeout { method: &'static str, path: String },

    /// 接続できない等、HTTP ステータスに到達しない失敗
    #[error("{method} {path}: {message}")]
    Network {
        method: &'static str,
        path: String,
        message: String,
    },

    #[error(transparent)]
    RecordFormat(#[from] RecordFormatError),

    #[error(transparent)]
    GameSheetFormat(#[from] GameSheetFormatError),

    #[error(transparent)]
    Coordinate(#[from] CoordError),

    #[error("failed to spawn engine {path}: {source}")]
    EngineSpawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// エンジン応答が壊れている、またはエンジンが先に終了した
    #[error("engine protocol error: {0}")]
    EngineProtocol(String),

    #[error("engine gave no answer within {0:?}")]
    EngineTimeout(Duration),
}

impl BotError {
    /// 対局単位で握りつぶさず、巡回ループまで伝播させるべき失敗か。
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            BotError::Auth { .. } | BotError::Network { .. } | BotError::NetworkTimeout { .. }
        )
    }

    /// 短い待機で再試行してよい一時的な失敗か。
    pub fn is_transient(&self) -> bool {
        matches!(self, BotError::NetworkTimeout { .. })
    }
}

pub type BotResult<T> = Result<T, BotError>;
