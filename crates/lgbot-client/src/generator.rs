//! 局面から着手を得る抽象
//!
//! 巡回ループはこの trait 越しにしかエンジンを知らない。テストではスクリプト化した実装に差し替える。

use lgbot_notation::Color;

use crate::engine::{EngineBridge, EngineConfig};
use crate::error::BotResult;

pub trait MoveGenerator {
    /// エンジン表記の棋譜 (先手から交互) を受け取り、手番側の着手をエンジン表記で返す。
    fn genmove(&mut self, size: u32, moves: &[String]) -> BotResult<String>;
}

impl<G: MoveGenerator + ?Sized> MoveGenerator for Box<G> {
    fn genmove(&mut self, size: u32, moves: &[String]) -> BotResult<String> {
        (**self).genmove(size, moves)
    }
}

/// 呼び出しごとに GTP エンジンを起動し、終わったら必ず回収する。
pub struct GtpMoveGenerator {
    config: EngineConfig,
}

impl GtpMoveGenerator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn drive(&self, engine: &mut EngineBridge, size: u32, moves: &[String]) -> BotResult<String> {
        engine.configure(size, &self.config.options)?;
        engine.replay(moves)?;
        if self.config.show_board {
            engine.show_board()?;
        }
        engine.genmove(Color::for_ply(moves.len()))
    }
}

impl MoveGenerator for GtpMoveGenerator {
    fn genmove(&mut self, size: u32, moves: &[String]) -> BotResult<String> {
        let mut engine = EngineBridge::spawn(&self.config)?;
        let result = self.drive(&mut engine, size, moves);
        if let Err(e) = &result {
            log::debug!("[{}] last response before failure: {:?} ({e})", engine.label(), engine.last_response());
        }
        engine.close();
        result
    }
}
