//! LittleGolem 対局ボット
//!
//! ゲームサーバーを巡回し、手番が来ている対局の棋譜を GTP エンジンに渡して、
//! 得られた着手を送り返す。
//!
//! - [`transport`] / [`session`] / [`server`]: HTTP とセッション管理
//! - [`engine`] / [`generator`]: エンジンのサブプロセス制御
//! - [`bot`]: 巡回ループ
//! - [`config`]: TOML 設定

pub mod bot;
pub mod config;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod generator;
pub mod server;
pub mod session;
pub mod transport;

pub use bot::{Bot, BotSettings, BotState, CycleReport, GameFailure, GameStage, InvitationPolicy, PollSchedule};
pub use config::BotConfig;
pub use engine::{EngineBridge, EngineConfig, EngineOption, EngineState, ReplayMode, kill_live_engine};
pub use error::{BotError, BotResult};
pub use generator::{GtpMoveGenerator, MoveGenerator};
pub use server::{GameServer, InvitationDecision};
pub use session::{Credentials, SessionClient};
pub use transport::{HttpResponse, HttpTimeouts, HttpTransport, Transport};
