//! LittleGolem の棋譜・ゲームシート・座標表記を扱う crate。
//!
//! ネットワークやプロセスには触れない。`lgbot-client` はこの crate の構造化された結果だけに依存する。

pub mod coord;
pub mod error;
pub mod record;
pub mod sheet;

pub use coord::{BoardFamily, Color, CoordinateTranslator, Move, MoveToken};
pub use error::{CoordError, GameSheetFormatError, RecordFormatError};
pub use record::GameRecord;
pub use sheet::{GameSheet, Invitation};
