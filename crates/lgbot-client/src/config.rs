//! TOML 設定ファイル
//!
//! 起動時に一度だけ読み、検証まで済ませる。ここで失敗した設定はループに入る前に
//! `anyhow` のエラーとして報告される。
//!
//! ```toml
//! [account]
//! login = "HexBot"
//! contact_id = "12345"
//!
//! [game]
//! family = "hexagonal"
//!
//! [engine]
//! path = "mohex"
//! replay = "batched"
//!
//! [engine.options.param_mohex]
//! max_time = 60
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use lgbot_notation::BoardFamily;
use serde::Deserialize;

use crate::bot::{InvitationPolicy, PollSchedule};
use crate::engine::{EngineConfig, EngineOption, ReplayMode};
use crate::session::Credentials;
use crate::transport::HttpTimeouts;

/// パスワードを設定ファイルに書かない場合の環境変数
pub const PASSWORD_ENV: &str = "LGBOT_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    #[serde(default)]
    pub server: ServerSection,
    pub account: AccountSection,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub invitations: InvitationSection,
    #[serde(default)]
    pub game: GameSection,
    pub engine: EngineSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSection {
    pub login: String,
    #[serde(default)]
    pub password: Option<String>,
    /// 招待への回答を知らせる相手のユーザー ID
    #[serde(default)]
    pub contact_id: Option<String>,
}

impl std::fmt::Debug for AccountSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSection")
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("contact_id", &self.contact_id)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollSection {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_transient_backoff")]
    pub transient_backoff_secs: u64,
    #[serde(default = "default_severe_backoff")]
    pub severe_backoff_secs: u64,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            transient_backoff_secs: default_transient_backoff(),
            severe_backoff_secs: default_severe_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvitationSection {
    /// 受ける招待のゲーム種別にマッチする正規表現
    #[serde(default = "default_supported")]
    pub supported: String,
    #[serde(default = "default_true")]
    pub notify: bool,
}

impl Default for InvitationSection {
    fn default() -> Self {
        Self {
            supported: default_supported(),
            notify: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameSection {
    #[serde(default)]
    pub family: BoardFamily,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub replay: ReplayMode,
    #[serde(default)]
    pub show_board: bool,
    #[serde(default = "default_think_time")]
    pub think_time_secs: u64,
    #[serde(default = "default_timeout_margin")]
    pub timeout_margin_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// `[engine.options.<command>]` の各キーが `<command> <name> <value>` 1行になる
    #[serde(default)]
    pub options: BTreeMap<String, BTreeMap<String, toml::Value>>,
}

fn default_base_url() -> String {
    "https://www.littlegolem.net".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("lgbot/{}", env!("CARGO_PKG_VERSION"))
}
fn default_poll_interval() -> u64 {
    30
}
fn default_transient_backoff() -> u64 {
    30
}
fn default_severe_backoff() -> u64 {
    300
}
fn default_supported() -> String {
    "Hex".to_string()
}
fn default_true() -> bool {
    true
}
fn default_think_time() -> u64 {
    60
}
fn default_timeout_margin() -> u64 {
    30
}
fn default_command_timeout() -> u64 {
    10
}

impl BotConfig {
    /// 設定ファイルを読み、`LGBOT_PASSWORD` を反映して検証する。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text, env::var(PASSWORD_ENV).ok())
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// 環境変数のパスワードは設定ファイルの値より優先する。
    pub fn parse(text: &str, env_password: Option<String>) -> Result<Self> {
        let mut config: BotConfig = toml::from_str(text).context("failed to parse TOML")?;
        if let Some(password) = env_password.filter(|p| !p.is_empty()) {
            config.account.password = Some(password);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.account.login.trim().is_empty() {
            bail!("[account] login must not be empty");
        }
        if self.account.password.as_deref().is_none_or(str::is_empty) {
            bail!("no password: set [account] password or {PASSWORD_ENV}");
        }
        if !(self.server.base_url.starts_with("http://") || self.server.base_url.starts_with("https://")) {
            bail!("[server] base_url must be an http(s) URL: {}", self.server.base_url);
        }
        InvitationPolicy::new(&self.invitations.supported).with_context(|| {
            format!("[invitations] supported is not a valid pattern: {}", self.invitations.supported)
        })?;
        self.engine.path = resolve_executable(&self.engine.path).with_context(|| {
            format!("engine executable not found: {}", self.engine.path.display())
        })?;
        if self.engine.think_time_secs == 0 {
            bail!("[engine] think_time_secs must be positive");
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            login: self.account.login.clone(),
            password: self.account.password.clone().unwrap_or_default(),
        }
    }

    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.server.connect_timeout_secs),
            read: Duration::from_secs(self.server.read_timeout_secs),
        }
    }

    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            interval: Duration::from_secs(self.poll.interval_secs),
            transient_backoff: Duration::from_secs(self.poll.transient_backoff_secs),
            severe_backoff: Duration::from_secs(self.poll.severe_backoff_secs),
        }
    }

    pub fn invitation_policy(&self) -> Result<InvitationPolicy> {
        Ok(InvitationPolicy::new(&self.invitations.supported)?)
    }

    /// 通知を送る相手。通知無効なら `None`。
    pub fn notify_contact(&self) -> Option<String> {
        if self.invitations.notify {
            self.account.contact_id.clone().filter(|id| !id.trim().is_empty())
        } else {
            None
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        let options = engine
            .options
            .iter()
            .flat_map(|(command, entries)| {
                entries.iter().map(move |(name, value)| EngineOption {
                    command: command.clone(),
                    name: name.clone(),
                    value: value.clone(),
                })
            })
            .collect();
        EngineConfig {
            path: engine.path.clone(),
            args: engine.args.clone(),
            replay: engine.replay,
            show_board: engine.show_board,
            think_time: Duration::from_secs(engine.think_time_secs),
            timeout_margin: Duration::from_secs(engine.timeout_margin_secs),
            command_timeout: Duration::from_secs(engine.command_timeout_secs),
            options,
        }
    }
}

/// パス区切りを含むならそのまま、含まなければ `PATH` から探す。
fn resolve_executable(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search).map(|dir| dir.join(path)).find(|candidate| candidate.is_file())
}
