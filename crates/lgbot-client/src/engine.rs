//! GTP エンジンのサブプロセス制御
//!
//! 1回の着手生成ごとにエンジンを新しく起動し、応答を受け取ったら終了させる。
//! エンジンの状態を対局間で持ち越さないので、クラッシュしても影響はその1手に閉じる。
//!
//! stdout は読み取りスレッドが行単位で channel に流し、タイムアウト付きで受け取る。
//! stderr は診断出力専用のスレッドがロガーへ流し続ける。これを読まないとパイプの
//! バッファが埋まった時点でエンジンが書き込みで止まる。

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lgbot_notation::Color;
use regex::Regex;
use serde::Deserialize;

use crate::error::{BotError, BotResult};

pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// genmove の応答として受け付けるトークン
static MOVE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([a-z][0-9]{1,2}|swap|swap-pieces|resign)$")
        .expect("invalid MOVE_TOKEN_RE pattern")
});

/// 稼働中エンジンのプロセスグループ ID (0 = なし)。Ctrl-C ハンドラから kill するために使う。
static LIVE_ENGINE_PGID: AtomicI32 = AtomicI32::new(0);

/// 稼働中のエンジンがあればプロセスグループごと強制終了する。シグナルハンドラから呼んでよい。
pub fn kill_live_engine() {
    let pgid = LIVE_ENGINE_PGID.swap(0, Ordering::SeqCst);
    if pgid > 0 {
        kill_process_group(pgid);
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: i32) {
    // SAFETY: kill(2) はメモリに触れない。負の pid はプロセスグループ指定。
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: i32) {}

/// 棋譜の再現方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayMode {
    /// `play b f10` を1手ずつ送る
    #[default]
    PerMove,
    /// `play-game f10 c3 ...` をまとめて1回送る
    Batched,
}

/// `<command> <name> <value>` 形式のエンジン調整コマンド
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOption {
    pub command: String,
    pub name: String,
    pub value: toml::Value,
}

impl EngineOption {
    pub fn to_command(&self) -> String {
        let value = match &self.value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            other => other.to_string(),
        };
        format!("{} {} {}", self.command, self.name, value)
    }
}

/// エンジンプロセス起動時の設定。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub replay: ReplayMode,
    /// 再現後に `showboard` を送ってログに残す
    pub show_board: bool,
    /// エンジン側に設定した思考時間
    pub think_time: Duration,
    /// 思考時間を超えてから打ち切るまでの猶予
    pub timeout_margin: Duration,
    /// genmove 以外のコマンドの応答待ち上限
    pub command_timeout: Duration,
    pub options: Vec<EngineOption>,
}

impl EngineConfig {
    pub fn genmove_timeout(&self) -> Duration {
        self.think_time.saturating_add(self.timeout_margin)
    }

    pub fn label(&self) -> String {
        engine_label_from_path(&self.path)
    }
}

pub fn engine_label_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Spawned,
    Configured,
    Replaying,
    AwaitingMove,
    Closed,
}

/// GTP の応答1件 (`= ...` / `? ...`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpResponse {
    pub success: bool,
    pub payload: String,
}

impl GtpResponse {
    /// 空行で区切られた応答ブロックを解釈する。
    pub fn parse(lines: &[String]) -> BotResult<Self> {
        let start = lines
            .iter()
            .position(|l| l.starts_with('=') || l.starts_with('?'))
            .ok_or_else(|| {
                BotError::EngineProtocol(format!("response without status marker: {lines:?}"))
            })?;
        let head = &lines[start];
        let success = head.starts_with('=');
        // `=12 f10` のような id 付き応答にも対応する
        let first = head[1..].trim_start_matches(|c: char| c.is_ascii_digit()).trim();
        let mut payload = first.to_string();
        for line in &lines[start + 1..] {
            payload.push('\n');
            payload.push_str(line);
        }
        Ok(Self {
            success,
            payload: payload.trim().to_string(),
        })
    }
}

/// 1本のエンジンプロセスに対する入出力をカプセル化する。
pub struct EngineBridge {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    rx: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    diagnostics: Option<JoinHandle<()>>,
    state: EngineState,
    label: String,
    replay_mode: ReplayMode,
    command_timeout: Duration,
    genmove_timeout: Duration,
    size: Option<u32>,
    replayed: Vec<String>,
    last_response: Option<String>,
}

impl EngineBridge {
    pub fn spawn(cfg: &EngineConfig) -> BotResult<Self> {
        let label = cfg.label();
        let spawn_error = |source: std::io::Error| BotError::EngineSpawn {
            path: cfg.path.display().to_string(),
            source,
        };

        let mut cmd = Command::new(&cfg.path);
        cmd.args(&cfg.args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        // 独立したプロセスグループで起動し、中断時にエンジンが孫プロセスごと残らないようにする
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BotError::EngineProtocol(format!("{label}: engine pipes unavailable")));
        };
        LIVE_ENGINE_PGID.store(i32::try_from(child.id()).unwrap_or(0), Ordering::SeqCst);

        let (tx, rx) = mpsc::channel::<String>();
        let reader = thread::Builder::new()
            .name(format!("{label}-stdout"))
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    match line {
                        Ok(l) => {
                            if tx.send(l).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
            .map_err(spawn_error);
        let diagnostics = reader.and_then(|reader| {
            spawn_diagnostic_drain(&label, stderr).map(|drain| (reader, drain)).map_err(spawn_error)
        });
        let (reader, diagnostics) = match diagnostics {
            Ok(handles) => handles,
            Err(e) => {
                kill_live_engine();
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        log::debug!("[{label}] spawned pid {}", child.id());
        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            rx,
            reader: Some(reader),
            diagnostics: Some(diagnostics),
            state: EngineState::Spawned,
            label,
            replay_mode: cfg.replay,
            command_timeout: cfg.command_timeout,
            genmove_timeout: cfg.genmove_timeout(),
            size: None,
            replayed: Vec::new(),
            last_response: None,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn replayed(&self) -> &[String] {
        &self.replayed
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// 盤サイズと調整コマンドを送る。調整コマンドの拒否は警告に留める。
    pub fn configure(&mut self, size: u32, options: &[EngineOption]) -> BotResult<()> {
        let response = self.command(&format!("boardsize {size}"), self.command_timeout)?;
        if !response.success {
            return Err(BotError::EngineProtocol(format!(
                "{}: boardsize {size} rejected: {}",
                self.label, response.payload
            )));
        }
        for option in options {
            let line = option.to_command();
            let response = self.command(&line, self.command_timeout)?;
            if !response.success {
                log::warn!("[{}] '{line}' rejected: {}", self.label, response.payload);
            }
        }
        self.size = Some(size);
        self.state = EngineState::Configured;
        Ok(())
    }

    /// 棋譜を先手から交互に再現する。
    pub fn replay(&mut self, moves: &[String]) -> BotResult<()> {
        self.state = EngineState::Replaying;
        match self.replay_mode {
            ReplayMode::PerMove => {
                for (ply, mv) in moves.iter().enumerate() {
                    self.expect_success(&format!("play {} {mv}", Color::for_ply(ply).gtp()))?;
                    self.replayed.push(mv.clone());
                }
            }
            ReplayMode::Batched => {
                if !moves.is_empty() {
                    self.expect_success(&format!("play-game {}", moves.join(" ")))?;
                    self.replayed.extend(moves.iter().cloned());
                }
            }
        }
        Ok(())
    }

    /// 診断用に盤面を表示させてログへ残す。
    pub fn show_board(&mut self) -> BotResult<()> {
        let response = self.command("showboard", self.command_timeout)?;
        let size = self.size.unwrap_or_default();
        log::debug!(
            "[{}] {size}x{size} board after {} moves:\n{}",
            self.label,
            self.replayed.len(),
            response.payload
        );
        Ok(())
    }

    /// 着手を生成させ、応答からトークン (マス / swap / resign) を取り出す。
    ///
    /// 時間内に応答がなければエンジンを kill して [`BotError::EngineTimeout`] を返す。
    pub fn genmove(&mut self, mover: Color) -> BotResult<String> {
        self.state = EngineState::AwaitingMove;
        let response = match self.command(&format!("genmove {}", mover.gtp()), self.genmove_timeout) {
            Ok(response) => response,
            Err(e @ BotError::EngineTimeout(_)) => {
                log::warn!("[{}] genmove timed out, killing engine", self.label);
                self.kill();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if !response.success {
            return Err(BotError::EngineProtocol(format!(
                "{}: genmove failed: {}",
                self.label, response.payload
            )));
        }
        let token = response.payload.split_whitespace().next().unwrap_or_default();
        if !MOVE_TOKEN_RE.is_match(token) {
            return Err(BotError::EngineProtocol(format!(
                "{}: unrecognised genmove answer '{}'",
                self.label, response.payload
            )));
        }
        let token = token.to_ascii_lowercase();
        self.last_response = Some(token.clone());
        Ok(token)
    }

    /// `quit` を送り、パイプを閉じ、プロセスと補助スレッドをすべて回収する。
    pub fn close(mut self) {
        self.shutdown(true);
    }

    /// 1コマンド送って応答ブロックを受け取る。
    pub fn command(&mut self, cmd: &str, timeout: Duration) -> BotResult<GtpResponse> {
        self.write_line(cmd)?;
        let lines = self.read_response(timeout)?;
        let response = GtpResponse::parse(&lines)?;
        log::trace!("[{}] {cmd} -> {}{}", self.label, if response.success { "= " } else { "? " }, response.payload);
        self.last_response = Some(response.payload.clone());
        Ok(response)
    }

    fn expect_success(&mut self, cmd: &str) -> BotResult<()> {
        let response = self.command(cmd, self.command_timeout)?;
        if response.success {
            Ok(())
        } else {
            Err(BotError::EngineProtocol(format!("{}: '{cmd}' rejected: {}", self.label, response.payload)))
        }
    }

    fn read_response(&self, timeout: Duration) -> BotResult<Vec<String>> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(line) => {
                    let line = line.trim_end_matches('\r');
                    if line.trim().is_empty() {
                        if lines.is_empty() {
                            continue;
                        }
                        return Ok(lines);
                    }
                    lines.push(line.to_string());
                }
                Err(RecvTimeoutError::Timeout) => return Err(BotError::EngineTimeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BotError::EngineProtocol(format!(
                        "{}: engine exited before answering",
                        self.label
                    )));
                }
            }
        }
    }

    fn write_line(&mut self, msg: &str) -> BotResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BotError::EngineProtocol(format!("{}: request channel closed", self.label)))?;
        let written = stdin
            .write_all(msg.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        written.map_err(|e| {
            BotError::EngineProtocol(format!("{}: failed to send '{msg}': {e}", self.label))
        })
    }

    fn kill(&mut self) {
        let pgid = i32::try_from(self.child.id()).unwrap_or(0);
        if pgid > 0 {
            let _ = LIVE_ENGINE_PGID.compare_exchange(pgid, 0, Ordering::SeqCst, Ordering::SeqCst);
            kill_process_group(pgid);
        }
        let _ = self.child.kill();
    }

    fn shutdown(&mut self, graceful: bool) {
        if self.state == EngineState::Closed {
            return;
        }
        if graceful && self.write_line("quit").is_ok() {
            let _ = self.read_response(ENGINE_QUIT_TIMEOUT);
        }
        // stdin を閉じればエンジンは EOF で終了するはず
        self.stdin.take();

        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        let mut exited = false;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                exited = true;
                break;
            }
            thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        if !exited {
            log::debug!("[{}] did not exit within {ENGINE_QUIT_TIMEOUT:?}", self.label);
        }
        // 本体が終了していても、同じグループに残った子がパイプを握ったままのことがある
        self.kill();
        let _ = self.child.wait();

        for handle in [self.reader.take(), self.diagnostics.take()].into_iter().flatten() {
            if handle.join().is_err() {
                log::warn!("[{}] engine I/O thread panicked", self.label);
            }
        }
        self.state = EngineState::Closed;
        log::debug!("[{}] closed", self.label);
    }
}

impl Drop for EngineBridge {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

fn spawn_diagnostic_drain<R: Read + Send + 'static>(
    label: &str,
    stream: R,
) -> std::io::Result<JoinHandle<()>> {
    let label = label.to_string();
    thread::Builder::new().name(format!("{label}-stderr")).spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(l) => log::debug!(target: "lgbot::engine", "[{label}] {l}"),
                Err(_) => break,
            }
        }
    })
}
