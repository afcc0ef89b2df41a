//! 巡回ループ
//!
//! ログイン → ゲームシート取得 → 招待への回答 → 手番の対局を1局ずつ処理、を繰り返す。
//! 1局の失敗はその対局だけで止め、次の対局へ進む。認証と通信の失敗だけが巡回を中断する。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use lgbot_notation::{BoardFamily, CoordinateTranslator, MoveToken};
use regex::Regex;

use crate::error::{BotError, BotResult};
use crate::generator::MoveGenerator;
use crate::server::{GameServer, InvitationDecision};
use crate::transport::Transport;

/// 停止フラグを確認する間隔
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    LoggingIn,
    Polling,
    ProcessingGames,
    Sleeping,
    TransientError,
    SevereError,
}

/// 招待を受けるかどうかをゲーム種別で決める。
#[derive(Debug, Clone)]
pub struct InvitationPolicy {
    pattern: Regex,
}

impl InvitationPolicy {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn accepts(&self, game_type: &str) -> bool {
        self.pattern.is_match(game_type)
    }

    pub fn decide(&self, game_type: &str) -> InvitationDecision {
        if self.accepts(game_type) {
            InvitationDecision::Accept
        } else {
            InvitationDecision::Refuse
        }
    }
}

/// 巡回間隔と失敗時の待機時間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub transient_backoff: Duration,
    pub severe_backoff: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            transient_backoff: Duration::from_secs(30),
            severe_backoff: Duration::from_secs(300),
        }
    }
}

/// 1局の処理のどこで失敗したか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStage {
    FetchRecord,
    Translate,
    Generate,
    TranslateAnswer,
    Submit,
}

impl fmt::Display for GameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GameStage::FetchRecord => "fetch-record",
            GameStage::Translate => "translate",
            GameStage::Generate => "generate",
            GameStage::TranslateAnswer => "translate-answer",
            GameStage::Submit => "submit",
        })
    }
}

#[derive(Debug)]
pub struct GameFailure {
    pub game_id: u64,
    pub stage: GameStage,
    pub error: BotError,
}

impl fmt::Display for GameFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "game {} [{}]: {}", self.game_id, self.stage, self.error)
    }
}

/// 1巡回の結果
#[derive(Debug, Default)]
pub struct CycleReport {
    pub pending: usize,
    /// 送信できた着手 (対局 ID, サーバー表記)
    pub moves_posted: Vec<(u64, MoveToken)>,
    pub failures: Vec<GameFailure>,
    pub invitation: Option<(u64, InvitationDecision)>,
}

impl CycleReport {
    pub fn made_moves(&self) -> bool {
        !self.moves_posted.is_empty()
    }
}

pub struct BotSettings {
    pub family: BoardFamily,
    pub policy: InvitationPolicy,
    /// 招待への回答を知らせる相手。`None` なら通知しない。
    pub notify: Option<String>,
    pub schedule: PollSchedule,
}

pub struct Bot<T, G> {
    server: GameServer<T>,
    generator: G,
    settings: BotSettings,
    state: BotState,
}

impl<T: Transport, G: MoveGenerator> Bot<T, G> {
    pub fn new(server: GameServer<T>, generator: G, settings: BotSettings) -> Self {
        Self {
            server,
            generator,
            settings,
            state: BotState::Idle,
        }
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn logout(&mut self) -> BotResult<()> {
        self.state = BotState::Idle;
        self.server.logout()
    }

    /// 1巡回ぶん処理する。
    pub fn poll_once(&mut self) -> BotResult<CycleReport> {
        self.cycle(None)
    }

    /// 停止フラグが立っていれば、残りの対局には手を付けずに巡回を終える。
    fn cycle(&mut self, shutdown: Option<&AtomicBool>) -> BotResult<CycleReport> {
        self.state = BotState::LoggingIn;
        self.server.login()?;

        self.state = BotState::Polling;
        let sheet = self.server.game_sheet()?;
        let mut report = CycleReport {
            pending: sheet.pending_ids.len(),
            ..CycleReport::default()
        };

        if sheet.invitations_pending {
            match self.answer_invitation() {
                Ok(answer) => report.invitation = Some(answer),
                Err(e) if e.escalates() => return Err(e),
                Err(e) => log::warn!("invitation: {e}"),
            }
        }

        self.state = BotState::ProcessingGames;
        for (done, game_id) in sheet.pending_ids.into_iter().enumerate() {
            if shutdown.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                log::info!("shutdown requested, leaving {} game(s) for later", report.pending - done);
                break;
            }
            match self.process_game(game_id) {
                Ok(token) => report.moves_posted.push((game_id, token)),
                Err(failure) if failure.error.escalates() => return Err(failure.error),
                Err(failure) => {
                    log::warn!("{failure}");
                    report.failures.push(failure);
                }
            }
        }
        Ok(report)
    }

    /// 1局ぶん: 棋譜取得 → エンジン表記へ変換 → 着手生成 → サーバー表記へ戻す → 送信。
    pub fn process_game(&mut self, game_id: u64) -> Result<MoveToken, GameFailure> {
        let fail = move |stage: GameStage| move |error: BotError| GameFailure { game_id, stage, error };

        let record = self.server.game_record(game_id).map_err(fail(GameStage::FetchRecord))?;
        let mut translator = CoordinateTranslator::new(self.settings.family, record.size);
        let engine_moves = translator
            .to_engine(&record.moves)
            .map_err(|e| fail(GameStage::Translate)(e.into()))?;
        log::info!(
            "game {game_id}: size {} with {} moves{}, {:?} to move",
            record.size,
            record.moves.len(),
            if translator.swap_applied() { " (swapped)" } else { "" },
            record.side_to_move()
        );

        let answer = self
            .generator
            .genmove(record.size, &engine_moves)
            .map_err(fail(GameStage::Generate))?;
        let token = translator
            .from_engine(&answer)
            .map_err(|e| fail(GameStage::TranslateAnswer)(e.into()))?;

        self.server.post_move(game_id, &token, "").map_err(fail(GameStage::Submit))?;
        log::info!("game {game_id}: engine answered {answer}, sent {token}");
        Ok(token)
    }

    /// 停止フラグが立つまで巡回を続ける。エラーでは終了しない。
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            let pause = match self.cycle(Some(shutdown)) {
                Ok(report) if report.made_moves() => {
                    log::info!(
                        "sent {} move(s), {} failure(s); polling again",
                        report.moves_posted.len(),
                        report.failures.len()
                    );
                    continue;
                }
                Ok(report) => {
                    self.state = BotState::Sleeping;
                    if report.pending == 0 {
                        log::info!("no games waiting, sleeping {:?}", self.settings.schedule.interval);
                    } else {
                        log::info!(
                            "{} game(s) waiting, none answered, sleeping {:?}",
                            report.pending,
                            self.settings.schedule.interval
                        );
                    }
                    self.settings.schedule.interval
                }
                Err(e) if e.is_transient() => {
                    self.state = BotState::TransientError;
                    log::warn!("{e}; retrying in {:?}", self.settings.schedule.transient_backoff);
                    self.settings.schedule.transient_backoff
                }
                Err(e) => {
                    self.state = BotState::SevereError;
                    log::error!("{e}; retrying in {:?}", self.settings.schedule.severe_backoff);
                    self.settings.schedule.severe_backoff
                }
            };
            sleep_unless_shutdown(pause, shutdown);
        }

        if let Err(e) = self.logout() {
            log::warn!("logout failed: {e}");
        }
        log::info!("stopped");
    }

    fn answer_invitation(&mut self) -> BotResult<(u64, InvitationDecision)> {
        let invitation = self.server.invitation()?;
        let decision = self.settings.policy.decide(&invitation.game_type);
        log::info!(
            "invitation {} from {} for '{}': {}",
            invitation.id,
            invitation.opponent,
            invitation.game_type,
            decision.as_str()
        );
        if let Some(contact) = &self.settings.notify {
            let message = format!("{} {}", invitation.game_type, decision.as_str());
            if let Err(e) = self.server.send_message(contact, "New invitation", &message) {
                if e.escalates() {
                    return Err(e);
                }
                log::warn!("could not notify {contact}: {e}");
            }
        }
        self.server.reply_invitation(invitation.id, decision)?;
        Ok((invitation.id, decision))
    }
}

/// 停止フラグを見ながら眠る。停止が要求されたら途中で戻る。
fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(SHUTDOWN_POLL_INTERVAL));
    }
}
