//! Polling cycle tests against a scripted server

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use common::{ScriptedGenerator, ScriptedTransport, invitation_page, ok, record, sheet, status, Reply};
use lgbot_client::endpoints;
use lgbot_client::{
    Bot, BotError, BotSettings, BotState, GameServer, GameStage, InvitationDecision, InvitationPolicy,
    PollSchedule, SessionClient,
};
use lgbot_notation::{BoardFamily, MoveToken};

fn settings(family: BoardFamily, notify: Option<&str>) -> BotSettings {
    BotSettings {
        family,
        policy: InvitationPolicy::new("Hex").unwrap(),
        notify: notify.map(String::from),
        schedule: PollSchedule::default(),
    }
}

/// Loop timings in milliseconds: interval, transient backoff, severe backoff.
fn schedule(interval: u64, transient: u64, severe: u64) -> BotSettings {
    BotSettings {
        schedule: PollSchedule {
            interval: Duration::from_millis(interval),
            transient_backoff: Duration::from_millis(transient),
            severe_backoff: Duration::from_millis(severe),
        },
        ..settings(BoardFamily::Square, None)
    }
}

const LONG: u64 = 60_000;

fn bot<'a>(
    transport: &'a ScriptedTransport,
    generator: ScriptedGenerator,
    settings: BotSettings,
) -> Bot<&'a ScriptedTransport, ScriptedGenerator> {
    Bot::new(GameServer::new(SessionClient::new(transport, common::credentials())), generator, settings)
}

#[test]
fn answers_every_pending_game_in_order() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[101, 102], false)))
        .on("GET", &endpoints::game_record(101), ok(&record(13, &[("B", "fj"), ("W", "cb")])))
        .on("GET", &endpoints::game_record(102), ok(&record(13, &[])))
        .on("POST", &endpoints::send_move(101, "dd"), ok("sent"))
        .on("POST", &endpoints::send_move(102, "gg"), ok("sent"));
    let generator = ScriptedGenerator::new([Ok("d4".to_string()), Ok("g7".to_string())]);
    let mut bot = bot(&transport, generator, settings(BoardFamily::Square, None));

    let report = bot.poll_once().unwrap();
    assert_eq!(report.pending, 2);
    assert!(report.failures.is_empty());
    assert_eq!(
        report.moves_posted,
        [(101, MoveToken::Cell("dd".into())), (102, MoveToken::Cell("gg".into()))]
    );
    assert_eq!(bot.state(), BotState::ProcessingGames);
    assert_eq!(
        bot.generator().calls,
        [(13, vec!["f10".to_string(), "c2".to_string()]), (13, Vec::new())]
    );

    let post = transport.find("POST", &endpoints::send_move(101, "dd")).unwrap();
    assert_eq!(post.body.as_deref(), Some("message="));
    assert_eq!(post.cookie.as_deref(), Some(common::SESSION_COOKIE));
}

#[test]
fn hexagonal_record_is_translated_both_ways() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[7], false)))
        .on("GET", &endpoints::game_record(7), ok(&record(13, &[("B", "f10"), ("W", "c3")])))
        .on("POST", &endpoints::send_move(7, "c3"), ok("sent"));
    // c3 is its own image in both notations on the left half of the board
    let generator = ScriptedGenerator::new([Ok("c3".to_string())]);
    let mut bot = bot(&transport, generator, settings(BoardFamily::Hexagonal, None));

    let report = bot.poll_once().unwrap();
    assert_eq!(report.moves_posted.len(), 1, "{:?}", report.failures);
    assert_eq!(bot.generator().calls[0].1.len(), 2);
    assert_eq!(transport.count("POST", &endpoints::send_move(7, "c3")), 1);
}

#[test]
fn swap_answer_and_resign_are_forwarded() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[1, 2], false)))
        .on("GET", &endpoints::game_record(1), ok(&record(13, &[("B", "fj")])))
        .on("GET", &endpoints::game_record(2), ok(&record(13, &[("B", "fj"), ("W", "cb")])))
        .on("POST", &endpoints::send_move(1, "swap"), ok("sent"))
        .on("POST", &endpoints::send_move(2, "resign"), ok("sent"));
    let generator = ScriptedGenerator::new([Ok("swap-pieces".to_string()), Ok("resign".to_string())]);
    let mut bot = bot(&transport, generator, settings(BoardFamily::Square, None));

    let report = bot.poll_once().unwrap();
    assert_eq!(
        report.moves_posted,
        [(1, MoveToken::Swap), (2, MoveToken::Resign)]
    );
}

#[test]
fn failed_game_does_not_stop_the_cycle() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[11, 12], false)))
        .on("GET", &endpoints::game_record(11), ok(&record(11, &[("B", "aa")])))
        .on("GET", &endpoints::game_record(12), ok(&record(11, &[("B", "aa")])))
        .on("POST", &endpoints::send_move(12, "bb"), ok("sent"));
    let generator = ScriptedGenerator::new([
        Err(BotError::EngineProtocol("mohex: engine exited before answering".into())),
        Ok("b2".to_string()),
    ]);
    let mut bot = bot(&transport, generator, settings(BoardFamily::Square, None));

    let report = bot.poll_once().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].game_id, 11);
    assert_eq!(report.failures[0].stage, GameStage::Generate);
    assert_eq!(report.moves_posted, [(12, MoveToken::Cell("bb".into()))]);
    assert_eq!(transport.count("POST", &endpoints::send_move(11, "bb")), 0);
}

#[test]
fn bad_record_and_out_of_range_answer_are_per_game_failures() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[21, 22, 23, 24], false)))
        .on("GET", &endpoints::game_record(21), ok("(;FF[4];B[aa])"))
        .on("GET", &endpoints::game_record(22), ok(&record(5, &[])))
        .on("GET", &endpoints::game_record(23), status(500, "boom"))
        .on("GET", &endpoints::game_record(24), ok("(;FF[4]SZ[4294967295];B[a1])"));
    let generator = ScriptedGenerator::new([Ok("z9".to_string())]);
    let mut bot = bot(&transport, generator, settings(BoardFamily::Square, None));

    let report = bot.poll_once().unwrap();
    let stages: Vec<(u64, GameStage)> = report.failures.iter().map(|f| (f.game_id, f.stage)).collect();
    assert_eq!(
        stages,
        [
            (21, GameStage::FetchRecord),
            (22, GameStage::TranslateAnswer),
            (23, GameStage::FetchRecord),
            (24, GameStage::FetchRecord),
        ]
    );
    assert!(matches!(report.failures[2].error, BotError::Fetch { status: 500, .. }));
    // the failing record was fetched twice around a single re-login
    assert_eq!(transport.count("GET", &endpoints::game_record(23)), 2);
}

#[test]
fn invitations_are_decided_by_game_type() {
    for (game_type, decision) in [("Hex 13x13", InvitationDecision::Accept), ("Go 19x19", InvitationDecision::Refuse)] {
        let reply_path = endpoints::invitation_reply(555, decision.as_str());
        let transport = ScriptedTransport::new()
            .with_login()
            .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[], true)))
            .on("GET", endpoints::INVITATIONS, ok(&invitation_page(555, game_type)))
            .on("POST", endpoints::SEND_MESSAGE, ok("sent"))
            .on("GET", &reply_path, ok("done"));
        let mut bot = bot(&transport, ScriptedGenerator::default(), settings(BoardFamily::Square, Some("42")));

        let report = bot.poll_once().unwrap();
        assert_eq!(report.invitation, Some((555, decision)));
        assert_eq!(transport.count("GET", &reply_path), 1);

        let message = transport.find("POST", endpoints::SEND_MESSAGE).unwrap();
        let expected = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("message", &format!("{game_type} {}", decision.as_str()))
            .finish();
        let body = message.body.unwrap();
        assert!(body.contains(&expected), "{body}");
        assert!(body.ends_with("plto=42"), "{body}");
    }
}

#[test]
fn invitation_without_contact_sends_no_message() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[], true)))
        .on("GET", endpoints::INVITATIONS, ok(&invitation_page(9, "Hex 19x19")))
        .on("GET", &endpoints::invitation_reply(9, "accept"), ok("done"));
    let mut bot = bot(&transport, ScriptedGenerator::default(), settings(BoardFamily::Hexagonal, None));

    let report = bot.poll_once().unwrap();
    assert_eq!(report.invitation, Some((9, InvitationDecision::Accept)));
    assert_eq!(transport.count("POST", endpoints::SEND_MESSAGE), 0);
}

#[test]
fn rejected_login_escalates() {
    let transport = ScriptedTransport::new()
        .on("GET", endpoints::LOGIN, ok("login"))
        .on("POST", endpoints::LOGIN, status(401, "denied"));
    let mut bot = bot(&transport, ScriptedGenerator::default(), settings(BoardFamily::Square, None));
    assert!(matches!(bot.poll_once(), Err(BotError::Auth { status: 401 })));
    assert_eq!(transport.count("GET", endpoints::GAME_SHEET), 0);
}

#[test]
fn network_failure_during_a_game_escalates() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[31, 32], false)))
        .on("GET", &endpoints::game_record(31), Reply::Timeout);
    let mut bot = bot(&transport, ScriptedGenerator::default(), settings(BoardFamily::Square, None));

    let err = bot.poll_once().unwrap_err();
    assert!(err.is_transient(), "{err:?}");
    assert_eq!(transport.count("GET", &endpoints::game_record(32)), 0);
}

#[test]
fn unreadable_sheet_is_a_cycle_error() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok("<html>maintenance</html>"));
    let mut bot = bot(&transport, ScriptedGenerator::default(), settings(BoardFamily::Square, None));
    let err = bot.poll_once().unwrap_err();
    assert!(matches!(err, BotError::GameSheetFormat(_)));
    assert!(!err.escalates() && !err.is_transient());
}

#[test]
fn run_returns_and_logs_out_when_shutdown_is_set() {
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[], false)))
        .on("GET", endpoints::LOGOUT, ok("bye"));
    let mut bot = bot(&transport, ScriptedGenerator::default(), settings(BoardFamily::Square, None));
    assert!(!bot.poll_once().unwrap().made_moves());

    let shutdown = AtomicBool::new(true);
    bot.run(&shutdown);
    assert_eq!(bot.state(), BotState::Idle);
    assert_eq!(transport.count("GET", endpoints::LOGOUT), 1);
}

#[test]
fn run_polls_again_at_once_after_posting_a_move() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[1], false)))
        .on("GET", &endpoints::game_record(1), ok(&record(11, &[])))
        .on("POST", &endpoints::send_move(1, "aa"), ok("sent"))
        .on("GET", endpoints::LOGOUT, ok("bye"))
        .stop_after("GET", endpoints::GAME_SHEET, 3, shutdown.clone());
    let generator = ScriptedGenerator::new((0..3).map(|_| Ok("a1".to_string())));
    let mut bot = bot(&transport, generator, schedule(LONG, LONG, LONG));

    let start = Instant::now();
    bot.run(&shutdown);
    assert!(start.elapsed() < Duration::from_secs(10), "slept between cycles: {:?}", start.elapsed());
    assert_eq!(transport.count("GET", endpoints::GAME_SHEET), 3);
    assert_eq!(transport.count("POST", &endpoints::send_move(1, "aa")), 3);
    assert_eq!(transport.count("GET", endpoints::LOGOUT), 1);
    assert_eq!(bot.state(), BotState::Idle);
}

#[test]
fn run_sleeps_for_the_interval_after_an_idle_cycle() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[], false)))
        .on("GET", endpoints::LOGOUT, ok("bye"))
        .stop_after("GET", endpoints::GAME_SHEET, 3, shutdown.clone());
    let mut bot = bot(&transport, ScriptedGenerator::default(), schedule(100, LONG, LONG));

    let start = Instant::now();
    bot.run(&shutdown);
    let elapsed = start.elapsed();
    // two full intervals; the third is cut short by the flag
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    assert_eq!(transport.count("GET", endpoints::GAME_SHEET), 3);
    assert_eq!(bot.state(), BotState::Idle);
}

#[test]
fn run_uses_the_short_backoff_after_a_network_timeout() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, Reply::Timeout)
        .on("GET", endpoints::LOGOUT, ok("bye"))
        .stop_after("GET", endpoints::GAME_SHEET, 3, shutdown.clone());
    let mut bot = bot(&transport, ScriptedGenerator::default(), schedule(LONG, 20, LONG));

    let start = Instant::now();
    bot.run(&shutdown);
    assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
    assert_eq!(transport.count("GET", endpoints::GAME_SHEET), 3);
    assert_eq!(transport.count("POST", endpoints::LOGIN), 3);
    assert_eq!(bot.state(), BotState::Idle);
}

#[test]
fn run_uses_the_long_backoff_after_login_or_sheet_errors() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let rejected = ScriptedTransport::new()
        .on("GET", endpoints::LOGIN, ok("login"))
        .on("POST", endpoints::LOGIN, status(403, "denied"))
        .stop_after("POST", endpoints::LOGIN, 3, shutdown.clone());
    let mut locked_out = bot(&rejected, ScriptedGenerator::default(), schedule(LONG, LONG, 20));

    let start = Instant::now();
    locked_out.run(&shutdown);
    assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
    assert_eq!(rejected.count("POST", endpoints::LOGIN), 3);
    assert_eq!(rejected.count("GET", endpoints::GAME_SHEET), 0);
    // never logged in, so nothing to log out of
    assert_eq!(rejected.count("GET", endpoints::LOGOUT), 0);

    let shutdown = Arc::new(AtomicBool::new(false));
    let maintenance = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok("<html>maintenance</html>"))
        .on("GET", endpoints::LOGOUT, ok("bye"))
        .stop_after("GET", endpoints::GAME_SHEET, 3, shutdown.clone());
    let mut unreadable = bot(&maintenance, ScriptedGenerator::default(), schedule(LONG, LONG, 20));

    let start = Instant::now();
    unreadable.run(&shutdown);
    assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
    assert_eq!(maintenance.count("GET", endpoints::GAME_SHEET), 3);
    assert_eq!(maintenance.count("GET", endpoints::LOGOUT), 1);
    assert_eq!(unreadable.state(), BotState::Idle);
}

#[test]
fn shutdown_during_a_cycle_leaves_remaining_games_untouched() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport::new()
        .with_login()
        .on("GET", endpoints::GAME_SHEET, ok(&sheet(&[1, 2], false)))
        .on("GET", &endpoints::game_record(1), ok(&record(11, &[])))
        .on("GET", &endpoints::game_record(2), ok(&record(11, &[])))
        .on("POST", &endpoints::send_move(1, "aa"), ok("sent"))
        .on("GET", endpoints::LOGOUT, ok("bye"))
        .stop_after("POST", &endpoints::send_move(1, "aa"), 1, shutdown.clone());
    let generator = ScriptedGenerator::new([Ok("a1".to_string()), Ok("b2".to_string())]);
    let mut bot = bot(&transport, generator, schedule(LONG, LONG, LONG));

    bot.run(&shutdown);
    assert_eq!(bot.generator().calls.len(), 1);
    assert_eq!(transport.count("GET", &endpoints::game_record(2)), 0);
    assert_eq!(transport.count("GET", endpoints::GAME_SHEET), 1);
    assert_eq!(transport.count("GET", endpoints::LOGOUT), 1);
}
