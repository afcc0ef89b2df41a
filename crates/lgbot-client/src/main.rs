/// LittleGolem 対局ボット。
///
/// ```shell
/// LGBOT_PASSWORD=... cargo run -p lgbot-client --release -- --config lgbot.toml
/// ```
///
/// 1回だけ巡回して終了する (cron 等から起動する場合):
/// ```shell
/// cargo run -p lgbot-client --release -- --config lgbot.toml --once
/// ```
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser as _;

use lgbot_client::{
    Bot, BotConfig, BotSettings, GameServer, GtpMoveGenerator, HttpTransport, SessionClient,
    kill_live_engine,
};

#[derive(clap::Parser, Debug)]
#[command(about = "LittleGolem bot driving a GTP engine")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', default_value = "lgbot.toml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single polling cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .target(env_logger::Target::Stderr)
        .init();

    let config = BotConfig::load(&cli.config)?;
    let transport = HttpTransport::new(
        &config.server.base_url,
        config.http_timeouts(),
        &config.server.user_agent,
    )?;
    let server = GameServer::new(SessionClient::new(transport, config.credentials()));
    let settings = BotSettings {
        family: config.game.family,
        policy: config.invitation_policy()?,
        notify: config.notify_contact(),
        schedule: config.poll_schedule(),
    };
    let generator = GtpMoveGenerator::new(config.engine_config());
    log::info!(
        "{} on {} with engine {} ({:?})",
        config.account.login,
        config.server.base_url,
        config.engine.path.display(),
        config.game.family
    );
    let mut bot = Bot::new(server, generator, settings);

    // エンジンは別プロセスグループなので、端末や supervisor からのシグナルは届かない。
    // SIGINT / SIGTERM / SIGHUP のいずれでも、ここで明示的に kill する。
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            kill_live_engine();
            if shutdown.swap(true, Ordering::SeqCst) {
                eprintln!("\nInterrupted again, exiting");
                process::exit(130);
            }
            eprintln!("\nShutting down after the current step (Ctrl-C again to exit now)...");
        })
        .context("Failed to set signal handler")?;
    }

    if cli.once {
        let report = bot.poll_once();
        if let Err(e) = bot.logout() {
            log::warn!("logout failed: {e}");
        }
        let report = report?;
        log::info!(
            "{} pending, {} move(s) sent, {} failure(s)",
            report.pending,
            report.moves_posted.len(),
            report.failures.len()
        );
        return Ok(());
    }

    bot.run(&shutdown);
    Ok(())
}
