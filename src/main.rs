//! `quiz-sync-watch`: follow one live game against the HTTP service and log
//! transitions, notifications, connectivity and ranking as they happen.

use std::{env, sync::Arc};

use anyhow::{Context, bail};
use futures::StreamExt;
use quiz_live_sync::{
    LiveGame, SyncConfig,
    dao::{
        http::{BackendConfig, HttpBackend},
        realtime::SseTransport,
    },
    state::{clock::SystemClock, session_machine::SessionStatus},
};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const GAME_ID_ENV: &str = "QUIZ_GAME_ID";
const LEADERBOARD_LINES: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let game_id = resolve_game_id()?;
    let config = SyncConfig::load();
    let backend_config = BackendConfig::from_env().context("reading service configuration")?;
    let backend = HttpBackend::connect(backend_config).context("building service client")?;
    info!(%game_id, base_url = backend.base_url(), "following live game");

    let transport = SseTransport::new(backend.clone());
    let game = LiveGame::create(
        game_id,
        Arc::new(backend),
        Arc::new(transport),
        config,
        Arc::new(SystemClock::new()),
    );

    let mut transitions = BroadcastStream::new(game.on_transition());
    let mut notifications = BroadcastStream::new(game.notifications());
    let mut leaderboard = WatchStream::from_changes(game.watch_leaderboard());
    let mut connection = WatchStream::from_changes(game.watch_connection());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            Some(transition) = transitions.next() => match transition {
                Ok(transition) => {
                    info!(
                        from = transition.previous.map(SessionStatus::as_str),
                        to = transition.current.as_str(),
                        question_index = transition.question_index,
                        "session transition"
                    );
                    if transition.current == SessionStatus::Finished {
                        log_leaderboard(&game.leaderboard());
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "transition stream lagged"),
            },
            Some(notification) = notifications.next() => match notification {
                Ok(notification) => info!(?notification, "notification"),
                Err(err) => warn!(error = %err, "notification stream lagged"),
            },
            Some(entries) = leaderboard.next() => log_leaderboard(&entries),
            Some(status) = connection.next() => info!(?status, "realtime connectivity"),
        }
    }

    game.destroy();
    Ok(())
}

/// Game id from the environment or the first argument.
fn resolve_game_id() -> anyhow::Result<Uuid> {
    let Some(raw) = env::var(GAME_ID_ENV).ok().or_else(|| env::args().nth(1)) else {
        bail!("no game id: set {GAME_ID_ENV} or pass it as first argument");
    };
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid game id `{raw}`"))
}

fn log_leaderboard(entries: &[quiz_live_sync::dto::leaderboard::LeaderboardEntry]) {
    for entry in entries.iter().take(LEADERBOARD_LINES) {
        info!(rank = entry.rank, name = %entry.name, points = entry.points, "leaderboard");
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,quiz_live_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
