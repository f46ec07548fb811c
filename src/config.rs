//! Tunables of the sync engine, loaded once from an optional JSON file.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_SYNC_CONFIG_PATH";

/// Clock offset refresh settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSyncConfig {
    /// Minimum time between two round trips.
    pub min_interval: Duration,
    /// Failed round trips tolerated before giving up until reset.
    pub max_attempts: u32,
    /// Period of the background refresh.
    pub refresh_interval: Duration,
}

/// Realtime channel supervision settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Period of the staleness check.
    pub heartbeat_interval: Duration,
    /// Silence after which a connected channel raises a stale warning.
    pub stale_warning_after: Duration,
    /// Silence after which a connected channel is reconnected.
    pub stale_after: Duration,
    /// First reconnection delay.
    pub base_delay: Duration,
    /// Reconnection delay ceiling.
    pub max_delay: Duration,
    /// Retries scheduled per topic before giving up.
    pub max_reconnect_attempts: u32,
}

/// Complete runtime configuration of one live game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Clock offset settings.
    pub time_sync: TimeSyncConfig,
    /// Realtime channel settings.
    pub connection: ConnectionConfig,
    /// Minimum time between two non-forced state fetches.
    pub state_refresh_throttle: Duration,
    /// Countdown tick period.
    pub countdown_tick: Duration,
    /// Minimum time between two scheduled-game checks.
    pub checker_throttle: Duration,
    /// Minimum time between two leaderboard fetches.
    pub leaderboard_throttle: Duration,
    /// Minimum human-plausible time between two answer attempts.
    pub min_answer_interval: Duration,
    /// Start the game from the client when the waiting-room countdown ends.
    pub auto_start: bool,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(15),
            max_attempts: 3,
            refresh_interval: Duration::from_secs(300),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            stale_warning_after: Duration::from_secs(45),
            stale_after: Duration::from_secs(60),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            time_sync: TimeSyncConfig::default(),
            connection: ConnectionConfig::default(),
            state_refresh_throttle: Duration::from_secs(2),
            countdown_tick: Duration::from_millis(250),
            checker_throttle: Duration::from_secs(3),
            leaderboard_throttle: Duration::from_secs(1),
            min_answer_interval: Duration::from_millis(300),
            auto_start: false,
        }
    }
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        auto_start = config.auto_start,
                        "loaded sync configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse sync config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "sync config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read sync config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys keep their default value.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    time_sync_min_interval_ms: Option<u64>,
    time_sync_max_attempts: Option<u32>,
    time_sync_refresh_interval_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    stale_warning_after_ms: Option<u64>,
    stale_after_ms: Option<u64>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    state_refresh_throttle_ms: Option<u64>,
    countdown_tick_ms: Option<u64>,
    checker_throttle_ms: Option<u64>,
    leaderboard_throttle_ms: Option<u64>,
    min_answer_interval_ms: Option<u64>,
    auto_start: Option<bool>,
}

impl From<RawConfig> for SyncConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = SyncConfig::default();
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        Self {
            time_sync: TimeSyncConfig {
                min_interval: millis(
                    raw.time_sync_min_interval_ms,
                    defaults.time_sync.min_interval,
                ),
                max_attempts: raw
                    .time_sync_max_attempts
                    .unwrap_or(defaults.time_sync.max_attempts),
                refresh_interval: millis(
                    raw.time_sync_refresh_interval_ms,
                    defaults.time_sync.refresh_interval,
                ),
            },
            connection: ConnectionConfig {
                heartbeat_interval: millis(
                    raw.heartbeat_interval_ms,
                    defaults.connection.heartbeat_interval,
                ),
                stale_warning_after: millis(
                    raw.stale_warning_after_ms,
                    defaults.connection.stale_warning_after,
                ),
                stale_after: millis(raw.stale_after_ms, defaults.connection.stale_after),
                base_delay: millis(raw.reconnect_base_delay_ms, defaults.connection.base_delay),
                max_delay: millis(raw.reconnect_max_delay_ms, defaults.connection.max_delay),
                max_reconnect_attempts: raw
                    .max_reconnect_attempts
                    .unwrap_or(defaults.connection.max_reconnect_attempts),
            },
            state_refresh_throttle: millis(
                raw.state_refresh_throttle_ms,
                defaults.state_refresh_throttle,
            ),
            countdown_tick: millis(raw.countdown_tick_ms, defaults.countdown_tick),
            checker_throttle: millis(raw.checker_throttle_ms, defaults.checker_throttle),
            leaderboard_throttle: millis(raw.leaderboard_throttle_ms, defaults.leaderboard_throttle),
            min_answer_interval: millis(raw.min_answer_interval_ms, defaults.min_answer_interval),
            auto_start: raw.auto_start.unwrap_or(defaults.auto_start),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
