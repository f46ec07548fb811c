/// Local replay and timing checks in front of answer submission.
pub mod answer_guard;
/// Realtime channel multiplexing, heartbeat and reconnection.
pub mod connection_registry;
/// Drift-free waiting-room countdown.
pub mod countdown;
/// Latest accepted session snapshot and its transitions.
pub mod game_state_store;
/// Throttled ranked player list.
pub mod leaderboard_sync;
/// Pull-side polling asking the server to advance due sessions.
pub mod scheduled_checker;
/// Server clock offset estimation.
pub mod time_sync;
