/// Answer submission payloads.
pub mod answer;
/// Leaderboard rows and ranked entries.
pub mod leaderboard;
/// Realtime topics and change events.
pub mod realtime;
/// Live game session snapshots.
pub mod session;
