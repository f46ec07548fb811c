//! Client-side synchronization engine for live quiz sessions: clock offset,
//! realtime channels, session snapshots, countdown, answer guard and leaderboard.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use error::{RejectionReason, SyncError};
pub use state::{LiveGame, SharedGame};
