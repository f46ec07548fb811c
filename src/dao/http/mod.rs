mod client;
mod config;

pub use client::HttpBackend;
pub use config::BackendConfig;
