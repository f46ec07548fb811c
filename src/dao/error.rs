//! Error types shared by every backend and transport implementation.

use std::error::Error;

use thiserror::Error;

/// Convenient result alias returning [`BackendError`] failures.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures that can occur while calling the live game service.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Required environment variable is missing.
    #[error("missing live game service environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, bad header, etc).
    #[error("failed to build live game service client")]
    ClientBuilder {
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The request could not be sent or the connection dropped.
    #[error("failed to reach live game service at `{path}`")]
    Transport {
        path: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The service answered with an unexpected server-side status.
    #[error("unexpected live game service status {status} for `{path}`")]
    Status { path: String, status: u16 },
    /// The service refused the request; retrying it is not safe.
    #[error("live game service rejected `{path}` with status {status}: {message}")]
    Rejected {
        path: String,
        status: u16,
        message: String,
    },
    /// Response payload could not be decoded into the expected model.
    #[error("failed to decode live game service response for `{path}`")]
    Decode {
        path: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl BackendError {
    /// Construct a transport error from any network failure.
    pub fn transport(path: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        BackendError::Transport {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Construct a decode error from any parsing failure.
    pub fn decode(path: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        BackendError::Decode {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Whether the failure is a network hiccup that a later attempt may not hit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Transport { .. } | BackendError::Status { .. }
        )
    }
}
