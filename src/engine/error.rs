//! Error taxonomy for the caching engine.
//!
//! Every failure is scoped to the single request or lifecycle phase that
//! produced it. Cache misses and skip-listed requests are not errors and
//! never show up here.

use thiserror::Error;

use super::lifecycle::LifecycleState;

/// Failure of the network collaborator to produce any response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network request failed: {0}")]
    Transport(String),
    #[error("network request timed out")]
    Timeout,
    #[error("network is unreachable")]
    Offline,
}

impl NetworkError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Failure reported by a cache storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded for namespace `{namespace}`")]
    QuotaExceeded { namespace: String },
    #[error("invalid namespace identifier `{0}`")]
    InvalidNamespace(String),
    #[error("failed to encode cache entry: {0}")]
    Encoding(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Short label used in logs and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InvalidNamespace(_) => "invalid_namespace",
            Self::Encoding(_) => "encoding",
            Self::Io(_) => "io",
        }
    }
}

/// Fatal outcome for a single intercepted request.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no response available for `{url}`")]
    NoFallbackAvailable {
        url: String,
        #[source]
        cause: NetworkError,
    },
}

/// Failure of an install or activation phase.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to fetch shell asset `{url}`: {reason}")]
    InstallAssetFailure { url: String, reason: String },
    #[error("invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("invalid shell asset path `{path}`: {reason}")]
    InvalidAsset { path: String, reason: String },
    #[error("cache storage failed during lifecycle phase: {0}")]
    Storage(#[from] StorageError),
}

/// Failure to reach a host application session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session `{0}` is no longer connected")]
    Disconnected(String),
    #[error("session directory cannot {0}")]
    Unsupported(&'static str),
}

/// Failure of the notification collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to display notification: {0}")]
pub struct NotifyError(pub String);
