//! Sessions of the host application and the connectivity relay.

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::messages::HostMessage;

/// Opaque identifier of one open session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    /// Page the session currently shows, when known.
    pub url: Option<String>,
    /// Whether this engine controls the session.
    pub controlled: bool,
}

/// Open sessions of the host application.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn sessions(&self) -> Vec<SessionInfo>;

    /// Deliver a message to one session without waiting for a reply.
    async fn post(&self, session: &SessionId, message: &HostMessage) -> Result<(), SessionError>;

    /// Take control of every open session. Returns how many were claimed.
    async fn claim(&self) -> usize;

    async fn focus(&self, session: &SessionId) -> Result<(), SessionError>;

    /// Ask the host to open a new session at `url`.
    async fn open(&self, url: &str) -> Result<(), SessionError>;
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Post `message` to every open session.
///
/// Delivery is independent per session: a failure is logged and the
/// remaining sessions still receive the message.
pub async fn broadcast(sessions: &dyn SessionDirectory, message: &HostMessage) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for session in sessions.sessions().await {
        match sessions.post(&session.id, message).await {
            Ok(()) => {
                debug!(session = %session.id, "message posted");
                report.delivered += 1;
            }
            Err(err) => {
                warn!(session = %session.id, error = %err, "failed to post message");
                report.failed += 1;
            }
        }
    }

    report
}

/// Tell every session that connectivity is back.
pub async fn relay_connectivity_restored(sessions: &dyn SessionDirectory) -> BroadcastReport {
    let report = broadcast(sessions, &HostMessage::connectivity_restored()).await;
    info!(
        delivered = report.delivered,
        failed = report.failed,
        "relayed connectivity restoration"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Two sessions, the first of which has gone away.
    struct FlakySessions {
        posted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionDirectory for FlakySessions {
        async fn sessions(&self) -> Vec<SessionInfo> {
            ["gone", "alive"]
                .into_iter()
                .map(|id| SessionInfo {
                    id: SessionId::new(id),
                    url: None,
                    controlled: true,
                })
                .collect()
        }

        async fn post(
            &self,
            session: &SessionId,
            _message: &HostMessage,
        ) -> Result<(), SessionError> {
            if session.as_str() == "gone" {
                return Err(SessionError::Disconnected(session.to_string()));
            }
            self.posted.lock().unwrap().push(session.to_string());
            Ok(())
        }

        async fn claim(&self) -> usize {
            2
        }

        async fn focus(&self, _session: &SessionId) -> Result<(), SessionError> {
            Err(SessionError::Unsupported("focus sessions"))
        }

        async fn open(&self, _url: &str) -> Result<(), SessionError> {
            Err(SessionError::Unsupported("open sessions"))
        }
    }

    #[tokio::test]
    async fn one_failed_session_does_not_block_the_rest() {
        let sessions = FlakySessions {
            posted: Mutex::new(Vec::new()),
        };

        let report = relay_connectivity_restored(&sessions).await;

        assert_eq!(
            report,
            BroadcastReport {
                delivered: 1,
                failed: 1
            }
        );
        assert_eq!(*sessions.posted.lock().unwrap(), vec!["alive".to_string()]);
    }
}
