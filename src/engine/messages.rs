//! Messages exchanged with host application sessions.

use serde::{Deserialize, Serialize};

/// Message posted from the engine to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    BackgroundSync { action: SyncAction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    SyncOfflineData,
}

impl HostMessage {
    /// Connectivity came back; sessions should flush their offline data.
    pub fn connectivity_restored() -> Self {
        Self::BackgroundSync {
            action: SyncAction::SyncOfflineData,
        }
    }
}

/// Command received from a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "CommandEnvelope")]
pub enum HostCommand {
    /// Promote a waiting version immediately.
    SkipWaiting,
    /// Anything else; ignored.
    Unknown(String),
}

#[derive(Deserialize)]
struct CommandEnvelope {
    #[serde(alias = "type")]
    kind: String,
}

impl From<CommandEnvelope> for HostCommand {
    fn from(envelope: CommandEnvelope) -> Self {
        match envelope.kind.as_str() {
            "SKIP_WAITING" => Self::SkipWaiting,
            _ => Self::Unknown(envelope.kind),
        }
    }
}
