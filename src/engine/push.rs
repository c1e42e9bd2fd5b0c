//! Push notifications and notification clicks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::config::PushDefaults;
use super::error::{NotifyError, SessionError};
use super::relay::{SessionDirectory, SessionId};

/// Notification shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
}

impl Notification {
    /// Build the notification for a push, filling absent fields from
    /// `defaults`. A payload that is not a JSON object is logged and ignored.
    pub fn from_push(payload: Option<&[u8]>, defaults: &PushDefaults) -> Self {
        let payload = match payload {
            None => PushPayload::default(),
            Some(bytes) if bytes.is_empty() => PushPayload::default(),
            Some(bytes) => serde_json::from_slice(bytes).unwrap_or_else(|err| {
                warn!(error = %err, "push payload is not valid JSON, using defaults");
                PushPayload::default()
            }),
        };

        Self {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
        }
    }
}

/// Displays notifications on behalf of the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// A click on a notification shown by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationClick {
    /// Action button pressed, if any.
    #[serde(default)]
    pub action: Option<String>,
    /// Page to bring forward; defaults to the scope root.
    #[serde(default)]
    pub url: Option<String>,
}

const DISMISS_ACTION: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused(SessionId),
    Opened(String),
    Dismissed,
}

/// Bring the clicked page forward: focus a session already showing it,
/// otherwise open a new one.
pub async fn route_click(
    click: &NotificationClick,
    scope: &Url,
    sessions: &dyn SessionDirectory,
) -> Result<ClickOutcome, SessionError> {
    if click.action.as_deref() == Some(DISMISS_ACTION) {
        debug!("notification dismissed");
        return Ok(ClickOutcome::Dismissed);
    }

    let target = match click.url.as_deref() {
        Some(url) => scope
            .join(url)
            .map(String::from)
            .unwrap_or_else(|_| scope.to_string()),
        None => scope.to_string(),
    };

    let existing = sessions
        .sessions()
        .await
        .into_iter()
        .find(|session| session.url.as_deref() == Some(target.as_str()));

    if let Some(session) = existing {
        sessions.focus(&session.id).await?;
        info!(session = %session.id, url = %target, "focused session for notification");
        return Ok(ClickOutcome::Focused(session.id));
    }

    sessions.open(&target).await?;
    info!(url = %target, "opened session for notification");
    Ok(ClickOutcome::Opened(target))
}
