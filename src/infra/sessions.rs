//! Session directory backed by server-sent event streams.
//!
//! Each connected page holds one SSE stream. Messages, claims, focus and
//! open requests are delivered as named events on that stream; the session
//! disappears from the directory when its stream is dropped. Notifications
//! are shown by broadcasting them to every connected page.

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use axum::response::{
    IntoResponse, Response,
    sse::{Event, KeepAlive, Sse},
};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{
    HostMessage, Notification, Notifier, NotifyError, SessionDirectory, SessionError, SessionId,
    SessionInfo,
};

/// Event delivered to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Message(HostMessage),
    Claimed,
    Focus,
    Open { url: String },
    Notification(Notification),
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Claimed => "claimed",
            Self::Focus => "focus",
            Self::Open { .. } => "open",
            Self::Notification(_) => "notification",
        }
    }

    fn data(&self) -> String {
        match self {
            Self::Message(message) => serde_json::to_string(message).unwrap_or_default(),
            Self::Claimed | Self::Focus => String::new(),
            Self::Open { url } => url.clone(),
            Self::Notification(notification) => {
                serde_json::to_string(notification).unwrap_or_default()
            }
        }
    }

    fn to_sse(&self) -> Event {
        Event::default().event(self.name()).data(self.data())
    }
}

struct SessionEntry {
    url: Option<String>,
    controlled: bool,
    sender: mpsc::UnboundedSender<SessionEvent>,
}

/// A freshly registered session and its event feed.
pub struct SessionConnection {
    pub id: SessionId,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session showing `url`.
    pub fn connect(&self, url: Option<String>) -> SessionConnection {
        let id = SessionId::new(Uuid::new_v4().to_string());
        let (sender, events) = mpsc::unbounded_channel();
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                url,
                controlled: false,
                sender,
            },
        );
        info!(session = %id, "session connected");
        SessionConnection { id, events }
    }

    pub fn disconnect(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            info!(session = %id, "session disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn send(&self, id: &SessionId, event: SessionEvent) -> Result<(), SessionError> {
        let delivered = match self.sessions.get(id) {
            Some(entry) => entry.sender.send(event).is_ok(),
            None => return Err(SessionError::Disconnected(id.to_string())),
        };
        if !delivered {
            self.disconnect(id);
            return Err(SessionError::Disconnected(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionDirectory for SessionHub {
    async fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                id: entry.key().clone(),
                url: entry.url.clone(),
                controlled: entry.controlled,
            })
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    async fn post(&self, session: &SessionId, message: &HostMessage) -> Result<(), SessionError> {
        self.send(session, SessionEvent::Message(message.clone()))
    }

    async fn claim(&self) -> usize {
        let mut claimed = 0;
        for mut entry in self.sessions.iter_mut() {
            entry.controlled = true;
            if entry.sender.send(SessionEvent::Claimed).is_ok() {
                claimed += 1;
            }
        }
        debug!(claimed, "sessions claimed");
        claimed
    }

    async fn focus(&self, session: &SessionId) -> Result<(), SessionError> {
        self.send(session, SessionEvent::Focus)
    }

    async fn open(&self, url: &str) -> Result<(), SessionError> {
        let target = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .min()
            .ok_or(SessionError::Unsupported(
                "open a window without a connected session",
            ))?;
        self.send(
            &target,
            SessionEvent::Open {
                url: url.to_string(),
            },
        )
    }
}

#[async_trait]
impl Notifier for SessionHub {
    async fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut shown = 0;
        for entry in self.sessions.iter() {
            if entry
                .sender
                .send(SessionEvent::Notification(notification.clone()))
                .is_ok()
            {
                shown += 1;
            }
        }
        if shown == 0 {
            return Err(NotifyError("no connected session to display it".to_string()));
        }
        info!(title = %notification.title, sessions = shown, "notification shown");
        Ok(())
    }
}

/// Removes the session when the stream is dropped.
struct Registration {
    hub: Arc<SessionHub>,
    id: SessionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.disconnect(&self.id);
    }
}

/// Register a session and stream its events.
///
/// The first event, `session`, carries the identifier assigned to it.
pub fn sse_response(hub: Arc<SessionHub>, url: Option<String>) -> Response {
    let SessionConnection { id, mut events } = hub.connect(url);
    let registration = Registration {
        hub,
        id: id.clone(),
    };

    let stream = stream! {
        let _registration = registration;
        yield Ok::<Event, Infallible>(Event::default().event("session").data(id.as_str()));
        while let Some(event) = events.recv().await {
            yield Ok(event.to_sse());
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posted_messages_reach_the_session_feed() {
        let hub = SessionHub::new();
        let mut connection = hub.connect(Some("http://127.0.0.1:3000/".to_string()));

        hub.post(&connection.id, &HostMessage::connectivity_restored())
            .await
            .expect("post");

        assert_eq!(
            connection.events.recv().await,
            Some(SessionEvent::Message(HostMessage::connectivity_restored()))
        );
    }

    #[tokio::test]
    async fn claim_marks_every_session_controlled() {
        let hub = SessionHub::new();
        let _first = hub.connect(None);
        let _second = hub.connect(None);

        assert_eq!(hub.claim().await, 2);
        assert!(hub.sessions().await.iter().all(|s| s.controlled));
    }

    #[tokio::test]
    async fn dropped_receiver_is_reported_and_forgotten() {
        let hub = SessionHub::new();
        let connection = hub.connect(None);
        let id = connection.id.clone();
        drop(connection);

        let err = hub
            .post(&id, &HostMessage::connectivity_restored())
            .await
            .expect_err("receiver gone");
        assert_eq!(err, SessionError::Disconnected(id.to_string()));
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn open_without_sessions_is_unsupported() {
        let hub = SessionHub::new();
        assert!(matches!(
            hub.open("http://127.0.0.1:3000/").await,
            Err(SessionError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn notifications_are_broadcast_to_sessions() {
        let hub = SessionHub::new();
        let notification = Notification {
            title: "Hello".to_string(),
            body: String::new(),
            icon: "/logo192.png".to_string(),
            badge: "/favicon.ico".to_string(),
        };
        assert!(hub.show(&notification).await.is_err());

        let mut connection = hub.connect(None);
        hub.show(&notification).await.expect("shown");
        assert_eq!(
            connection.events.recv().await,
            Some(SessionEvent::Notification(notification))
        );
    }

    #[test]
    fn message_events_carry_json() {
        let event = SessionEvent::Message(HostMessage::connectivity_restored());
        assert_eq!(event.name(), "message");
        assert_eq!(
            event.data(),
            r#"{"kind":"BACKGROUND_SYNC","action":"SYNC_OFFLINE_DATA"}"#
        );
    }
}
