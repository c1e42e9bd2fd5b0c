use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;
use waystation::engine::{
    CacheStorage, ClickOutcome, Engine, EngineConfig, EngineDeps, EngineError, EntryKey,
    FetchOutcome, FetchRequest, HostCommand, HostMessage, LifecycleError, LifecycleState,
    MemoryStorage, Method, Network, NetworkError, Notification, NotificationClick, Notifier,
    NotifyError, ResponseSnapshot, ResponseSource, Served, SessionDirectory, SessionError,
    SessionId, SessionInfo, StorageError,
};

const SCOPE: &str = "https://app.example.com/";

fn url(path: &str) -> Url {
    Url::parse(SCOPE)
        .and_then(|scope| scope.join(path))
        .expect("valid url")
}

fn ok(body: &'static str) -> ResponseSnapshot {
    ResponseSnapshot::new(
        200,
        vec![("content-type".to_string(), "text/plain".to_string())],
        body,
    )
}

/// Per-URL scripted upstream. Unscripted URLs answer 200 with the URL as body
/// until the network is switched off.
#[derive(Default)]
struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Result<ResponseSnapshot, NetworkError>>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    fn reply(&self, path: &str, reply: Result<ResponseSnapshot, NetworkError>) {
        self.replies
            .lock()
            .unwrap()
            .insert(url(path).to_string(), reply);
    }

    fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot, NetworkError> {
        let target = request.url.to_string();
        self.calls.lock().unwrap().push(target.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Offline);
        }
        if let Some(reply) = self.replies.lock().unwrap().get(&target) {
            return reply.clone();
        }
        Ok(ResponseSnapshot::new(200, Vec::new(), target))
    }
}

/// Records messages, claims, focus and open requests.
#[derive(Default)]
struct RecordingSessions {
    open: Mutex<Vec<SessionInfo>>,
    posted: Mutex<Vec<(String, HostMessage)>>,
    claims: Mutex<usize>,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    shown: Mutex<Vec<Notification>>,
}

impl RecordingSessions {
    fn with_sessions(entries: &[(&str, Option<&str>)]) -> Self {
        let sessions = Self::default();
        *sessions.open.lock().unwrap() = entries
            .iter()
            .map(|(id, page)| SessionInfo {
                id: SessionId::new(*id),
                url: page.map(|page| url(page).to_string()),
                controlled: false,
            })
            .collect();
        sessions
    }
}

#[async_trait]
impl SessionDirectory for RecordingSessions {
    async fn sessions(&self) -> Vec<SessionInfo> {
        self.open.lock().unwrap().clone()
    }

    async fn post(&self, session: &SessionId, message: &HostMessage) -> Result<(), SessionError> {
        self.posted
            .lock()
            .unwrap()
            .push((session.to_string(), message.clone()));
        Ok(())
    }

    async fn claim(&self) -> usize {
        *self.claims.lock().unwrap() += 1;
        let mut open = self.open.lock().unwrap();
        for session in open.iter_mut() {
            session.controlled = true;
        }
        open.len()
    }

    async fn focus(&self, session: &SessionId) -> Result<(), SessionError> {
        self.focused.lock().unwrap().push(session.to_string());
        Ok(())
    }

    async fn open(&self, url: &str) -> Result<(), SessionError> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingSessions {
    async fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Harness {
    engine: Engine,
    storage: Arc<MemoryStorage>,
    network: Arc<ScriptedNetwork>,
    sessions: Arc<RecordingSessions>,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(ScriptedNetwork::default()),
            Arc::new(RecordingSessions::default()),
        )
    }

    fn with_parts(
        config: EngineConfig,
        storage: Arc<MemoryStorage>,
        network: Arc<ScriptedNetwork>,
        sessions: Arc<RecordingSessions>,
    ) -> Self {
        let engine = Engine::new(
            config,
            EngineDeps {
                storage: storage.clone(),
                network: network.clone(),
                sessions: sessions.clone(),
                notifier: sessions.clone(),
            },
        );
        Self {
            engine,
            storage,
            network,
            sessions,
        }
    }

    async fn started(config: EngineConfig) -> Self {
        let harness = Self::new(config);
        let state = harness.engine.start().await.expect("engine starts");
        assert_eq!(state, LifecycleState::Active);
        harness.network.reset_calls();
        harness
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Served, EngineError> {
        match self.engine.handle_fetch(request).await? {
            FetchOutcome::Respond(served) => Ok(served),
            FetchOutcome::Passthrough => panic!("{} was passed through", request.url),
        }
    }
}

fn config() -> EngineConfig {
    EngineConfig::new(Url::parse(SCOPE).expect("valid scope"))
}

#[tokio::test]
async fn cached_shell_asset_is_served_without_network() {
    let harness = Harness::started(config()).await;

    let served = harness
        .fetch(&FetchRequest::get(url("/index.html")))
        .await
        .unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, url("/index.html").to_string());
    assert!(harness.network.calls().is_empty());
}

#[tokio::test]
async fn dynamic_response_is_stored_and_served_while_offline() {
    let harness = Harness::started(config()).await;
    harness
        .network
        .reply("/api/data", Ok(ok(r#"{"items":[1,2,3]}"#)));

    let online = harness
        .fetch(&FetchRequest::get(url("/api/data")))
        .await
        .unwrap();
    assert_eq!(online.source, ResponseSource::Network);
    assert_eq!(
        harness
            .storage
            .lookup("dynamic-v1", &EntryKey::get(&url("/api/data")))
            .await
            .unwrap(),
        Some(ok(r#"{"items":[1,2,3]}"#))
    );

    harness.network.go_offline();
    let offline = harness
        .fetch(&FetchRequest::get(url("/api/data")))
        .await
        .unwrap();
    assert_eq!(offline.source, ResponseSource::Stale);
    assert_eq!(offline.response, online.response);
}

#[tokio::test]
async fn transport_failure_serves_the_stored_entry() {
    let harness = Harness::started(config()).await;
    harness
        .storage
        .put(
            "dynamic-v1",
            EntryKey::get(&url("/reports/weekly")),
            ok("last week"),
        )
        .await
        .unwrap();
    harness
        .network
        .reply("/reports/weekly", Err(NetworkError::Timeout));

    let served = harness
        .fetch(&FetchRequest::get(url("/reports/weekly")))
        .await
        .unwrap();

    assert_eq!(served.source, ResponseSource::Stale);
    assert_eq!(served.response.body, "last week");
}

#[tokio::test]
async fn offline_navigation_falls_back_to_the_shell_document() {
    let harness = Harness::started(config()).await;
    harness.network.go_offline();
    let shell = harness
        .storage
        .lookup("static-v1", &EntryKey::get(&url("/index.html")))
        .await
        .unwrap()
        .expect("shell installed");

    // Dynamic route never visited before.
    let served = harness
        .fetch(&FetchRequest::navigation(url("/dashboard")))
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Shell);
    assert_eq!(served.response, shell);

    // Shell path with a query string has no exact entry of its own.
    let served = harness
        .fetch(&FetchRequest::navigation(url("/?utm_source=mail")))
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Shell);
    assert_eq!(served.response, shell);
}

#[tokio::test]
async fn offline_subresource_without_entry_fails() {
    let harness = Harness::started(config()).await;
    harness.network.go_offline();

    let err = harness
        .fetch(&FetchRequest::get(url("/api/unseen")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::NoFallbackAvailable {
            cause: NetworkError::Offline,
            ..
        }
    ));
}

#[tokio::test]
async fn server_error_without_entry_is_returned_unchanged() {
    let harness = Harness::started(config()).await;
    let unavailable = ResponseSnapshot::new(503, Vec::new(), "maintenance");
    harness
        .network
        .reply("/api/data", Ok(unavailable.clone()));

    let served = harness
        .fetch(&FetchRequest::get(url("/api/data")))
        .await
        .unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response, unavailable);
    assert!(harness.storage.is_empty("dynamic-v1"));
}

#[tokio::test]
async fn activation_prunes_exactly_the_stale_namespaces() {
    let mut config = config();
    config.versions.static_version = "v2".to_string();

    let storage = Arc::new(MemoryStorage::new());
    for namespace in ["static-v1", "dynamic-v1", "static-v2"] {
        storage
            .put(namespace, EntryKey::get(&url("/seed")), ok(namespace))
            .await
            .unwrap();
    }
    let harness = Harness::with_parts(
        config,
        storage,
        Arc::new(ScriptedNetwork::default()),
        Arc::new(RecordingSessions::default()),
    );

    harness.engine.install().await.unwrap();
    let report = harness.engine.activate().await.unwrap();

    assert_eq!(report.pruned, vec!["static-v1".to_string()]);
    assert!(report.failed.is_empty());
    let remaining = harness.storage.namespaces().await.unwrap();
    assert_eq!(
        remaining,
        vec!["dynamic-v1".to_string(), "static-v2".to_string()]
    );
    assert_eq!(harness.storage.len("dynamic-v1"), 1);
}

#[tokio::test]
async fn skip_listed_requests_never_touch_the_cache() {
    let harness = Harness::started(config()).await;
    let before = harness.storage.namespaces().await.unwrap();

    let requests = [
        FetchRequest::get(url("/sites/hr/_api/web/lists")),
        FetchRequest::get(Url::parse("https://graph.microsoft.com/v1.0/me").unwrap()),
        FetchRequest::new(Method::Post, url("/api/data")).with_body("{}"),
    ];
    for request in &requests {
        let outcome = harness.engine.handle_fetch(request).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Passthrough, "{}", request.url);
    }

    assert_eq!(harness.storage.namespaces().await.unwrap(), before);
    assert!(harness.storage.is_empty("dynamic-v1"));
    assert!(harness.network.calls().is_empty());
}

#[tokio::test]
async fn requests_pass_through_until_activation() {
    let harness = Harness::new(config());
    let request = FetchRequest::get(url("/index.html"));

    assert_eq!(
        harness.engine.handle_fetch(&request).await.unwrap(),
        FetchOutcome::Passthrough
    );

    harness.engine.install().await.unwrap();
    assert_eq!(harness.engine.state(), LifecycleState::Installed);
    assert_eq!(
        harness.engine.handle_fetch(&request).await.unwrap(),
        FetchOutcome::Passthrough
    );

    let report = harness.engine.activate().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(*harness.sessions.claims.lock().unwrap(), 1);
    assert!(matches!(
        harness.engine.handle_fetch(&request).await.unwrap(),
        FetchOutcome::Respond(_)
    ));
}

#[tokio::test]
async fn install_is_idempotent_over_shared_storage() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(ScriptedNetwork::default());
    let sessions = Arc::new(RecordingSessions::default());

    for _ in 0..2 {
        let harness =
            Harness::with_parts(config(), storage.clone(), network.clone(), sessions.clone());
        harness.engine.install().await.unwrap();
    }

    let assets = config().shell_assets.len();
    assert_eq!(storage.len("static-v1"), assets);
    assert_eq!(storage.keys("static-v1").await.unwrap().len(), assets);
}

#[tokio::test]
async fn failed_install_leaves_instance_redundant_and_storage_untouched() {
    let harness = Harness::new(config());
    harness
        .network
        .reply("/static/js/main.chunk.js", Ok(ResponseSnapshot::new(404, Vec::new(), "")));

    let err = harness.engine.install().await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::InstallAssetFailure { ref url, .. } if url.ends_with("/static/js/main.chunk.js")
    ));
    assert_eq!(harness.engine.state(), LifecycleState::Redundant);
    assert!(harness.storage.is_empty("static-v1"));
    assert!(matches!(
        harness.engine.activate().await,
        Err(LifecycleError::InvalidTransition {
            from: LifecycleState::Redundant,
            to: LifecycleState::Activating,
        })
    ));
}

#[tokio::test]
async fn offline_restart_activates_from_the_stored_shell() {
    let storage = Arc::new(MemoryStorage::new());
    let sessions = Arc::new(RecordingSessions::default());
    let previous = Harness::with_parts(
        config(),
        storage.clone(),
        Arc::new(ScriptedNetwork::default()),
        sessions.clone(),
    );
    previous.engine.start().await.unwrap();

    let offline = Arc::new(ScriptedNetwork::default());
    offline.go_offline();
    let restarted = Harness::with_parts(config(), storage.clone(), offline.clone(), sessions);

    let state = restarted.engine.start().await.unwrap();
    assert_eq!(state, LifecycleState::Active);

    let served = restarted
        .fetch(&FetchRequest::get(url("/index.html")))
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, url("/index.html").to_string());

    let served = restarted
        .fetch(&FetchRequest::navigation(url("/dashboard")))
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Shell);
    assert_eq!(storage.len("static-v1"), config().shell_assets.len());
}

#[tokio::test]
async fn offline_install_with_incomplete_stored_shell_is_redundant() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .put("static-v1", EntryKey::get(&url("/index.html")), ok("shell"))
        .await
        .unwrap();
    let network = Arc::new(ScriptedNetwork::default());
    network.go_offline();
    let harness = Harness::with_parts(
        config(),
        storage.clone(),
        network,
        Arc::new(RecordingSessions::default()),
    );

    let err = harness.engine.start().await.unwrap_err();

    assert!(matches!(err, LifecycleError::InstallAssetFailure { .. }));
    assert_eq!(harness.engine.state(), LifecycleState::Redundant);
    assert_eq!(storage.len("static-v1"), 1);
}

#[tokio::test]
async fn storage_failure_mid_install_discards_the_new_namespace() {
    let storage = Arc::new(MemoryStorage::with_max_entries(NonZeroUsize::new(3).unwrap()));
    let harness = Harness::with_parts(
        config(),
        storage.clone(),
        Arc::new(ScriptedNetwork::default()),
        Arc::new(RecordingSessions::default()),
    );
    assert!(config().shell_assets.len() > 3);

    let err = harness.engine.install().await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::Storage(StorageError::QuotaExceeded { ref namespace }) if namespace == "static-v1"
    ));
    assert_eq!(harness.engine.state(), LifecycleState::Redundant);
    assert!(storage.namespaces().await.unwrap().is_empty());
    assert!(storage.is_empty("static-v1"));
}

#[tokio::test]
async fn skip_waiting_message_promotes_a_waiting_version() {
    let sessions = Arc::new(RecordingSessions::with_sessions(&[("tab-1", Some("/"))]));
    let harness = Harness::with_parts(
        config(),
        Arc::new(MemoryStorage::new()),
        Arc::new(ScriptedNetwork::default()),
        sessions,
    );
    harness.engine.install().await.unwrap();

    let report = harness
        .engine
        .handle_message(HostCommand::SkipWaiting)
        .await
        .unwrap()
        .expect("waiting version activated");

    assert_eq!(report.claimed, 1);
    assert_eq!(harness.engine.state(), LifecycleState::Active);
    assert!(harness.sessions.open.lock().unwrap()[0].controlled);

    // Already active: recorded, nothing to do.
    assert_eq!(
        harness
            .engine
            .handle_message(HostCommand::SkipWaiting)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn unknown_messages_are_ignored() {
    let harness = Harness::new(config());
    let outcome = harness
        .engine
        .handle_message(HostCommand::Unknown("REFRESH".to_string()))
        .await
        .unwrap();

    assert_eq!(outcome, None);
    assert_eq!(harness.engine.state(), LifecycleState::Uninstalled);
}

#[tokio::test]
async fn sync_tag_relays_connectivity_to_every_session() {
    let sessions = Arc::new(RecordingSessions::with_sessions(&[
        ("tab-1", Some("/")),
        ("tab-2", Some("/dashboard")),
    ]));
    let harness = Harness::with_parts(
        config(),
        Arc::new(MemoryStorage::new()),
        Arc::new(ScriptedNetwork::default()),
        sessions,
    );

    assert_eq!(harness.engine.handle_sync("periodic-refresh").await, None);
    assert!(harness.sessions.posted.lock().unwrap().is_empty());

    let report = harness
        .engine
        .handle_sync("sync-offline-data")
        .await
        .expect("configured tag relays");
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 0);

    let posted = harness.sessions.posted.lock().unwrap().clone();
    assert_eq!(
        posted,
        vec![
            ("tab-1".to_string(), HostMessage::connectivity_restored()),
            ("tab-2".to_string(), HostMessage::connectivity_restored()),
        ]
    );
}

#[tokio::test]
async fn push_shows_notification_with_defaults() {
    let harness = Harness::new(config());

    let notification = harness
        .engine
        .handle_push(Some(br#"{"body":"2 approvals waiting"}"#))
        .await
        .unwrap();

    assert_eq!(notification.title, "New notification");
    assert_eq!(notification.body, "2 approvals waiting");
    assert_eq!(notification.icon, "/logo192.png");
    assert_eq!(notification.badge, "/favicon.ico");
    assert_eq!(*harness.sessions.shown.lock().unwrap(), vec![notification]);
}

#[tokio::test]
async fn notification_click_focuses_matching_session_or_opens_one() {
    let sessions = Arc::new(RecordingSessions::with_sessions(&[
        ("tab-1", Some("/")),
        ("tab-2", Some("/inbox")),
    ]));
    let harness = Harness::with_parts(
        config(),
        Arc::new(MemoryStorage::new()),
        Arc::new(ScriptedNetwork::default()),
        sessions,
    );

    let click = NotificationClick {
        action: None,
        url: Some("/inbox".to_string()),
    };
    assert_eq!(
        harness.engine.handle_notification_click(&click).await.unwrap(),
        ClickOutcome::Focused(SessionId::new("tab-2"))
    );

    let click = NotificationClick {
        action: None,
        url: Some("/approvals".to_string()),
    };
    assert_eq!(
        harness.engine.handle_notification_click(&click).await.unwrap(),
        ClickOutcome::Opened(url("/approvals").to_string())
    );

    let dismiss = NotificationClick {
        action: Some("close".to_string()),
        url: Some("/inbox".to_string()),
    };
    assert_eq!(
        harness
            .engine
            .handle_notification_click(&dismiss)
            .await
            .unwrap(),
        ClickOutcome::Dismissed
    );

    assert_eq!(*harness.sessions.focused.lock().unwrap(), vec!["tab-2"]);
    assert_eq!(
        *harness.sessions.opened.lock().unwrap(),
        vec![url("/approvals").to_string()]
    );
}
