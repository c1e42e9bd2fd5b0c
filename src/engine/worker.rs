//! The engine: one versioned instance wired to its collaborators.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use super::classify::{Classification, RequestClassifier};
use super::config::EngineConfig;
use super::error::{EngineError, LifecycleError, NotifyError, SessionError};
use super::lifecycle::{
    ActivationReport, InstallReport, LifecycleContext, LifecycleController, LifecycleState,
};
use super::messages::HostCommand;
use super::metrics::METRIC_BYPASS;
use super::namespace::NamespaceRegistry;
use super::network::Network;
use super::push::{ClickOutcome, Notification, NotificationClick, Notifier, route_click};
use super::relay::{BroadcastReport, SessionDirectory, relay_connectivity_restored};
use super::request::{EntryKey, FetchRequest, Served};
use super::store::CacheStorage;
use super::strategy::StrategyContext;

/// Collaborators injected into an [`Engine`].
#[derive(Clone)]
pub struct EngineDeps {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub sessions: Arc<dyn SessionDirectory>,
    pub notifier: Arc<dyn Notifier>,
}

/// What the host should do with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not handled; the request goes to the network untouched.
    Passthrough,
    Respond(Served),
}

pub struct Engine {
    config: EngineConfig,
    namespaces: NamespaceRegistry,
    classifier: RequestClassifier,
    shell_key: Option<EntryKey>,
    lifecycle: LifecycleController,
    deps: EngineDeps,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let namespaces = NamespaceRegistry::new(&config);
        let classifier = RequestClassifier::new(&config);
        let shell_key = match config.shell_document_url() {
            Ok(url) => Some(EntryKey::get(&url)),
            Err(err) => {
                warn!(
                    shell_document = %config.shell_document,
                    error = %err,
                    "shell document does not resolve, navigation fallback disabled"
                );
                None
            }
        };

        Self {
            config,
            namespaces,
            classifier,
            shell_key,
            lifecycle: LifecycleController::new(),
            deps,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn storage(&self) -> &dyn CacheStorage {
        self.deps.storage.as_ref()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn classify(&self, request: &FetchRequest) -> Classification {
        self.classifier.classify(request)
    }

    fn lifecycle_context(&self) -> LifecycleContext<'_> {
        LifecycleContext {
            config: &self.config,
            namespaces: &self.namespaces,
            storage: self.deps.storage.as_ref(),
            network: self.deps.network.as_ref(),
            sessions: self.deps.sessions.as_ref(),
        }
    }

    pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
        self.lifecycle.install(&self.lifecycle_context()).await
    }

    pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        self.lifecycle.activate(&self.lifecycle_context()).await
    }

    /// Install, then activate straight away if promotion was requested.
    pub async fn start(&self) -> Result<LifecycleState, LifecycleError> {
        self.install().await?;
        if self.lifecycle.promotion_requested() {
            self.activate().await?;
        }
        Ok(self.state())
    }

    /// Decide how to answer an intercepted request.
    ///
    /// Requests are only intercepted while the instance is active; skipped
    /// requests and every request before activation pass through.
    #[instrument(
        name = "engine.fetch",
        skip_all,
        fields(method = %request.method, url = %request.url)
    )]
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, EngineError> {
        if !self.lifecycle.is_active() {
            debug!(state = self.state().as_str(), "not active, passing through");
            return Ok(FetchOutcome::Passthrough);
        }

        let classification = self.classifier.classify(request);
        let Some((strategy, role)) = classification.route() else {
            counter!(METRIC_BYPASS).increment(1);
            debug!("request bypasses the cache");
            return Ok(FetchOutcome::Passthrough);
        };

        debug!(
            classification = classification.as_str(),
            strategy = strategy.as_str(),
            "routing request"
        );
        let ctx = StrategyContext {
            storage: self.deps.storage.as_ref(),
            network: self.deps.network.as_ref(),
            namespaces: &self.namespaces,
            shell_key: self.shell_key.as_ref(),
        };
        strategy
            .respond(&ctx, request, role)
            .await
            .map(FetchOutcome::Respond)
    }

    /// Handle a command posted by a session. Returns the activation report
    /// when the command promoted a waiting version.
    pub async fn handle_message(
        &self,
        command: HostCommand,
    ) -> Result<Option<ActivationReport>, LifecycleError> {
        match command {
            HostCommand::SkipWaiting => {
                if self.lifecycle.skip_waiting() {
                    info!("skip waiting requested, activating now");
                    match self.activate().await {
                        Ok(report) => Ok(Some(report)),
                        // Promoted concurrently by `start`.
                        Err(LifecycleError::InvalidTransition {
                            from: LifecycleState::Active,
                            ..
                        }) => Ok(None),
                        Err(err) => Err(err),
                    }
                } else {
                    debug!(state = self.state().as_str(), "skip waiting recorded");
                    Ok(None)
                }
            }
            HostCommand::Unknown(kind) => {
                debug!(kind = %kind, "ignoring unrecognised message");
                Ok(None)
            }
        }
    }

    /// Relay connectivity restoration when `tag` is the configured sync tag.
    pub async fn handle_sync(&self, tag: &str) -> Option<BroadcastReport> {
        if tag != self.config.sync_tag {
            debug!(tag, "ignoring sync event with foreign tag");
            return None;
        }
        Some(relay_connectivity_restored(self.deps.sessions.as_ref()).await)
    }

    pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<Notification, NotifyError> {
        let notification = Notification::from_push(payload, &self.config.push);
        self.deps.notifier.show(&notification).await?;
        Ok(notification)
    }

    pub async fn handle_notification_click(
        &self,
        click: &NotificationClick,
    ) -> Result<ClickOutcome, SessionError> {
        route_click(click, &self.config.scope, self.deps.sessions.as_ref()).await
    }
}
