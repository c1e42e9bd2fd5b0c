//! Lifecycle controller.
//!
//! Drives an engine instance through install and activation:
//!
//! ```text
//! Uninstalled -> Installing -> Installed -> Activating -> Active
//!                     \-> Redundant (install aborted)
//! ```
//!
//! Install populates the static namespace with the shell assets, all or
//! nothing. When the network cannot supply them but the current static
//! namespace already holds every one, install completes from storage. Activation prunes every namespace that is no longer current and
//! claims all open sessions. Phases never overlap.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::future::try_join_all;
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::config::EngineConfig;
use super::error::LifecycleError;
use super::lock::{rw_read, rw_write};
use super::metrics::{METRIC_INSTALL_MS, METRIC_NAMESPACE_PRUNED};
use super::namespace::{CacheRole, NamespaceRegistry};
use super::network::Network;
use super::relay::SessionDirectory;
use super::request::{FetchRequest, ResponseSnapshot};
use super::store::CacheStorage;

const SOURCE: &str = "engine::lifecycle";

/// Lifecycle state of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninstalled,
    Installing,
    /// Installed and waiting for promotion.
    Installed,
    Activating,
    /// Controlling sessions and intercepting requests.
    Active,
    /// Install failed; this instance never takes control.
    Redundant,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        }
    }
}

fn is_valid_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
        (from, to),
        (Uninstalled, Installing)
            | (Installing, Installed)
            | (Installing, Redundant)
            | (Installed, Activating)
            | (Activating, Active)
    )
}

/// Collaborators needed by the lifecycle phases.
pub struct LifecycleContext<'a> {
    pub config: &'a EngineConfig,
    pub namespaces: &'a NamespaceRegistry,
    pub storage: &'a dyn CacheStorage,
    pub network: &'a dyn Network,
    pub sessions: &'a dyn SessionDirectory,
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub namespace: String,
    pub assets: usize,
    /// The network was unreachable and the shell already stored under the
    /// current version was kept.
    pub from_storage: bool,
}

/// Result of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale namespaces deleted.
    pub pruned: Vec<String>,
    /// Stale namespaces whose deletion failed; left in place.
    pub failed: Vec<String>,
    /// Sessions taken under control.
    pub claimed: usize,
}

/// State machine for one engine instance.
#[derive(Default)]
pub struct LifecycleController {
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
    phase: Mutex<()>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        *rw_read(&self.state, SOURCE, "state")
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Whether promotion without waiting has been requested.
    pub fn promotion_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Request immediate promotion. Returns true when a version is waiting
    /// and should be activated now.
    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting.store(true, Ordering::SeqCst);
        self.state() == LifecycleState::Installed
    }

    fn transition(&self, to: LifecycleState) -> Result<(), LifecycleError> {
        let mut state = rw_write(&self.state, SOURCE, "transition");
        let from = *state;
        if !is_valid_transition(from, to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        *state = to;
        info!(from = from.as_str(), to = to.as_str(), "lifecycle transition");
        Ok(())
    }

    /// Populate the static namespace with every shell asset.
    ///
    /// All assets are fetched before anything is stored; one failure aborts
    /// the install and leaves the instance redundant, unless the stored shell
    /// for this version is complete. A storage failure while writing removes
    /// a namespace this install created.
    pub async fn install(
        &self,
        ctx: &LifecycleContext<'_>,
    ) -> Result<InstallReport, LifecycleError> {
        let _phase = self.phase.lock().await;
        self.transition(LifecycleState::Installing)?;
        let started = Instant::now();

        match populate_shell(ctx).await {
            Ok(report) => {
                self.transition(LifecycleState::Installed)?;
                histogram!(METRIC_INSTALL_MS).record(started.elapsed().as_secs_f64() * 1000.0);
                self.skip_waiting.store(true, Ordering::SeqCst);
                info!(
                    namespace = %report.namespace,
                    assets = report.assets,
                    from_storage = report.from_storage,
                    "install complete, promotion requested"
                );
                Ok(report)
            }
            Err(err) => {
                self.transition(LifecycleState::Redundant)?;
                error!(error = %err, "install aborted, previous version stays in control");
                Err(err)
            }
        }
    }

    /// Prune stale namespaces and take control of all sessions.
    pub async fn activate(
        &self,
        ctx: &LifecycleContext<'_>,
    ) -> Result<ActivationReport, LifecycleError> {
        let _phase = self.phase.lock().await;
        self.transition(LifecycleState::Activating)?;

        let mut report = prune_stale(ctx).await;

        self.transition(LifecycleState::Active)?;
        report.claimed = ctx.sessions.claim().await;
        info!(
            pruned = ?report.pruned,
            failed = ?report.failed,
            claimed = report.claimed,
            "activation complete"
        );
        Ok(report)
    }
}

async fn populate_shell(ctx: &LifecycleContext<'_>) -> Result<InstallReport, LifecycleError> {
    let namespace = ctx.namespaces.current_identifier(CacheRole::Static);

    let requests = ctx
        .config
        .shell_assets
        .iter()
        .map(|path| {
            ctx.config
                .resolve(path)
                .map(FetchRequest::get)
                .map_err(|err| LifecycleError::InvalidAsset {
                    path: path.clone(),
                    reason: err.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let fetched = try_join_all(
        requests
            .iter()
            .map(|request| fetch_asset(ctx.network, request)),
    )
    .await;
    let responses = match fetched {
        Ok(responses) => responses,
        Err(err) => {
            if stored_shell_complete(ctx.storage, namespace, &requests).await {
                warn!(
                    namespace,
                    error = %err,
                    "shell assets unreachable, reusing the stored shell"
                );
                return Ok(InstallReport {
                    namespace: namespace.to_string(),
                    assets: requests.len(),
                    from_storage: true,
                });
            }
            return Err(err);
        }
    };

    let existed = ctx.storage.namespaces().await?.iter().any(|id| id == namespace);
    ctx.storage.open(namespace).await?;
    for (request, response) in requests.iter().zip(responses) {
        if let Err(err) = ctx.storage.put(namespace, request.key(), response).await {
            if !existed {
                discard_partial(ctx.storage, namespace).await;
            }
            return Err(err.into());
        }
    }

    Ok(InstallReport {
        namespace: namespace.to_string(),
        assets: requests.len(),
        from_storage: false,
    })
}

/// Whether `namespace` already holds an entry for every shell asset.
async fn stored_shell_complete(
    storage: &dyn CacheStorage,
    namespace: &str,
    requests: &[FetchRequest],
) -> bool {
    for request in requests {
        match storage.lookup(namespace, &request.key()).await {
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(err) => {
                warn!(namespace, error = %err, "failed to inspect the stored shell");
                return false;
            }
        }
    }
    true
}

async fn discard_partial(storage: &dyn CacheStorage, namespace: &str) {
    match storage.delete(namespace).await {
        Ok(_) => info!(namespace, "discarded partially written install"),
        Err(err) => warn!(namespace, error = %err, "failed to discard partial install"),
    }
}

async fn fetch_asset(
    network: &dyn Network,
    request: &FetchRequest,
) -> Result<ResponseSnapshot, LifecycleError> {
    match network.fetch(request).await {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) => Err(LifecycleError::InstallAssetFailure {
            url: request.url.to_string(),
            reason: format!("unexpected status {}", response.status),
        }),
        Err(err) => Err(LifecycleError::InstallAssetFailure {
            url: request.url.to_string(),
            reason: err.to_string(),
        }),
    }
}

async fn prune_stale(ctx: &LifecycleContext<'_>) -> ActivationReport {
    let mut report = ActivationReport::default();

    let existing = match ctx.storage.namespaces().await {
        Ok(existing) => existing,
        Err(err) => {
            warn!(error = %err, "failed to enumerate namespaces, nothing pruned");
            return report;
        }
    };

    for namespace in existing
        .into_iter()
        .filter(|id| ctx.namespaces.is_stale(id))
    {
        match ctx.storage.delete(&namespace).await {
            Ok(_) => {
                counter!(METRIC_NAMESPACE_PRUNED).increment(1);
                info!(namespace = %namespace, "deleted stale namespace");
                report.pruned.push(namespace);
            }
            Err(err) => {
                warn!(namespace = %namespace, error = %err, "failed to delete stale namespace");
                report.failed.push(namespace);
            }
        }
    }

    report
}
