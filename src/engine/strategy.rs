//! Retrieval strategies.
//!
//! Cache-first serves the static shell; network-first serves dynamic
//! content. Both write successful network responses back to their namespace
//! on a best-effort basis and fall back to the shell document for failed
//! top-level navigations.

use metrics::counter;
use tracing::{debug, warn};

use super::error::{EngineError, NetworkError};
use super::metrics::{
    METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_WRITE_FAILED, METRIC_FALLBACK_SERVED,
    METRIC_NETWORK_FAILURE,
};
use super::namespace::{CacheRole, NamespaceRegistry};
use super::network::Network;
use super::request::{EntryKey, FetchRequest, ResponseSnapshot, ResponseSource, Served};
use super::store::CacheStorage;

/// Retrieval algorithm chosen by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheFirst => "cache_first",
            Self::NetworkFirst => "network_first",
        }
    }

    /// Produce a response for `request` from the namespace of `role`.
    pub async fn respond(
        self,
        ctx: &StrategyContext<'_>,
        request: &FetchRequest,
        role: CacheRole,
    ) -> Result<Served, EngineError> {
        match self {
            Self::CacheFirst => cache_first(ctx, request, role).await,
            Self::NetworkFirst => network_first(ctx, request, role).await,
        }
    }
}

/// Collaborators a strategy runs against for one request.
pub struct StrategyContext<'a> {
    pub storage: &'a dyn CacheStorage,
    pub network: &'a dyn Network,
    pub namespaces: &'a NamespaceRegistry,
    /// Key of the shell document in the static namespace, if resolvable.
    pub shell_key: Option<&'a EntryKey>,
}

/// Serve from cache when present; otherwise fetch and store.
pub async fn cache_first(
    ctx: &StrategyContext<'_>,
    request: &FetchRequest,
    role: CacheRole,
) -> Result<Served, EngineError> {
    let namespace = ctx.namespaces.current_identifier(role);
    let key = request.key();

    if let Some(cached) = lookup(ctx.storage, namespace, &key).await {
        counter!(METRIC_CACHE_HIT, "namespace" => role.tag()).increment(1);
        debug!(namespace, outcome = "hit", "serving cached entry");
        return Ok(Served::new(cached, ResponseSource::Cache));
    }

    counter!(METRIC_CACHE_MISS, "namespace" => role.tag()).increment(1);
    debug!(namespace, outcome = "miss", "cache miss, fetching from network");

    match ctx.network.fetch(request).await {
        Ok(response) if response.is_success() => {
            write_back(ctx.storage, namespace, key, &response).await;
            Ok(Served::new(response, ResponseSource::Network))
        }
        Ok(response) => {
            debug!(namespace, status = response.status, "network returned non-success");
            match navigation_fallback(ctx, request).await {
                Some(shell) => Ok(shell),
                None => Ok(Served::new(response, ResponseSource::Network)),
            }
        }
        Err(error) => {
            record_network_failure(request, &error);
            navigation_fallback(ctx, request)
                .await
                .ok_or_else(|| no_fallback(request, error))
        }
    }
}

/// Fetch first; on failure serve the stored entry, then the shell.
pub async fn network_first(
    ctx: &StrategyContext<'_>,
    request: &FetchRequest,
    role: CacheRole,
) -> Result<Served, EngineError> {
    let namespace = ctx.namespaces.current_identifier(role);
    let key = request.key();

    let failure = match ctx.network.fetch(request).await {
        Ok(response) if response.is_success() => {
            write_back(ctx.storage, namespace, key, &response).await;
            return Ok(Served::new(response, ResponseSource::Network));
        }
        Ok(response) => {
            debug!(namespace, status = response.status, "network returned non-success");
            NetworkFailure::Status(response)
        }
        Err(error) => {
            record_network_failure(request, &error);
            NetworkFailure::Transport(error)
        }
    };

    if let Some(stale) = lookup(ctx.storage, namespace, &key).await {
        counter!(METRIC_FALLBACK_SERVED, "kind" => "stale").increment(1);
        debug!(namespace, outcome = "stale", "serving stored entry after network failure");
        return Ok(Served::new(stale, ResponseSource::Stale));
    }

    if let Some(shell) = navigation_fallback(ctx, request).await {
        return Ok(shell);
    }

    match failure {
        NetworkFailure::Status(response) => Ok(Served::new(response, ResponseSource::Network)),
        NetworkFailure::Transport(error) => Err(no_fallback(request, error)),
    }
}

/// Why network-first fell through to its fallbacks.
enum NetworkFailure {
    /// A response arrived but is not cacheable.
    Status(ResponseSnapshot),
    Transport(NetworkError),
}

/// Look up an entry, treating storage failures as a miss.
async fn lookup(
    storage: &dyn CacheStorage,
    namespace: &str,
    key: &EntryKey,
) -> Option<ResponseSnapshot> {
    match storage.lookup(namespace, key).await {
        Ok(found) => found,
        Err(error) => {
            warn!(
                namespace,
                key = %key,
                reason = error.reason(),
                error = %error,
                "cache lookup failed, treating as miss"
            );
            None
        }
    }
}

/// Store a successful response. Failures are logged and never surface.
async fn write_back(
    storage: &dyn CacheStorage,
    namespace: &str,
    key: EntryKey,
    response: &ResponseSnapshot,
) {
    let key_label = key.to_string();
    if let Err(error) = storage.put(namespace, key, response.clone()).await {
        counter!(METRIC_CACHE_WRITE_FAILED, "reason" => error.reason()).increment(1);
        warn!(
            namespace,
            key = %key_label,
            reason = error.reason(),
            error = %error,
            "cache write failed, response still returned"
        );
    }
}

/// Shell document from the static namespace, for navigations only.
async fn navigation_fallback(ctx: &StrategyContext<'_>, request: &FetchRequest) -> Option<Served> {
    if !request.is_navigation() {
        return None;
    }

    let shell_key = ctx.shell_key?;
    let namespace = ctx.namespaces.current_identifier(CacheRole::Static);
    let shell = lookup(ctx.storage, namespace, shell_key).await?;

    counter!(METRIC_FALLBACK_SERVED, "kind" => "shell").increment(1);
    debug!(namespace, outcome = "shell", "serving shell document for navigation");
    Some(Served::new(shell, ResponseSource::Shell))
}

fn record_network_failure(request: &FetchRequest, error: &NetworkError) {
    counter!(METRIC_NETWORK_FAILURE).increment(1);
    debug!(url = %request.url, error = %error, "network fetch failed");
}

fn no_fallback(request: &FetchRequest, cause: NetworkError) -> EngineError {
    EngineError::NoFallbackAvailable {
        url: request.url.to_string(),
        cause,
    }
}
