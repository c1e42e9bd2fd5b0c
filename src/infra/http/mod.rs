//! HTTP surface: the caching reverse proxy and its control endpoints.

mod control;
pub mod error;
mod middleware;
mod proxy;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware};

use crate::engine::{Engine, Network};
use crate::infra::sessions::SessionHub;

pub use control::CONTROL_PREFIX;
pub use proxy::SOURCE_HEADER;

#[derive(Clone)]
pub struct HttpState {
    pub engine: Arc<Engine>,
    /// Used directly for requests the engine passes through.
    pub network: Arc<dyn Network>,
    pub sessions: Arc<SessionHub>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .nest(CONTROL_PREFIX, control::router())
        .fallback(proxy::proxy)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
