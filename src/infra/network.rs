//! Upstream network adapter backed by `reqwest`.

use async_trait::async_trait;
use reqwest::{Client, Method as HttpMethod};
use tracing::debug;
use url::Url;

use crate::config::UpstreamSettings;
use crate::engine::{FetchRequest, Network, NetworkError, ResponseSnapshot};

use super::error::InfraError;

/// Connection-level headers never forwarded between hops.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}

/// Forwards engine requests for the public scope to the upstream origin.
///
/// URLs outside the scope are fetched as-is.
#[derive(Clone, Debug)]
pub struct ReqwestNetwork {
    client: Client,
    scope: Url,
    upstream: Url,
}

impl ReqwestNetwork {
    pub fn new(settings: &UpstreamSettings, scope: Url) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::upstream(err.to_string()))?;

        Ok(Self {
            client,
            scope,
            upstream: settings.base_url.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("waystation/", env!("CARGO_PKG_VERSION"))
    }

    /// Map a URL under the public scope onto the upstream origin.
    ///
    /// The remainder of the path is appended to the upstream path, never
    /// resolved against it, so it cannot name another host.
    pub fn upstream_url(&self, url: &Url) -> Url {
        if url.origin() != self.scope.origin() {
            return url.clone();
        }
        let Some(rest) = url.path().strip_prefix(self.scope.path()) else {
            return url.clone();
        };

        let mut target = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        target.set_path(&format!("{base}/{}", rest.trim_start_matches('/')));
        target.set_query(url.query());
        target.set_fragment(None);
        target
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot, NetworkError> {
        let method = HttpMethod::from_bytes(request.method.as_str().as_bytes())
            .map_err(|err| NetworkError::transport(format!("invalid method: {err}")))?;
        let target = self.upstream_url(&request.url);

        let mut builder = self.client.request(method, target.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = request.body.clone() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_send_error)?;

        debug!(upstream = %target, status, "upstream responded");
        Ok(ResponseSnapshot::new(status, headers, body))
    }
}

fn map_send_error(err: reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout
    } else if err.is_connect() {
        NetworkError::Offline
    } else {
        NetworkError::transport(err.to_string())
    }
}
