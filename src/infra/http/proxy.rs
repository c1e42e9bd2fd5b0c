//! Fallback handler: every request outside the control surface goes through
//! the engine.

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method as HttpMethod, Request, StatusCode, Uri,
        header::ACCEPT,
    },
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tracing::debug;
use url::Url;

use crate::engine::{FetchOutcome, FetchRequest, Method, RequestDestination, ResponseSnapshot};
use crate::infra::network::is_hop_by_hop;

use super::HttpState;
use super::error::HttpError;

const SOURCE: &str = "infra::http::proxy";

/// Response header naming where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-waystation-source";
const SEC_FETCH_DEST: &str = "sec-fetch-dest";
const PASSTHROUGH: &str = "passthrough";

pub(super) async fn proxy(State(state): State<HttpState>, request: Request<Body>) -> Response {
    let fetch = match to_fetch_request(&state.engine.config().scope, request).await {
        Ok(fetch) => fetch,
        Err(err) => return err.into_response(),
    };

    match state.engine.handle_fetch(&fetch).await {
        Ok(FetchOutcome::Respond(served)) => {
            snapshot_response(served.response, served.source.as_str())
        }
        Ok(FetchOutcome::Passthrough) => match state.network.fetch(&fetch).await {
            Ok(response) => snapshot_response(response, PASSTHROUGH),
            Err(err) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "Upstream unavailable",
                &err,
            )
            .into_response(),
        },
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::BAD_GATEWAY,
            "Upstream unavailable",
            &err,
        )
        .into_response(),
    }
}

/// Translate an inbound request into the engine's view of it.
pub(crate) async fn to_fetch_request(
    scope: &Url,
    request: Request<Body>,
) -> Result<FetchRequest, HttpError> {
    let (parts, body) = request.into_parts();

    let url = scoped_url(scope, &parts.uri);

    let method = Method::parse(parts.method.as_str());
    let destination = destination(&parts.method, &parts.headers);

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let body = body
        .collect()
        .await
        .map_err(|err| {
            HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Unreadable request body", &err)
        })?
        .to_bytes();

    let mut fetch = FetchRequest::new(method, url).with_destination(destination);
    fetch.headers = headers;
    if !body.is_empty() {
        fetch = fetch.with_body(body);
    }
    Ok(fetch)
}

/// The request target placed on the scope origin.
///
/// Only the path and query are taken from the client, so a target such as
/// `//other.host/path` stays a path under the scope.
fn scoped_url(scope: &Url, uri: &Uri) -> Url {
    let mut url = scope.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url.set_fragment(None);
    url
}

/// `Sec-Fetch-Dest` when present; otherwise a GET accepting HTML counts as
/// a navigation.
fn destination(method: &HttpMethod, headers: &HeaderMap) -> RequestDestination {
    if let Some(dest) = headers
        .get(SEC_FETCH_DEST)
        .and_then(|value| value.to_str().ok())
    {
        return RequestDestination::from_fetch_dest(dest);
    }

    let accepts_html = headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    if *method == HttpMethod::GET && accepts_html {
        RequestDestination::Document
    } else {
        RequestDestination::Other
    }
}

pub(crate) fn snapshot_response(snapshot: ResponseSnapshot, source: &'static str) -> Response {
    let status = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &snapshot.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %name, "dropping unrepresentable header"),
        }
    }
    headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("http://127.0.0.1:3000/").unwrap()
    }

    #[tokio::test]
    async fn navigation_hint_comes_from_sec_fetch_dest() {
        let request = Request::builder()
            .uri("/dashboard?tab=2")
            .header(SEC_FETCH_DEST, "document")
            .body(Body::empty())
            .unwrap();

        let fetch = to_fetch_request(&scope(), request).await.unwrap();
        assert!(fetch.is_navigation());
        assert_eq!(fetch.url.as_str(), "http://127.0.0.1:3000/dashboard?tab=2");
        assert!(fetch.body.is_none());
    }

    #[tokio::test]
    async fn accept_html_counts_as_navigation_without_sec_fetch_dest() {
        let request = Request::builder()
            .uri("/reports")
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .body(Body::empty())
            .unwrap();
        assert!(to_fetch_request(&scope(), request).await.unwrap().is_navigation());

        let request = Request::builder()
            .uri("/reports")
            .header(ACCEPT, "text/html")
            .header(SEC_FETCH_DEST, "empty")
            .body(Body::empty())
            .unwrap();
        assert!(!to_fetch_request(&scope(), request).await.unwrap().is_navigation());
    }

    #[tokio::test]
    async fn scheme_relative_targets_stay_on_the_scope_origin() {
        for target in [
            "//169.254.169.254/latest/meta-data",
            "///evil.example/steal?token=1",
            "/%2F%2Fevil.example/x",
        ] {
            let request = Request::builder()
                .uri(target)
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap();

            let fetch = to_fetch_request(&scope(), request).await.unwrap();
            assert_eq!(fetch.url.origin(), scope().origin(), "{target}");
            assert_eq!(fetch.url.host_str(), Some("127.0.0.1"), "{target}");
        }

        let request = Request::builder()
            .uri("//169.254.169.254/latest/meta-data?x=1")
            .body(Body::empty())
            .unwrap();
        let fetch = to_fetch_request(&scope(), request).await.unwrap();
        assert_eq!(
            fetch.url.as_str(),
            "http://127.0.0.1:3000//169.254.169.254/latest/meta-data?x=1"
        );
    }

    #[tokio::test]
    async fn post_body_is_kept() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/items")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":1}"#))
            .unwrap();

        let fetch = to_fetch_request(&scope(), request).await.unwrap();
        assert_eq!(fetch.method, Method::Post);
        assert_eq!(fetch.body.as_deref(), Some(&br#"{"id":1}"#[..]));
    }

    #[test]
    fn snapshot_response_drops_hop_by_hop_headers_and_tags_source() {
        let snapshot = ResponseSnapshot::new(
            200,
            vec![
                ("Content-Type".to_string(), "text/html".to_string()),
                ("Connection".to_string(), "keep-alive".to_string()),
            ],
            "<html></html>",
        );

        let response = snapshot_response(snapshot, "cache");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()[SOURCE_HEADER], "cache");
    }
}
