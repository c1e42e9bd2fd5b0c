//! Request and response values flowing through the engine.

use std::fmt;

use bytes::Bytes;
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Other(String),
}

impl Method {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Navigation hint supplied by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    /// Top-level document navigation.
    Document,
    #[default]
    Other,
}

impl RequestDestination {
    /// Map a `Sec-Fetch-Dest` value.
    pub fn from_fetch_dest(value: &str) -> Self {
        if value.eq_ignore_ascii_case("document") {
            Self::Document
        } else {
            Self::Other
        }
    }
}

/// A request as seen by the engine.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub destination: RequestDestination,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: RequestDestination::Other,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// A GET navigation for a top-level document.
    pub fn navigation(url: Url) -> Self {
        Self::get(url).with_destination(RequestDestination::Document)
    }

    pub fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.destination == RequestDestination::Document
    }

    /// Cache key for this request.
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.method.clone(), &self.url)
    }
}

/// Normalized cache key: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub method: Method,
    pub url: String,
}

impl EntryKey {
    pub fn new(method: Method, url: &Url) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        Self {
            method,
            url: normalized.into(),
        }
    }

    pub fn get(url: &Url) -> Self {
        Self::new(Method::Get, url)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Immutable snapshot of a response, as stored in a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// 2xx, the only responses ever written to a namespace.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Found in the namespace before any network call.
    Cache,
    Network,
    /// Previously stored entry served because the network failed.
    Stale,
    /// App shell document served for a failed navigation.
    Shell,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Network => "network",
            Self::Stale => "stale",
            Self::Shell => "shell",
        }
    }
}

/// A response produced by a retrieval strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
}

impl Served {
    pub fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
        Self { response, source }
    }
}
