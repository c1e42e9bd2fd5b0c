//! Engine configuration.
//!
//! Process-wide and immutable once the engine is built: namespace versions,
//! the no-cache skip list, the static asset predicate, and the shell asset
//! list populated at install time.

use url::Url;

const DEFAULT_PREFIX: &str = "";
const DEFAULT_VERSION: &str = "v1";
const DEFAULT_SHELL_DOCUMENT: &str = "/index.html";
const DEFAULT_MANIFEST: &str = "/manifest.json";
const DEFAULT_SYNC_TAG: &str = "sync-offline-data";
const DEFAULT_NOTIFICATION_TITLE: &str = "New notification";
const DEFAULT_NOTIFICATION_ICON: &str = "/logo192.png";
const DEFAULT_NOTIFICATION_BADGE: &str = "/favicon.ico";

const DEFAULT_SHELL_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/static/js/bundle.js",
    "/static/js/main.chunk.js",
    "/static/js/vendors~main.chunk.js",
    "/manifest.json",
];

const DEFAULT_NO_CACHE_PATTERNS: &[&str] = &[
    "login.microsoftonline.com",
    "graph.microsoft.com",
    "/_api/",
    "/contextinfo",
];

const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "svg", "ico", "woff", "woff2",
];

/// Version tag per cache role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceVersions {
    pub static_version: String,
    pub dynamic_version: String,
    pub umbrella_version: String,
}

impl Default for NamespaceVersions {
    fn default() -> Self {
        Self {
            static_version: DEFAULT_VERSION.to_string(),
            dynamic_version: DEFAULT_VERSION.to_string(),
            umbrella_version: DEFAULT_VERSION.to_string(),
        }
    }
}

/// Defaults applied to push notifications whose payload omits fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

impl Default for PushDefaults {
    fn default() -> Self {
        Self {
            title: DEFAULT_NOTIFICATION_TITLE.to_string(),
            body: String::new(),
            icon: DEFAULT_NOTIFICATION_ICON.to_string(),
            badge: DEFAULT_NOTIFICATION_BADGE.to_string(),
        }
    }
}

/// Immutable engine configuration injected at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Origin (and base path) the engine controls. Shell paths resolve against it.
    pub scope: Url,
    /// Optional prefix prepended to every namespace identifier.
    pub prefix: String,
    pub versions: NamespaceVersions,
    /// App shell document served as the last-resort navigation fallback.
    pub shell_document: String,
    pub manifest: String,
    /// Paths populated into the static namespace at install time.
    pub shell_assets: Vec<String>,
    /// URL substrings that bypass the engine entirely.
    pub no_cache_patterns: Vec<String>,
    /// Lower-case file extensions treated as static shell assets.
    pub static_extensions: Vec<String>,
    /// Background-sync tag that triggers the connectivity relay.
    pub sync_tag: String,
    pub push: PushDefaults,
}

impl EngineConfig {
    /// Build a configuration for `scope` with the stock shell, skip list and versions.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            prefix: DEFAULT_PREFIX.to_string(),
            versions: NamespaceVersions::default(),
            shell_document: DEFAULT_SHELL_DOCUMENT.to_string(),
            manifest: DEFAULT_MANIFEST.to_string(),
            shell_assets: to_owned_list(DEFAULT_SHELL_ASSETS),
            no_cache_patterns: to_owned_list(DEFAULT_NO_CACHE_PATTERNS),
            static_extensions: to_owned_list(DEFAULT_STATIC_EXTENSIONS),
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            push: PushDefaults::default(),
        }
    }

    /// Resolve a configured path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.scope.join(path)
    }

    /// Absolute URL of the shell document.
    pub fn shell_document_url(&self) -> Result<Url, url::ParseError> {
        self.resolve(&self.shell_document)
    }
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}
