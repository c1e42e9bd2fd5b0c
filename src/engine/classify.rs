//! Request classification.
//!
//! Decides once, up front, whether a request bypasses the engine, belongs to
//! the static shell, or is dynamic content. Pure and deterministic.

use super::config::EngineConfig;
use super::namespace::CacheRole;
use super::request::{FetchRequest, Method};
use super::strategy::Strategy;

/// Outcome of classifying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Forward untouched; never read from or written to a cache.
    Skip,
    /// Static shell asset, served cache-first from the static namespace.
    Static,
    /// Dynamic content, served network-first from the dynamic namespace.
    Dynamic,
}

impl Classification {
    /// Strategy and namespace role for an intercepted request.
    pub fn route(self) -> Option<(Strategy, CacheRole)> {
        match self {
            Self::Skip => None,
            Self::Static => Some((Strategy::CacheFirst, CacheRole::Static)),
            Self::Dynamic => Some((Strategy::NetworkFirst, CacheRole::Dynamic)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }
}

/// Classifier built from the skip list and static asset predicate.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    no_cache_patterns: Vec<String>,
    static_extensions: Vec<String>,
    static_paths: Vec<String>,
}

impl RequestClassifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            no_cache_patterns: config.no_cache_patterns.clone(),
            static_extensions: config
                .static_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            static_paths: vec![
                "/".to_string(),
                config.shell_document.clone(),
                config.manifest.clone(),
            ],
        }
    }

    pub fn classify(&self, request: &FetchRequest) -> Classification {
        if request.method != Method::Get || self.is_skip_listed(request.url.as_str()) {
            return Classification::Skip;
        }

        if self.is_static_path(request.url.path()) {
            Classification::Static
        } else {
            Classification::Dynamic
        }
    }

    fn is_skip_listed(&self, url: &str) -> bool {
        self.no_cache_patterns
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
    }

    fn is_static_path(&self, path: &str) -> bool {
        if self.static_paths.iter().any(|fixed| fixed == path) {
            return true;
        }

        let file_name = path.rsplit('/').next().unwrap_or_default();
        file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.static_extensions.contains(&ext))
    }
}
