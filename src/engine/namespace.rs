//! Cache namespace registry.
//!
//! Maps each cache role to the version-qualified identifier the engine is
//! configured to use. Anything else found in storage is stale.

use std::fmt;

use super::config::EngineConfig;

/// Logical role of a cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheRole {
    /// App shell: documents, bundles, styles, images, fonts, manifest.
    Static,
    /// Runtime content fetched through network-first.
    Dynamic,
    /// Umbrella namespace kept for the application's own use.
    Umbrella,
}

impl CacheRole {
    pub const ALL: [CacheRole; 3] = [CacheRole::Static, CacheRole::Dynamic, CacheRole::Umbrella];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Umbrella => "umbrella",
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Current identifier for every role, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct NamespaceRegistry {
    static_id: String,
    dynamic_id: String,
    umbrella_id: String,
}

impl NamespaceRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        let versions = &config.versions;
        Self {
            static_id: compose(&config.prefix, CacheRole::Static, &versions.static_version),
            dynamic_id: compose(&config.prefix, CacheRole::Dynamic, &versions.dynamic_version),
            umbrella_id: compose(
                &config.prefix,
                CacheRole::Umbrella,
                &versions.umbrella_version,
            ),
        }
    }

    /// Identifier the engine currently uses for `role`.
    pub fn current_identifier(&self, role: CacheRole) -> &str {
        match role {
            CacheRole::Static => &self.static_id,
            CacheRole::Dynamic => &self.dynamic_id,
            CacheRole::Umbrella => &self.umbrella_id,
        }
    }

    /// All current identifiers, one per role.
    pub fn current_identifiers(&self) -> [&str; 3] {
        CacheRole::ALL.map(|role| self.current_identifier(role))
    }

    /// True iff `identifier` is not current for any role.
    pub fn is_stale(&self, identifier: &str) -> bool {
        !self.current_identifiers().contains(&identifier)
    }
}

fn compose(prefix: &str, role: CacheRole, version: &str) -> String {
    if prefix.is_empty() {
        format!("{}-{version}", role.tag())
    } else {
        format!("{prefix}-{}-{version}", role.tag())
    }
}
