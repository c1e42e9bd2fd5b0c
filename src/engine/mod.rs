//! Offline caching decision engine.
//!
//! Classifies intercepted requests, answers them from versioned cache
//! namespaces or the network, and manages the install and activation of
//! successive engine versions.

pub mod classify;
pub mod config;
pub mod error;
pub mod lifecycle;
pub(crate) mod lock;
pub mod messages;
pub mod metrics;
pub mod namespace;
pub mod network;
pub mod push;
pub mod relay;
pub mod request;
pub mod store;
pub mod strategy;
pub mod worker;

pub use classify::{Classification, RequestClassifier};
pub use config::{EngineConfig, NamespaceVersions, PushDefaults};
pub use error::{EngineError, LifecycleError, NetworkError, NotifyError, SessionError, StorageError};
pub use lifecycle::{ActivationReport, InstallReport, LifecycleState};
pub use messages::{HostCommand, HostMessage};
pub use namespace::{CacheRole, NamespaceRegistry};
pub use network::Network;
pub use push::{ClickOutcome, Notification, NotificationClick, Notifier};
pub use relay::{BroadcastReport, SessionDirectory, SessionId, SessionInfo};
pub use request::{
    EntryKey, FetchRequest, Method, RequestDestination, ResponseSnapshot, ResponseSource, Served,
};
pub use store::{CacheStorage, MemoryStorage};
pub use strategy::Strategy;
pub use worker::{Engine, EngineDeps, FetchOutcome};
