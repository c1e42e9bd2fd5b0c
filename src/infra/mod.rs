//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod fs_store;
pub mod http;
pub mod network;
pub mod sessions;
pub mod telemetry;
