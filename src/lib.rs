//! Waystation: an offline-first caching engine served as a reverse proxy.

pub mod config;
pub mod engine;
pub mod error;
pub mod infra;
