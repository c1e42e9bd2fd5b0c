//! Network collaborator.

use async_trait::async_trait;

use super::error::NetworkError;
use super::request::{FetchRequest, ResponseSnapshot};

/// Performs the real network round trip for a request.
///
/// Any HTTP status is a response; `Err` means no response was obtained at
/// all (transport failure, timeout, offline).
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot, NetworkError>;
}
