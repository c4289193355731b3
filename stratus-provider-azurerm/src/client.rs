//! Management client seam
//!
//! Lifecycle handlers talk to Resource Manager only through
//! [`ManagementClient`], so the HTTP transport can be swapped for a fake in tests.

use async_trait::async_trait;
use serde_json::Value as Json;
use stratus_core::poller::LongRunningOperation;
use stratus_core::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("resource not found: {url}")]
    NotFound { url: String },

    #[error("request failed with status {status} ({code}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    #[error("failed to send request: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

impl From<ApiError> for ProviderError {
    fn from(e: ApiError) -> Self {
        if e.is_not_found() {
            ProviderError::not_found(e.to_string()).with_cause(e)
        } else {
            ProviderError::api(e.to_string()).with_cause(e)
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Generic Resource Manager operations on resource IDs
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn get(&self, id: &str, api_version: &str) -> ApiResult<Json>;

    /// Create or replace; returns a handle to await the operation
    async fn put(
        &self,
        id: &str,
        api_version: &str,
        body: Json,
    ) -> ApiResult<Box<dyn LongRunningOperation>>;

    async fn patch(
        &self,
        id: &str,
        api_version: &str,
        body: Json,
    ) -> ApiResult<Box<dyn LongRunningOperation>>;

    async fn delete(&self, id: &str, api_version: &str)
    -> ApiResult<Box<dyn LongRunningOperation>>;

    /// All items of a collection, following paging links
    async fn list(&self, collection_id: &str, api_version: &str) -> ApiResult<Vec<Json>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::provider::ErrorKind;

    #[test]
    fn not_found_maps_to_not_found_kind() {
        let err: ProviderError = ApiError::NotFound {
            url: "/subscriptions/0000/resourceGroups/rg1".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn status_errors_map_to_api_kind() {
        let err: ProviderError = ApiError::Status {
            status: 409,
            code: "Conflict".to_string(),
            message: "Another operation is in progress".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Api);
        assert!(err.message.contains("409"));
    }
}
