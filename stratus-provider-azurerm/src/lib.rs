//! Stratus Azure Resource Manager Provider
//!
//! Manages Azure resources through the Resource Manager REST API.
//!
//! ## Module Structure
//!
//! - `arm` - HTTP client for the management endpoint and long-running operations
//! - `client` - `ManagementClient` abstraction over the management API
//! - `config` - Provider configuration and operation timeouts
//! - `lifecycle` - Create/read/update/delete flows shared by resource kinds
//! - `provider` - AzurermProvider implementation
//! - `resources` - Resource kind definitions and schemas
//! - `utils` - Helpers for JSON bodies, locations and tags

pub mod arm;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod provider;
pub mod resources;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export main types
pub use arm::{ArmClient, StaticTokenCredential, TokenCredential};
pub use client::{ApiError, ManagementClient};
pub use config::ProviderConfig;
pub use provider::AzurermProvider;

use stratus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AzurermProvider {
    fn name(&self) -> &'static str {
        "azurerm"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }

    fn upgrade_state(&self, state: State, from_version: u32) -> BoxFuture<'_, ProviderResult<State>> {
        Box::pin(async move { self.upgrade_resource_state(state, from_version) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{FakeClient, SUBSCRIPTION};

    fn provider() -> Box<dyn Provider> {
        Box::new(AzurermProvider::new(
            ProviderConfig::new(SUBSCRIPTION),
            Arc::new(FakeClient::new()),
        ))
    }

    #[test]
    fn provider_name() {
        assert_eq!(provider().name(), "azurerm");
    }

    #[test]
    fn every_handler_has_a_resource_type() {
        let provider = provider();
        let names: Vec<String> = provider
            .resource_types()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        for name in resources::handlers().keys() {
            assert!(names.iter().any(|n| n == name), "missing resource type {}", name);
        }
        assert_eq!(names.len(), 9);
    }

    #[tokio::test]
    async fn dispatches_through_trait_object() {
        let provider = provider();
        let state = provider
            .read(&ResourceId::new("iothub_dps", "example"), None)
            .await
            .unwrap();
        assert!(!state.exists);
    }
}
