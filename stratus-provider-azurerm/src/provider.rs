//! Azure Resource Manager Provider implementation
//!
//! Dispatches each operation to the handler registered for the resource
//! type and bounds it by the configured per-operation timeout. Every error
//! leaving this module names the resource it concerns.

use std::collections::HashMap;
use std::sync::Arc;

use stratus_core::poller::with_timeout;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State};

use crate::arm::{ArmClient, TokenCredential};
use crate::client::ManagementClient;
use crate::config::ProviderConfig;
use crate::lifecycle::{ProviderContext, ResourceHandler};
use crate::resources::handlers;

/// Azure Resource Manager Provider
pub struct AzurermProvider {
    ctx: ProviderContext,
    handlers: HashMap<&'static str, Arc<dyn ResourceHandler>>,
}

impl AzurermProvider {
    /// Create a provider over an arbitrary management client
    pub fn new(config: ProviderConfig, client: Arc<dyn ManagementClient>) -> Self {
        Self {
            ctx: ProviderContext::new(client, config),
            handlers: handlers(),
        }
    }

    /// Create a provider talking to the configured Resource Manager endpoint
    pub fn with_credential(
        config: ProviderConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> ProviderResult<Self> {
        let client = ArmClient::new(config.endpoint.clone(), credential)
            .map_err(|e| ProviderError::from(e).context("building Resource Manager client"))?;
        log::debug!(
            "Resource Manager client for subscription {} at {}",
            config.subscription_id,
            config.endpoint
        );
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn handler(&self, id: &ResourceId) -> ProviderResult<&Arc<dyn ResourceHandler>> {
        self.handlers.get(id.resource_type.as_str()).ok_or_else(|| {
            ProviderError::unsupported(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Read a resource; without an identifier it has never been created
    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let handler = self.handler(id)?;
        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };

        with_timeout(
            "read",
            id,
            self.ctx.config.timeouts.read,
            handler.read(&self.ctx, id, identifier),
        )
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    pub async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let handler = self.handler(id)?;
        with_timeout(
            "creation",
            id,
            self.ctx.config.timeouts.create,
            handler.create(&self.ctx, resource),
        )
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        to: &Resource,
    ) -> ProviderResult<State> {
        let handler = self.handler(id)?;
        with_timeout(
            "update",
            id,
            self.ctx.config.timeouts.update,
            handler.update(&self.ctx, id, identifier, to),
        )
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let handler = self.handler(id)?;
        with_timeout(
            "deletion",
            id,
            self.ctx.config.timeouts.delete,
            handler.delete(&self.ctx, id, identifier),
        )
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    pub fn upgrade_resource_state(&self, state: State, from_version: u32) -> ProviderResult<State> {
        let id = state.id.clone();
        let handler = self.handler(&id)?;
        handler
            .upgrade_state(state, from_version)
            .map_err(|e| e.for_resource(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use stratus_core::lock::LockKey;
    use stratus_core::provider::ErrorKind;
    use stratus_core::resource::Attributes;

    use crate::resources::NETWORK_INTERFACE_LOCK;
    use crate::testing::{FakeClient, SUBSCRIPTION};

    const NIC: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/networkInterfaces/nic1";
    const ASG: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/applicationSecurityGroups/asg1";
    const DISK_ACCESS: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Compute/diskAccesses/da1";

    fn provider(client: Arc<FakeClient>) -> AzurermProvider {
        let mut config = ProviderConfig::new(SUBSCRIPTION);
        config.operation_poll_interval = Duration::from_millis(10);
        config.timeouts.create = Duration::from_secs(60);
        AzurermProvider::new(config, client)
    }

    fn disk_access() -> Resource {
        Resource::new("disk_access", "example")
            .with_attribute("name", "da1")
            .with_attribute("resource_group_name", "rg1")
            .with_attribute("location", "westeurope")
    }

    fn nic() -> serde_json::Value {
        json!({
            "id": NIC,
            "properties": {
                "ipConfigurations": [{ "name": "internal", "properties": {} }]
            }
        })
    }

    #[tokio::test]
    async fn read_without_identifier_is_not_found() {
        let client = Arc::new(FakeClient::new());
        let provider = provider(client.clone());

        let state = provider
            .read_resource(&ResourceId::new("disk_access", "example"), None)
            .await
            .unwrap();
        assert!(!state.exists);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_type_is_unsupported() {
        let provider = provider(Arc::new(FakeClient::new()));
        let err = provider
            .create_resource(&Resource::new("virtual_machine", "vm"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
        assert_eq!(err.resource_id, Some(ResourceId::new("virtual_machine", "vm")));
    }

    #[tokio::test]
    async fn errors_name_the_resource() {
        let client = Arc::new(FakeClient::new());
        client.insert(DISK_ACCESS, json!({ "id": DISK_ACCESS }));
        let provider = provider(client);

        let err = provider.create_resource(&disk_access()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportCollision);
        assert!(err.to_string().starts_with("[disk_access.example] "));
        assert!(err.message.contains(DISK_ACCESS));
    }

    #[tokio::test]
    async fn lifecycle_round_trip() {
        let client = Arc::new(FakeClient::new());
        let provider = provider(client.clone());
        let id = ResourceId::new("disk_access", "example");

        let created = provider.create_resource(&disk_access()).await.unwrap();
        let identifier = created.identifier.clone().unwrap();
        assert_eq!(identifier, DISK_ACCESS);

        let read = provider.read_resource(&id, Some(&identifier)).await.unwrap();
        assert_eq!(read.get_str("location"), Some("westeurope"));

        provider.delete_resource(&id, &identifier).await.unwrap();
        let gone = provider.read_resource(&id, Some(&identifier)).await.unwrap();
        assert!(!gone.exists);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_parent_lock() {
        let client = Arc::new(FakeClient::new().with_put_delay(Duration::from_secs(3600)));
        client.insert(NIC, nic());
        let provider = provider(client);

        let association = Resource::new(
            "network_interface_application_security_group_association",
            "example",
        )
        .with_attribute("network_interface_id", NIC)
        .with_attribute("application_security_group_id", ASG);

        let err = provider.create_resource(&association).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(
            err.to_string(),
            "[network_interface_application_security_group_association.example] creation did not complete within 1m"
        );
        assert!(
            provider
                .context()
                .locks
                .try_acquire(LockKey::new(NETWORK_INTERFACE_LOCK, "nic1"))
                .is_some()
        );
    }

    #[test]
    fn upgrade_dispatches_to_handler() {
        let provider = provider(Arc::new(FakeClient::new()));
        let mut attributes = HashMap::new();
        attributes.insert("network_interface_id".to_string(), NIC.into());
        attributes.insert("application_security_group_id".to_string(), ASG.into());
        attributes.insert("ip_configuration_name".to_string(), "internal".into());
        let state = State::existing(
            ResourceId::new("network_interface_application_security_group_association", "example"),
            attributes,
        );

        let upgraded = provider.upgrade_resource_state(state, 0).unwrap();
        assert_eq!(upgraded.identifier, Some(format!("{}|{}", NIC, ASG)));
        assert!(upgraded.get_str("ip_configuration_name").is_none());
    }
}
