//! ExpressRoute circuit authorization

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::lock::LockKey;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use crate::lifecycle::{ProviderContext, StandaloneKind, UpdateMode, require_segments};
use crate::utils::{set_from, pointer};

use super::{EXPRESS_ROUTE_CIRCUIT_LOCK, NETWORK_API_VERSION, name_attribute, resource_group_attribute};

pub const TYPE_NAME: &str = "express_route_circuit_authorization";

pub struct ExpressRouteCircuitAuthorization;

pub struct AuthorizationConfig {
    pub name: String,
    pub resource_group_name: String,
    pub circuit_name: String,
}

#[async_trait]
impl StandaloneKind for ExpressRouteCircuitAuthorization {
    type Config = AuthorizationConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Express Route Circuit Authorization"
    }

    fn api_version(&self) -> &'static str {
        NETWORK_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .attribute(name_attribute())
            .attribute(resource_group_attribute())
            .attribute(
                AttributeSchema::new("express_route_circuit_name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("authorization_key", AttributeType::String)
                    .computed()
                    .sensitive(),
            )
            .attribute(AttributeSchema::new("authorization_use_status", AttributeType::String).computed())
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Unsupported
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<AuthorizationConfig> {
        Ok(AuthorizationConfig {
            name: resource.require_str("name")?.to_string(),
            resource_group_name: resource.require_str("resource_group_name")?.to_string(),
            circuit_name: resource.require_str("express_route_circuit_name")?.to_string(),
        })
    }

    fn identity(
        &self,
        config: &AuthorizationConfig,
        subscription_id: &str,
    ) -> ProviderResult<ResourceIdentifier> {
        Ok(ResourceIdentifier::subscription(subscription_id)
            .resource_group(&config.resource_group_name)
            .provider("Microsoft.Network")
            .child("expressRouteCircuits", &config.circuit_name)
            .child("authorizations", &config.name))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "expressRouteCircuits", "authorizations"])
    }

    fn lock_key(&self, id: &ResourceIdentifier) -> Option<LockKey> {
        id.get("expressRouteCircuits")
            .map(|circuit| LockKey::new(EXPRESS_ROUTE_CIRCUIT_LOCK, circuit))
    }

    async fn build_payload(
        &self,
        _ctx: &ProviderContext,
        _config: &AuthorizationConfig,
        _id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        Ok(json!({ "properties": {} }))
    }

    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>> {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(id.require("authorizations")?));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.require("resourceGroups")?),
        );
        attributes.insert(
            "express_route_circuit_name".to_string(),
            Value::from(id.require("expressRouteCircuits")?),
        );
        set_from(
            &mut attributes,
            "authorization_key",
            pointer(body, &["properties", "authorizationKey"]),
        );
        set_from(
            &mut attributes,
            "authorization_use_status",
            pointer(body, &["properties", "authorizationUseStatus"]),
        );
        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stratus_core::provider::ErrorKind;
    use stratus_core::resource::ResourceId;

    use crate::lifecycle::{ResourceHandler, Standalone};
    use crate::testing::{FakeClient, context};

    const ID: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/expressRouteCircuits/circuit1/authorizations/auth1";

    fn authorization() -> Resource {
        Resource::new(TYPE_NAME, "example")
            .with_attribute("name", "auth1")
            .with_attribute("resource_group_name", "rg1")
            .with_attribute("express_route_circuit_name", "circuit1")
    }

    #[tokio::test]
    async fn create_puts_empty_properties_and_reads_back() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(ExpressRouteCircuitAuthorization);

        let state = handler.create(&ctx, &authorization()).await.unwrap();

        assert_eq!(state.identifier.as_deref(), Some(ID));
        assert_eq!(state.get_str("express_route_circuit_name"), Some("circuit1"));
        let puts = client.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].1, json!({ "properties": {} }));
    }

    #[tokio::test]
    async fn read_exposes_computed_key() {
        let client = Arc::new(FakeClient::new());
        client.insert(
            ID,
            json!({
                "id": ID,
                "properties": {
                    "authorizationKey": "secret-key",
                    "authorizationUseStatus": "Available"
                }
            }),
        );
        let ctx = context(client.clone());
        let handler = Standalone(ExpressRouteCircuitAuthorization);

        let state = handler
            .read(&ctx, &ResourceId::new(TYPE_NAME, "example"), ID)
            .await
            .unwrap();
        assert_eq!(state.get_str("authorization_key"), Some("secret-key"));
        assert_eq!(state.get_str("authorization_use_status"), Some("Available"));
        assert_eq!(state.get_str("name"), Some("auth1"));
    }

    #[tokio::test]
    async fn create_existing_is_import_collision() {
        let client = Arc::new(FakeClient::new());
        client.insert(ID, json!({ "id": ID, "properties": {} }));
        let ctx = context(client.clone());
        let handler = Standalone(ExpressRouteCircuitAuthorization);

        let err = handler.create(&ctx, &authorization()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportCollision);
        assert!(client.puts().is_empty());
    }

    #[tokio::test]
    async fn authorization_key_cannot_be_configured() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(ExpressRouteCircuitAuthorization);

        let err = handler
            .create(&ctx, &authorization().with_attribute("authorization_key", "mine"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let client = Arc::new(FakeClient::new());
        client.insert(ID, json!({ "id": ID }));
        let ctx = context(client.clone());
        let handler = Standalone(ExpressRouteCircuitAuthorization);
        let id = ResourceId::new(TYPE_NAME, "example");

        handler.delete(&ctx, &id, ID).await.unwrap();
        handler.delete(&ctx, &id, ID).await.unwrap();
        assert_eq!(client.deletes().len(), 2);
        assert!(client.resource(ID).is_none());
    }

    #[tokio::test]
    async fn update_is_unsupported() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(ExpressRouteCircuitAuthorization);

        let err = handler
            .update(&ctx, &ResourceId::new(TYPE_NAME, "example"), ID, &authorization())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
        assert!(client.calls().is_empty());
    }

    #[test]
    fn lock_key_is_circuit_name() {
        let id = ResourceIdentifier::parse(ID).unwrap();
        assert_eq!(
            ExpressRouteCircuitAuthorization.lock_key(&id),
            Some(LockKey::new(EXPRESS_ROUTE_CIRCUIT_LOCK, "circuit1"))
        );
    }
}
