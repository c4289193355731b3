//! IoT Hub Device Provisioning Service

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::config::ProviderConfig;
use crate::lifecycle::{DeletionCheck, ProviderContext, StandaloneKind, require_segments};
use crate::utils::{expand_tags, flatten_tags, normalize_location, pointer, set_from, str_at};

use super::{check_pattern, check_range, location_attribute, resource_group_attribute, tags_attribute};

pub const TYPE_NAME: &str = "iothub_dps";

const API_VERSION: &str = "2018-01-22";

fn service_name() -> AttributeType {
    AttributeType::Custom {
        name: "IotHubName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^[-a-zA-Z0-9]{3,50}$",
                "must be between 3 and 50 characters and contain only letters, numbers or hyphens",
            )
        },
    }
}

fn sku() -> AttributeType {
    AttributeType::Block(vec![
        AttributeSchema::new("name", AttributeType::enumeration(&["S1"])).required(),
        AttributeSchema::new(
            "capacity",
            AttributeType::Custom {
                name: "Capacity".to_string(),
                base: Box::new(AttributeType::Int),
                validate: |value| check_range(value, 1, 200),
            },
        )
        .required(),
    ])
}

fn linked_hub() -> AttributeType {
    AttributeType::Block(vec![
        AttributeSchema::new("connection_string", types::non_empty_string())
            .required()
            .sensitive(),
        AttributeSchema::new("location", types::non_empty_string()).required(),
        AttributeSchema::new("apply_allocation_policy", AttributeType::Bool).with_default(false),
        AttributeSchema::new(
            "allocation_weight",
            AttributeType::Custom {
                name: "AllocationWeight".to_string(),
                base: Box::new(AttributeType::Int),
                validate: |value| check_range(value, 0, 1000),
            },
        )
        .with_default(0i64),
        AttributeSchema::new("hostname", AttributeType::String).computed(),
    ])
}

pub struct IotHubDps;

pub struct LinkedHub {
    pub connection_string: String,
    pub location: String,
    pub apply_allocation_policy: bool,
    pub allocation_weight: i64,
}

pub struct DpsConfig {
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    pub sku_name: String,
    pub sku_capacity: i64,
    pub linked_hubs: Vec<LinkedHub>,
    pub allocation_policy: String,
    pub tags: Option<HashMap<String, Value>>,
}

fn parse_linked_hub(value: &Value) -> ProviderResult<LinkedHub> {
    let hub = value
        .as_map()
        .ok_or_else(|| ProviderError::invalid_config("linked_hub entries must be blocks"))?;
    Ok(LinkedHub {
        connection_string: hub.require_str("connection_string")?.to_string(),
        location: normalize_location(hub.require_str("location")?),
        apply_allocation_policy: hub.get_bool_or("apply_allocation_policy", false),
        allocation_weight: hub.get_int("allocation_weight").unwrap_or(0),
    })
}

fn flatten_linked_hub(hub: &Json) -> Value {
    let mut attributes = HashMap::new();
    set_from(&mut attributes, "hostname", hub.get("name"));
    set_from(&mut attributes, "apply_allocation_policy", hub.get("applyAllocationPolicy"));
    set_from(&mut attributes, "allocation_weight", hub.get("allocationWeight"));
    set_from(&mut attributes, "connection_string", hub.get("connectionString"));
    if let Some(location) = str_at(hub, &["location"]) {
        attributes.insert("location".to_string(), Value::from(normalize_location(location)));
    }
    Value::Map(attributes)
}

#[async_trait]
impl StandaloneKind for IotHubDps {
    type Config = DpsConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "IoT Device Provisioning Service"
    }

    fn api_version(&self) -> &'static str {
        API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .attribute(AttributeSchema::new("name", service_name()).required().force_new())
            .attribute(resource_group_attribute())
            .attribute(location_attribute())
            .attribute(AttributeSchema::new("sku", sku()).required())
            .attribute(
                AttributeSchema::new("linked_hub", AttributeType::List(Box::new(linked_hub())))
                    .optional(),
            )
            .attribute(
                AttributeSchema::new(
                    "allocation_policy",
                    AttributeType::enumeration(&["Hashed", "GeoLatency", "Static"]),
                )
                .with_default("Hashed"),
            )
            .attribute(AttributeSchema::new("device_provisioning_host_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("id_scope", AttributeType::String).computed())
            .attribute(AttributeSchema::new("service_operations_host_name", AttributeType::String).computed())
            .attribute(tags_attribute())
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<DpsConfig> {
        let sku = resource.require_map("sku")?;
        let linked_hubs = resource
            .get_list("linked_hub")
            .unwrap_or_default()
            .iter()
            .map(parse_linked_hub)
            .collect::<ProviderResult<Vec<_>>>()?;

        Ok(DpsConfig {
            name: resource.require_str("name")?.to_string(),
            resource_group_name: resource.require_str("resource_group_name")?.to_string(),
            location: normalize_location(resource.require_str("location")?),
            sku_name: sku.require_str("name")?.to_string(),
            sku_capacity: sku.require_int("capacity")?,
            linked_hubs,
            allocation_policy: resource
                .get_str("allocation_policy")
                .unwrap_or("Hashed")
                .to_string(),
            tags: resource.get_map("tags").cloned(),
        })
    }

    fn identity(&self, config: &DpsConfig, subscription_id: &str) -> ProviderResult<ResourceIdentifier> {
        Ok(ResourceIdentifier::subscription(subscription_id)
            .resource_group(&config.resource_group_name)
            .provider("Microsoft.Devices")
            .child("provisioningServices", &config.name))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "provisioningServices"])
    }

    async fn build_payload(
        &self,
        _ctx: &ProviderContext,
        config: &DpsConfig,
        _id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        let hubs: Vec<Json> = config
            .linked_hubs
            .iter()
            .map(|hub| {
                json!({
                    "connectionString": hub.connection_string,
                    "allocationWeight": hub.allocation_weight,
                    "applyAllocationPolicy": hub.apply_allocation_policy,
                    "location": hub.location,
                })
            })
            .collect();

        Ok(json!({
            "name": config.name,
            "location": config.location,
            "sku": { "name": config.sku_name, "capacity": config.sku_capacity },
            "properties": {
                "iotHubs": hubs,
                "allocationPolicy": config.allocation_policy,
            },
            "tags": expand_tags(config.tags.as_ref()),
        }))
    }

    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>> {
        let mut attributes = HashMap::new();
        let name = str_at(body, &["name"]).unwrap_or(id.name());
        attributes.insert("name".to_string(), Value::from(name));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.require("resourceGroups")?),
        );
        if let Some(location) = str_at(body, &["location"]) {
            attributes.insert("location".to_string(), Value::from(normalize_location(location)));
        }

        let mut sku = HashMap::new();
        set_from(&mut sku, "name", pointer(body, &["sku", "name"]));
        set_from(&mut sku, "capacity", pointer(body, &["sku", "capacity"]));
        attributes.insert("sku".to_string(), Value::Map(sku));

        if let Some(props) = body.get("properties") {
            let hubs = props
                .get("iotHubs")
                .and_then(Json::as_array)
                .map(|hubs| hubs.iter().map(flatten_linked_hub).collect())
                .unwrap_or_default();
            attributes.insert("linked_hub".to_string(), Value::List(hubs));
            set_from(
                &mut attributes,
                "service_operations_host_name",
                props.get("serviceOperationsHostName"),
            );
            set_from(
                &mut attributes,
                "device_provisioning_host_name",
                props.get("deviceProvisioningHostName"),
            );
            set_from(&mut attributes, "id_scope", props.get("idScope"));
            set_from(&mut attributes, "allocation_policy", props.get("allocationPolicy"));
        }

        attributes.insert("tags".to_string(), Value::Map(flatten_tags(body.get("tags"))));
        Ok(attributes)
    }

    // GET keeps returning 200 for a while after the delete operation completes
    fn deletion_check(&self, config: &ProviderConfig) -> Option<DeletionCheck> {
        Some(DeletionCheck {
            confirmations: 1,
            poll_interval: config.operation_poll_interval,
        })
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

    const ID: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Devices/provisioningServices/dps1";

    fn sku(capacity: i64) -> Value {
        let mut sku = HashMap::new();
        sku.insert("name".to_string(), Value::from("S1"));
        sku.insert("capacity".to_string(), Value::Int(capacity));
        Value::Map(sku)
    }

    fn hub(weight: Option<i64>) -> Value {
        let mut hub = HashMap::new();
        hub.insert(
            "connection_string".to_string(),
            Value::from("HostName=hub1.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=secret"),
        );
        hub.insert("location".to_string(), Value::from("West Europe"));
        if let Some(weight) = weight {
            hub.insert("allocation_weight".to_string(), Value::Int(weight));
        }
        Value::Map(hub)
    }

    fn dps() -> Resource {
        Resource::new(TYPE_NAME, "example")
            .with_attribute("name", "dps1")
            .with_attribute("resource_group_name", "rg1")
            .with_attribute("location", "westeurope")
            .with_attribute("sku", sku(1))
    }

    #[tokio::test]
    async fn create_expands_linked_hubs() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(IotHubDps);

        let state = handler
            .create(&ctx, &dps().with_attribute("linked_hub", Value::List(vec![hub(None)])))
            .await
            .unwrap();

        let body = &client.puts()[0].1;
        assert_eq!(body["sku"], json!({ "name": "S1", "capacity": 1 }));
        assert_eq!(body["properties"]["allocationPolicy"], json!("Hashed"));
        assert_eq!(
            body["properties"]["iotHubs"][0],
            json!({
                "connectionString": "HostName=hub1.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=secret",
                "allocationWeight": 0,
                "applyAllocationPolicy": false,
                "location": "westeurope",
            })
        );
        assert_eq!(state.identifier.as_deref(), Some(ID));
        assert_eq!(state.get_list("linked_hub").map(|l| l.len()), Some(1));
        assert_eq!(state.get_map("sku").and_then(|s| s.get_int("capacity")), Some(1));
    }

    #[tokio::test]
    async fn rejects_out_of_range_values() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(IotHubDps);

        let err = handler
            .create(&ctx, &dps().with_attribute("sku", sku(201)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);

        let err = handler
            .create(
                &ctx,
                &dps().with_attribute("linked_hub", Value::List(vec![hub(Some(1001))])),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);

        let err = handler
            .create(&ctx, &dps().with_attribute("allocation_policy", "RoundRobin"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn read_exposes_computed_host_names() {
        let client = Arc::new(FakeClient::new());
        client.insert(
            ID,
            json!({
                "id": ID,
                "name": "dps1",
                "location": "West Europe",
                "sku": { "name": "S1", "capacity": 2 },
                "properties": {
                    "iotHubs": [{
                        "name": "hub1.azure-devices.net",
                        "connectionString": "HostName=hub1.azure-devices.net;SharedAccessKey=****",
                        "location": "westeurope",
                        "allocationWeight": 10,
                        "applyAllocationPolicy": true
                    }],
                    "allocationPolicy": "GeoLatency",
                    "serviceOperationsHostName": "dps1.azure-devices-provisioning.net",
                    "deviceProvisioningHostName": "global.azure-devices-provisioning.net",
                    "idScope": "0ne00000001"
                }
            }),
        );
        let ctx = context(client.clone());
        let handler = Standalone(IotHubDps);

        let state = handler
            .read(&ctx, &ResourceId::new(TYPE_NAME, "example"), ID)
            .await
            .unwrap();
        assert_eq!(state.get_str("id_scope"), Some("0ne00000001"));
        assert_eq!(state.get_str("allocation_policy"), Some("GeoLatency"));
        assert_eq!(
            state.get_str("device_provisioning_host_name"),
            Some("global.azure-devices-provisioning.net")
        );
        let hubs = state.get_list("linked_hub").unwrap();
        let hub = hubs[0].as_map().unwrap();
        assert_eq!(hub.get_str("hostname"), Some("hub1.azure-devices.net"));
        assert_eq!(hub.get_int("allocation_weight"), Some(10));
    }

    #[tokio::test]
    async fn update_unlinks_removed_hubs() {
        let client = Arc::new(FakeClient::new());
        client.insert(
            ID,
            json!({
                "id": ID,
                "name": "dps1",
                "type": "Microsoft.Devices/provisioningServices",
                "etag": "AAAAAAFD6M4=",
                "location": "westeurope",
                "sku": { "name": "S1", "capacity": 1 },
                "tags": { "env": "test" },
                "properties": {
                    "provisioningState": "Succeeded",
                    "iotHubs": [{
                        "name": "hub1.azure-devices.net",
                        "connectionString": "HostName=hub1.azure-devices.net;SharedAccessKey=****",
                        "location": "westeurope",
                        "allocationWeight": 0,
                        "applyAllocationPolicy": false
                    }],
                    "allocationPolicy": "Hashed",
                    "idScope": "0ne00000001"
                }
            }),
        );
        let ctx = context(client.clone());
        let handler = Standalone(IotHubDps);

        let state = handler
            .update(&ctx, &ResourceId::new(TYPE_NAME, "example"), ID, &dps())
            .await
            .unwrap();

        let puts = client.puts();
        let (_, body) = puts.last().unwrap();
        assert_eq!(body["properties"]["iotHubs"], json!([]));
        assert_eq!(body["tags"], json!({}));
        assert_eq!(body["name"], json!("dps1"));
        assert!(body.get("etag").is_none());
        assert!(body.get("type").is_none());
        assert!(body["properties"].get("provisioningState").is_none());

        assert_eq!(state.get_list("linked_hub").map(|l| l.len()), Some(0));
        assert_eq!(state.get_map("tags").map(|t| t.len()), Some(0));
        assert_eq!(state.get_str("id_scope"), Some("0ne00000001"));
    }

    #[tokio::test]
    async fn reads_legacy_identifier_casing() {
        let client = Arc::new(FakeClient::new());
        client.insert(ID, json!({ "id": ID, "name": "dps1" }));
        let ctx = context(client.clone());
        let handler = Standalone(IotHubDps);

        let legacy = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Devices/ProvisioningServices/dps1";
        let state = handler
            .read(&ctx, &ResourceId::new(TYPE_NAME, "example"), legacy)
            .await
            .unwrap();
        assert!(state.exists);
        assert_eq!(state.identifier.as_deref(), Some(legacy));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_until_gone() {
        let client = Arc::new(FakeClient::new());
        client.insert(ID, json!({ "id": ID }));
        client.script_gets(ID, vec![Some(json!({ "id": ID })), Some(json!({ "id": ID }))]);
        let ctx = context(client.clone());
        let handler = Standalone(IotHubDps);

        handler
            .delete(&ctx, &ResourceId::new(TYPE_NAME, "example"), ID)
            .await
            .unwrap();
        assert_eq!(client.gets_of(ID), 3);
    }
}
