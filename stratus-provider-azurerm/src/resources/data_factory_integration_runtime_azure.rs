//! Azure (managed) integration runtime of a data factory

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use crate::lifecycle::{ProviderContext, StandaloneKind, describe, require_segments};
use crate::utils::{normalize_location, pointer, set_from, str_at};

use super::{check_pattern, location_attribute, resource_group_attribute};

pub const TYPE_NAME: &str = "data_factory_integration_runtime_azure";

const API_VERSION: &str = "2018-06-01";

const CORE_COUNTS: [i64; 7] = [8, 16, 32, 48, 80, 144, 272];

fn runtime_name() -> AttributeType {
    AttributeType::Custom {
        name: "IntegrationRuntimeName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^([a-zA-Z0-9](-|-?[a-zA-Z0-9]+)+[a-zA-Z0-9])$",
                "is not a valid integration runtime name: minimum 3 characters, must start and end \
                 with a number or a letter, may only consist of letters, numbers and dashes",
            )
        },
    }
}

fn factory_name() -> AttributeType {
    AttributeType::Custom {
        name: "DataFactoryName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$",
                "is not a valid data factory name: letters, numbers and single dashes, starting and ending with a letter or number",
            )?;
            match value.as_str().map(str::len) {
                Some(3..=63) => Ok(()),
                _ => Err("data factory names must be between 3 and 63 characters".to_string()),
            }
        },
    }
}

fn core_count() -> AttributeType {
    AttributeType::Custom {
        name: "CoreCount".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| match value.as_int() {
            Some(n) if CORE_COUNTS.contains(&n) => Ok(()),
            _ => Err(format!("core_count must be one of {:?}", CORE_COUNTS)),
        },
    }
}

pub struct DataFactoryIntegrationRuntimeAzure;

pub struct RuntimeConfig {
    pub name: String,
    pub description: Option<String>,
    pub factory_name: String,
    pub resource_group_name: String,
    pub location: String,
    pub compute_type: String,
    pub core_count: i64,
    pub time_to_live_min: i64,
    pub virtual_network_enabled: bool,
}

impl DataFactoryIntegrationRuntimeAzure {
    /// Name of the factory's managed virtual network, if it has one
    async fn managed_virtual_network(
        &self,
        ctx: &ProviderContext,
        factory: &ResourceIdentifier,
    ) -> ProviderResult<Option<String>> {
        let collection = format!("{}/managedVirtualNetworks", factory);
        let networks = ctx
            .client
            .list(&collection, API_VERSION)
            .await
            .map_err(|e| {
                ProviderError::from(e).context(format!(
                    "listing managed virtual networks of {}",
                    describe("Data Factory", factory)
                ))
            })?;
        Ok(networks
            .iter()
            .find_map(|network| str_at(network, &["name"]))
            .map(str::to_string))
    }
}

#[async_trait]
impl StandaloneKind for DataFactoryIntegrationRuntimeAzure {
    type Config = RuntimeConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Data Factory Azure Integration Runtime"
    }

    fn api_version(&self) -> &'static str {
        API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .attribute(AttributeSchema::new("name", runtime_name()).required().force_new())
            .attribute(AttributeSchema::new("description", AttributeType::String).optional())
            .attribute(
                AttributeSchema::new("data_factory_name", factory_name())
                    .required()
                    .force_new(),
            )
            .attribute(resource_group_attribute())
            .attribute(location_attribute())
            .attribute(
                AttributeSchema::new(
                    "compute_type",
                    AttributeType::enumeration(&["General", "ComputeOptimized", "MemoryOptimized"]),
                )
                .with_default("General"),
            )
            .attribute(AttributeSchema::new("core_count", core_count()).with_default(8i64))
            .attribute(AttributeSchema::new("time_to_live_min", AttributeType::Int).with_default(0i64))
            .attribute(
                AttributeSchema::new("virtual_network_enabled", AttributeType::Bool)
                    .optional()
                    .force_new(),
            )
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<RuntimeConfig> {
        Ok(RuntimeConfig {
            name: resource.require_str("name")?.to_string(),
            description: resource.get_str("description").map(str::to_string),
            factory_name: resource.require_str("data_factory_name")?.to_string(),
            resource_group_name: resource.require_str("resource_group_name")?.to_string(),
            location: normalize_location(resource.require_str("location")?),
            compute_type: resource.get_str("compute_type").unwrap_or("General").to_string(),
            core_count: resource.get_int("core_count").unwrap_or(8),
            time_to_live_min: resource.get_int("time_to_live_min").unwrap_or(0),
            virtual_network_enabled: resource.get_bool_or("virtual_network_enabled", false),
        })
    }

    fn identity(&self, config: &RuntimeConfig, subscription_id: &str) -> ProviderResult<ResourceIdentifier> {
        Ok(ResourceIdentifier::subscription(subscription_id)
            .resource_group(&config.resource_group_name)
            .provider("Microsoft.DataFactory")
            .child("factories", &config.factory_name)
            .child("integrationruntimes", &config.name))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "factories", "integrationruntimes"])
    }

    fn managed_paths(&self) -> &'static [&'static [&'static str]] {
        &[
            &["properties", "description"],
            &["properties", "typeProperties", "computeProperties"],
            &["properties", "managedVirtualNetwork"],
        ]
    }

    async fn build_payload(
        &self,
        ctx: &ProviderContext,
        config: &RuntimeConfig,
        id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        let mut properties = Map::new();
        properties.insert("type".to_string(), json!("Managed"));
        if let Some(description) = &config.description {
            properties.insert("description".to_string(), json!(description));
        }
        properties.insert(
            "typeProperties".to_string(),
            json!({
                "computeProperties": {
                    "location": config.location,
                    "dataFlowProperties": {
                        "computeType": config.compute_type,
                        "coreCount": config.core_count,
                        "timeToLive": config.time_to_live_min,
                    }
                }
            }),
        );

        if config.virtual_network_enabled {
            let factory = id.parent().ok_or_else(|| {
                ProviderError::malformed_identifier(format!("{} has no data factory", id))
            })?;
            let Some(network) = self.managed_virtual_network(ctx, &factory).await? else {
                return Err(ProviderError::invalid_config(
                    "virtual network feature for azure integration runtime is only available after \
                     managed virtual network for this data factory is enabled",
                ));
            };
            properties.insert(
                "managedVirtualNetwork".to_string(),
                json!({ "type": "ManagedVirtualNetworkReference", "referenceName": network }),
            );
        }

        Ok(json!({ "name": config.name, "properties": properties }))
    }

    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>> {
        let kind = str_at(body, &["properties", "type"]).unwrap_or_default();
        if kind != "Managed" {
            return Err(ProviderError::api(format!(
                "{} is a {:?} integration runtime, expected \"Managed\"",
                describe(self.display_name(), id),
                kind
            )));
        }

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(id.require("integrationruntimes")?));
        attributes.insert("data_factory_name".to_string(), Value::from(id.require("factories")?));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.require("resourceGroups")?),
        );
        set_from(&mut attributes, "description", pointer(body, &["properties", "description"]));

        let network = str_at(body, &["properties", "managedVirtualNetwork", "referenceName"]);
        attributes.insert("virtual_network_enabled".to_string(), Value::Bool(network.is_some()));

        let compute = pointer(body, &["properties", "typeProperties", "computeProperties"]);
        if let Some(compute) = compute {
            if let Some(location) = str_at(compute, &["location"]) {
                attributes.insert("location".to_string(), Value::from(normalize_location(location)));
            }
            if let Some(data_flow) = compute.get("dataFlowProperties") {
                set_from(&mut attributes, "compute_type", data_flow.get("computeType"));
                set_from(&mut attributes, "core_count", data_flow.get("coreCount"));
                set_from(&mut attributes, "time_to_live_min", data_flow.get("timeToLive"));
            }
        }
        Ok(attributes)
    }
}
