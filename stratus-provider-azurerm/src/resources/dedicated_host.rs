//! Dedicated host inside a dedicated host group
//!
//! Deleting a host is acknowledged before the host group stops reporting it,
//! so deletion keeps polling until the host has been absent for a
//! configurable number of consecutive reads.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::config::ProviderConfig;
use crate::lifecycle::{DeletionCheck, ProviderContext, StandaloneKind, UpdateMode, require_segments};
use crate::utils::{expand_tags, flatten_tags, normalize_location, pointer, set_from, str_at};

use super::{COMPUTE_API_VERSION, check_pattern, location_attribute, tags_attribute};

pub const TYPE_NAME: &str = "dedicated_host";

const SKUS: &[&str] = &[
    "DSv3-Type1",
    "DSv3-Type2",
    "DSv3-Type3",
    "DSv4-Type1",
    "ESv3-Type1",
    "ESv3-Type2",
    "ESv3-Type3",
    "ESv4-Type1",
    "FSv2-Type2",
    "FSv2-Type3",
    "DASv4-Type1",
    "DCSv2-Type1",
    "DDSv4-Type1",
    "EASv4-Type1",
    "EDSv4-Type1",
    "LSv2-Type1",
    "MS-Type1",
    "MSm-Type1",
    "MSmv2-Type1",
    "MSv2-Type1",
    "NVASv4-Type1",
    "NVSv3-Type1",
];

const LICENSE_TYPES: &[&str] = &["None", "Windows_Server_Hybrid", "Windows_Server_Perpetual"];

fn host_name() -> AttributeType {
    AttributeType::Custom {
        name: "DedicatedHostName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^[a-zA-Z0-9][a-zA-Z0-9_.-]{0,78}[a-zA-Z0-9_]$",
                "must begin with a letter or number, end with a letter, number or underscore, \
                 contain only letters, numbers, underscores, periods or hyphens, \
                 and be between 2 and 80 characters",
            )
        },
    }
}

fn host_group_id() -> AttributeType {
    AttributeType::Custom {
        name: "DedicatedHostGroupId".to_string(),
        base: Box::new(types::resource_id()),
        validate: |value| {
            let Value::String(s) = value else {
                return Err("Expected string".to_string());
            };
            let id = ResourceIdentifier::parse(s).map_err(|e| e.to_string())?;
            id.require("hostGroups").map(|_| ()).map_err(|e| e.to_string())
        },
    }
}

pub struct DedicatedHost;

pub struct HostConfig {
    pub name: String,
    pub host_group_id: ResourceIdentifier,
    pub location: String,
    pub sku_name: String,
    pub platform_fault_domain: i64,
    pub auto_replace_on_failure: bool,
    pub license_type: String,
    pub tags: Option<HashMap<String, Value>>,
}

#[async_trait]
impl StandaloneKind for DedicatedHost {
    type Config = HostConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Dedicated Host"
    }

    fn api_version(&self) -> &'static str {
        COMPUTE_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .with_description("A dedicated physical server hosting virtual machines")
            .attribute(AttributeSchema::new("name", host_name()).required().force_new())
            .attribute(
                AttributeSchema::new("dedicated_host_group_id", host_group_id())
                    .required()
                    .force_new(),
            )
            .attribute(location_attribute())
            .attribute(
                AttributeSchema::new("sku_name", AttributeType::enumeration(SKUS))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("platform_fault_domain", AttributeType::Int)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("auto_replace_on_failure", AttributeType::Bool).with_default(true))
            .attribute(
                AttributeSchema::new("license_type", AttributeType::enumeration(LICENSE_TYPES))
                    .with_default("None"),
            )
            .attribute(tags_attribute())
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Patch
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<HostConfig> {
        Ok(HostConfig {
            name: resource.require_str("name")?.to_string(),
            host_group_id: ResourceIdentifier::parse(resource.require_str("dedicated_host_group_id")?)?,
            location: normalize_location(resource.require_str("location")?),
            sku_name: resource.require_str("sku_name")?.to_string(),
            platform_fault_domain: resource.require_int("platform_fault_domain")?,
            auto_replace_on_failure: resource.get_bool_or("auto_replace_on_failure", true),
            license_type: resource.get_str("license_type").unwrap_or("None").to_string(),
            tags: resource.get_map("tags").cloned(),
        })
    }

    fn identity(&self, config: &HostConfig, _subscription_id: &str) -> ProviderResult<ResourceIdentifier> {
        Ok(config.host_group_id.clone().child("hosts", &config.name))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "hostGroups", "hosts"])?;
        if !id.kind().eq_ignore_ascii_case("hosts") {
            return Err(ProviderError::malformed_identifier(format!(
                "expected a dedicated host ID, got {:?}",
                id.to_string()
            )));
        }
        Ok(())
    }

    fn parent(&self, id: &ResourceIdentifier) -> Option<(ResourceIdentifier, &'static str)> {
        id.parent().map(|group| (group, COMPUTE_API_VERSION))
    }

    async fn build_payload(
        &self,
        _ctx: &ProviderContext,
        config: &HostConfig,
        _id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        Ok(json!({
            "location": config.location,
            "sku": { "name": config.sku_name },
            "properties": {
                "autoReplaceOnFailure": config.auto_replace_on_failure,
                "licenseType": config.license_type,
                "platformFaultDomain": config.platform_fault_domain,
            },
            "tags": expand_tags(config.tags.as_ref()),
        }))
    }

    fn build_patch(&self, config: &HostConfig) -> ProviderResult<Json> {
        Ok(json!({
            "properties": {
                "autoReplaceOnFailure": config.auto_replace_on_failure,
                "licenseType": config.license_type,
            },
            "tags": expand_tags(config.tags.as_ref()),
        }))
    }

    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>> {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(id.name()));
        if let Some(group) = id.parent() {
            attributes.insert("dedicated_host_group_id".to_string(), Value::from(group.to_string()));
        }
        if let Some(location) = str_at(body, &["location"]) {
            attributes.insert("location".to_string(), Value::from(normalize_location(location)));
        }
        set_from(&mut attributes, "sku_name", pointer(body, &["sku", "name"]));
        set_from(
            &mut attributes,
            "auto_replace_on_failure",
            pointer(body, &["properties", "autoReplaceOnFailure"]),
        );
        set_from(&mut attributes, "license_type", pointer(body, &["properties", "licenseType"]));
        let fault_domain = pointer(body, &["properties", "platformFaultDomain"])
            .and_then(Json::as_i64)
            .unwrap_or(0);
        attributes.insert("platform_fault_domain".to_string(), Value::Int(fault_domain));
        attributes.insert(
            "tags".to_string(),
            Value::Map(flatten_tags(body.get("tags"))),
        );
        Ok(attributes)
    }

    fn deletion_check(&self, config: &ProviderConfig) -> Option<DeletionCheck> {
        Some(DeletionCheck {
            confirmations: config.dedicated_host_delete_confirmations,
            poll_interval: config.dedicated_host_delete_poll_interval,
        })
    }
}
