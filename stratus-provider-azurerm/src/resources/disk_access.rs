//! Disk access

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::ResourceSchema;

use crate::lifecycle::{ProviderContext, StandaloneKind, require_segments};
use crate::utils::{expand_tags, flatten_tags, normalize_location, str_at};

use super::{COMPUTE_API_VERSION, location_attribute, name_attribute, resource_group_attribute, tags_attribute};

pub const TYPE_NAME: &str = "disk_access";

pub struct DiskAccess;

pub struct DiskAccessConfig {
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    pub tags: Option<HashMap<String, Value>>,
}

#[async_trait]
impl StandaloneKind for DiskAccess {
    type Config = DiskAccessConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Disk Access"
    }

    fn api_version(&self) -> &'static str {
        COMPUTE_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .attribute(name_attribute())
            .attribute(resource_group_attribute())
            .attribute(location_attribute())
            .attribute(tags_attribute())
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<DiskAccessConfig> {
        Ok(DiskAccessConfig {
            name: resource.require_str("name")?.to_string(),
            resource_group_name: resource.require_str("resource_group_name")?.to_string(),
            location: normalize_location(resource.require_str("location")?),
            tags: resource.get_map("tags").cloned(),
        })
    }

    fn identity(
        &self,
        config: &DiskAccessConfig,
        subscription_id: &str,
    ) -> ProviderResult<ResourceIdentifier> {
        Ok(ResourceIdentifier::subscription(subscription_id)
            .resource_group(&config.resource_group_name)
            .provider("Microsoft.Compute")
            .child("diskAccesses", &config.name))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "diskAccesses"])
    }

    async fn build_payload(
        &self,
        _ctx: &ProviderContext,
        config: &DiskAccessConfig,
        _id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        Ok(json!({
            "name": config.name,
            "location": config.location,
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
        attributes.insert("tags".to_string(), Value::Map(flatten_tags(body.get("tags"))));
        Ok(attributes)
    }
}
