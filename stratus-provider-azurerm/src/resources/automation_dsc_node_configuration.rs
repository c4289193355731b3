//! DSC node configuration of an automation account

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::lifecycle::{ProviderContext, StandaloneKind, require_segments};
use crate::utils::{pointer, set_from, str_at};

use super::automation_job_schedule::account_name;
use super::{AUTOMATION_API_VERSION, name_attribute, resource_group_attribute};

pub const TYPE_NAME: &str = "automation_dsc_node_configuration";

pub struct AutomationDscNodeConfiguration;

pub struct NodeConfigurationConfig {
    pub name: String,
    pub resource_group_name: String,
    pub account_name: String,
    pub content_embedded: String,
}

/// DSC configuration a node configuration belongs to: `webserver.prod` -> `webserver`
pub fn configuration_name(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

#[async_trait]
impl StandaloneKind for AutomationDscNodeConfiguration {
    type Config = NodeConfigurationConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Automation DSC Node Configuration"
    }

    fn api_version(&self) -> &'static str {
        AUTOMATION_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .attribute(name_attribute())
            .attribute(
                AttributeSchema::new("automation_account_name", account_name())
                    .required()
                    .force_new(),
            )
            .attribute(resource_group_attribute())
            .attribute(AttributeSchema::new("content_embedded", types::non_empty_string()).required())
            .attribute(AttributeSchema::new("configuration_name", AttributeType::String).computed())
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<NodeConfigurationConfig> {
        Ok(NodeConfigurationConfig {
            name: resource.require_str("name")?.to_string(),
            resource_group_name: resource.require_str("resource_group_name")?.to_string(),
            account_name: resource.require_str("automation_account_name")?.to_string(),
            content_embedded: resource.require_str("content_embedded")?.to_string(),
        })
    }

    fn identity(
        &self,
        config: &NodeConfigurationConfig,
        subscription_id: &str,
    ) -> ProviderResult<ResourceIdentifier> {
        Ok(ResourceIdentifier::subscription(subscription_id)
            .resource_group(&config.resource_group_name)
            .provider("Microsoft.Automation")
            .child("automationAccounts", &config.account_name)
            .child("nodeConfigurations", &config.name))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "automationAccounts", "nodeConfigurations"])
    }

    // a stale hash would no longer match the new content
    fn managed_paths(&self) -> &'static [&'static [&'static str]] {
        &[&["properties", "source"]]
    }

    async fn build_payload(
        &self,
        _ctx: &ProviderContext,
        config: &NodeConfigurationConfig,
        _id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        Ok(json!({
            "name": config.name,
            "properties": {
                "source": { "type": "embeddedContent", "value": config.content_embedded },
                "configuration": { "name": configuration_name(&config.name) },
            }
        }))
    }

    // content_embedded is write-only
    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>> {
        let mut attributes = HashMap::new();
        let name = str_at(body, &["name"]).unwrap_or(id.name());
        attributes.insert("name".to_string(), Value::from(name));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.require("resourceGroups")?),
        );
        attributes.insert(
            "automation_account_name".to_string(),
            Value::from(id.require("automationAccounts")?),
        );
        set_from(
            &mut attributes,
            "configuration_name",
            pointer(body, &["properties", "configuration", "name"]),
        );
        Ok(attributes)
    }
}
