//! Resource kinds supported by the Azure Resource Manager provider
//!
//! Each module defines one strategy ([`StandaloneKind`](crate::lifecycle::StandaloneKind)
//! or [`AssociationKind`](crate::lifecycle::AssociationKind)); this module
//! registers them and holds the schema pieces they share.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use stratus_core::provider::ResourceType;
use stratus_core::resource::Value;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::lifecycle::{Association, ResourceHandler, Standalone};

pub mod api_management_diagnostic;
pub mod automation_dsc_node_configuration;
pub mod automation_job_schedule;
pub mod data_factory_integration_runtime_azure;
pub mod dedicated_host;
pub mod disk_access;
pub mod express_route_circuit_authorization;
pub mod iothub_dps;
pub mod network_interface_application_security_group_association;

pub(crate) const NETWORK_API_VERSION: &str = "2020-11-01";
pub(crate) const COMPUTE_API_VERSION: &str = "2020-12-01";
pub(crate) const AUTOMATION_API_VERSION: &str = "2019-06-01";

/// Lock names of shared parents
pub(crate) const NETWORK_INTERFACE_LOCK: &str = "azurerm_network_interface";
pub(crate) const EXPRESS_ROUTE_CIRCUIT_LOCK: &str = "azurerm_express_route_circuit";

// =============================================================================
// Shared schema attributes
// =============================================================================

pub(crate) fn name_attribute() -> AttributeSchema {
    AttributeSchema::new("name", types::non_empty_string())
        .required()
        .force_new()
}

pub(crate) fn resource_group_attribute() -> AttributeSchema {
    AttributeSchema::new("resource_group_name", types::non_empty_string())
        .required()
        .force_new()
}

pub(crate) fn location_attribute() -> AttributeSchema {
    AttributeSchema::new("location", types::non_empty_string())
        .required()
        .force_new()
}

pub(crate) fn tags_attribute() -> AttributeSchema {
    AttributeSchema::new("tags", types::tags()).optional()
}

pub(crate) fn string_attribute(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String)
}

/// Body of a `Custom` validator checking a string against `pattern`
pub(crate) fn check_pattern(value: &Value, pattern: &str, message: &str) -> Result<(), String> {
    let Value::String(s) = value else {
        return Err("Expected string".to_string());
    };
    let re = Regex::new(pattern).map_err(|e| e.to_string())?;
    if re.is_match(s) {
        Ok(())
    } else {
        Err(format!("{:?} {}", s, message))
    }
}

/// Body of a `Custom` validator checking an integer range
pub(crate) fn check_range(value: &Value, min: i64, max: i64) -> Result<(), String> {
    match value.as_int() {
        Some(n) if (min..=max).contains(&n) => Ok(()),
        Some(n) => Err(format!("expected a value between {} and {}, got {}", min, max, n)),
        None => Err("Expected integer".to_string()),
    }
}

// =============================================================================
// Registry
// =============================================================================

/// All handlers, keyed by resource type name
pub fn handlers() -> HashMap<&'static str, Arc<dyn ResourceHandler>> {
    let handlers: Vec<Arc<dyn ResourceHandler>> = vec![
        Arc::new(Association(
            network_interface_application_security_group_association::NetworkInterfaceAsgAssociation,
        )),
        Arc::new(Standalone(
            express_route_circuit_authorization::ExpressRouteCircuitAuthorization,
        )),
        Arc::new(Standalone(dedicated_host::DedicatedHost)),
        Arc::new(Standalone(disk_access::DiskAccess)),
        Arc::new(Standalone(api_management_diagnostic::ApiManagementDiagnostic)),
        Arc::new(Standalone(
            data_factory_integration_runtime_azure::DataFactoryIntegrationRuntimeAzure,
        )),
        Arc::new(Standalone(automation_job_schedule::AutomationJobSchedule)),
        Arc::new(Standalone(
            automation_dsc_node_configuration::AutomationDscNodeConfiguration,
        )),
        Arc::new(Standalone(iothub_dps::IotHubDps)),
    ];

    handlers.into_iter().map(|h| (h.type_name(), h)).collect()
}

/// [`ResourceType`] view of a handler
pub struct HandlerType(pub Arc<dyn ResourceHandler>);

impl ResourceType for HandlerType {
    fn name(&self) -> &'static str {
        self.0.type_name()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }

    fn schema_version(&self) -> u32 {
        self.0.schema_version()
    }
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    let mut kinds: Vec<Box<dyn ResourceType>> = handlers()
        .into_values()
        .map(|h| Box::new(HandlerType(h)) as Box<dyn ResourceType>)
        .collect();
    kinds.sort_by_key(|t| t.name());
    kinds
}
