//! API Management service diagnostic settings

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::lifecycle::{ProviderContext, StandaloneKind, require_segments};
use crate::utils::{pointer, set_from, str_at};

use super::{check_pattern, check_range, resource_group_attribute};

pub const TYPE_NAME: &str = "api_management_diagnostic";

const API_VERSION: &str = "2020-12-01";

const MESSAGE_SETTINGS: [(&str, &str, &str); 4] = [
    ("frontend_request", "frontend", "request"),
    ("frontend_response", "frontend", "response"),
    ("backend_request", "backend", "request"),
    ("backend_response", "backend", "response"),
];

fn service_name() -> AttributeType {
    AttributeType::Custom {
        name: "ApiManagementName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^[a-zA-Z](?:[a-zA-Z0-9-]{0,48}[a-zA-Z0-9])?$",
                "must start with a letter, end with a letter or number, contain only letters, numbers or hyphens and be at most 50 characters",
            )
        },
    }
}

fn logger_id() -> AttributeType {
    AttributeType::Custom {
        name: "ApiManagementLoggerId".to_string(),
        base: Box::new(types::resource_id()),
        validate: |value| {
            let Value::String(s) = value else {
                return Err("Expected string".to_string());
            };
            let id = ResourceIdentifier::parse(s).map_err(|e| e.to_string())?;
            id.require("service").map_err(|e| e.to_string())?;
            id.require("loggers").map(|_| ()).map_err(|e| e.to_string())
        },
    }
}

fn percentage() -> AttributeType {
    AttributeType::Custom {
        name: "Percentage".to_string(),
        base: Box::new(AttributeType::Float),
        validate: |value| match value.as_float() {
            Some(p) if (0.0..=100.0).contains(&p) => Ok(()),
            Some(p) => Err(format!("expected a percentage between 0 and 100, got {}", p)),
            None => Err("Expected float".to_string()),
        },
    }
}

/// Request/response logging settings of one pipeline stage
fn message_settings(name: &str) -> AttributeSchema {
    AttributeSchema::new(
        name,
        AttributeType::Block(vec![
            AttributeSchema::new(
                "body_bytes",
                AttributeType::Custom {
                    name: "BodyBytes".to_string(),
                    base: Box::new(AttributeType::Int),
                    validate: |value| check_range(value, 0, 8192),
                },
            )
            .optional(),
            AttributeSchema::new("headers_to_log", AttributeType::List(Box::new(AttributeType::String)))
                .optional(),
        ]),
    )
    .optional()
}

fn expand_message_settings(settings: &HashMap<String, Value>) -> Json {
    let mut out = Map::new();
    if let Some(bytes) = settings.get_int("body_bytes") {
        out.insert("body".to_string(), json!({ "bytes": bytes }));
    }
    if let Some(headers) = settings.get_list("headers_to_log") {
        let headers: Vec<&str> = headers.iter().filter_map(Value::as_str).collect();
        out.insert("headers".to_string(), json!(headers));
    }
    Json::Object(out)
}

fn flatten_message_settings(body: &Json) -> Value {
    let mut settings = HashMap::new();
    set_from(&mut settings, "body_bytes", pointer(body, &["body", "bytes"]));
    set_from(&mut settings, "headers_to_log", body.get("headers"));
    Value::Map(settings)
}

pub struct ApiManagementDiagnostic;

pub struct DiagnosticConfig {
    pub identifier: String,
    pub resource_group_name: String,
    pub service_name: String,
    pub logger_id: String,
    pub sampling_percentage: Option<f64>,
    pub always_log_errors: Option<bool>,
    pub verbosity: Option<String>,
    pub log_client_ip: Option<bool>,
    pub http_correlation_protocol: Option<String>,
    /// Keyed by attribute name (e.g. "frontend_request")
    pub message_settings: HashMap<&'static str, HashMap<String, Value>>,
    pub operation_name_format: String,
}

#[async_trait]
impl StandaloneKind for ApiManagementDiagnostic {
    type Config = DiagnosticConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Diagnostic"
    }

    fn api_version(&self) -> &'static str {
        API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        let mut schema = ResourceSchema::new(TYPE_NAME)
            .attribute(
                AttributeSchema::new(
                    "identifier",
                    AttributeType::enumeration(&["applicationinsights", "azuremonitor"]),
                )
                .required()
                .force_new(),
            )
            .attribute(resource_group_attribute())
            .attribute(
                AttributeSchema::new("api_management_name", service_name())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("api_management_logger_id", logger_id()).required())
            .attribute(
                AttributeSchema::new("sampling_percentage", percentage())
                    .optional()
                    .computed(),
            )
            .attribute(
                AttributeSchema::new("always_log_errors", AttributeType::Bool)
                    .optional()
                    .computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "verbosity",
                    AttributeType::enumeration(&["verbose", "information", "error"]),
                )
                .optional()
                .computed(),
            )
            .attribute(
                AttributeSchema::new("log_client_ip", AttributeType::Bool)
                    .optional()
                    .computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "http_correlation_protocol",
                    AttributeType::enumeration(&["None", "Legacy", "W3C"]),
                )
                .optional()
                .computed(),
            )
            .attribute(
                AttributeSchema::new("operation_name_format", AttributeType::enumeration(&["Name", "Url"]))
                    .with_default("Name"),
            );
        for (name, _, _) in MESSAGE_SETTINGS {
            schema = schema.attribute(message_settings(name));
        }
        schema
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<DiagnosticConfig> {
        let message_settings = MESSAGE_SETTINGS
            .iter()
            .filter_map(|(name, _, _)| resource.get_map(name).map(|m| (*name, m.clone())))
            .collect();

        Ok(DiagnosticConfig {
            identifier: resource.require_str("identifier")?.to_string(),
            resource_group_name: resource.require_str("resource_group_name")?.to_string(),
            service_name: resource.require_str("api_management_name")?.to_string(),
            logger_id: resource.require_str("api_management_logger_id")?.to_string(),
            sampling_percentage: resource.get_float("sampling_percentage"),
            always_log_errors: resource.get_bool("always_log_errors"),
            verbosity: resource.get_str("verbosity").map(str::to_string),
            log_client_ip: resource.get_bool("log_client_ip"),
            http_correlation_protocol: resource.get_str("http_correlation_protocol").map(str::to_string),
            message_settings,
            operation_name_format: resource
                .get_str("operation_name_format")
                .unwrap_or("Name")
                .to_string(),
        })
    }

    fn identity(
        &self,
        config: &DiagnosticConfig,
        subscription_id: &str,
    ) -> ProviderResult<ResourceIdentifier> {
        Ok(ResourceIdentifier::subscription(subscription_id)
            .resource_group(&config.resource_group_name)
            .provider("Microsoft.ApiManagement")
            .child("service", &config.service_name)
            .child("diagnostics", &config.identifier))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "service", "diagnostics"])
    }

    fn managed_paths(&self) -> &'static [&'static [&'static str]] {
        &[
            &["properties", "sampling"],
            &["properties", "alwaysLog"],
            &["properties", "verbosity"],
            &["properties", "logClientIp"],
            &["properties", "httpCorrelationProtocol"],
            &["properties", "frontend"],
            &["properties", "backend"],
        ]
    }

    async fn build_payload(
        &self,
        _ctx: &ProviderContext,
        config: &DiagnosticConfig,
        _id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        let mut properties = Map::new();
        properties.insert("loggerId".to_string(), json!(config.logger_id));
        properties.insert("operationNameFormat".to_string(), json!(config.operation_name_format));
        if let Some(percentage) = config.sampling_percentage {
            properties.insert(
                "sampling".to_string(),
                json!({ "samplingType": "fixed", "percentage": percentage }),
            );
        }
        if config.always_log_errors == Some(true) {
            properties.insert("alwaysLog".to_string(), json!("allErrors"));
        }
        if let Some(verbosity) = &config.verbosity {
            properties.insert("verbosity".to_string(), json!(verbosity));
        }
        if let Some(log_client_ip) = config.log_client_ip {
            properties.insert("logClientIp".to_string(), json!(log_client_ip));
        }
        if let Some(protocol) = &config.http_correlation_protocol {
            properties.insert("httpCorrelationProtocol".to_string(), json!(protocol));
        }

        for (name, stage, direction) in MESSAGE_SETTINGS {
            if let Some(settings) = config.message_settings.get(name) {
                let stage = properties
                    .entry(stage)
                    .or_insert_with(|| Json::Object(Map::new()));
                if let Some(stage) = stage.as_object_mut() {
                    stage.insert(direction.to_string(), expand_message_settings(settings));
                }
            }
        }

        Ok(json!({ "properties": properties }))
    }

    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>> {
        let mut attributes = HashMap::new();
        let identifier = str_at(body, &["name"]).unwrap_or(id.name());
        attributes.insert("identifier".to_string(), Value::from(identifier));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.require("resourceGroups")?),
        );
        attributes.insert("api_management_name".to_string(), Value::from(id.require("service")?));

        let Some(props) = body.get("properties") else {
            return Ok(attributes);
        };
        set_from(&mut attributes, "api_management_logger_id", props.get("loggerId"));
        if let Some(percentage) = pointer(props, &["sampling", "percentage"]).and_then(Json::as_f64) {
            attributes.insert("sampling_percentage".to_string(), Value::Float(percentage));
        }
        attributes.insert(
            "always_log_errors".to_string(),
            Value::Bool(str_at(props, &["alwaysLog"]) == Some("allErrors")),
        );
        set_from(&mut attributes, "verbosity", props.get("verbosity"));
        set_from(&mut attributes, "log_client_ip", props.get("logClientIp"));
        set_from(&mut attributes, "http_correlation_protocol", props.get("httpCorrelationProtocol"));
        for (name, stage, direction) in MESSAGE_SETTINGS {
            if let Some(settings) = pointer(props, &[stage, direction]).filter(|s| !s.is_null()) {
                attributes.insert(name.to_string(), flatten_message_settings(settings));
            }
        }
        let format = str_at(props, &["operationNameFormat"])
            .filter(|f| !f.is_empty())
            .unwrap_or("Name");
        attributes.insert("operation_name_format".to_string(), Value::from(format));
        Ok(attributes)
    }
}
