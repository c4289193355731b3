//! Link between an automation runbook and a schedule
//!
//! Updating a runbook regenerates the IDs of the job schedules bound to it,
//! which orphans the IDs held in state. Create therefore removes any job
//! schedule already binding the same runbook and schedule before creating a
//! new one.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value as Json, json};
use stratus_core::identifier::ResourceIdentifier;
use stratus_core::poller::await_completion;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Attributes, Resource, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use uuid::Uuid;

use crate::lifecycle::{ProviderContext, StandaloneKind, UpdateMode, describe, require_segments};
use crate::utils::{pointer, set_from, str_at};

use super::{AUTOMATION_API_VERSION, check_pattern, resource_group_attribute};

pub const TYPE_NAME: &str = "automation_job_schedule";

pub(crate) fn account_name() -> AttributeType {
    AttributeType::Custom {
        name: "AutomationAccountName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^[0-9a-zA-Z][-0-9a-zA-Z]{4,48}[0-9a-zA-Z]$",
                "must be between 6 and 50 characters, contain only letters, numbers and hyphens, and start and end with a letter or number",
            )
        },
    }
}

fn runbook_name() -> AttributeType {
    AttributeType::Custom {
        name: "RunbookName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^[a-zA-Z][-_a-zA-Z0-9]{0,62}$",
                "must start with a letter, contain only letters, numbers, underscores or hyphens and be at most 63 characters",
            )
        },
    }
}

fn schedule_name() -> AttributeType {
    AttributeType::Custom {
        name: "ScheduleName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            check_pattern(
                value,
                r"^[^<>*%&:\\?.+/]{0,127}[^<>*%&:\\?.+/\s]$",
                "cannot contain any of <>*%&:\\?.+/, cannot end with whitespace and must be at most 128 characters",
            )
        },
    }
}

fn parameters() -> AttributeType {
    AttributeType::Custom {
        name: "RunbookParameters".to_string(),
        base: Box::new(AttributeType::Map(Box::new(AttributeType::String))),
        validate: |value| {
            let Some(map) = value.as_map() else {
                return Err("Expected map".to_string());
            };
            match map.keys().find(|k| k.chars().any(char::is_uppercase)) {
                Some(key) => Err(format!("parameter key {:?} must be lowercase", key)),
                None => Ok(()),
            }
        },
    }
}

fn uuid_string() -> AttributeType {
    AttributeType::Custom {
        name: "Uuid".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => Uuid::parse_str(s).map(|_| ()).map_err(|e| e.to_string()),
            _ => Err("Expected string".to_string()),
        },
    }
}

pub struct AutomationJobSchedule;

pub struct JobScheduleConfig {
    pub resource_group_name: String,
    pub account_name: String,
    pub runbook_name: String,
    pub schedule_name: String,
    pub parameters: Option<HashMap<String, String>>,
    pub run_on: Option<String>,
    pub job_schedule_id: Uuid,
}

fn account_of(id: &ResourceIdentifier) -> ProviderResult<ResourceIdentifier> {
    id.parent()
        .ok_or_else(|| ProviderError::malformed_identifier(format!("{} has no automation account", id)))
}

#[async_trait]
impl StandaloneKind for AutomationJobSchedule {
    type Config = JobScheduleConfig;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn display_name(&self) -> &'static str {
        "Automation Job Schedule"
    }

    fn api_version(&self) -> &'static str {
        AUTOMATION_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .attribute(resource_group_attribute())
            .attribute(
                AttributeSchema::new("automation_account_name", account_name())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("runbook_name", runbook_name()).required().force_new())
            .attribute(AttributeSchema::new("schedule_name", schedule_name()).required().force_new())
            .attribute(AttributeSchema::new("parameters", parameters()).optional().force_new())
            .attribute(AttributeSchema::new("run_on", AttributeType::String).optional().force_new())
            .attribute(
                AttributeSchema::new("job_schedule_id", uuid_string())
                    .optional()
                    .computed(),
            )
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Unsupported
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<JobScheduleConfig> {
        let job_schedule_id = match resource.get_str("job_schedule_id") {
            Some(id) => Uuid::parse_str(id).map_err(|e| {
                ProviderError::invalid_config(format!("job_schedule_id {:?} is not a UUID", id)).with_cause(e)
            })?,
            None => Uuid::new_v4(),
        };

        Ok(JobScheduleConfig {
            resource_group_name: resource.require_str("resource_group_name")?.to_string(),
            account_name: resource.require_str("automation_account_name")?.to_string(),
            runbook_name: resource.require_str("runbook_name")?.to_string(),
            schedule_name: resource.require_str("schedule_name")?.to_string(),
            parameters: resource.get_string_map("parameters"),
            run_on: resource.get_str("run_on").map(str::to_string),
            job_schedule_id,
        })
    }

    fn identity(
        &self,
        config: &JobScheduleConfig,
        subscription_id: &str,
    ) -> ProviderResult<ResourceIdentifier> {
        Ok(ResourceIdentifier::subscription(subscription_id)
            .resource_group(&config.resource_group_name)
            .provider("Microsoft.Automation")
            .child("automationAccounts", &config.account_name)
            .child("jobSchedules", config.job_schedule_id.to_string()))
    }

    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()> {
        require_segments(id, &["resourceGroups", "automationAccounts", "jobSchedules"])
    }

    async fn before_create(
        &self,
        ctx: &ProviderContext,
        config: &JobScheduleConfig,
        id: &ResourceIdentifier,
    ) -> ProviderResult<()> {
        let account = account_of(id)?;
        let described = describe("Automation Account", &account);
        let collection = format!("{}/jobSchedules", account);

        let existing = ctx
            .client
            .list(&collection, AUTOMATION_API_VERSION)
            .await
            .map_err(|e| ProviderError::from(e).context(format!("listing job schedules of {}", described)))?;

        for job_schedule in existing {
            let schedule = str_at(&job_schedule, &["properties", "schedule", "name"]);
            let runbook = str_at(&job_schedule, &["properties", "runbook", "name"]);
            if schedule != Some(config.schedule_name.as_str()) || runbook != Some(config.runbook_name.as_str()) {
                continue;
            }

            let stale = str_at(&job_schedule, &["properties", "jobScheduleId"])
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ProviderError::api(format!("job schedule listed by {} has no ID", described))
                })?;
            let stale = Uuid::parse_str(stale).map_err(|e| {
                ProviderError::api(format!("parsing job schedule ID {:?} listed by {}", stale, described))
                    .with_cause(e)
            })?;

            log::info!(
                "Removing job schedule {} binding runbook {:?} to schedule {:?} in {}",
                stale,
                config.runbook_name,
                config.schedule_name,
                described
            );
            let stale_id = account.clone().child("jobSchedules", stale.to_string()).to_string();
            match ctx.client.delete(&stale_id, AUTOMATION_API_VERSION).await {
                Ok(operation) => await_completion(operation, ctx.config.operation_poll_interval).await?,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(ProviderError::from(e).context(format!("deleting job schedule {} of {}", stale, described)));
                }
            }
        }
        Ok(())
    }

    async fn build_payload(
        &self,
        _ctx: &ProviderContext,
        config: &JobScheduleConfig,
        _id: &ResourceIdentifier,
    ) -> ProviderResult<Json> {
        let mut properties = Map::new();
        properties.insert("schedule".to_string(), json!({ "name": config.schedule_name }));
        properties.insert("runbook".to_string(), json!({ "name": config.runbook_name }));
        if let Some(parameters) = &config.parameters {
            properties.insert("parameters".to_string(), json!(parameters));
        }
        if let Some(run_on) = &config.run_on {
            properties.insert("runOn".to_string(), json!(run_on));
        }
        Ok(json!({ "properties": properties }))
    }

    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>> {
        let mut attributes = HashMap::new();
        let job_schedule_id = str_at(body, &["properties", "jobScheduleId"]).unwrap_or(id.name());
        attributes.insert("job_schedule_id".to_string(), Value::from(job_schedule_id));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.require("resourceGroups")?),
        );
        attributes.insert(
            "automation_account_name".to_string(),
            Value::from(id.require("automationAccounts")?),
        );
        set_from(&mut attributes, "runbook_name", pointer(body, &["properties", "runbook", "name"]));
        set_from(&mut attributes, "schedule_name", pointer(body, &["properties", "schedule", "name"]));
        set_from(&mut attributes, "run_on", pointer(body, &["properties", "runOn"]));

        if let Some(Json::Object(parameters)) = pointer(body, &["properties", "parameters"]) {
            let parameters = parameters
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.to_lowercase(), Value::from(v))))
                .collect();
            attributes.insert("parameters".to_string(), Value::Map(parameters));
        }
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
    use crate::testing::{Call, FakeClient, context};

    const ACCOUNT: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Automation/automationAccounts/account1";
    const JOB_SCHEDULE_ID: &str = "11111111-2222-4333-8444-555555555555";
    const STALE_ID: &str = "99999999-8888-4777-8666-555555555555";

    fn job_schedule() -> Resource {
        Resource::new(TYPE_NAME, "example")
            .with_attribute("resource_group_name", "rg1")
            .with_attribute("automation_account_name", "account1")
            .with_attribute("runbook_name", "Get-AzureVMTutorial")
            .with_attribute("schedule_name", "daily")
            .with_attribute("job_schedule_id", JOB_SCHEDULE_ID)
    }

    fn id_of(job_schedule_id: &str) -> String {
        format!("{}/jobSchedules/{}", ACCOUNT, job_schedule_id)
    }

    #[tokio::test]
    async fn create_removes_stale_binding() {
        let client = Arc::new(FakeClient::new());
        let stale = id_of(STALE_ID);
        client.insert(&stale, json!({ "id": stale }));
        client.set_collection(
            &format!("{}/jobSchedules", ACCOUNT),
            vec![
                json!({
                    "properties": {
                        "jobScheduleId": STALE_ID,
                        "runbook": { "name": "Get-AzureVMTutorial" },
                        "schedule": { "name": "daily" }
                    }
                }),
                json!({
                    "properties": {
                        "jobScheduleId": "00000000-0000-4000-8000-000000000000",
                        "runbook": { "name": "Other" },
                        "schedule": { "name": "daily" }
                    }
                }),
            ],
        );
        let ctx = context(client.clone());
        let handler = Standalone(AutomationJobSchedule);

        let state = handler.create(&ctx, &job_schedule()).await.unwrap();

        assert_eq!(client.deletes(), vec![stale.clone()]);
        assert!(client.resource(&stale).is_none());
        assert_eq!(state.identifier, Some(id_of(JOB_SCHEDULE_ID)));
        assert_eq!(state.get_str("runbook_name"), Some("Get-AzureVMTutorial"));

        let calls = client.calls();
        let delete_at = calls.iter().position(|c| matches!(c, Call::Delete(_)));
        let put_at = calls.iter().position(|c| matches!(c, Call::Put(..)));
        assert!(delete_at.unwrap() < put_at.unwrap());
    }

    #[tokio::test]
    async fn generates_job_schedule_id() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(AutomationJobSchedule);

        let mut resource = job_schedule();
        resource.attributes.remove("job_schedule_id");
        let state = handler.create(&ctx, &resource).await.unwrap();

        let identifier = state.identifier.unwrap();
        let generated = identifier.rsplit('/').next().unwrap();
        assert_eq!(Uuid::parse_str(generated).unwrap().get_version_num(), 4);
    }

    #[tokio::test]
    async fn parameter_keys_must_be_lowercase() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(AutomationJobSchedule);

        let mut parameters = HashMap::new();
        parameters.insert("VMName".to_string(), Value::from("vm1"));
        let err = handler
            .create(&ctx, &job_schedule().with_attribute("parameters", Value::Map(parameters)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn read_lowercases_parameter_keys() {
        let client = Arc::new(FakeClient::new());
        let id = id_of(JOB_SCHEDULE_ID);
        client.insert(
            &id,
            json!({
                "id": id,
                "properties": {
                    "jobScheduleId": JOB_SCHEDULE_ID,
                    "runbook": { "name": "Get-AzureVMTutorial" },
                    "schedule": { "name": "daily" },
                    "parameters": { "VMName": "vm1" },
                    "runOn": "hybrid-workers"
                }
            }),
        );
        let ctx = context(client.clone());
        let handler = Standalone(AutomationJobSchedule);

        let state = handler
            .read(&ctx, &ResourceId::new(TYPE_NAME, "example"), &id)
            .await
            .unwrap();
        let parameters = state.get_string_map("parameters").unwrap();
        assert_eq!(parameters.get("vmname").map(String::as_str), Some("vm1"));
        assert_eq!(state.get_str("run_on"), Some("hybrid-workers"));
        assert_eq!(state.get_str("job_schedule_id"), Some(JOB_SCHEDULE_ID));
    }

    #[tokio::test]
    async fn update_is_unsupported() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let handler = Standalone(AutomationJobSchedule);

        let err = handler
            .update(
                &ctx,
                &ResourceId::new(TYPE_NAME, "example"),
                &id_of(JOB_SCHEDULE_ID),
                &job_schedule(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }
}
