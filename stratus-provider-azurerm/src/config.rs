//! Provider configuration
//!
//! Built from the provider block's attributes, falling back to the
//! `ARM_SUBSCRIPTION_ID` and `ARM_ENDPOINT` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Attributes, Value};

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

const ENV_SUBSCRIPTION_ID: &str = "ARM_SUBSCRIPTION_ID";
const ENV_ENDPOINT: &str = "ARM_ENDPOINT";

/// Time bound of each lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: minutes(30),
            read: minutes(5),
            update: minutes(30),
            delete: minutes(30),
        }
    }
}

impl Timeouts {
    /// Override defaults from a map of operation name to minutes
    fn with_overrides(mut self, overrides: &HashMap<String, Value>) -> ProviderResult<Self> {
        for (operation, value) in overrides {
            let mins = value
                .as_int()
                .filter(|m| *m > 0)
                .ok_or_else(|| {
                    ProviderError::invalid_config(format!(
                        "timeouts.{} must be a positive number of minutes",
                        operation
                    ))
                })?;
            let bound = minutes(mins as u64);
            match operation.as_str() {
                "create" => self.create = bound,
                "read" => self.read = bound,
                "update" => self.update = bound,
                "delete" => self.delete = bound,
                other => {
                    return Err(ProviderError::invalid_config(format!(
                        "unknown timeout '{}', expected create, read, update or delete",
                        other
                    )));
                }
            }
        }
        Ok(self)
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub subscription_id: String,
    /// Resource Manager base URL
    pub endpoint: String,
    pub timeouts: Timeouts,
    /// Interval between polls of a long-running operation without Retry-After
    pub operation_poll_interval: Duration,
    /// Consecutive not-found reads required before a dedicated host counts as deleted
    pub dedicated_host_delete_confirmations: u32,
    pub dedicated_host_delete_poll_interval: Duration,
}

impl ProviderConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeouts: Timeouts::default(),
            operation_poll_interval: Duration::from_secs(5),
            dedicated_host_delete_confirmations: 20,
            dedicated_host_delete_poll_interval: Duration::from_secs(10),
        }
    }

    pub fn from_attributes(attributes: &HashMap<String, Value>) -> ProviderResult<Self> {
        Self::from_attributes_with_env(attributes, |key| std::env::var(key).ok())
    }

    pub fn from_attributes_with_env(
        attributes: &HashMap<String, Value>,
        env: impl Fn(&str) -> Option<String>,
    ) -> ProviderResult<Self> {
        let subscription_id = attributes
            .get_str("subscription_id")
            .map(str::to_string)
            .or_else(|| env(ENV_SUBSCRIPTION_ID))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ProviderError::invalid_config(format!(
                    "subscription_id must be set in the provider block or via {}",
                    ENV_SUBSCRIPTION_ID
                ))
            })?;

        let mut config = Self::new(subscription_id);

        if let Some(endpoint) = attributes
            .get_str("endpoint")
            .map(str::to_string)
            .or_else(|| env(ENV_ENDPOINT))
        {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }

        if let Some(overrides) = attributes.get_map("timeouts") {
            config.timeouts = config.timeouts.with_overrides(overrides)?;
        }

        if let Some(secs) = positive_int(attributes, "operation_poll_interval_seconds")? {
            config.operation_poll_interval = Duration::from_secs(secs);
        }
        if let Some(count) = positive_int(attributes, "dedicated_host_delete_confirmations")? {
            config.dedicated_host_delete_confirmations = u32::try_from(count).map_err(|_| {
                ProviderError::invalid_config("dedicated_host_delete_confirmations is too large")
            })?;
        }
        if let Some(secs) = positive_int(attributes, "dedicated_host_delete_poll_interval_seconds")? {
            config.dedicated_host_delete_poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn positive_int(attributes: &HashMap<String, Value>, key: &str) -> ProviderResult<Option<u64>> {
    match attributes.get(key) {
        None => Ok(None),
        Some(Value::Int(n)) if *n > 0 => Ok(Some(*n as u64)),
        Some(_) => Err(ProviderError::invalid_config(format!(
            "{} must be a positive integer",
            key
        ))),
    }
}
