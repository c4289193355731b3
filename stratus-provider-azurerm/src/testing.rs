//! In-memory [`ManagementClient`] for lifecycle tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use stratus_core::poller::{Completed, LongRunningOperation};

use crate::client::{ApiError, ApiResult, ManagementClient};
use crate::config::ProviderConfig;
use crate::lifecycle::ProviderContext;

pub const SUBSCRIPTION: &str = "0000";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get(String),
    Put(String, Json),
    Patch(String, Json),
    Delete(String),
    List(String),
}

#[derive(Default)]
pub struct FakeClient {
    resources: Mutex<HashMap<String, Json>>,
    collections: Mutex<HashMap<String, Vec<Json>>>,
    /// Responses consumed by GETs before falling back to stored resources; `None` is a 404
    scripted_gets: Mutex<HashMap<String, VecDeque<Option<Json>>>>,
    calls: Mutex<Vec<Call>>,
    put_delay: Option<Duration>,
}

fn key(id: &str) -> String {
    id.to_lowercase()
}

fn not_found(id: &str) -> ApiError {
    ApiError::NotFound {
        url: id.to_string(),
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every PUT between receiving and storing the body
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn insert(&self, id: &str, body: Json) {
        self.resources.lock().unwrap().insert(key(id), body);
    }

    pub fn resource(&self, id: &str) -> Option<Json> {
        self.resources.lock().unwrap().get(&key(id)).cloned()
    }

    pub fn set_collection(&self, id: &str, items: Vec<Json>) {
        self.collections.lock().unwrap().insert(key(id), items);
    }

    pub fn script_gets(&self, id: &str, responses: Vec<Option<Json>>) {
        self.scripted_gets
            .lock()
            .unwrap()
            .insert(key(id), responses.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<(String, Json)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put(id, body) => Some((id, body)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn gets_of(&self, id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Get(got) if got.eq_ignore_ascii_case(id)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ManagementClient for FakeClient {
    async fn get(&self, id: &str, _api_version: &str) -> ApiResult<Json> {
        self.record(Call::Get(id.to_string()));

        let scripted = self
            .scripted_gets
            .lock()
            .unwrap()
            .get_mut(&key(id))
            .and_then(VecDeque::pop_front);
        if let Some(response) = scripted {
            return response.ok_or_else(|| not_found(id));
        }

        self.resource(id).ok_or_else(|| not_found(id))
    }

    async fn put(
        &self,
        id: &str,
        _api_version: &str,
        mut body: Json,
    ) -> ApiResult<Box<dyn LongRunningOperation>> {
        self.record(Call::Put(id.to_string(), body.clone()));
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), Json::String(id.to_string()));
        }
        self.insert(id, body);
        Ok(Box::new(Completed))
    }

    async fn patch(
        &self,
        id: &str,
        _api_version: &str,
        body: Json,
    ) -> ApiResult<Box<dyn LongRunningOperation>> {
        self.record(Call::Patch(id.to_string(), body.clone()));
        let mut resources = self.resources.lock().unwrap();
        let current = resources.get_mut(&key(id)).ok_or_else(|| not_found(id))?;
        crate::utils::merge_json(current, body);
        Ok(Box::new(Completed))
    }

    async fn delete(
        &self,
        id: &str,
        _api_version: &str,
    ) -> ApiResult<Box<dyn LongRunningOperation>> {
        self.record(Call::Delete(id.to_string()));
        match self.resources.lock().unwrap().remove(&key(id)) {
            Some(_) => Ok(Box::new(Completed)),
            None => Err(not_found(id)),
        }
    }

    async fn list(&self, collection_id: &str, _api_version: &str) -> ApiResult<Vec<Json>> {
        self.record(Call::List(collection_id.to_string()));
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(&key(collection_id))
            .cloned()
            .unwrap_or_default())
    }
}

/// Context over `client` with short poll intervals
pub fn context(client: Arc<FakeClient>) -> ProviderContext {
    let mut config = ProviderConfig::new(SUBSCRIPTION);
    config.operation_poll_interval = Duration::from_millis(10);
    ProviderContext::new(client, config)
}
