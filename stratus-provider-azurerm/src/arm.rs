//! HTTP client for Resource Manager REST calls
//!
//! Implements [`ManagementClient`] over `reqwest`. Long-running operations
//! are tracked through the `Azure-AsyncOperation` header when present,
//! otherwise through `Location` on a 202 response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value as Json;
use stratus_core::poller::{Completed, LongRunningOperation, OperationStatus};
use stratus_core::provider::ProviderResult;

use crate::client::{ApiError, ApiResult, ManagementClient};

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// Maximum length of response body to log
const MAX_LOG_BODY_LENGTH: usize = 200;

fn truncate_for_log(body: &str) -> String {
    if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    }
}

/// Supplies bearer tokens for Resource Manager requests
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> ApiResult<String>;
}

/// Fixed token, e.g. from `az account get-access-token`
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> ApiResult<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct OperationResource {
    status: String,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Json>,
    #[serde(default, rename = "nextLink")]
    next_link: Option<String>,
}

/// Shared transport state between the client and its operation handles
#[derive(Clone)]
struct Transport {
    http: Client,
    credential: Arc<dyn TokenCredential>,
}

impl Transport {
    async fn send(&self, method: Method, url: &str, body: Option<&Json>) -> ApiResult<Response> {
        log::debug!("{} {}", method, url);

        let token = self.credential.token().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::warn!("API error: {} - {}", status, truncate_for_log(&text));
            let error = serde_json::from_str::<ErrorResponse>(&text)
                .map(|r| r.error)
                .unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                code: error.code,
                message: error.message,
            });
        }

        Ok(response)
    }

    async fn json(response: Response) -> ApiResult<Json> {
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if text.is_empty() {
            return Ok(Json::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn header_url(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

enum Tracking {
    AsyncOperation(String),
    Location(String),
}

/// Pending Resource Manager operation
pub struct ArmOperation {
    transport: Transport,
    tracking: Tracking,
    retry_after: Option<Duration>,
}

impl ArmOperation {
    fn from_response(transport: &Transport, response: &Response) -> Box<dyn LongRunningOperation> {
        let headers = response.headers();
        let tracking = if let Some(url) = header_url(headers, AZURE_ASYNC_OPERATION) {
            Tracking::AsyncOperation(url)
        } else if response.status() == StatusCode::ACCEPTED
            && let Some(url) = header_url(headers, LOCATION.as_str())
        {
            Tracking::Location(url)
        } else {
            return Box::new(Completed);
        };

        Box::new(ArmOperation {
            transport: transport.clone(),
            tracking,
            retry_after: retry_after(headers),
        })
    }
}

#[async_trait]
impl LongRunningOperation for ArmOperation {
    async fn poll(&mut self) -> ProviderResult<OperationStatus> {
        match &self.tracking {
            Tracking::AsyncOperation(url) => {
                let response = self.transport.send(Method::GET, url, None).await?;
                self.retry_after = retry_after(response.headers());
                let body = Transport::json(response).await?;
                let operation: OperationResource = serde_json::from_value(body)
                    .map_err(|e| ApiError::Decode(e.to_string()))?;

                log::debug!("Operation status: {}", operation.status);
                Ok(match operation.status.to_ascii_lowercase().as_str() {
                    "succeeded" => OperationStatus::Succeeded,
                    "failed" => OperationStatus::Failed(
                        operation
                            .error
                            .map(|e| format!("{}: {}", e.code, e.message))
                            .unwrap_or_else(|| "no error details returned".to_string()),
                    ),
                    "canceled" | "cancelled" => OperationStatus::Canceled,
                    _ => OperationStatus::InProgress,
                })
            }
            Tracking::Location(url) => {
                let response = self.transport.send(Method::GET, url, None).await?;
                self.retry_after = retry_after(response.headers());
                if response.status() == StatusCode::ACCEPTED {
                    Ok(OperationStatus::InProgress)
                } else {
                    Ok(OperationStatus::Succeeded)
                }
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Resource Manager client
#[derive(Clone)]
pub struct ArmClient {
    transport: Transport,
    endpoint: String,
}

impl ArmClient {
    pub fn new(endpoint: impl Into<String>, credential: Arc<dyn TokenCredential>) -> ApiResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("stratus-provider-azurerm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            transport: Transport { http, credential },
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, id: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, id, api_version)
    }

    async fn mutate(
        &self,
        method: Method,
        id: &str,
        api_version: &str,
        body: Option<&Json>,
    ) -> ApiResult<Box<dyn LongRunningOperation>> {
        let url = self.url(id, api_version);
        let response = self.transport.send(method, &url, body).await?;
        Ok(ArmOperation::from_response(&self.transport, &response))
    }
}

#[async_trait]
impl ManagementClient for ArmClient {
    async fn get(&self, id: &str, api_version: &str) -> ApiResult<Json> {
        let url = self.url(id, api_version);
        let response = self.transport.send(Method::GET, &url, None).await?;
        Transport::json(response).await
    }

    async fn put(
        &self,
        id: &str,
        api_version: &str,
        body: Json,
    ) -> ApiResult<Box<dyn LongRunningOperation>> {
        self.mutate(Method::PUT, id, api_version, Some(&body)).await
    }

    async fn patch(
        &self,
        id: &str,
        api_version: &str,
        body: Json,
    ) -> ApiResult<Box<dyn LongRunningOperation>> {
        self.mutate(Method::PATCH, id, api_version, Some(&body)).await
    }

    async fn delete(
        &self,
        id: &str,
        api_version: &str,
    ) -> ApiResult<Box<dyn LongRunningOperation>> {
        self.mutate(Method::DELETE, id, api_version, None).await
    }

    async fn list(&self, collection_id: &str, api_version: &str) -> ApiResult<Vec<Json>> {
        let mut items = Vec::new();
        let mut next = Some(self.url(collection_id, api_version));

        while let Some(url) = next {
            let response = self.transport.send(Method::GET, &url, None).await?;
            let page: Page = serde_json::from_value(Transport::json(response).await?)
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            items.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }

        Ok(items)
    }
}
