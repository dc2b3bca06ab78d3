use async_trait::async_trait;
use converge::{ControlPlane, Context, DrainReport, RemoteError, RemoteResult};
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use super::error::ApiError;
use super::objects::{DeleteObjectsRequest, DeleteObjectsResponse, ObjectPage};

/// JSON-over-HTTP control plane client
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: String,
    auth_header: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
            timeout_seconds: 30,
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(std::cmp::min(
            self.initial_backoff_ms.saturating_mul(factor),
            self.max_backoff_ms,
        ))
    }
}

impl Client {
    /// Create a new API client with default configuration
    pub fn new(endpoint: &str, api_token: &str, insecure: bool) -> Result<Self, ApiError> {
        Self::with_config(endpoint, api_token, insecure, RetryConfig::default())
    }

    /// Create a new API client with custom retry configuration
    pub fn with_config(
        endpoint: &str,
        api_token: &str,
        insecure: bool,
        retry_config: RetryConfig,
    ) -> Result<Self, ApiError> {
        let parsed = Url::parse(endpoint)
            .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidEndpoint(format!(
                "{}: unsupported scheme {}",
                endpoint,
                parsed.scheme()
            )));
        }

        let http_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(Duration::from_secs(retry_config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http_client,
                base_url: endpoint.trim_end_matches('/').to_string(),
                auth_header: format!("Bearer {}", api_token),
                retry_config,
            }),
        })
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry_config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    /// Execute a GET request with retry logic
    pub async fn get(&self, ctx: &Context, path: &str) -> Result<Value, ApiError> {
        self.execute_with_retry(
            ctx,
            || async {
                let url = self.url(path);
                tracing::debug!("GET request to: {}", url);

                self.inner
                    .http_client
                    .get(&url)
                    .header(AUTHORIZATION, &self.inner.auth_header)
                    .send()
                    .await
            },
            path,
        )
        .await
    }

    /// Execute a POST request with retry logic
    pub async fn post<B: Serialize + Sync>(
        &self,
        ctx: &Context,
        path: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        self.execute_with_retry(
            ctx,
            || async {
                let url = self.url(path);
                tracing::debug!("POST request to: {}", url);

                self.inner
                    .http_client
                    .post(&url)
                    .header(AUTHORIZATION, &self.inner.auth_header)
                    .json(body)
                    .send()
                    .await
            },
            path,
        )
        .await
    }

    /// Execute a PATCH request with retry logic
    pub async fn patch<B: Serialize + Sync>(
        &self,
        ctx: &Context,
        path: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        self.execute_with_retry(
            ctx,
            || async {
                let url = self.url(path);
                tracing::debug!("PATCH request to: {}", url);

                self.inner
                    .http_client
                    .patch(&url)
                    .header(AUTHORIZATION, &self.inner.auth_header)
                    .json(body)
                    .send()
                    .await
            },
            path,
        )
        .await
    }

    /// Execute a DELETE request with retry logic
    pub async fn delete(&self, ctx: &Context, path: &str) -> Result<Value, ApiError> {
        self.execute_with_retry(
            ctx,
            || async {
                let url = self.url(path);
                tracing::debug!("DELETE request to: {}", url);

                self.inner
                    .http_client
                    .delete(&url)
                    .header(AUTHORIZATION, &self.inner.auth_header)
                    .send()
                    .await
            },
            path,
        )
        .await
    }

    /// Execute request with retry logic
    ///
    /// Throttling, server errors and connection failures are retried with
    /// exponential backoff. Retrying stops early when the next attempt could
    /// not start before the context deadline.
    async fn execute_with_retry<F, Fut>(
        &self,
        ctx: &Context,
        request_fn: F,
        path: &str,
    ) -> Result<Value, ApiError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let retry = &self.inner.retry_config;
        let mut attempt = 0;
        let mut last_error = None;

        while attempt <= retry.max_retries {
            if attempt > 0 {
                let backoff = retry.backoff(attempt);
                if ctx.is_cancelled()
                    || ctx
                        .deadline()
                        .is_some_and(|deadline| Instant::now() + backoff >= deadline)
                {
                    break;
                }
                tracing::debug!(
                    "Retrying request to {} after {}ms (attempt {})",
                    path,
                    backoff.as_millis(),
                    attempt
                );
                tokio::time::sleep(backoff).await;
            }

            match request_fn().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return self.parse_success_response(response).await;
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(ApiError::RateLimited);
                    } else if status.is_server_error() {
                        last_error = Some(ApiError::ServiceUnavailable);
                    } else {
                        return Err(self.handle_error_response(response).await);
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        last_error = Some(ApiError::Timeout(retry.timeout_seconds));
                    } else if e.is_connect() || e.is_request() {
                        last_error = Some(ApiError::ServiceUnavailable);
                    } else {
                        return Err(ApiError::RequestError(e));
                    }
                }
            }

            attempt += 1;
        }

        Err(last_error.unwrap_or(ApiError::ServiceUnavailable))
    }

    /// Parse successful response; an empty body reads as null
    async fn parse_success_response(&self, response: reqwest::Response) -> Result<Value, ApiError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str::<Value>(&text).map_err(|e| {
            tracing::error!("Failed to deserialize response: {}", e);
            ApiError::ParseError(format!("Failed to parse response: {}", e))
        })
    }

    /// Handle error response
    async fn handle_error_response(&self, response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::debug!(status, "API error response");

        ApiError::from_response(status, &text)
    }

    /// Lists one page of the objects a container holds
    pub async fn list_objects(
        &self,
        ctx: &Context,
        kind: &str,
        identity: &str,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, ApiError> {
        let mut path = format!("{}/objects", object_path(kind, identity));
        if let Some(token) = continuation_token {
            path.push_str(&format!(
                "?continuation-token={}",
                urlencoding::encode(token)
            ));
        }

        let value = self.get(ctx, &path).await?;
        serde_json::from_value(value).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    /// Deletes a batch of objects from a container
    pub async fn delete_objects(
        &self,
        ctx: &Context,
        kind: &str,
        identity: &str,
        keys: Vec<String>,
    ) -> Result<DeleteObjectsResponse, ApiError> {
        let path = format!("{}/objects/delete", object_path(kind, identity));
        let value = self
            .post(ctx, &path, &DeleteObjectsRequest { keys })
            .await?;
        if value.is_null() {
            return Ok(DeleteObjectsResponse::default());
        }
        serde_json::from_value(value).map_err(|e| ApiError::ParseError(e.to_string()))
    }
}

fn collection_path(kind: &str) -> String {
    format!("/{}", urlencoding::encode(kind))
}

fn object_path(kind: &str, identity: &str) -> String {
    format!(
        "{}/{}",
        collection_path(kind),
        urlencoding::encode(identity)
    )
}

/// Picks the identity out of a create response, falling back to the
/// submitted name
fn created_identity(response: &Value, spec: &Value) -> Option<String> {
    ["id", "name", "bucket"]
        .iter()
        .find_map(|key| response.get(*key).and_then(Value::as_str))
        .or_else(|| {
            ["name", "bucket"]
                .iter()
                .find_map(|key| spec.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
}

#[async_trait]
impl ControlPlane for Client {
    async fn create(&self, ctx: &Context, kind: &str, spec: Value) -> RemoteResult<String> {
        let response = self.post(ctx, &collection_path(kind), &spec).await?;
        created_identity(&response, &spec).ok_or_else(|| {
            RemoteError::Fatal(format!("create {} returned no identity", kind))
        })
    }

    async fn read(&self, ctx: &Context, kind: &str, identity: &str) -> RemoteResult<Value> {
        Ok(self.get(ctx, &object_path(kind, identity)).await?)
    }

    async fn update(
        &self,
        ctx: &Context,
        kind: &str,
        identity: &str,
        changes: Value,
    ) -> RemoteResult<()> {
        self.patch(ctx, &object_path(kind, identity), &changes)
            .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &Context, kind: &str, identity: &str) -> RemoteResult<()> {
        Client::delete(self, ctx, &object_path(kind, identity)).await?;
        Ok(())
    }

    async fn drain(&self, ctx: &Context, kind: &str, identity: &str) -> RemoteResult<DrainReport> {
        let mut removed = 0;
        let mut token: Option<String> = None;

        loop {
            let page = self
                .list_objects(ctx, kind, identity, token.as_deref())
                .await?;
            let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();

            if !keys.is_empty() {
                let requested = keys.len();
                let outcome = self.delete_objects(ctx, kind, identity, keys).await?;
                if let Some(failure) = outcome.errors.first() {
                    return Err(RemoteError::Fatal(format!(
                        "deleting {} of {} objects failed, first: {}",
                        outcome.errors.len(),
                        requested,
                        failure
                    )));
                }
                removed += outcome.deleted.unwrap_or(requested);
            }

            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }

        tracing::debug!(kind, identity, removed, "drained container");
        Ok(DrainReport { removed })
    }
}
