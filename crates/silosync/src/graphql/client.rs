//! GraphQL API client creation and request execution.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::error::{
    GraphQLError, RATE_LIMIT_MESSAGE_PREFIX, RequestError, is_rate_limit_message,
    parse_rate_limit_reset,
};
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::ApiRateLimiter;
use crate::retry::{RetryConfig, RetryError, with_retry};
use crate::sync::ProgressCallback;

/// Default API host.
pub const DEFAULT_API_URL: &str = "https://api.transcend.io";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GraphQLEnvelope {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Vec<GraphQLErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorMessage {
    message: String,
}

/// GraphQL API client.
///
/// Every call goes through [`with_retry`], so callers see either the decoded
/// `data` member or a terminal [`RequestError`].
#[derive(Clone)]
pub struct GraphQLClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    api_key: String,
    retry: RetryConfig,
    rate_limiter: Option<ApiRateLimiter>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for GraphQLClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLClient")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl GraphQLClient {
    /// Create a new client backed by reqwest.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - API host (e.g., "https://api.transcend.io")
    /// * `api_key` - Bearer credential
    /// * `timeout` - Per-request timeout
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = GraphQLClient::new("https://api.transcend.io", &key, DEFAULT_TIMEOUT)?
    ///     .with_rate_limiter(ApiRateLimiter::new(10));
    /// ```
    pub fn new(endpoint: &str, api_key: &str, timeout: StdDuration) -> Result<Self, GraphQLError> {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| GraphQLError::Config(format!("invalid API url \"{}\": {}", endpoint, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GraphQLError::Config(format!(
                "API url must use http or https: {}",
                endpoint
            )));
        }
        let transport = ReqwestTransport::with_timeout(timeout)
            .map_err(|e| GraphQLError::Config(e.to_string()))?;
        Ok(Self::new_with_transport(endpoint, api_key, Arc::new(transport)))
    }

    pub fn new_with_transport(
        endpoint: &str,
        api_key: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry: RetryConfig::default(),
            rate_limiter: None,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: ApiRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Report retries and rate-limit waits to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Get the API host.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn graphql_url(&self) -> String {
        format!("{}/graphql", self.endpoint)
    }

    /// Wait for rate limiter if one is configured.
    async fn wait_for_rate_limit(&self) {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }
    }

    /// Execute a GraphQL document and decode its `data` member.
    ///
    /// `operation` is only used for logs and progress events.
    #[tracing::instrument(skip(self, query, variables), level = "debug")]
    pub async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, RequestError> {
        let body = serde_json::to_vec(&serde_json::json!({
            "query": query,
            "variables": variables,
        }))
        .map_err(|e| RetryError::Fatal(GraphQLError::Json(e)))?;

        with_retry(
            &self.retry,
            operation,
            || self.post_once(&body),
            self.on_progress.as_deref(),
        )
        .await
    }

    /// One HTTP exchange, no retries.
    async fn post_once<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, GraphQLError> {
        self.wait_for_rate_limit().await;

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.graphql_url(),
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("User-Agent".to_string(), "silosync".to_string()),
                (
                    "Authorization".to_string(),
                    format!("Bearer {}", self.api_key),
                ),
            ],
            body: body.to_vec(),
        };

        let response: HttpResponse = self
            .transport
            .send(request)
            .await
            .map_err(|e| GraphQLError::Network {
                message: e.to_string(),
            })?;

        decode_response(response)
    }
}

fn decode_response<T: DeserializeOwned>(response: HttpResponse) -> Result<T, GraphQLError> {
    if !response.is_success() {
        let messages = serde_json::from_slice::<GraphQLEnvelope>(&response.body)
            .map(|envelope| join_messages(&envelope.errors))
            .unwrap_or_default();
        let message = if messages.is_empty() {
            String::from_utf8_lossy(&response.body).to_string()
        } else {
            messages
        };

        if response.status == 429 || is_rate_limit_message(&message) {
            return Err(rate_limited(&response.headers, message));
        }
        return Err(GraphQLError::Status {
            status: response.status,
            message,
        });
    }

    let envelope: GraphQLEnvelope = serde_json::from_slice(&response.body)?;
    if !envelope.errors.is_empty() {
        let message = join_messages(&envelope.errors);
        if envelope
            .errors
            .iter()
            .any(|e| is_rate_limit_message(&e.message))
        {
            return Err(rate_limited(&response.headers, message));
        }
        return Err(GraphQLError::Response { message });
    }

    match envelope.data {
        Some(data) if !data.is_null() => Ok(serde_json::from_value(data)?),
        _ => Err(GraphQLError::MissingData {
            field: "data".to_string(),
        }),
    }
}

fn join_messages(errors: &[GraphQLErrorMessage]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn rate_limited(headers: &HttpHeaders, message: String) -> GraphQLError {
    GraphQLError::RateLimited {
        reset_at: parse_rate_limit_reset(headers),
        message: if message.is_empty() {
            RATE_LIMIT_MESSAGE_PREFIX.to_string()
        } else {
            message
        },
    }
}
