//! HTTP request engine for the gateway API.
//!
//! One logical operation becomes one or more physical attempts. Whether an
//! operation may be attempted more than once is decided by the caller through
//! [`RequestDescriptor::retryable`]; the engine never looks at the method.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{classify, parse_retry_after, GatewayError, Result};
use crate::mcp::{McpObserver, ToolSchemaCache};

const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
/// Retries granted to retryable operations.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Base of the exponential backoff, in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
/// Path of the JSON-RPC tool-call endpoint.
pub const DEFAULT_MCP_ENDPOINT: &str = "/mcp";
/// Protocol version announced by `initialize`.
pub const DEFAULT_MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timer used for backoff and poll delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Options for creating a gateway client.
#[derive(Clone)]
pub struct ClientOptions {
    /// The bearer credential.
    pub api_key: String,
    /// The base URL for the API (defaults to [`DEFAULT_BASE_URL`]).
    pub base_url: Option<String>,
    /// Extra attempts granted to retryable operations.
    pub max_retries: u32,
    /// Base backoff interval in milliseconds.
    pub retry_backoff_ms: u64,
    /// Generate an `X-Trace-Id` for calls that do not pin one.
    pub auto_trace_id: bool,
    /// Owner identity used by list reads when the call does not name one.
    pub default_owner_agent: Option<String>,
    /// Path (or absolute URL) of the tool-call endpoint.
    pub mcp_endpoint: Option<String>,
    /// Protocol version sent with `initialize`.
    pub mcp_protocol_version: Option<String>,
    /// Callback invoked around every tool-call RPC.
    pub mcp_observer: Option<McpObserver>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Timer used for backoff and poll delays.
    pub sleeper: Arc<dyn Sleeper>,
}

impl ClientOptions {
    /// Create new client options with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            auto_trace_id: true,
            default_owner_agent: None,
            mcp_endpoint: None,
            mcp_protocol_version: None,
            mcp_observer: None,
            timeout: DEFAULT_TIMEOUT,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Build options from `AGENT_GATEWAY_*` environment variables.
    ///
    /// `AGENT_GATEWAY_API_KEY` is required; the others fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = env_non_empty("AGENT_GATEWAY_API_KEY").ok_or_else(|| {
            GatewayError::invalid_argument("AGENT_GATEWAY_API_KEY is not set")
        })?;
        let mut options = Self::new(api_key);
        options.base_url = env_non_empty("AGENT_GATEWAY_BASE_URL");
        options.default_owner_agent = env_non_empty("AGENT_GATEWAY_OWNER_AGENT");
        if let Some(raw) = env_non_empty("AGENT_GATEWAY_MAX_RETRIES") {
            options.max_retries = raw.parse().map_err(|_| {
                GatewayError::invalid_argument(format!(
                    "AGENT_GATEWAY_MAX_RETRIES is not a number: {raw}"
                ))
            })?;
        }
        if let Some(raw) = env_non_empty("AGENT_GATEWAY_RETRY_BACKOFF_MS") {
            options.retry_backoff_ms = raw.parse().map_err(|_| {
                GatewayError::invalid_argument(format!(
                    "AGENT_GATEWAY_RETRY_BACKOFF_MS is not a number: {raw}"
                ))
            })?;
        }
        Ok(options)
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the retry budget for retryable operations.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base backoff interval.
    pub fn with_retry_backoff_ms(mut self, retry_backoff_ms: u64) -> Self {
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    /// Enable or disable generated trace ids.
    pub fn with_auto_trace_id(mut self, auto_trace_id: bool) -> Self {
        self.auto_trace_id = auto_trace_id;
        self
    }

    /// Set the owner identity used by list reads.
    pub fn with_default_owner_agent(mut self, owner_agent: impl Into<String>) -> Self {
        self.default_owner_agent = Some(owner_agent.into());
        self
    }

    /// Point tool calls at a different endpoint.
    pub fn with_mcp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.mcp_endpoint = Some(endpoint.into());
        self
    }

    /// Override the protocol version sent with `initialize`.
    pub fn with_mcp_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.mcp_protocol_version = Some(version.into());
        self
    }

    /// Observe tool-call RPCs.
    pub fn with_mcp_observer(mut self, observer: McpObserver) -> Self {
        self.mcp_observer = Some(observer);
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the timer.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("auto_trace_id", &self.auto_trace_id)
            .field("default_owner_agent", &self.default_owner_agent)
            .field("mcp_endpoint", &self.mcp_endpoint)
            .field("mcp_protocol_version", &self.mcp_protocol_version)
            .field("mcp_observer", &self.mcp_observer.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Resolved, immutable client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL with trailing slashes stripped.
    pub base_url: String,
    /// The bearer credential.
    pub api_key: String,
    /// Extra attempts granted to retryable operations.
    pub max_retries: u32,
    /// Base backoff interval in milliseconds.
    pub retry_backoff_ms: u64,
    /// Generate an `X-Trace-Id` for calls that do not pin one.
    pub auto_trace_id: bool,
    /// Owner identity used by list reads when the call does not name one.
    pub default_owner_agent: Option<String>,
    /// Path (or absolute URL) of the tool-call endpoint.
    pub mcp_endpoint: String,
    /// Protocol version sent with `initialize`.
    pub mcp_protocol_version: String,
    /// Callback invoked around every tool-call RPC.
    pub mcp_observer: Option<McpObserver>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("auto_trace_id", &self.auto_trace_id)
            .field("default_owner_agent", &self.default_owner_agent)
            .field("mcp_endpoint", &self.mcp_endpoint)
            .field("mcp_protocol_version", &self.mcp_protocol_version)
            .finish_non_exhaustive()
    }
}

/// Options for individual requests.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Additional headers to include.
    pub headers: Option<Vec<(String, String)>>,
    /// Idempotency key for the request. Its presence makes a POST retryable.
    pub idempotency_key: Option<String>,
    /// Trace id pinned for every attempt of this call.
    pub trace_id: Option<String>,
}

impl RequestOptions {
    /// Create request options with an idempotency key.
    pub fn with_idempotency_key(key: impl Into<String>) -> Self {
        Self {
            idempotency_key: Some(key.into()),
            ..Default::default()
        }
    }

    /// The idempotency key, if a non-empty one was given.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref().filter(|key| !key.is_empty())
    }

    fn has_idempotency_key(&self) -> bool {
        self.idempotency_key().is_some()
    }

    /// Pin the trace id for every attempt of this call.
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Whether an operation may be replayed: GET and DELETE always, anything else
/// only when it carries an idempotency key.
pub fn is_safe_to_retry(method: &Method, has_idempotency_key: bool) -> bool {
    matches!(*method, Method::GET | Method::DELETE | Method::HEAD) || has_idempotency_key
}

/// One logical call against the gateway.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL.
    pub target: String,
    /// JSON body.
    pub body: Option<Value>,
    /// Query parameters, already filtered to the present ones.
    pub query: Vec<(String, String)>,
    /// Per-call options (idempotency key, trace id, headers).
    pub options: RequestOptions,
    /// May the engine attempt this call more than once.
    pub retryable: bool,
    /// Value of the `Accept` header.
    pub accept: &'static str,
    /// Overrides the client-wide timeout.
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// A call that is attempted exactly once until marked retryable.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            query: Vec::new(),
            options: RequestOptions::default(),
            retryable: false,
            accept: "application/json",
            timeout: None,
        }
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach query parameters.
    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Attach per-call options.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Set whether the call may be replayed.
    ///
    /// Never mark a POST retryable unless it carries an idempotency key.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Mark retryable according to [`is_safe_to_retry`]. An empty key is no key.
    pub fn retry_by_method(self) -> Self {
        let retryable = is_safe_to_retry(&self.method, self.options.has_idempotency_key());
        self.retryable(retryable)
    }

    /// Ask for a server-sent-event body.
    pub fn event_stream(mut self, timeout: Duration) -> Self {
        self.accept = "text/event-stream";
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client that executes [`RequestDescriptor`]s with retries.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: Arc<ClientConfig>,
    sleeper: Arc<dyn Sleeper>,
    schemas: ToolSchemaCache,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client with the given options.
    pub fn new(options: ClientOptions) -> Result<Self> {
        if options.api_key.trim().is_empty() {
            return Err(GatewayError::invalid_argument("api_key is required"));
        }
        let base_url = options
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if base_url.is_empty() {
            return Err(GatewayError::invalid_argument("base_url is required"));
        }
        Url::parse(&base_url)?;

        let client = Client::builder().timeout(options.timeout).build()?;
        let config = ClientConfig {
            base_url,
            api_key: options.api_key,
            max_retries: options.max_retries,
            retry_backoff_ms: options.retry_backoff_ms,
            auto_trace_id: options.auto_trace_id,
            default_owner_agent: options.default_owner_agent,
            mcp_endpoint: options
                .mcp_endpoint
                .unwrap_or_else(|| DEFAULT_MCP_ENDPOINT.to_string()),
            mcp_protocol_version: options
                .mcp_protocol_version
                .unwrap_or_else(|| DEFAULT_MCP_PROTOCOL_VERSION.to_string()),
            mcp_observer: options.mcp_observer,
        };

        Ok(Self {
            client,
            config: Arc::new(config),
            sleeper: options.sleeper,
            schemas: ToolSchemaCache::default(),
        })
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Tool schemas learned from `tools/list`, shared by clones of this client.
    pub fn tool_schemas(&self) -> &ToolSchemaCache {
        &self.schemas
    }

    pub(crate) fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Resolve a target to an absolute URL.
    pub fn resolve_url(&self, target: &str) -> String {
        match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => target.to_string(),
            _ if target.starts_with('/') => format!("{}{}", self.config.base_url, target),
            _ => format!("{}/{}", self.config.base_url, target),
        }
    }

    /// Delay before the attempt following `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.config.retry_backoff_ms.saturating_mul(factor))
    }

    /// Execute a call and parse the 2xx body as JSON.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<Value> {
        let response = self.send(&request).await?;
        parse_json(response).await
    }

    /// Execute a call and return the 2xx response without reading the body.
    ///
    /// Non-2xx responses are classified into a [`GatewayError`].
    pub async fn send(&self, request: &RequestDescriptor) -> Result<Response> {
        let retries = if request.retryable {
            self.config.max_retries
        } else {
            0
        };
        let budget = retries.saturating_add(1);
        let url = self.resolve_url(&request.target);
        let mut attempt: u32 = 0;

        loop {
            let is_last = attempt.saturating_add(1) >= budget;
            let trace_id = self.trace_id_for(request.options.trace_id.as_deref());
            debug!(
                method = %request.method,
                url = %url,
                attempt,
                trace_id = trace_id.as_deref().unwrap_or(""),
                "gateway request"
            );

            let response = match self.build_request(request, &url, trace_id.as_deref()).send().await {
                Ok(response) => response,
                Err(error) if !is_last => {
                    let delay = self.backoff(attempt);
                    warn!(
                        method = %request.method,
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transport failure, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            let status = response.status().as_u16();
            if request.retryable && !is_last && is_retryable_status(status) {
                let delay = parse_retry_after(response.headers())
                    .map(|seconds| Duration::from_millis(seconds.saturating_mul(1000)))
                    .unwrap_or_else(|| self.backoff(attempt));
                warn!(
                    method = %request.method,
                    url = %url,
                    attempt,
                    status,
                    delay_ms = delay.as_millis() as u64,
                    "retryable status, retrying"
                );
                self.sleeper.sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !response.status().is_success() {
                return Err(classify_response(response).await);
            }
            return Ok(response);
        }
    }

    fn trace_id_for(&self, pinned: Option<&str>) -> Option<String> {
        match pinned.filter(|t| !t.is_empty()) {
            Some(trace_id) => Some(trace_id.to_string()),
            None if self.config.auto_trace_id => Some(Uuid::new_v4().to_string()),
            None => None,
        }
    }

    fn build_request(
        &self,
        request: &RequestDescriptor,
        url: &str,
        trace_id: Option<&str>,
    ) -> RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .bearer_auth(&self.config.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", request.accept)
            .header("X-SDK-Version", SDK_VERSION);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(key) = request.options.idempotency_key() {
            builder = builder.header("Idempotency-Key", key);
        }
        if let Some(trace_id) = trace_id {
            builder = builder.header("X-Trace-Id", trace_id);
        }
        if let Some(ref headers) = request.options.headers {
            for (name, value) in headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        builder
    }

    /// Make a GET request. Always retryable.
    pub async fn get(&self, path: &str, query: Vec<(String, String)>) -> Result<Value> {
        self.execute(
            RequestDescriptor::new(Method::GET, path)
                .query(query)
                .retry_by_method(),
        )
        .await
    }

    /// Make a POST request. Retryable only with an idempotency key.
    pub async fn post(
        &self,
        path: &str,
        body: Option<Value>,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let mut request =
            RequestDescriptor::new(Method::POST, path).options(options.unwrap_or_default());
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request.retry_by_method()).await
    }

    /// Make a DELETE request. Always retryable.
    pub async fn delete(&self, path: &str, options: Option<RequestOptions>) -> Result<Value> {
        self.execute(
            RequestDescriptor::new(Method::DELETE, path)
                .options(options.unwrap_or_default())
                .retry_by_method(),
        )
        .await
    }
}

/// 429 and every 5xx may succeed on a later attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

async fn classify_response(response: Response) -> GatewayError {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let text = response.text().await.unwrap_or_default();
    classify(status, &headers, &text)
}

async fn parse_json(response: Response) -> Result<Value> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    if status == 204 || text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| {
        GatewayError::contract_violation(
            status,
            format!("response body is not valid JSON: {e}"),
            Some(Value::String(text)),
        )
    })
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
