//! Error types for the gateway client.
//!
//! Failed HTTP responses are classified into exactly one [`ErrorKind`] by a
//! fixed status-code table (see [`ErrorKind::from_status`]). Callers never see
//! a raw status code without a kind attached.

use reqwest::header::HeaderMap;
use serde_json::Value;
use thiserror::Error;

/// The closed set of classified HTTP failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Any non-2xx status without a more specific mapping.
    Http,
    /// 401 or 403.
    Auth,
    /// 400, 409, 413 or 422.
    Validation,
    /// 429.
    RateLimit,
    /// 500 and above.
    Server,
}

impl ErrorKind {
    /// Map an HTTP status code to its error kind. First match wins.
    ///
    /// 413 is a validation failure, not a kind of its own.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            400 | 409 | 413 | 422 => Self::Validation,
            429 => Self::RateLimit,
            s if s >= 500 => Self::Server,
            _ => Self::Http,
        }
    }

    /// Map a JSON-RPC error code from the tool-call envelope to an error kind.
    ///
    /// The tool endpoint reports failures inside a 2xx envelope, so the HTTP
    /// status carries no signal. HTTP-style codes (4xx) are accepted as well
    /// as the negative JSON-RPC range.
    pub fn from_rpc_code(code: i64) -> Self {
        match code {
            429 | -32029 => Self::RateLimit,
            401 | 403 | -32001 => Self::Auth,
            400..=499 | -32602 | -32600 => Self::Validation,
            _ => Self::Server,
        }
    }
}

/// Payload shared by every classified HTTP failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// HTTP status of the response that failed.
    pub status: u16,
    /// Human-readable message extracted from the response.
    pub message: String,
    /// Parsed response body, when there was one.
    pub body: Option<Value>,
    /// Value of `x-request-id` / `request-id`.
    pub request_id: Option<String>,
    /// Value of `x-trace-id` / `trace-id`.
    pub trace_id: Option<String>,
    /// Seconds from the `retry-after` header.
    pub retry_after: Option<u64>,
    /// JSON-RPC error code, for failures reported by the tool-call envelope.
    pub rpc_code: Option<i64>,
}

impl ApiError {
    fn with_message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            body: None,
            request_id: None,
            trace_id: None,
            retry_after: None,
            rpc_code: None,
        }
    }
}

/// Errors that can occur when talking to the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A non-2xx response with no more specific kind.
    #[error("HTTP error ({}): {}", .0.status, .0.message)]
    Http(ApiError),

    /// The credential was rejected.
    #[error("authentication error ({}): {}", .0.status, .0.message)]
    Auth(ApiError),

    /// The gateway rejected the request as invalid.
    #[error("validation error ({}): {}", .0.status, .0.message)]
    Validation(ApiError),

    /// The gateway is throttling this caller.
    #[error("rate limited ({}): {}", .0.status, .0.message)]
    RateLimit(ApiError),

    /// The gateway failed, or answered with a body that breaks the contract.
    #[error("server error ({}): {}", .0.status, .0.message)]
    Server(ApiError),

    /// The request could not be completed at the transport level.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Input rejected locally, before any request was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An intent observation passed its deadline.
    #[error("timed out after {timeout_ms}ms waiting for intent {intent_id}")]
    Timeout {
        /// The intent being observed.
        intent_id: String,
        /// The configured overall timeout.
        timeout_ms: u64,
    },

    /// An intent event sequence ended without a terminal event.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Build a classified error of the given kind.
    pub fn from_kind(kind: ErrorKind, error: ApiError) -> Self {
        match kind {
            ErrorKind::Http => Self::Http(error),
            ErrorKind::Auth => Self::Auth(error),
            ErrorKind::Validation => Self::Validation(error),
            ErrorKind::RateLimit => Self::RateLimit(error),
            ErrorKind::Server => Self::Server(error),
        }
    }

    /// Create a local input-validation error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// A 2xx response whose shape violates the gateway contract.
    pub fn contract_violation(status: u16, message: impl Into<String>, body: Option<Value>) -> Self {
        let mut error = ApiError::with_message(status, message);
        error.body = body;
        Self::Server(error)
    }

    /// The classified payload, if this is an HTTP-classified error.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Http(e)
            | Self::Auth(e)
            | Self::Validation(e)
            | Self::RateLimit(e)
            | Self::Server(e) => Some(e),
            _ => None,
        }
    }

    /// The classified kind, if this is an HTTP-classified error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Http(_) => Some(ErrorKind::Http),
            Self::Auth(_) => Some(ErrorKind::Auth),
            Self::Validation(_) => Some(ErrorKind::Validation),
            Self::RateLimit(_) => Some(ErrorKind::RateLimit),
            Self::Server(_) => Some(ErrorKind::Server),
            _ => None,
        }
    }

    /// Get the HTTP status code, if this is an HTTP-classified error.
    pub fn status(&self) -> Option<u16> {
        self.api_error().map(|e| e.status)
    }

    /// Seconds the gateway asked us to wait, for rate-limit errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimit(e) => e.retry_after,
            _ => None,
        }
    }

    /// Request id reported by the gateway.
    pub fn request_id(&self) -> Option<&str> {
        self.api_error().and_then(|e| e.request_id.as_deref())
    }

    /// Trace id reported by the gateway.
    pub fn trace_id(&self) -> Option<&str> {
        self.api_error().and_then(|e| e.trace_id.as_deref())
    }

    /// Check if repeating the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit(_) | Self::Server(_) => true,
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this is a rate-limit error (HTTP 429).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimit(_))
    }

    /// Check if this is an authentication/authorization rejection (HTTP 401 or 403).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Check if this is a not-found error (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Classify a failed response into exactly one typed error.
pub fn classify(status: u16, headers: &HeaderMap, text: &str) -> GatewayError {
    let body = parse_body(text);
    let message = extract_message(body.as_ref(), text, status);
    let error = ApiError {
        status,
        message,
        body,
        request_id: header_value(headers, &["x-request-id", "request-id"]),
        trace_id: header_value(headers, &["x-trace-id", "trace-id"]),
        retry_after: parse_retry_after(headers),
        rpc_code: None,
    };
    GatewayError::from_kind(ErrorKind::from_status(status), error)
}

/// Classify an `error` member of a JSON-RPC envelope.
pub fn classify_rpc(status: u16, headers: &HeaderMap, rpc_error: &Value) -> GatewayError {
    let code = rpc_error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
    let message = rpc_error
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("tool call failed with code {code}"));
    let error = ApiError {
        status,
        message,
        body: Some(rpc_error.clone()),
        request_id: header_value(headers, &["x-request-id", "request-id"]),
        trace_id: header_value(headers, &["x-trace-id", "trace-id"]),
        retry_after: parse_retry_after(headers),
        rpc_code: Some(code),
    };
    GatewayError::from_kind(ErrorKind::from_rpc_code(code), error)
}

/// Parse `retry-after` as base-10 seconds. Negative values clamp to zero.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let seconds: i64 = raw.trim().parse().ok()?;
    Some(seconds.max(0).unsigned_abs())
}

fn header_value(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(ToOwned::to_owned)
    })
}

fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned())))
}

fn extract_message(body: Option<&Value>, raw: &str, status: u16) -> String {
    let non_empty = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(ToOwned::to_owned);

    let from_body = body.and_then(|body| match body {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("error")
            .and_then(|error| {
                non_empty(error).or_else(|| error.get("message").and_then(non_empty))
            })
            .or_else(|| map.get("message").and_then(non_empty)),
        _ => None,
    });

    from_body.unwrap_or_else(|| {
        if raw.is_empty() {
            format!("HTTP {status}")
        } else {
            raw.to_owned()
        }
    })
}
