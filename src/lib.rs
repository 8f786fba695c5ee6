//! # Agent gateway client
//!
//! Typed client for the agent-messaging gateway: intents, inbox threads,
//! approvals, invites, media uploads, schemas, user identities, webhooks and
//! JSON-RPC tool calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_gateway::{ClientOptions, CreateIntentOptions, Gateway, ObserveOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Gateway::new(
//!         ClientOptions::new("gw_live_key").with_base_url("https://gateway.example.com"),
//!     )?;
//!
//!     let created = gateway
//!         .create_intent(
//!             json!({ "intent_type": "notify.v1", "to_agent": "agent://ops" }),
//!             CreateIntentOptions {
//!                 idempotency_key: Some("notify-42".to_string()),
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!     let intent_id = created["intent_id"].as_str().unwrap_or_default();
//!
//!     let done = gateway
//!         .wait_for(intent_id, ObserveOptions::default().timeout_ms(60_000))
//!         .await?;
//!     println!("finished: {:?}", done.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Retries
//!
//! GET and DELETE calls are retried on transport failures, 429 and 5xx, up to
//! [`ClientOptions::max_retries`] extra attempts with exponential backoff (or
//! the server's `Retry-After`). POST calls are retried only when they carry an
//! idempotency key.

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod observe;
pub mod types;

pub use client::{
    is_safe_to_retry, ClientConfig, ClientOptions, HttpClient, RequestDescriptor,
    RequestOptions, Sleeper, TokioSleeper,
};
pub use error::{classify, ApiError, ErrorKind, GatewayError, Result};
pub use gateway::Gateway;
pub use mcp::{
    validate_arguments, McpCallOptions, McpObserver, McpObserverEvent, ToolSchemaCache,
};
pub use observe::{IntentObserver, ObserveOptions};
pub use types::{ApprovalDecision, CreateIntentOptions, IntentEvent, ListQuery};

/// SDK version.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
