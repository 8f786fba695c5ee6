//! Main gateway client.
//!
//! Every method is a thin wrapper: it builds a path, an optional body and
//! query, decides retry eligibility from the method and idempotency key, and
//! hands the call to the [`HttpClient`] engine.

use reqwest::Method;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::client::{ClientOptions, HttpClient, RequestDescriptor, RequestOptions};
use crate::error::{GatewayError, Result};
use crate::mcp::{self, McpCallOptions, ToolSchemaCache};
use crate::observe::{IntentObserver, ObserveOptions};
use crate::types::{ApprovalDecision, CreateIntentOptions, IntentEvent, ListQuery};

fn require<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(GatewayError::invalid_argument(format!("{what} is required")));
    }
    Ok(value)
}

fn owner_query(owner_agent: Option<&str>) -> Vec<(String, String)> {
    owner_agent
        .map(|owner| vec![("owner_agent".to_string(), owner.to_string())])
        .unwrap_or_default()
}

/// Client for the agent-messaging gateway.
#[derive(Debug, Clone)]
pub struct Gateway {
    client: HttpClient,
}

impl Gateway {
    /// Create a new gateway client with the given options.
    pub fn new(options: ClientOptions) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(options)?,
        })
    }

    /// Create a client configured from `AGENT_GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::from_env()?)
    }

    /// Get a reference to the underlying HTTP client.
    pub fn http_client(&self) -> &HttpClient {
        &self.client
    }

    /// Tool schemas learned from [`Gateway::mcp_list_tools`].
    pub fn tool_schemas(&self) -> &ToolSchemaCache {
        self.client.tool_schemas()
    }

    fn owner<'a>(&'a self, owner_agent: Option<&'a str>) -> Option<&'a str> {
        owner_agent.or(self.client.config().default_owner_agent.as_deref())
    }

    /// Run an arbitrary call through the engine. Retry eligibility follows
    /// the method and the idempotency key.
    pub async fn raw_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let mut request = RequestDescriptor::new(method, path).options(options.unwrap_or_default());
        if let Some(body) = body {
            request = request.json(body);
        }
        self.client.execute(request.retry_by_method()).await
    }

    // === Health ===

    /// Check gateway health.
    pub async fn health(&self) -> Result<Value> {
        self.client.get("/health", Vec::new()).await
    }

    // === Intents ===

    /// Submit a new intent.
    ///
    /// A `correlation_id` inside `payload` and `options.correlation_id` must
    /// agree; a mismatch is rejected before any request is sent. When neither
    /// is given a fresh UUID is used.
    pub async fn create_intent(&self, payload: Value, options: CreateIntentOptions) -> Result<Value> {
        let mut body = match payload {
            Value::Object(body) => body,
            _ => return Err(GatewayError::invalid_argument("intent payload must be a JSON object")),
        };

        let embedded = match body.get("correlation_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(_) => {
                return Err(GatewayError::invalid_argument(
                    "payload correlation_id must be a string",
                ))
            }
        };
        let correlation_id = match (embedded, options.correlation_id) {
            (Some(embedded), Some(explicit)) if embedded != explicit => {
                return Err(GatewayError::invalid_argument(format!(
                    "payload correlation_id `{embedded}` does not match correlation_id option `{explicit}`"
                )))
            }
            (_, Some(explicit)) => explicit,
            (Some(embedded), None) => embedded,
            (None, None) => Uuid::new_v4().to_string(),
        };
        body.insert("correlation_id".to_string(), Value::String(correlation_id));

        let request_options = RequestOptions {
            headers: None,
            idempotency_key: options.idempotency_key.filter(|key| !key.is_empty()),
            trace_id: options.trace_id,
        };
        self.client
            .post("/v1/intents", Some(Value::Object(body)), Some(request_options))
            .await
    }

    /// Get an intent by id.
    pub async fn get_intent(&self, intent_id: &str) -> Result<Value> {
        let intent_id = require("intent_id", intent_id)?;
        self.client
            .get(
                &format!("/v1/intents/{}", urlencoding::encode(intent_id)),
                Vec::new(),
            )
            .await
    }

    /// Fetch one page of intent events after `since`.
    pub async fn list_intent_events(&self, intent_id: &str, since: Option<u64>) -> Result<Value> {
        let intent_id = require("intent_id", intent_id)?;
        let query = since
            .map(|since| vec![("since".to_string(), since.to_string())])
            .unwrap_or_default();
        self.client
            .get(
                &format!("/v1/intents/{}/events", urlencoding::encode(intent_id)),
                query,
            )
            .await
    }

    /// Report the outcome of an intent.
    pub async fn resolve_intent(
        &self,
        intent_id: &str,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let intent_id = require("intent_id", intent_id)?;
        self.client
            .post(
                &format!("/v1/intents/{}/resolve", urlencoding::encode(intent_id)),
                Some(body),
                options,
            )
            .await
    }

    /// Cancel an intent.
    pub async fn cancel_intent(
        &self,
        intent_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let intent_id = require("intent_id", intent_id)?;
        self.client
            .post(
                &format!("/v1/intents/{}/cancel", urlencoding::encode(intent_id)),
                Some(json!({})),
                options,
            )
            .await
    }

    /// Observe an intent's lifecycle events until the terminal one.
    pub fn observe(&self, intent_id: &str, options: ObserveOptions) -> Result<IntentObserver> {
        IntentObserver::new(self.client.clone(), intent_id, options)
    }

    /// Block until the intent reaches a terminal state and return that event.
    pub async fn wait_for(&self, intent_id: &str, options: ObserveOptions) -> Result<IntentEvent> {
        self.observe(intent_id, options)?.wait_for().await
    }

    // === Inbox ===

    /// List inbox threads.
    pub async fn list_inbox(&self, query: ListQuery) -> Result<Value> {
        let params = query.to_params(self.client.config().default_owner_agent.as_deref());
        self.client.get("/v1/inbox", params).await
    }

    /// Get one inbox thread.
    pub async fn get_inbox_thread(&self, thread_id: &str, owner_agent: Option<&str>) -> Result<Value> {
        let thread_id = require("thread_id", thread_id)?;
        self.client
            .get(
                &format!("/v1/inbox/{}", urlencoding::encode(thread_id)),
                owner_query(self.owner(owner_agent)),
            )
            .await
    }

    /// List inbox changes since a cursor.
    pub async fn list_inbox_changes(&self, query: ListQuery) -> Result<Value> {
        let params = query.to_params(self.client.config().default_owner_agent.as_deref());
        self.client.get("/v1/inbox/changes", params).await
    }

    /// Reply on an inbox thread.
    pub async fn reply_inbox_thread(
        &self,
        thread_id: &str,
        message: &str,
        owner_agent: Option<&str>,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let thread_id = require("thread_id", thread_id)?;
        let mut body = Map::new();
        body.insert("message".to_string(), Value::String(message.to_string()));
        if let Some(owner) = self.owner(owner_agent) {
            body.insert("owner_agent".to_string(), Value::String(owner.to_string()));
        }
        self.client
            .post(
                &format!("/v1/inbox/{}/reply", urlencoding::encode(thread_id)),
                Some(Value::Object(body)),
                options,
            )
            .await
    }

    /// Hand an inbox thread to another agent.
    pub async fn delegate_inbox_thread(
        &self,
        thread_id: &str,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.inbox_action(thread_id, "delegate", body, options).await
    }

    /// Approve the action gated by an inbox thread.
    pub async fn approve_inbox_thread(
        &self,
        thread_id: &str,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.inbox_action(thread_id, "approve", body, options).await
    }

    /// Reject the action gated by an inbox thread.
    pub async fn reject_inbox_thread(
        &self,
        thread_id: &str,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.inbox_action(thread_id, "reject", body, options).await
    }

    /// Delete messages from an inbox thread.
    pub async fn delete_inbox_messages(
        &self,
        thread_id: &str,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.inbox_action(thread_id, "messages/delete", body, options)
            .await
    }

    async fn inbox_action(
        &self,
        thread_id: &str,
        action: &str,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let thread_id = require("thread_id", thread_id)?;
        self.client
            .post(
                &format!("/v1/inbox/{}/{action}", urlencoding::encode(thread_id)),
                Some(body),
                options,
            )
            .await
    }

    // === Approvals ===

    /// Record a decision on an approval.
    pub async fn decide_approval(
        &self,
        approval_id: &str,
        decision: ApprovalDecision,
        comment: Option<&str>,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let approval_id = require("approval_id", approval_id)?;
        let mut body = json!({ "decision": decision });
        if let Some(comment) = comment {
            body["comment"] = Value::String(comment.to_string());
        }
        self.client
            .post(
                &format!("/v1/approvals/{}/decision", urlencoding::encode(approval_id)),
                Some(body),
                options,
            )
            .await
    }

    // === Invites ===

    /// Create an invite.
    pub async fn create_invite(&self, body: Value, options: Option<RequestOptions>) -> Result<Value> {
        self.client
            .post("/v1/invites/create", Some(body), options)
            .await
    }

    /// Look up an invite by token.
    pub async fn get_invite(&self, token: &str) -> Result<Value> {
        let token = require("invite token", token)?;
        self.client
            .get(
                &format!("/v1/invites/{}", urlencoding::encode(token)),
                Vec::new(),
            )
            .await
    }

    /// Accept an invite.
    pub async fn accept_invite(
        &self,
        token: &str,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let token = require("invite token", token)?;
        self.client
            .post(
                &format!("/v1/invites/{}/accept", urlencoding::encode(token)),
                Some(body),
                options,
            )
            .await
    }

    // === Media ===

    /// Reserve an upload slot.
    pub async fn create_media_upload(
        &self,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.client
            .post("/v1/media/create-upload", Some(body), options)
            .await
    }

    /// Get an upload's state.
    pub async fn get_media_upload(&self, upload_id: &str) -> Result<Value> {
        let upload_id = require("upload_id", upload_id)?;
        self.client
            .get(
                &format!("/v1/media/{}", urlencoding::encode(upload_id)),
                Vec::new(),
            )
            .await
    }

    /// Mark an upload complete.
    pub async fn finalize_media_upload(
        &self,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.client
            .post("/v1/media/finalize-upload", Some(body), options)
            .await
    }

    // === Schemas ===

    /// Create or replace a payload schema.
    pub async fn upsert_schema(&self, body: Value, options: Option<RequestOptions>) -> Result<Value> {
        self.client.post("/v1/schemas", Some(body), options).await
    }

    /// Get a schema by semantic type.
    pub async fn get_schema(&self, semantic_type: &str) -> Result<Value> {
        let semantic_type = require("semantic_type", semantic_type)?;
        self.client
            .get(
                &format!("/v1/schemas/{}", urlencoding::encode(semantic_type)),
                Vec::new(),
            )
            .await
    }

    // === Users ===

    /// Claim a nickname.
    pub async fn register_nick(&self, body: Value, options: Option<RequestOptions>) -> Result<Value> {
        self.client
            .post("/v1/users/register-nick", Some(body), options)
            .await
    }

    /// Check whether a nickname is available.
    pub async fn check_nick(&self, nick: &str) -> Result<Value> {
        let nick = require("nick", nick)?;
        self.client
            .get(
                "/v1/users/check-nick",
                vec![("nick".to_string(), nick.to_string())],
            )
            .await
    }

    /// Change a nickname.
    pub async fn rename_nick(&self, body: Value, options: Option<RequestOptions>) -> Result<Value> {
        self.client
            .post("/v1/users/rename-nick", Some(body), options)
            .await
    }

    /// Get a user profile.
    pub async fn get_user_profile(&self, owner_agent: Option<&str>) -> Result<Value> {
        self.client
            .get("/v1/users/profile", owner_query(self.owner(owner_agent)))
            .await
    }

    /// Update a user profile.
    pub async fn update_user_profile(
        &self,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.client
            .post("/v1/users/profile/update", Some(body), options)
            .await
    }

    // === Webhooks ===

    /// Create or update a webhook subscription.
    pub async fn upsert_webhook_subscription(
        &self,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.client
            .post("/v1/webhooks/subscriptions", Some(body), options)
            .await
    }

    /// List webhook subscriptions.
    pub async fn list_webhook_subscriptions(&self, query: ListQuery) -> Result<Value> {
        let params = query.to_params(self.client.config().default_owner_agent.as_deref());
        self.client.get("/v1/webhooks/subscriptions", params).await
    }

    /// Delete a webhook subscription.
    pub async fn delete_webhook_subscription(
        &self,
        subscription_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let subscription_id = require("subscription_id", subscription_id)?;
        self.client
            .delete(
                &format!(
                    "/v1/webhooks/subscriptions/{}",
                    urlencoding::encode(subscription_id)
                ),
                options,
            )
            .await
    }

    /// Publish an event to webhook subscribers.
    pub async fn publish_webhook_event(
        &self,
        body: Value,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        self.client
            .post("/v1/webhooks/events", Some(body), options)
            .await
    }

    /// Redeliver a published webhook event.
    pub async fn replay_webhook_event(
        &self,
        event_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<Value> {
        let event_id = require("event_id", event_id)?;
        self.client
            .post(
                &format!("/v1/webhooks/events/{}/replay", urlencoding::encode(event_id)),
                Some(json!({})),
                options,
            )
            .await
    }

    // === Tool calls ===

    /// Open a tool-call session.
    pub async fn mcp_initialize(&self, options: McpCallOptions) -> Result<Value> {
        mcp::initialize(&self.client, &options).await
    }

    /// List tools and cache their input schemas.
    pub async fn mcp_list_tools(&self, options: McpCallOptions) -> Result<Value> {
        mcp::list_tools(&self.client, &options).await
    }

    /// Call a tool. Arguments are checked against the cached schema, if any.
    pub async fn mcp_call_tool(
        &self,
        name: &str,
        arguments: Value,
        options: McpCallOptions,
    ) -> Result<Map<String, Value>> {
        mcp::call_tool(&self.client, name, arguments, &options).await
    }
}
