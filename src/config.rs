use clap::{Args, Parser, Subcommand};

use crate::client::{ClientOptions, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_MS};
use crate::observe::ObserveOptions;

#[derive(Debug, Parser, Clone)]
#[command(name = "agent-gateway")]
#[command(about = "Talk to the agent-messaging gateway from the command line")]
pub struct Cli {
    #[arg(long, env = "AGENT_GATEWAY_BASE_URL", global = true)]
    pub base_url: Option<String>,

    #[arg(long, env = "AGENT_GATEWAY_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "AGENT_GATEWAY_OWNER_AGENT", global = true)]
    pub owner_agent: Option<String>,

    #[arg(long, env = "AGENT_GATEWAY_MAX_RETRIES", global = true, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    #[arg(long, env = "AGENT_GATEWAY_RETRY_BACKOFF_MS", global = true, default_value_t = DEFAULT_RETRY_BACKOFF_MS)]
    pub retry_backoff_ms: u64,

    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Check gateway health.
    Health,
    /// Create and follow intents.
    #[command(subcommand)]
    Intent(IntentCommand),
    /// Read the inbox.
    #[command(subcommand)]
    Inbox(InboxCommand),
    /// List and call tools.
    #[command(subcommand)]
    Tools(ToolsCommand),
}

#[derive(Debug, Subcommand, Clone)]
pub enum IntentCommand {
    /// Submit an intent from a JSON payload.
    Create {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        correlation_id: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Show an intent.
    Get { intent_id: String },
    /// Print lifecycle events as JSON lines until the terminal one.
    Watch {
        intent_id: String,
        #[command(flatten)]
        observe: ObserveArgs,
    },
    /// Wait for the terminal event and print it.
    Wait {
        intent_id: String,
        #[command(flatten)]
        observe: ObserveArgs,
    },
}

#[derive(Debug, Args, Clone)]
pub struct ObserveArgs {
    #[arg(long, default_value_t = 0)]
    pub since: u64,

    #[arg(long, default_value_t = 15)]
    pub wait_seconds: u64,

    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum InboxCommand {
    /// List inbox threads.
    List {
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ToolsCommand {
    /// List available tools.
    List,
    /// Call a tool with JSON arguments.
    Call {
        name: String,
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
}

impl Cli {
    /// Client options from the global flags. The API key is checked by the
    /// client constructor.
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new(self.api_key.clone().unwrap_or_default())
            .with_max_retries(self.max_retries)
            .with_retry_backoff_ms(self.retry_backoff_ms);
        if let Some(ref base_url) = self.base_url {
            options = options.with_base_url(base_url.clone());
        }
        if let Some(ref owner) = self.owner_agent {
            options = options.with_default_owner_agent(owner.clone());
        }
        options
    }
}

impl ObserveArgs {
    pub fn observe_options(&self) -> ObserveOptions {
        let options = ObserveOptions::default()
            .since(self.since)
            .wait_seconds(self.wait_seconds)
            .poll_interval_ms(self.poll_interval_ms);
        match self.timeout_ms {
            Some(timeout_ms) => options.timeout_ms(timeout_ms),
            None => options,
        }
    }
}
