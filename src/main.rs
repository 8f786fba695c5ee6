use std::io::Write;

use agent_gateway::config::{Cli, Command, InboxCommand, IntentCommand, ToolsCommand};
use agent_gateway::{CreateIntentOptions, Gateway, ListQuery, McpCallOptions};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let gateway = Gateway::new(cli.client_options()).context("failed to build gateway client")?;

    match cli.command {
        Command::Health => print_json(&gateway.health().await?),
        Command::Intent(cmd) => run_intent(&gateway, cmd).await,
        Command::Inbox(cmd) => run_inbox(&gateway, cmd).await,
        Command::Tools(cmd) => run_tools(&gateway, cmd).await,
    }
}

async fn run_intent(gateway: &Gateway, cmd: IntentCommand) -> Result<()> {
    match cmd {
        IntentCommand::Create {
            payload,
            correlation_id,
            idempotency_key,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            let created = gateway
                .create_intent(
                    payload,
                    CreateIntentOptions {
                        correlation_id,
                        idempotency_key,
                        trace_id: None,
                    },
                )
                .await?;
            print_json(&created)
        }
        IntentCommand::Get { intent_id } => print_json(&gateway.get_intent(&intent_id).await?),
        IntentCommand::Watch { intent_id, observe } => {
            let mut observer = gateway.observe(&intent_id, observe.observe_options())?;
            while let Some(event) = observer.next().await {
                let event = event.with_context(|| format!("observing intent {intent_id}"))?;
                let mut stdout = std::io::stdout().lock();
                serde_json::to_writer(&mut stdout, &event)?;
                writeln!(stdout)?;
            }
            Ok(())
        }
        IntentCommand::Wait { intent_id, observe } => {
            let terminal = gateway
                .wait_for(&intent_id, observe.observe_options())
                .await
                .with_context(|| format!("waiting for intent {intent_id}"))?;
            print_json(&terminal.into_value())
        }
    }
}

async fn run_inbox(gateway: &Gateway, cmd: InboxCommand) -> Result<()> {
    match cmd {
        InboxCommand::List { cursor, limit } => {
            let threads = gateway
                .list_inbox(ListQuery {
                    cursor,
                    limit,
                    ..Default::default()
                })
                .await?;
            print_json(&threads)
        }
    }
}

async fn run_tools(gateway: &Gateway, cmd: ToolsCommand) -> Result<()> {
    match cmd {
        ToolsCommand::List => print_json(&gateway.mcp_list_tools(McpCallOptions::default()).await?),
        ToolsCommand::Call {
            name,
            args,
            idempotency_key,
        } => {
            let arguments: Value = serde_json::from_str(&args).context("--args is not valid JSON")?;
            // Populate the schema cache so arguments are checked before the call.
            if let Err(error) = gateway.mcp_list_tools(McpCallOptions::default()).await {
                tracing::warn!(error = %error, "could not list tools, calling without validation");
            }
            let result = gateway
                .mcp_call_tool(
                    &name,
                    arguments,
                    McpCallOptions {
                        idempotency_key,
                        ..Default::default()
                    },
                )
                .await?;
            print_json(&Value::Object(result))
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn init_tracing(default_level: &str) {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
