use std::path::PathBuf;

use agent_core::tools::{ToolContext, ToolRegistry};
use agent_mcp::{McpConfig, McpConnector, McpEvent};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod logging;

use logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "agent-gateway")]
#[command(about = "Connects MCP servers and runs their tools")]
#[command(version)]
struct Cli {
    /// MCP server configuration (JSON, or YAML for .yaml/.yml)
    #[arg(long, env = "AGENT_GATEWAY_CONFIG")]
    config: PathBuf,

    /// Enable debug mode
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Channel identity passed to tools
    #[arg(long)]
    channel: Option<String>,

    /// Chat identity passed to tools
    #[arg(long)]
    chat_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every registered tool
    Tools,
    /// Execute one tool through the registry
    Call {
        /// Registered tool name, e.g. mcp_files_read
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = McpConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::debug!(servers = config.servers.len(), "loaded MCP configuration");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let (event_tx, mut event_rx) = mpsc::channel::<McpEvent>(64);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::debug!(?event, "MCP event");
        }
    });

    let registry = ToolRegistry::new();
    let connector = McpConnector::new(config).with_event_channel(event_tx);

    if let Err(e) = connector.connect(&registry, &cancel).await {
        eprintln!("{}", format!("⚠️  {}", e).yellow());
    }

    let outcome = match cli.command {
        Commands::Tools => {
            list_tools(&registry);
            Ok(())
        }
        Commands::Call { name, args } => {
            let ctx = tool_context(cli.channel.as_deref(), cli.chat_id.as_deref(), cancel.clone());
            call_tool(&registry, &ctx, &name, &args).await
        }
    };

    connector.close(&registry).await;
    outcome
}

fn tool_context(
    channel: Option<&str>,
    chat_id: Option<&str>,
    cancel: CancellationToken,
) -> ToolContext {
    let mut ctx = ToolContext::new(cancel).with_session(format!("cli-{}", std::process::id()));
    ctx.channel = channel.map(str::to_string);
    ctx.chat_id = chat_id.map(str::to_string);
    ctx
}

fn list_tools(registry: &ToolRegistry) {
    let tools = registry.list_tools();
    if tools.is_empty() {
        println!("{}", "No tools registered".dimmed());
        return;
    }

    for tool in tools {
        println!("{}", tool.function.name.green());
        if !tool.function.description.is_empty() {
            println!("    {}", tool.function.description);
        }
    }
}

async fn call_tool(
    registry: &ToolRegistry,
    ctx: &ToolContext,
    name: &str,
    args: &str,
) -> Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;
    anyhow::ensure!(args.is_object(), "--args must be a JSON object");

    let output = registry
        .execute(ctx, name, args)
        .await
        .with_context(|| format!("tool {} failed", name))?;

    println!("{}", output);
    Ok(())
}
