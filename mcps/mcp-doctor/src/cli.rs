//! CLI argument definitions and command dispatch

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rmcp::{transport::io::stdio, ServiceExt};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use mcp_doctor::events::{event_channel, EventReceiver, RepairEvent, RepairEventSender};
use mcp_doctor::{ClientType, DoctorConfig, ErrorRecord, FixId, McpDoctorServer, RepairEngine};

#[derive(Parser)]
#[command(name = "mcp-doctor", version)]
#[command(about = "Diagnose and repair locally installed MCP servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: ~/.binks/mcp-doctor.toml or $XDG_CONFIG_HOME/mcp-doctor/config.toml)
    #[arg(long, env = "MCP_DOCTOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace). Default is info.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server on stdio (default)
    Serve,
    /// List servers registered in the managed client configs
    Servers,
    /// Build a repair plan and print it without applying anything
    Plan {
        /// JSON array of classified errors (default: stdin)
        #[arg(long)]
        errors: Option<PathBuf>,
        /// Log file to send to the advisor for errors no rule addresses
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Apply automatic fixes; manual fixes are listed but never applied
    Fix {
        /// JSON array of classified errors (default: stdin)
        #[arg(long)]
        errors: Option<PathBuf>,
    },
    /// Apply fixes you accept by id; every other fix is discarded
    Confirm {
        /// JSON array of classified errors (default: stdin)
        #[arg(long)]
        errors: Option<PathBuf>,
        /// Fix id to apply (repeatable), e.g. "my-server:path"
        #[arg(long = "accept", required = true)]
        accept: Vec<String>,
    },
    /// Back up and repair JSON syntax in every client config
    AutoRepair,
    /// Restore a client config from its newest backup
    Restore {
        /// claude_desktop, cursor, windsurf or vs_code
        #[arg(long, value_parser = parse_client)]
        client: ClientType,
    },
}

fn parse_client(value: &str) -> Result<ClientType, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown client '{}'", value))
}

fn load_settings(path: Option<&Path>) -> Result<DoctorConfig> {
    match path {
        Some(path) => DoctorConfig::load_from_path(path),
        None => DoctorConfig::load(),
    }
}

async fn read_errors(path: Option<&Path>) -> Result<Vec<ErrorRecord>> {
    let content = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    serde_json::from_str(&content).context("Expected a JSON array of error records")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Report events on stderr while stdout carries the JSON result.
/// The task ends once the engine (and its sender) is dropped.
fn spawn_event_printer(mut rx: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RepairEvent::FixApplied { fix, result } if result.success => {
                    eprintln!("applied   {}  {}", fix.id(), fix.description());
                }
                RepairEvent::FixApplied { fix, result } => {
                    let reason = result.error.map(|e| e.message).unwrap_or_default();
                    eprintln!("failed    {}  {}", fix.id(), reason);
                }
                RepairEvent::FixSkipped { fix, reason } => {
                    eprintln!("skipped   {}  {} ({})", fix.id(), fix.description(), reason);
                }
                RepairEvent::FixDiscarded { fix } => {
                    eprintln!("discarded {}", fix.id());
                }
                RepairEvent::AutoRepairCompleted { clients, repaired } => {
                    eprintln!("auto-repair checked {} client(s), repaired: {}", clients, repaired);
                }
            }
        }
    })
}

/// Log events from the MCP server; stderr is the only free channel
fn spawn_event_logger(mut rx: EventReceiver) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                tracing::debug!(event = %json, "repair event");
            }
        }
    });
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.config.as_deref())?;
    let (tx, rx) = event_channel();
    let engine = RepairEngine::from_settings(&settings)
        .events(RepairEventSender::new(tx))
        .build();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            spawn_event_logger(rx);
            tracing::info!("Starting mcp-doctor MCP server");

            let service = McpDoctorServer::new(engine).serve(stdio()).await?;
            tracing::info!("mcp-doctor MCP server running");

            service.waiting().await?;
            tracing::info!("mcp-doctor MCP server stopped");
        }
        Commands::Servers => {
            let registry = engine.load_servers().await;
            print_json(&registry)?;
        }
        Commands::Plan { errors, log } => {
            let errors = read_errors(errors.as_deref()).await?;
            let registry = engine.load_servers().await;
            let mut plan = engine.build_plan(&registry, errors).await;

            if let Some(log) = log {
                let content = tokio::fs::read_to_string(&log)
                    .await
                    .with_context(|| format!("Failed to read {}", log.display()))?;
                if let Some(summary) = engine.advise(&mut plan, &content).await {
                    eprintln!(
                        "advisor added {} fix(es), confidence {}: {}",
                        summary.added.len(),
                        summary.confidence,
                        summary.explanation
                    );
                }
            }
            print_json(&plan)?;
        }
        Commands::Fix { errors } => {
            let printer = spawn_event_printer(rx);
            let errors = read_errors(errors.as_deref()).await?;
            let registry = engine.load_servers().await;
            let report = engine.fix_all_issues(&registry, errors).await;
            drop(engine);
            printer.await?;
            print_json(&report)?;
        }
        Commands::Confirm { errors, accept } => {
            let printer = spawn_event_printer(rx);
            let errors = read_errors(errors.as_deref()).await?;
            let registry = engine.load_servers().await;
            // Fix ids are deterministic, so a rebuilt plan matches a printed one
            let plan = engine.build_plan(&registry, errors).await;
            let accepted: Vec<FixId> = accept.into_iter().map(FixId::from).collect();
            let report = engine.apply_confirmed(&registry, &plan, &accepted).await?;
            drop(engine);
            printer.await?;
            print_json(&report)?;
        }
        Commands::AutoRepair => {
            let printer = spawn_event_printer(rx);
            let repaired = engine.auto_repair().await;
            drop(engine);
            printer.await?;
            print_json(&serde_json::json!({ "repaired": repaired }))?;
        }
        Commands::Restore { client } => {
            let restored = engine.restore(client).await?;
            eprintln!("restored {} config from {}", client, restored.display());
        }
    }

    Ok(())
}
