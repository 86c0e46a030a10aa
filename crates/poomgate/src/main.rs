//! poomgate - MCP gateway for the poom walkthrough pipeline
//!
//! Subcommands:
//! - `poomgate stdio` - MCP over stdin/stdout
//! - `poomgate serve` - MCP over streamable HTTP plus /health
//! - `poomgate call <tool> [json]` - run one tool and print the envelope
//! - `poomgate watch <source_url>` - create a job and follow it to completion
//! - `poomgate config` - print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poomconf::PoomConfig;
use poomgate::{commands, serve, stdio, telemetry, Gateway};
use poomwatch::WatchTiming;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "poomgate")]
#[command(about = "MCP gateway for the poom walkthrough pipeline")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./poom.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdin/stdout
    Stdio,

    /// Serve MCP over streamable HTTP at /mcp with a /health endpoint
    Serve {
        /// HTTP port to bind (defaults to bind.http_port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Call one tool and print the response envelope
    Call {
        /// Tool name, e.g. list_runs
        tool: String,

        /// JSON arguments
        json: Option<String>,
    },

    /// Create a walkthrough job and poll it until it finishes
    Watch {
        /// Source video URL
        source_url: String,

        /// Run id to assign to the result
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Print the effective configuration and its sources
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = PoomConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    // OTLP export only for the long-running HTTP server
    let with_otlp = matches!(cli.command, Commands::Serve { .. });
    telemetry::init(&config.telemetry, with_otlp)?;

    let ok = match cli.command {
        Commands::Config => {
            commands::show_config(&config, &sources);
            true
        }
        Commands::Stdio => {
            stdio::run(build_gateway(&config)?).await?;
            true
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.bind.http_port);
            serve::run(build_gateway(&config)?, port).await?;
            true
        }
        Commands::Call { tool, json } => {
            commands::call(&build_gateway(&config)?, &tool, json.as_deref()).await?
        }
        Commands::Watch { source_url, run_id } => {
            let timing = WatchTiming::from(&config.watch);
            commands::watch(
                build_gateway(&config)?,
                source_url,
                run_id,
                timing,
                &mut std::io::stdout(),
            )
            .await?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn build_gateway(config: &PoomConfig) -> Result<Gateway> {
    Gateway::from_config(config).context("Failed to set up upstream client")
}
