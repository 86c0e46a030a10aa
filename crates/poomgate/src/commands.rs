//! CLI command implementations

use anyhow::{Context, Result};
use poomconf::{ConfigSources, PoomConfig};
use poomproto::{CreatePoomParams, OpenRunPlayerParams};
use poomwatch::{describe, WatchOutcome, WatchTiming, WatchUpdate};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Gateway, TOOL_NAMES};

/// Run one tool and print its envelope. Returns whether the call succeeded.
pub async fn call(gateway: &Gateway, tool: &str, json: Option<&str>) -> Result<bool> {
    let args = match json {
        Some(raw) => serde_json::from_str(raw)
            .with_context(|| format!("Failed to parse arguments for {} as JSON", tool))?,
        None => Value::Null,
    };

    if !TOOL_NAMES.contains(&tool) {
        eprintln!("Known tools: {}", TOOL_NAMES.join(", "));
    }

    let envelope = gateway.dispatch(tool, args).await;
    println!("{}", serde_json::to_string_pretty(&envelope.to_json())?);
    Ok(envelope.ok)
}

/// Create a job and follow it until it finishes, opening the player when a
/// run comes out. Ctrl-C stops polling. Progress is written to `out`.
pub async fn watch<W: Write>(
    gateway: Gateway,
    source_url: String,
    run_id: Option<String>,
    timing: WatchTiming,
    out: &mut W,
) -> Result<bool> {
    let job = gateway
        .create_poom(CreatePoomParams { source_url, run_id })
        .await
        .context("Failed to create walkthrough job")?;
    writeln!(out, "Created job {} ({})", job.job_id, job.status)?;

    let cancel = CancellationToken::new();
    let (handle, mut updates) = poomwatch::spawn(Arc::new(gateway.clone()), timing, cancel.clone());
    handle.watch(job);

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = present(&gateway, &mut updates, out).await;
    handle.shutdown().await;
    result
}

/// Print watcher updates until the watch finishes. A completed run is
/// opened in the player and its payload printed.
pub async fn present<W: Write>(
    gateway: &Gateway,
    updates: &mut UnboundedReceiver<WatchUpdate>,
    out: &mut W,
) -> Result<bool> {
    let mut succeeded = false;
    let mut recent = Vec::new();
    while let Some(update) = updates.recv().await {
        match update {
            WatchUpdate::Status {
                state,
                message,
                recent: jobs,
            } => {
                writeln!(out, "[{}] {}", state.name(), message)?;
                recent = jobs;
            }
            WatchUpdate::OpenRun { run_id } => {
                let payload = gateway
                    .open_run_player(OpenRunPlayerParams {
                        run_id: Some(run_id),
                        reference: None,
                    })
                    .await
                    .context("Failed to open player for completed run")?;
                writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
            }
            WatchUpdate::Finished(outcome) => {
                succeeded = matches!(outcome, WatchOutcome::Completed { .. });
                if let WatchOutcome::Cancelled { job_id } = &outcome {
                    writeln!(out, "Stopped watching job {}", job_id)?;
                }
                break;
            }
        }
    }

    if !recent.is_empty() {
        writeln!(out, "Recent jobs:")?;
        for job in &recent {
            writeln!(out, "  {}", describe(job))?;
        }
    }
    Ok(succeeded)
}

/// Print the effective configuration and where it came from.
pub fn show_config(config: &PoomConfig, sources: &ConfigSources) {
    if sources.files.is_empty() {
        println!("# No config files found, using defaults");
    } else {
        for file in &sources.files {
            println!("# Loaded: {}", file.display());
        }
    }
    for var in &sources.env_overrides {
        println!("# Env override: {}", var);
    }
    println!();
    print!("{}", config.to_toml());
}
