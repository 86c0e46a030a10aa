//! Stdio MCP transport for desktop hosts that spawn the gateway directly.
//!
//! stdout carries JSON-RPC frames; all logging goes to stderr.

use anyhow::{Context, Result};
use rmcp::{transport::stdio, ServiceExt};
use tracing::info;

use crate::dispatch::Gateway;
use crate::handler::PoomHandler;

/// Serve MCP over stdin/stdout until EOF.
pub async fn run(gateway: Gateway) -> Result<()> {
    let handler = PoomHandler::new(gateway);

    let service = handler
        .serve(stdio())
        .await
        .context("Failed to start stdio MCP service")?;

    info!("Stdio MCP server running");

    service.waiting().await?;

    info!("Stdio MCP server shutdown");
    Ok(())
}
