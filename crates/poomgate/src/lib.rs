//! poomgate - MCP gateway for the poom walkthrough pipeline
//!
//! Fronts a flaky upstream HTTP API with per-attempt timeouts, same-base
//! retry, multi-base failover, and a single-flight manifest cache, then
//! exposes the result as MCP tools over stdio or streamable HTTP.

pub mod cache;
pub mod commands;
pub mod dispatch;
pub mod handler;
pub mod manifest;
pub mod player;
pub mod serve;
pub mod stdio;
pub mod telemetry;
pub mod upstream;

pub use cache::{CacheStats, Clock, SystemClock, TtlCache};
pub use dispatch::{Gateway, TOOL_NAMES};
pub use handler::PoomHandler;
pub use manifest::{ManifestCache, ManifestSource};
pub use upstream::{UpstreamBases, UpstreamClient, UpstreamRequest, UpstreamSetupError, REQUEST_ID_HEADER};
