//! Configuration sections. Every field has a compiled default so a bare
//! install talks to a local pipeline without any config file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upstream pipeline API endpoints and per-attempt limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Candidate base URLs in failover order (primary first).
    /// Default: ["http://127.0.0.1:8000"]
    #[serde(default = "UpstreamConfig::default_bases")]
    pub bases: Vec<String>,

    /// Hard timeout for a single HTTP attempt, in milliseconds.
    /// Default: 9000
    #[serde(default = "UpstreamConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl UpstreamConfig {
    fn default_bases() -> Vec<String> {
        vec!["http://127.0.0.1:8000".to_string()]
    }

    fn default_timeout_ms() -> u64 {
        9_000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            bases: Self::default_bases(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// In-memory manifest cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a fetched manifest is served without refetching.
    /// Default: 30
    #[serde(default = "CacheConfig::default_manifest_ttl_secs")]
    pub manifest_ttl_secs: u64,
}

impl CacheConfig {
    fn default_manifest_ttl_secs() -> u64 {
        30
    }

    pub fn manifest_ttl(&self) -> Duration {
        Duration::from_secs(self.manifest_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            manifest_ttl_secs: Self::default_manifest_ttl_secs(),
        }
    }
}

/// Player resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Run opened when a caller names neither a run id nor a reference.
    #[serde(default)]
    pub default_run_id: Option<String>,

    /// Scheme of run reference URLs (`<scheme>://run/<run_id>`).
    /// Default: poom
    #[serde(default = "PlayerConfig::default_reference_scheme")]
    pub reference_scheme: String,
}

impl PlayerConfig {
    fn default_reference_scheme() -> String {
        "poom".to_string()
    }

    /// Default run id, treating an empty string as unset.
    pub fn default_run(&self) -> Option<&str> {
        self.default_run_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_run_id: None,
            reference_scheme: Self::default_reference_scheme(),
        }
    }
}

/// Network bind settings for `poomgate serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// HTTP port for MCP and health endpoints.
    /// Default: 8090
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_http_port() -> u16 {
        8090
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: "" (disabled)
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log filter directive (trace, debug, info, warn, error or an EnvFilter string).
    /// Default: info,poomgate=debug
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info,poomgate=debug".to_string()
    }

    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Job watcher timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Delay between job creation and the first status poll.
    /// Default: 1200
    #[serde(default = "WatchConfig::default_first_poll_ms")]
    pub first_poll_ms: u64,

    /// Fixed delay between subsequent polls.
    /// Default: 3500
    #[serde(default = "WatchConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Length bound of the recent-jobs list.
    /// Default: 8
    #[serde(default = "WatchConfig::default_recent_jobs_cap")]
    pub recent_jobs_cap: usize,
}

impl WatchConfig {
    fn default_first_poll_ms() -> u64 {
        1_200
    }

    fn default_poll_interval_ms() -> u64 {
        3_500
    }

    fn default_recent_jobs_cap() -> usize {
        8
    }

    pub fn first_poll(&self) -> Duration {
        Duration::from_millis(self.first_poll_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            first_poll_ms: Self::default_first_poll_ms(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            recent_jobs_cap: Self::default_recent_jobs_cap(),
        }
    }
}
