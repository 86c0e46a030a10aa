//! Configuration loading for the poom bridge.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/poom/config.toml` (system)
//! 2. `~/.config/poom/config.toml` (user)
//! 3. `./poom.toml` (local override) or the path given with `--config`
//! 4. Environment variables (`POOM_*`)
//!
//! Files are merged table by table before deserialization, so a local file
//! that only sets `[cache]` keeps the user file's `[upstream]`.
//!
//! # Example Config
//!
//! ```toml
//! [upstream]
//! bases = ["http://pipeline-a:8000", "http://pipeline-b:8000"]
//! timeout_ms = 9000
//!
//! [cache]
//! manifest_ttl_secs = 30
//!
//! [player]
//! default_run_id = "run_2024_intro"
//! reference_scheme = "poom"
//!
//! [bind]
//! http_port = 8090
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info,poomgate=debug"
//!
//! [watch]
//! first_poll_ms = 1200
//! poll_interval_ms = 3500
//! recent_jobs_cap = 8
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    BindConfig, CacheConfig, PlayerConfig, TelemetryConfig, UpstreamConfig, WatchConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete poom bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PoomConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub player: PlayerConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

impl PoomConfig {
    /// Load configuration and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.bases.iter().all(|b| b.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "upstream.bases must name at least one URL".to_string(),
            ));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "upstream.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "watch.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.player.reference_scheme.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "player.reference_scheme must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand for stable ordering and comments on optional keys
        let mut output = String::new();

        output.push_str("# poom bridge configuration\n\n");

        output.push_str("[upstream]\n");
        output.push_str("bases = [\n");
        for base in &self.upstream.bases {
            output.push_str(&format!("    \"{}\",\n", base));
        }
        output.push_str("]\n");
        output.push_str(&format!("timeout_ms = {}\n", self.upstream.timeout_ms));

        output.push_str("\n[cache]\n");
        output.push_str(&format!(
            "manifest_ttl_secs = {}\n",
            self.cache.manifest_ttl_secs
        ));

        output.push_str("\n[player]\n");
        match self.player.default_run() {
            Some(run_id) => output.push_str(&format!("default_run_id = \"{}\"\n", run_id)),
            None => output.push_str("# default_run_id = \"\"\n"),
        }
        output.push_str(&format!(
            "reference_scheme = \"{}\"\n",
            self.player.reference_scheme
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("http_port = {}\n", self.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.telemetry.otlp_endpoint
        ));
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[watch]\n");
        output.push_str(&format!("first_poll_ms = {}\n", self.watch.first_poll_ms));
        output.push_str(&format!(
            "poll_interval_ms = {}\n",
            self.watch.poll_interval_ms
        ));
        output.push_str(&format!(
            "recent_jobs_cap = {}\n",
            self.watch.recent_jobs_cap
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoomConfig::default();
        assert_eq!(config.upstream.bases, vec!["http://127.0.0.1:8000"]);
        assert_eq!(config.upstream.timeout_ms, 9_000);
        assert_eq!(config.cache.manifest_ttl_secs, 30);
        assert_eq!(config.player.reference_scheme, "poom");
        assert!(config.player.default_run().is_none());
        assert!(!config.telemetry.otlp_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips_through_parser() {
        let mut config = PoomConfig::default();
        config.upstream.bases.push("http://fallback:8000".to_string());
        config.player.default_run_id = Some("run_1".to_string());

        let rendered = config.to_toml();
        assert!(rendered.contains("[upstream]"));
        assert!(rendered.contains("[watch]"));

        let table: toml::Table = rendered.parse().unwrap();
        let parsed = loader::from_table(table).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_empty_bases() {
        let mut config = PoomConfig::default();
        config.upstream.bases = vec!["  ".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = PoomConfig::default();
        config.watch.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(msg)) if msg.contains("poll_interval_ms")
        ));

        config.watch.poll_interval_ms = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = PoomConfig::default();
        config.upstream.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_default_run_is_unset() {
        let mut config = PoomConfig::default();
        config.player.default_run_id = Some("   ".to_string());
        assert!(config.player.default_run().is_none());
    }
}
