//! Config file discovery, table merging, and environment variable overlay.

use crate::{ConfigError, PoomConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli). Only existing files
/// are returned.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/poom/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("poom/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("poom.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                    continue;
                }
                base.insert(key, toml::Value::Table(incoming));
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

/// Deserialize a merged table, filling unspecified fields with defaults.
pub fn from_table(table: toml::Table) -> Result<PoomConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))
}

/// Apply process environment overrides to config.
pub fn apply_env_overrides(config: &mut PoomConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup, so tests never touch process env.
pub fn apply_overrides_from<F>(config: &mut PoomConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Upstream bases: primary and fallbacks override independently
    let primary = lookup("POOM_UPSTREAM_URL").filter(|v| !v.trim().is_empty());
    let primary_set = primary.is_some();
    let fallbacks = lookup("POOM_UPSTREAM_FALLBACKS");
    if primary.is_some() || fallbacks.is_some() {
        let mut current = std::mem::take(&mut config.upstream.bases).into_iter();
        let current_primary = current.next();
        let current_rest: Vec<String> = current.collect();

        let mut bases = Vec::new();
        if let Some(p) = primary.or(current_primary) {
            bases.push(p);
        }
        match fallbacks {
            Some(list) => {
                bases.extend(
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                );
                sources.env_overrides.push("POOM_UPSTREAM_FALLBACKS".to_string());
            }
            None => bases.extend(current_rest),
        }
        if primary_set {
            sources.env_overrides.push("POOM_UPSTREAM_URL".to_string());
        }
        config.upstream.bases = bases;
    }

    if let Some(v) = lookup("POOM_UPSTREAM_TIMEOUT_MS") {
        if let Ok(ms) = v.trim().parse() {
            config.upstream.timeout_ms = ms;
            sources.env_overrides.push("POOM_UPSTREAM_TIMEOUT_MS".to_string());
        }
    }

    if let Some(v) = lookup("POOM_MANIFEST_TTL_SECS") {
        if let Ok(secs) = v.trim().parse() {
            config.cache.manifest_ttl_secs = secs;
            sources.env_overrides.push("POOM_MANIFEST_TTL_SECS".to_string());
        }
    }

    if let Some(v) = lookup("POOM_DEFAULT_RUN_ID") {
        config.player.default_run_id = Some(v);
        sources.env_overrides.push("POOM_DEFAULT_RUN_ID".to_string());
    }
    if let Some(v) = lookup("POOM_REFERENCE_SCHEME") {
        config.player.reference_scheme = v;
        sources.env_overrides.push("POOM_REFERENCE_SCHEME".to_string());
    }

    if let Some(v) = lookup("POOM_HTTP_PORT") {
        if let Ok(port) = v.trim().parse() {
            config.bind.http_port = port;
            sources.env_overrides.push("POOM_HTTP_PORT".to_string());
        }
    }

    if let Some(v) = lookup("POOM_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("POOM_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Some(v) = lookup("POOM_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("POOM_LOG_LEVEL".to_string());
    }
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
