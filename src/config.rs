//! Configuration management for pipeline-monitor-exporter.
//!
//! Configuration is loaded once at startup from YAML, JSON or TOML (chosen by
//! file extension), merged with CLI overrides by the binary and validated
//! before any component is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::command_builder::{CommandBuilder, FetchMode, DEFAULT_TOOL};
use crate::cycle_stats::CycleStats;
use crate::executor::{ConfiguredConnector, ConnectionConfig, ShellSetup};
use crate::gauges::GaugeRegistry;
use crate::orchestrator::{FetchOrchestrator, FetchSettings};
use crate::selector::SelectionPolicy;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_FREQUENCY_MINUTES: u64 = 15;
/// Upper bound for `frequency` (one week).
pub const MAX_FREQUENCY_MINUTES: u64 = 7 * 24 * 60;

/// Paths served by fixed handlers; `metrics_path` may not shadow them.
pub const RESERVED_PATHS: [&str; 4] = ["/", "/health", "/config", "/targets"];

/// Locations searched when no config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 6] = [
    "/etc/pipeline-monitor/exporter.yaml",
    "/etc/pipeline-monitor/exporter.yml",
    "/etc/pipeline-monitor/exporter.json",
    "./pipeline-monitor-exporter.yaml",
    "./pipeline-monitor-exporter.yml",
    "./pipeline-monitor-exporter.json",
];

/// Configuration loading and validation failures. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("required field `{0}` is missing")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    #[serde(alias = "metrics-path")]
    pub metrics_path: Option<String>,
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    // Polling
    /// Minutes between fetch cycles
    pub frequency: Option<u64>,
    /// Pipeline tool executable on the target
    pub tool: Option<String>,
    /// Pipeline root directory passed as `--root`
    pub root: Option<String>,
    /// Operating user passed as `-u`
    pub user: Option<String>,
    pub mode: Option<FetchMode>,
    #[serde(alias = "newest-only")]
    pub newest_only: Option<bool>,
    #[serde(alias = "always-refresh")]
    pub always_refresh: Option<bool>,
    /// Single command reporting every target in `-> type:rev` sections
    #[serde(alias = "batch-command")]
    pub batch_command: Option<String>,

    // Filtering
    #[serde(default, alias = "ignoretypes", alias = "ignore-types")]
    pub ignore_types: BTreeSet<String>,
    #[serde(default, alias = "ignorerevs", alias = "ignore-revisions")]
    pub ignore_revisions: BTreeSet<String>,
    #[serde(default, alias = "ignoremetrics", alias = "ignore-metrics")]
    pub ignore_metrics: BTreeSet<String>,

    // Execution channel
    pub connection: Option<ConnectionConfig>,
    #[serde(default)]
    pub shell: ShellSetup,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            metrics_path: Some(DEFAULT_METRICS_PATH.to_string()),
            enable_health: Some(true),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
            log_level: Some("info".into()),
            frequency: Some(DEFAULT_FREQUENCY_MINUTES),
            tool: Some(DEFAULT_TOOL.to_string()),
            root: None,
            user: None,
            mode: Some(FetchMode::default()),
            newest_only: Some(false),
            always_refresh: Some(false),
            batch_command: None,
            ignore_types: BTreeSet::new(),
            ignore_revisions: BTreeSet::new(),
            ignore_metrics: BTreeSet::new(),
            connection: None,
            shell: ShellSetup::default(),
        }
    }
}

impl Config {
    pub fn metrics_path(&self) -> &str {
        self.metrics_path.as_deref().unwrap_or(DEFAULT_METRICS_PATH)
    }

    pub fn frequency_minutes(&self) -> u64 {
        self.frequency.unwrap_or(DEFAULT_FREQUENCY_MINUTES)
    }

    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder::new(
            self.tool.as_deref().unwrap_or(DEFAULT_TOOL),
            self.root.clone(),
            self.user.clone(),
        )
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            ignore_types: self.ignore_types.clone(),
            ignore_revisions: self.ignore_revisions.clone(),
            newest_only: self.newest_only.unwrap_or(false),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            mode: self.mode.unwrap_or_default(),
            always_refresh: self.always_refresh.unwrap_or(false),
            policy: self.selection_policy(),
            batch_command: self.batch_command.clone(),
        }
    }

    /// Connector for the configured execution channel.
    pub fn connector(&self) -> Result<ConfiguredConnector, ConfigError> {
        let connection = self
            .connection
            .clone()
            .ok_or(ConfigError::Missing("connection"))?;
        Ok(ConfiguredConnector::new(connection, self.shell.clone()))
    }

    /// Builds a fresh gauge registry honoring `ignore_metrics`.
    pub fn gauge_registry(&self) -> Result<GaugeRegistry, prometheus::Error> {
        GaugeRegistry::new(self.ignore_metrics.iter().cloned())
    }

    /// Wires an orchestrator from this configuration.
    pub fn orchestrator(
        &self,
        gauges: Arc<GaugeRegistry>,
        stats: Arc<CycleStats>,
    ) -> Result<FetchOrchestrator, ConfigError> {
        Ok(FetchOrchestrator::new(
            Box::new(self.connector()?),
            self.command_builder(),
            self.fetch_settings(),
            gauges,
            stats,
        ))
    }

    /// A complete configuration suitable as a starting point.
    pub fn example() -> Self {
        Self {
            root: Some("/project/pipeline/processed/".into()),
            user: Some("pipeline".into()),
            newest_only: Some(true),
            ignore_types: ["test_daily".to_string()].into_iter().collect(),
            connection: Some(ConnectionConfig::Ssh(crate::executor::SshConfig {
                hostname: "login.cluster.example.org".into(),
                username: "pipeline".into(),
                port: 22,
                password: None,
                key_filename: Some("/root/.ssh/id_cluster".into()),
                private: true,
                encoding: Default::default(),
            })),
            shell: ShellSetup {
                modpath: Some("~/pipeline_env/modules/modulefiles/".into()),
                modules: vec!["pipeline/python/2022.06".into()],
                venv: Some("/project/pipeline/venv/bin/activate".into()),
            },
            ..Self::default()
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    match &cfg.connection {
        None => return Err(ConfigError::Missing("connection")),
        Some(ConnectionConfig::Ssh(ssh)) => {
            if ssh.hostname.trim().is_empty() {
                return Err(ConfigError::Missing("connection.hostname"));
            }
            if ssh.username.trim().is_empty() {
                return Err(ConfigError::Missing("connection.username"));
            }
            if let Some(key) = ssh.key_filename.as_deref() {
                if !Path::new(key).exists() {
                    return Err(ConfigError::Invalid {
                        field: "connection.key_filename",
                        reason: format!("key file not found: {key}"),
                    });
                }
            }
        }
        Some(ConnectionConfig::Local(local)) => {
            if local.exec.as_deref().is_some_and(|e| e.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    field: "connection.exec",
                    reason: "must not be empty when set".into(),
                });
            }
        }
    }

    if cfg.frequency_minutes() == 0 {
        return Err(ConfigError::Invalid {
            field: "frequency",
            reason: "must be at least 1 minute".into(),
        });
    }

    if cfg.frequency_minutes() > MAX_FREQUENCY_MINUTES {
        return Err(ConfigError::Invalid {
            field: "frequency",
            reason: format!("must be at most {MAX_FREQUENCY_MINUTES} minutes"),
        });
    }

    if !cfg.metrics_path().starts_with('/') {
        return Err(ConfigError::Invalid {
            field: "metrics_path",
            reason: format!("'{}' must start with '/'", cfg.metrics_path()),
        });
    }

    if RESERVED_PATHS.contains(&cfg.metrics_path()) {
        return Err(ConfigError::Invalid {
            field: "metrics_path",
            reason: format!("'{}' is already served by another endpoint", cfg.metrics_path()),
        });
    }

    if cfg.tool.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            field: "tool",
            reason: "must not be empty".into(),
        });
    }

    if cfg.batch_command.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            field: "batch_command",
            reason: "must not be empty when set".into(),
        });
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(
            level.to_lowercase().as_str(),
            "off" | "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::Invalid {
                field: "log_level",
                reason: format!("unknown level '{level}'"),
            });
        }
    }

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        match (cfg.tls_cert_path.as_deref(), cfg.tls_key_path.as_deref()) {
            (None, None) => {
                return Err(ConfigError::Invalid {
                    field: "enable_tls",
                    reason: "TLS is enabled but neither tls_cert_path nor tls_key_path are set"
                        .into(),
                });
            }
            (Some(_), None) => return Err(ConfigError::Missing("tls_key_path")),
            (None, Some(_)) => return Err(ConfigError::Missing("tls_cert_path")),
            (Some(cert), Some(key)) => {
                check_readable("tls_cert_path", cert)?;
                check_readable("tls_key_path", key)?;
            }
        }
    }

    Ok(())
}

/// Ensures a file exists and is not empty.
fn check_readable(field: &'static str, path: &str) -> Result<(), ConfigError> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Err(ConfigError::Invalid {
            field,
            reason: format!("file is empty: {path}"),
        }),
        Ok(_) => Ok(()),
        Err(e) => Err(ConfigError::Invalid {
            field,
            reason: format!("file is not readable: {path} ({e})"),
        }),
    }
}

/// Parses configuration text according to the file extension.
pub fn parse_config(content: &str, extension: Option<&str>) -> Result<Config, ConfigError> {
    match extension {
        Some("json") => Ok(serde_json::from_str(content)?),
        Some("toml") => Ok(toml::from_str(content)?),
        _ => Ok(serde_yaml::from_str(content)?),
    }
}

/// Loads configuration from `path`, or from the first default location that
/// exists. Falls back to defaults when no file is found.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            Some(p) => PathBuf::from(p),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    let config = parse_config(&content, path.extension().and_then(|s| s.to_str()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}
