//! CLI arguments and subcommands for pipeline-monitor-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands, and merges CLI overrides
//! into the loaded configuration.

use clap::{Parser, Subcommand, ValueEnum};
use pipeline_monitor_exporter::{load_config, Config, ConfigError};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses the config file spelling of a level.
    pub fn from_config(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value, true).ok()
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "pipeline-monitor-exporter",
    about = "Prometheus exporter for remote pipeline job status",
    long_about = "Prometheus exporter for remote pipeline job status.\n\n\
                  Periodically runs the pipeline tool on a remote cluster over SSH (or locally), \
                  parses the reported item counts, queue states and fairshare, and exposes them \
                  as labeled gauges for Prometheus to scrape.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides log_level from the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Minutes between fetch cycles
    #[arg(long)]
    pub frequency: Option<u64>,

    /// Pipeline root directory on the target
    #[arg(long)]
    pub root: Option<String>,

    /// Operating user passed to the pipeline tool
    #[arg(long)]
    pub user: Option<String>,

    /// Track only the newest revision of each type
    #[arg(long)]
    pub newest_only: bool,

    /// Rediscover types and revisions at the start of every cycle
    #[arg(long)]
    pub always_refresh: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and connectivity to the target
    Check,

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// List the type:revision pairs that would be monitored
    Discover,

    /// Run fetch cycles once and print the resulting metrics
    Test {
        /// Number of fetch cycles
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        /// Print the full exposition text after the last cycle
        #[arg(long)]
        verbose: bool,
    },
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(level) = &args.log_level {
        config.log_level = Some(format!("{level:?}").to_lowercase());
    }

    // Polling overrides
    if let Some(frequency) = args.frequency {
        config.frequency = Some(frequency);
    }
    if let Some(root) = &args.root {
        config.root = Some(root.clone());
    }
    if let Some(user) = &args.user {
        config.user = Some(user.clone());
    }
    if args.newest_only {
        config.newest_only = Some(true);
    }
    if args.always_refresh {
        config.always_refresh = Some(true);
    }

    if args.disable_health {
        config.enable_health = Some(false);
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from([
            "pipeline-monitor-exporter",
            "--no-config",
            "--port",
            "9300",
            "--frequency",
            "5",
            "--root",
            "/data/",
            "--newest-only",
            "--log-level",
            "debug",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port, Some(9300));
        assert_eq!(cfg.frequency, Some(5));
        assert_eq!(cfg.root.as_deref(), Some("/data/"));
        assert_eq!(cfg.newest_only, Some(true));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_log_level_from_config() {
        assert!(matches!(LogLevel::from_config("WARN"), Some(LogLevel::Warn)));
        assert!(LogLevel::from_config("verbose").is_none());
    }
}
