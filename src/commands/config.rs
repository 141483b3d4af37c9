//! Config command implementation.
//!
//! Generates configuration files in various formats and prints the
//! effective configuration for `--show-config`.

use pipeline_monitor_exporter::{Config, ConnectionConfig};
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;

fn serialize(config: &Config, format: &ConfigFormat) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Prints the effective configuration with secrets masked.
pub fn show_config(
    config: &Config,
    format: ConfigFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut shown = config.clone();
    if let Some(ConnectionConfig::Ssh(ssh)) = shown.connection.as_mut() {
        if ssh.password.is_some() {
            ssh.password = Some("********".to_string());
        }
    }
    println!("{}", serialize(&shown, &format)?);
    Ok(())
}

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::example();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from("pipeline-monitor-exporter.yaml"),
    };

    let mut content = serialize(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Pipeline Monitor Exporter Configuration
# =======================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                   # HTTP port
# metrics_path: "/metrics"     # Path Prometheus scrapes
# enable_health: true          # Enable /health endpoint
#
# Polling
# -------
# frequency: 15                # Minutes between fetch cycles (max 10080)
# tool: "chp"                  # Pipeline tool on the target
# root: null                   # Passed as --root (omitted when null)
# user: null                   # Passed as -u (omitted when null)
# mode: "status"               # "status" or "metrics"
# newest_only: false           # Keep only the newest revision per type
# always_refresh: false        # Rediscover types/revisions every cycle
# batch_command: null          # One command reporting "-> type:rev" sections
#
# Filtering
# ---------
# ignore_types: []             # Types never monitored
# ignore_revisions: []         # Revisions never monitored
# ignore_metrics: []           # Parsed keys never exported
#
# Connection
# ----------
# connection:
#   kind: "ssh"                # "ssh" or "local"
#   hostname: "login.example.org"
#   username: "pipeline"
#   port: 22
#   password: null             # Uses sshpass when set
#   key_filename: null         # Private key passed with -i
#   private: false             # Use system keys, accept new host keys
#   encoding: "utf-8"          # "utf-8" or "latin-1"
#
# connection:
#   kind: "local"
#   exec: null                 # Interpreter; "sh -c" when null
#   exec_args: []
#
# Shell setup (prepended to every command)
# ----------------------------------------
# shell:
#   modpath: null              # module use <modpath>;
#   modules: []                # module load <module>; for each
#   venv: null                 # source <venv>;
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
#
# TLS/SSL Configuration
# ---------------------
# enable_tls: false            # Enable HTTPS (default: false)
# tls_cert_path: null          # Path to TLS certificate (PEM format)
# tls_key_path: null           # Path to TLS private key (PEM format)
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_serializes_in_every_format() {
        let config = Config::example();
        for format in [ConfigFormat::Yaml, ConfigFormat::Json, ConfigFormat::Toml] {
            let text = serialize(&config, &format).unwrap();
            assert!(text.contains("login.cluster.example.org"));
        }
    }

    #[test]
    fn test_generated_yaml_parses_back() {
        let text = add_config_comments(serialize(&Config::example(), &ConfigFormat::Yaml).unwrap());
        let parsed: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed.connection, Config::example().connection);
        assert_eq!(parsed.newest_only, Some(true));
        assert!(parsed.ignore_types.contains("test_daily"));
    }
}
