//! Configuration display endpoint handler.
//!
//! This module provides the `/config` endpoint handler that displays
//! the current exporter configuration. SSH passwords are never echoed.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use pipeline_monitor_exporter::command_builder::DEFAULT_TOOL;
use pipeline_monitor_exporter::config::{
    Config, DEFAULT_BIND_ADDR, DEFAULT_FREQUENCY_MINUTES, DEFAULT_PORT,
};
use pipeline_monitor_exporter::ConnectionConfig;
use std::collections::BTreeSet;
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

const REDACTED: &str = "********";

fn list(values: &BTreeSet<String>) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Renders the configuration as aligned plain text.
pub fn render_config(cfg: &Config) -> String {
    let mut out = String::new();

    writeln!(out, "PIPELINE MONITOR EXPORTER - CONFIGURATION").ok();
    writeln!(out, "=========================================").ok();
    writeln!(out).ok();

    writeln!(out, "SERVER CONFIGURATION").ok();
    writeln!(out, "--------------------").ok();
    writeln!(
        out,
        "bind:                       {}",
        cfg.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    )
    .ok();
    writeln!(
        out,
        "port:                       {}",
        cfg.port.unwrap_or(DEFAULT_PORT)
    )
    .ok();
    writeln!(out, "metrics_path:               {}", cfg.metrics_path()).ok();
    writeln!(
        out,
        "enable_health:              {}",
        cfg.enable_health.unwrap_or(true)
    )
    .ok();
    writeln!(
        out,
        "enable_tls:                 {}",
        cfg.enable_tls.unwrap_or(false)
    )
    .ok();
    writeln!(out).ok();

    writeln!(out, "POLLING").ok();
    writeln!(out, "-------").ok();
    writeln!(
        out,
        "frequency:                  {} minutes",
        cfg.frequency.unwrap_or(DEFAULT_FREQUENCY_MINUTES)
    )
    .ok();
    writeln!(
        out,
        "tool:                       {}",
        cfg.tool.as_deref().unwrap_or(DEFAULT_TOOL)
    )
    .ok();
    writeln!(
        out,
        "root:                       {}",
        cfg.root.as_deref().unwrap_or("(not set)")
    )
    .ok();
    writeln!(
        out,
        "user:                       {}",
        cfg.user.as_deref().unwrap_or("(not set)")
    )
    .ok();
    writeln!(
        out,
        "mode:                       {}",
        cfg.mode.unwrap_or_default()
    )
    .ok();
    writeln!(
        out,
        "newest_only:                {}",
        cfg.newest_only.unwrap_or(false)
    )
    .ok();
    writeln!(
        out,
        "always_refresh:             {}",
        cfg.always_refresh.unwrap_or(false)
    )
    .ok();
    writeln!(
        out,
        "batch_command:              {}",
        cfg.batch_command.as_deref().unwrap_or("(not set)")
    )
    .ok();
    writeln!(out, "ignore_types:               {}", list(&cfg.ignore_types)).ok();
    writeln!(
        out,
        "ignore_revisions:           {}",
        list(&cfg.ignore_revisions)
    )
    .ok();
    writeln!(
        out,
        "ignore_metrics:             {}",
        list(&cfg.ignore_metrics)
    )
    .ok();
    writeln!(out).ok();

    writeln!(out, "CONNECTION").ok();
    writeln!(out, "----------").ok();
    match &cfg.connection {
        Some(ConnectionConfig::Ssh(ssh)) => {
            writeln!(out, "kind:                       ssh").ok();
            writeln!(out, "hostname:                   {}", ssh.hostname).ok();
            writeln!(out, "username:                   {}", ssh.username).ok();
            writeln!(out, "port:                       {}", ssh.port).ok();
            writeln!(
                out,
                "password:                   {}",
                if ssh.password.is_some() {
                    REDACTED
                } else {
                    "(not set)"
                }
            )
            .ok();
            writeln!(
                out,
                "key_filename:               {}",
                ssh.key_filename.as_deref().unwrap_or("(not set)")
            )
            .ok();
            writeln!(out, "private:                    {}", ssh.private).ok();
        }
        Some(ConnectionConfig::Local(local)) => {
            writeln!(out, "kind:                       local").ok();
            writeln!(
                out,
                "exec:                       {}",
                local.exec.as_deref().unwrap_or("sh -c")
            )
            .ok();
            if !local.exec_args.is_empty() {
                writeln!(
                    out,
                    "exec_args:                  {}",
                    local.exec_args.join(" ")
                )
                .ok();
            }
        }
        None => {
            writeln!(out, "(not configured)").ok();
        }
    }
    let prefix = cfg.shell.prefix();
    if !prefix.is_empty() {
        writeln!(out, "shell prefix:               {}", prefix.trim_end()).ok();
    }
    writeln!(out).ok();

    writeln!(out, "{FOOTER_TEXT}").ok();
    out
}

/// Handler for the /config endpoint.
#[instrument(skip(state))]
pub async fn config_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /config request");
    state.stats.record_http_request();

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        render_config(&state.config),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_monitor_exporter::executor::SshConfig;

    #[test]
    fn test_password_is_redacted() {
        let cfg = Config {
            connection: Some(ConnectionConfig::Ssh(SshConfig {
                hostname: "login.example.org".into(),
                username: "ops".into(),
                port: 22,
                password: Some("hunter2".into()),
                key_filename: None,
                private: false,
                encoding: Default::default(),
            })),
            ..Config::default()
        };
        let text = render_config(&cfg);
        assert!(!text.contains("hunter2"));
        assert!(text.contains(REDACTED));
        assert!(text.contains("login.example.org"));
    }

    #[test]
    fn test_defaults_rendered() {
        let text = render_config(&Config::default());
        assert!(text.contains("frequency:                  15 minutes"));
        assert!(text.contains("(not configured)"));
    }
}
