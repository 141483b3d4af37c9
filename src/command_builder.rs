//! Command-line formatting for the remote pipeline tool.
//!
//! Pure string building, no I/O:
//!
//! | Purpose        | Command                                                   |
//! |----------------|-----------------------------------------------------------|
//! | list types     | `<tool> [--root <root>] type list`                        |
//! | list revisions | `<tool> [--root <root>] rev list <type>`                  |
//! | fetch          | `<tool> [--root <root>] item <mode> <type>:<rev> -u <user>` |
//!
//! Type and revision names come from remote listings and are interpolated
//! unquoted, so callers must filter them with [`is_safe_name`] first.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::selector::MonitorTarget;

/// Default name of the remote pipeline tool.
pub const DEFAULT_TOOL: &str = "chp";

/// Which report to fetch for a type:revision pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Metrics,
    #[default]
    Status,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Metrics => write!(f, "metrics"),
            FetchMode::Status => write!(f, "status"),
        }
    }
}

/// Builds invocations of the pipeline tool against a root and user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    tool: String,
    root: Option<String>,
    user: Option<String>,
}

impl CommandBuilder {
    /// Empty `root`/`user` values are treated as absent.
    pub fn new(tool: impl Into<String>, root: Option<String>, user: Option<String>) -> Self {
        Self {
            tool: tool.into(),
            root: root.filter(|r| !r.trim().is_empty()),
            user: user.filter(|u| !u.trim().is_empty()),
        }
    }

    /// `<tool>` plus `--root <root>` when a root is configured.
    fn base(&self) -> String {
        match &self.root {
            Some(root) => format!("{} --root {}", self.tool, root),
            None => self.tool.clone(),
        }
    }

    pub fn list_types(&self) -> String {
        format!("{} type list", self.base())
    }

    pub fn list_revisions(&self, type_name: &str) -> String {
        format!("{} rev list {}", self.base(), type_name)
    }

    pub fn fetch(&self, target: &MonitorTarget, mode: FetchMode) -> String {
        let mut cmd = format!(
            "{} item {} {}:{}",
            self.base(),
            mode,
            target.type_name,
            target.revision
        );
        if let Some(user) = &self.user {
            cmd.push_str(&format!(" -u {user}"));
        }
        cmd
    }
}

/// True when a type or revision name can be placed in a shell command as-is:
/// non-empty, ASCII alphanumerics plus `_ - . + @ /`, and not starting with
/// `-`.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | '@' | '/'))
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> CommandBuilder {
        CommandBuilder::new(
            "chp",
            Some("/project/processed/".into()),
            Some("pipeline".into()),
        )
    }

    #[test]
    fn test_list_commands_with_root() {
        let b = builder();
        assert_eq!(b.list_types(), "chp --root /project/processed/ type list");
        assert_eq!(
            b.list_revisions("daily"),
            "chp --root /project/processed/ rev list daily"
        );
    }

    #[test]
    fn test_fetch_commands() {
        let b = builder();
        let target = MonitorTarget::new("daily", "rev_07");
        assert_eq!(
            b.fetch(&target, FetchMode::Metrics),
            "chp --root /project/processed/ item metrics daily:rev_07 -u pipeline"
        );
        assert_eq!(
            b.fetch(&target, FetchMode::Status),
            "chp --root /project/processed/ item status daily:rev_07 -u pipeline"
        );
    }

    #[test]
    fn test_root_flag_omitted_when_absent_or_empty() {
        let target = MonitorTarget::new("daily", "rev_07");
        for root in [None, Some(String::new()), Some("  ".to_string())] {
            let b = CommandBuilder::new("chp", root, Some("pipeline".into()));
            assert_eq!(b.list_types(), "chp type list");
            assert_eq!(b.list_revisions("daily"), "chp rev list daily");
            assert_eq!(
                b.fetch(&target, FetchMode::Status),
                "chp item status daily:rev_07 -u pipeline"
            );
        }
    }

    #[test]
    fn test_safe_names() {
        for name in ["daily", "rev_07", "v1.2-rc+3", "group/weekly", "ops@site"] {
            assert!(is_safe_name(name), "{name} should be accepted");
        }
        for name in [
            "",
            "daily; rm -rf /",
            "daily rev",
            "$(reboot)",
            "`id`",
            "a|b",
            "a&&b",
            "rev>out",
            "--root",
            "daily:rev_01",
            "rev'1",
        ] {
            assert!(!is_safe_name(name), "{name} should be rejected");
        }
    }

    #[test]
    fn test_user_flag_omitted_when_absent() {
        let b = CommandBuilder::default();
        let target = MonitorTarget::new("daily", "rev_07");
        assert_eq!(b.fetch(&target, FetchMode::Metrics), "chp item metrics daily:rev_07");
    }
}
