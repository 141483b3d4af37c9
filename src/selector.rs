//! Monitor set selection.
//!
//! Discovers the available processing types and their revisions on the
//! remote host, then applies the ignore lists and the newest-only reduction
//! to produce the (type, revision) pairs that are polled each cycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, instrument, warn};

use crate::command_builder::{is_safe_name, CommandBuilder};
use crate::executor::{run_classified, ExecutorError, RemoteExecutor};

/// A processing type and one of its revisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonitorTarget {
    /// Field order matters: targets sort by type, then revision.
    pub type_name: String,
    pub revision: String,
}

impl MonitorTarget {
    pub fn new(type_name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.revision)
    }
}

/// Filtering applied to discovered types and revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub ignore_types: BTreeSet<String>,
    pub ignore_revisions: BTreeSet<String>,
    /// Track only the lexicographically greatest revision per type
    pub newest_only: bool,
}

/// Non-empty trimmed lines of a listing.
pub fn listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Applies the revision policy to one type's revisions.
///
/// Ignored revisions are removed first; with `newest_only` the greatest
/// remaining revision is kept. Revisions compare as plain strings, so
/// `rev_2` sorts after `rev_10`.
pub fn select_revisions(revisions: Vec<String>, policy: &SelectionPolicy) -> Vec<String> {
    let remaining = revisions
        .into_iter()
        .filter(|r| !policy.ignore_revisions.contains(r));

    if policy.newest_only {
        remaining.max().into_iter().collect()
    } else {
        remaining.collect()
    }
}

/// Lists types and revisions and returns the deduplicated, sorted set of
/// targets to poll.
///
/// A connection-level failure on any listing aborts discovery. A type that
/// lists no revisions is skipped. Names that are unsafe to interpolate into
/// a shell command are skipped with a warning.
#[instrument(skip(executor, commands))]
pub fn discover(
    executor: &dyn RemoteExecutor,
    commands: &CommandBuilder,
    policy: &SelectionPolicy,
) -> Result<Vec<MonitorTarget>, ExecutorError> {
    let types_cmd = commands.list_types();
    let types = listing(&run_classified(executor, &types_cmd)?.stdout);
    debug!("Remote reports {} types", types.len());

    let mut targets = BTreeSet::new();

    for type_name in types {
        if policy.ignore_types.contains(&type_name) {
            debug!("Ignoring type {}", type_name);
            continue;
        }
        if !is_safe_name(&type_name) {
            warn!("Skipping type with unsafe name {:?}", type_name);
            continue;
        }

        let revs_cmd = commands.list_revisions(&type_name);
        let output = run_classified(executor, &revs_cmd)?;
        let revisions: Vec<String> = listing(&output.stdout)
            .into_iter()
            .filter(|rev| {
                let safe = is_safe_name(rev);
                if !safe {
                    warn!("Skipping revision of {} with unsafe name {:?}", type_name, rev);
                }
                safe
            })
            .collect();

        if revisions.is_empty() {
            warn!(
                "No revisions found for type {} (command: {}, stderr: {})",
                type_name,
                revs_cmd,
                output.stderr.trim()
            );
            continue;
        }

        for revision in select_revisions(revisions, policy) {
            targets.insert(MonitorTarget::new(type_name.clone(), revision));
        }
    }

    let targets: Vec<MonitorTarget> = targets.into_iter().collect();
    info!("Discovered {} type:revision pairs to monitor", targets.len());
    Ok(targets)
}
