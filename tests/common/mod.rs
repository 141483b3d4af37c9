//! Scripted execution channel shared by the integration tests.
//!
//! Commands are answered from a table; anything unscripted returns empty
//! output, like a remote tool that prints nothing.

#![allow(dead_code)]

use pipeline_monitor_exporter::{CommandOutput, Connector, ExecutorError, RemoteExecutor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

pub const TARGET: &str = "scripted@cluster";

#[derive(Clone, Default)]
pub struct Script {
    responses: Arc<Mutex<HashMap<String, CommandOutput>>>,
    calls: Arc<Mutex<Vec<String>>>,
    connect_error: Arc<Mutex<Option<String>>>,
    connects: Arc<AtomicUsize>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `command` with `stdout` and empty stderr.
    pub fn respond(&self, command: &str, stdout: &str) -> &Self {
        self.respond_with(command, CommandOutput::new(stdout, ""))
    }

    pub fn respond_stderr(&self, command: &str, stdout: &str, stderr: &str) -> &Self {
        self.respond_with(command, CommandOutput::new(stdout, stderr))
    }

    pub fn respond_with(&self, command: &str, output: CommandOutput) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output);
        self
    }

    /// Makes every following connect attempt fail.
    pub fn fail_connect(&self, reason: &str) {
        *self.connect_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn executor(&self) -> ScriptedExecutor {
        ScriptedExecutor {
            script: self.clone(),
        }
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(ScriptedConnector {
            script: self.clone(),
        })
    }
}

pub struct ScriptedExecutor {
    script: Script,
}

impl RemoteExecutor for ScriptedExecutor {
    fn run(&self, command: &str) -> Result<CommandOutput, ExecutorError> {
        self.script.calls.lock().unwrap().push(command.to_string());
        Ok(self
            .script
            .responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default())
    }

    fn target(&self) -> String {
        TARGET.to_string()
    }
}

struct ScriptedConnector {
    script: Script,
}

impl Connector for ScriptedConnector {
    fn connect(&self) -> Result<Box<dyn RemoteExecutor>, ExecutorError> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.script.connect_error.lock().unwrap().clone() {
            return Err(ExecutorError::Connection {
                target: TARGET.to_string(),
                reason,
            });
        }
        Ok(Box::new(self.script.executor()))
    }
}

/// Connector that parks inside `connect` until released, signalling when
/// it has been entered.
pub struct GatedConnector {
    pub script: Script,
    pub entered: Mutex<Sender<()>>,
    pub release: Mutex<Receiver<()>>,
}

impl Connector for GatedConnector {
    fn connect(&self) -> Result<Box<dyn RemoteExecutor>, ExecutorError> {
        self.entered.lock().unwrap().send(()).ok();
        self.release.lock().unwrap().recv().ok();
        Ok(Box::new(self.script.executor()))
    }
}

/// Two types with two revisions each, one status report per pair.
pub fn pipeline_script() -> Script {
    let script = Script::new();
    script
        .respond("chp type list", "daily\nweekly\n")
        .respond("chp rev list daily", "rev_01\nrev_02\n")
        .respond("chp rev list weekly", "rev_10\nrev_2\n")
        .respond(
            "chp item status daily:rev_01",
            "completed: 10\nrunning: 2\npending: 1\nfairshare: 0.5\n",
        )
        .respond("chp item status daily:rev_02", "completed: 3\n")
        .respond("chp item status weekly:rev_10", "failed: 4\n")
        .respond("chp item status weekly:rev_2", "running: 7\n");
    script
}
