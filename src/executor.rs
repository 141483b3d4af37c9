//! Remote command execution.
//!
//! Commands are executed either on a remote host through the system `ssh`
//! client (or `sshpass -e ssh` for password authentication), or locally as a
//! subprocess. Both implement [`RemoteExecutor`]; callers only depend on the
//! trait. A [`Connector`] opens one executor session per fetch cycle.
//!
//! Executors never fail on a non-zero exit status of the command itself.
//! Stdout and stderr are returned as decoded text and the caller classifies
//! failures with [`classify_stderr`]. The one exception is `ssh` exiting with
//! 255, which means the connection failed and is reported as
//! [`ExecutorError::Connection`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};
use tracing::{debug, trace};

/// Stderr markers that mean the session itself is unusable.
static PERMISSION_DENIED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bpermission denied\b").expect("valid pattern"));
static CONNECTION_CLOSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bconnection closed by remote host\b").expect("valid pattern"));

/// Errors raised while opening or using an execution channel.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The executable could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// Authentication failure, unreachable host or handshake failure.
    #[error("connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },
}

/// Text decoding applied to command output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    /// Decodes raw bytes. Invalid UTF-8 sequences are replaced, never fatal.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Exit status `ssh` reports for its own connection errors.
const SSH_CONNECTION_FAILED: i32 = 255;

/// Decoded output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code. `None` when killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(0),
        }
    }
}

/// A session-level failure detected in stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    PermissionDenied,
    ConnectionClosed,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionFailure::PermissionDenied => write!(f, "permission denied"),
            ConnectionFailure::ConnectionClosed => write!(f, "connection closed by remote host"),
        }
    }
}

/// Looks for connection-level failure markers in stderr (case-insensitive).
pub fn classify_stderr(stderr: &str) -> Option<ConnectionFailure> {
    let lowered = stderr.to_lowercase();
    if PERMISSION_DENIED.is_match(&lowered) {
        Some(ConnectionFailure::PermissionDenied)
    } else if CONNECTION_CLOSED.is_match(&lowered) {
        Some(ConnectionFailure::ConnectionClosed)
    } else {
        None
    }
}

/// Runs `command` and turns a connection marker in stderr into
/// [`ExecutorError::Connection`]. Other stderr content is left to the caller.
pub fn run_classified(
    executor: &dyn RemoteExecutor,
    command: &str,
) -> Result<CommandOutput, ExecutorError> {
    let output = executor.run(command)?;
    match classify_stderr(&output.stderr) {
        Some(failure) => Err(ExecutorError::Connection {
            target: executor.target(),
            reason: failure.to_string(),
        }),
        None => Ok(output),
    }
}

/// Shell environment setup prepended to every transmitted command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellSetup {
    /// Directory passed to `module use`
    pub modpath: Option<String>,
    /// Modules passed to `module load`, in order
    #[serde(default)]
    pub modules: Vec<String>,
    /// Virtual environment activation script passed to `source`
    pub venv: Option<String>,
}

impl ShellSetup {
    /// Builds the `module use ...; module load ...; source ...; ` prefix.
    /// Empty when nothing is configured.
    pub fn prefix(&self) -> String {
        let mut prefix = String::new();
        if let Some(modpath) = self.modpath.as_deref().filter(|p| !p.is_empty()) {
            prefix.push_str(&format!("module use {modpath}; "));
        }
        for module in self.modules.iter().filter(|m| !m.is_empty()) {
            prefix.push_str(&format!("module load {module}; "));
        }
        if let Some(venv) = self.venv.as_deref().filter(|v| !v.is_empty()) {
            prefix.push_str(&format!("source {venv}; "));
        }
        prefix
    }
}

/// Runs a command string and returns its decoded output.
pub trait RemoteExecutor: Send {
    /// Executes `command` synchronously. A non-zero exit status is not an
    /// error; only failing to run the command at all is.
    fn run(&self, command: &str) -> Result<CommandOutput, ExecutorError>;

    /// Human-readable execution target for log messages.
    fn target(&self) -> String;
}

/// Opens executor sessions.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteExecutor>, ExecutorError>;
}

/// SSH connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    pub hostname: String,
    pub username: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Password for `sshpass`; key authentication is used when absent
    pub password: Option<String>,
    /// Private key file passed with `-i`
    pub key_filename: Option<String>,
    /// Use the system keys and known hosts, accepting new host keys
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub encoding: TextEncoding,
}

fn default_ssh_port() -> u16 {
    22
}

/// Local subprocess parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Interpreter executable; `sh -c` when absent
    pub exec: Option<String>,
    /// Static arguments placed before the command string
    #[serde(default)]
    pub exec_args: Vec<String>,
    #[serde(default)]
    pub encoding: TextEncoding,
}

/// Execution channel selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionConfig {
    Ssh(SshConfig),
    Local(LocalConfig),
}

/// Connector built from configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredConnector {
    connection: ConnectionConfig,
    shell: ShellSetup,
}

impl ConfiguredConnector {
    pub fn new(connection: ConnectionConfig, shell: ShellSetup) -> Self {
        Self { connection, shell }
    }
}

impl Connector for ConfiguredConnector {
    fn connect(&self) -> Result<Box<dyn RemoteExecutor>, ExecutorError> {
        match &self.connection {
            ConnectionConfig::Ssh(ssh) => {
                let executor = SshExecutor::connect(ssh.clone(), &self.shell)?;
                Ok(Box::new(executor))
            }
            ConnectionConfig::Local(local) => {
                Ok(Box::new(LocalExecutor::new(local.clone(), &self.shell)))
            }
        }
    }
}

/// Spawns a prepared command and captures both streams.
fn capture(
    mut cmd: Command,
    program: &str,
    encoding: TextEncoding,
) -> Result<CommandOutput, ExecutorError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = cmd.output().map_err(|source| ExecutorError::Spawn {
        program: program.to_string(),
        source,
    })?;

    trace!("{} exited with {}", program, output.status);

    Ok(CommandOutput {
        stdout: encoding.decode(&output.stdout),
        stderr: encoding.decode(&output.stderr),
        exit_code: output.status.code(),
    })
}

/// Executes commands on a remote host through the `ssh` client.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: SshConfig,
    prefix: String,
    use_sshpass: bool,
}

impl SshExecutor {
    /// Creates the executor and verifies the host accepts a trivial command.
    pub fn connect(config: SshConfig, shell: &ShellSetup) -> Result<Self, ExecutorError> {
        let executor = Self::new(config, shell);
        let target = executor.target();

        debug!("Opening SSH session to {}", target);

        let output = capture(
            executor.build("true"),
            executor.program(),
            executor.config.encoding,
        )?;

        if let Some(failure) = classify_stderr(&output.stderr) {
            return Err(ExecutorError::Connection {
                target,
                reason: failure.to_string(),
            });
        }
        check_ssh_exit(&target, output)?;

        debug!("SSH session to {} established", target);
        Ok(executor)
    }

    /// Creates the executor without probing the host.
    pub fn new(config: SshConfig, shell: &ShellSetup) -> Self {
        let use_sshpass = config.password.as_deref().is_some_and(|p| !p.is_empty());
        Self {
            config,
            prefix: shell.prefix(),
            use_sshpass,
        }
    }

    fn program(&self) -> &'static str {
        if self.use_sshpass {
            "sshpass"
        } else {
            "ssh"
        }
    }

    /// Full argument vector (excluding the program) for a remote command.
    pub fn args_for(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if self.use_sshpass {
            args.extend(["-e".to_string(), "ssh".to_string()]);
        } else {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }

        if self.config.private {
            args.extend(["-o".to_string(), "StrictHostKeyChecking=accept-new".to_string()]);
        } else if self.config.key_filename.is_some() {
            args.extend(["-o".to_string(), "IdentitiesOnly=yes".to_string()]);
        }

        if self.config.port != 22 {
            args.extend(["-p".to_string(), self.config.port.to_string()]);
        }

        if let Some(ref key) = self.config.key_filename {
            args.extend(["-i".to_string(), key.clone()]);
        }

        args.push(format!("{}@{}", self.config.username, self.config.hostname));
        args.push(format!("{}{}", self.prefix, command));
        args
    }

    fn build(&self, command: &str) -> Command {
        let mut cmd = Command::new(self.program());
        if self.use_sshpass {
            if let Some(ref pw) = self.config.password {
                cmd.env("SSHPASS", pw);
            }
        }
        cmd.args(self.args_for(command));
        cmd
    }
}

/// ssh exits with 255 when the connection itself failed, whatever the
/// remote command would have returned.
fn check_ssh_exit(target: &str, output: CommandOutput) -> Result<CommandOutput, ExecutorError> {
    if output.exit_code != Some(SSH_CONNECTION_FAILED) {
        return Ok(output);
    }
    let reason = output
        .stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("ssh exited with status 255")
        .to_string();
    Err(ExecutorError::Connection {
        target: target.to_string(),
        reason,
    })
}

impl RemoteExecutor for SshExecutor {
    fn run(&self, command: &str) -> Result<CommandOutput, ExecutorError> {
        debug!("Executing on {}: {}", self.target(), command);
        let output = capture(self.build(command), self.program(), self.config.encoding)?;
        check_ssh_exit(&self.target(), output)
    }

    fn target(&self) -> String {
        format!("{}@{}", self.config.username, self.config.hostname)
    }
}

/// Executes commands as a local subprocess.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    config: LocalConfig,
    prefix: String,
}

impl LocalExecutor {
    pub fn new(config: LocalConfig, shell: &ShellSetup) -> Self {
        Self {
            config,
            prefix: shell.prefix(),
        }
    }

    /// Program and argument vector for a command.
    pub fn invocation(&self, command: &str) -> (String, Vec<String>) {
        let full = format!("{}{}", self.prefix, command);
        match self.config.exec.as_deref().filter(|e| !e.is_empty()) {
            Some(exec) => {
                let mut args = self.config.exec_args.clone();
                args.push(full);
                (exec.to_string(), args)
            }
            None => ("sh".to_string(), vec!["-c".to_string(), full]),
        }
    }
}

impl RemoteExecutor for LocalExecutor {
    fn run(&self, command: &str) -> Result<CommandOutput, ExecutorError> {
        let (program, args) = self.invocation(command);
        debug!("Executing locally via {}: {}", program, command);
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        capture(cmd, &program, self.config.encoding)
    }

    fn target(&self) -> String {
        match self.config.exec.as_deref() {
            Some(exec) if !exec.is_empty() => format!("local:{exec}"),
            _ => "local:sh".to_string(),
        }
    }
}
