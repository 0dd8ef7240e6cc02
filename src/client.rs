//! Invocation of the Ubuntu Advantage client tool.
//!
//! Each mutating operation runs the tool once, non-interactively, and only its
//! exit status is inspected. The `status` command is also exposed as a
//! [`StatusBackend`] for configurations that poll the tool instead of watching
//! its status file.

use async_trait::async_trait;
use std::ffi::OsStr;
use std::io::Write;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::status::{Status, StatusBackend, StatusError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to run UA client: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("UA client exited with code {0}")]
    Exit(i32),

    #[error("UA client exited with signal {0}")]
    Signal(String),

    #[error("Failed to write attach credentials: {0}")]
    Credentials(#[source] std::io::Error),
}

/// Operations that change the machine's subscription state.
#[async_trait]
pub trait ClientInvoker: Send + Sync {
    /// Attach to a subscription with `token`.
    async fn attach(&self, token: &str) -> Result<(), ClientError>;

    /// Detach from the current subscription.
    async fn detach(&self) -> Result<(), ClientError>;

    /// Enable the named service.
    async fn enable(&self, service: &str) -> Result<(), ClientError>;

    /// Disable the named service.
    async fn disable(&self, service: &str) -> Result<(), ClientError>;
}

/// The real client tool, run as a child process.
#[derive(Debug, Clone)]
pub struct UaClient {
    program: PathBuf,
}

impl UaClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(args).stdin(Stdio::null());
        command
    }

    /// Run the tool and wait for it, discarding stdout.
    async fn run<I, S>(&self, args: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self
            .command(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(ClientError::Spawn)?;

        if let Err(e) = check_exit(output.status) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(stderr = %stderr.trim(), "UA client failed");
            return Err(e);
        }
        Ok(())
    }

    /// Run `status --format json` and parse its output.
    pub async fn status(&self) -> Result<Status, StatusError> {
        let output = self
            .command(["status", "--format", "json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(ClientError::Spawn)?;
        check_exit(output.status)?;
        Status::parse(&output.stdout)
    }
}

#[async_trait]
impl ClientInvoker for UaClient {
    async fn attach(&self, token: &str) -> Result<(), ClientError> {
        // The token goes through a private file so it never shows up in the
        // process list. The file is created 0600 and removed on drop.
        let mut config = tempfile::Builder::new()
            .prefix("ua-attach-")
            .suffix(".yaml")
            .tempfile()
            .map_err(ClientError::Credentials)?;
        config
            .write_all(attach_config(token).as_bytes())
            .and_then(|_| config.flush())
            .map_err(ClientError::Credentials)?;

        info!("Running UA attach");
        let result = self
            .run([
                OsStr::new("attach"),
                OsStr::new("--attach-config"),
                config.path().as_os_str(),
            ])
            .await;

        if let Err(e) = config.close() {
            warn!(error = %e, "Failed to remove attach credentials file");
        }
        result
    }

    async fn detach(&self) -> Result<(), ClientError> {
        info!("Running UA detach");
        self.run(["detach", "--assume-yes"]).await
    }

    async fn enable(&self, service: &str) -> Result<(), ClientError> {
        info!(service, "Running UA enable");
        self.run(["enable", "--assume-yes", service]).await
    }

    async fn disable(&self, service: &str) -> Result<(), ClientError> {
        info!(service, "Running UA disable");
        self.run(["disable", "--assume-yes", service]).await
    }
}

#[async_trait]
impl StatusBackend for UaClient {
    fn describe(&self) -> String {
        format!("{} status", self.program.display())
    }

    async fn load(&self) -> Result<Status, StatusError> {
        self.status().await
    }
}

/// Attach config document holding only the token.
///
/// A JSON string literal is also a valid YAML scalar, which takes care of
/// quoting and escaping.
fn attach_config(token: &str) -> String {
    let quoted = serde_json::Value::from(token).to_string();
    format!("token: {quoted}\n")
}

fn check_exit(status: ExitStatus) -> Result<(), ClientError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ClientError::Exit(code));
    }
    Err(ClientError::Signal(signal_name(status)))
}

#[cfg(unix)]
fn signal_name(status: ExitStatus) -> String {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(sig) => Signal::try_from(sig)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| sig.to_string()),
        None => "unknown".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_name(_status: ExitStatus) -> String {
    "unknown".to_string()
}
