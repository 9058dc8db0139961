//! Change notification delivery.
//!
//! The monitor composes the alert; delivery transport belongs to whatever
//! command is configured (typically a sendmail-style wrapper). No retry is
//! performed here.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use confwatch_core::DeviceName;

use crate::error::{MonitorError, Result};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("could not spawn notify command: {0}")]
    Spawn(String),

    #[error("notify command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },
}

/// Delivers a human-readable alert for one device.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        device: &DeviceName,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), NotifyError>;
}

/// Pipes the alert body to a sendmail-style command.
///
/// The configured command receives the subject as its final argument and
/// the body on stdin.
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    /// Split a configured command line into program + arguments.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| MonitorError::Config("notify_command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify(
        &self,
        device: &DeviceName,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), NotifyError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(subject)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NotifyError::Spawn(format!("{}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .await
                .map_err(|e| NotifyError::Spawn(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| NotifyError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(NotifyError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::debug!(device = %device, subject = %subject, "Notification delivered");
        Ok(())
    }
}

/// Notifier of last resort: the alert goes to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        device: &DeviceName,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), NotifyError> {
        tracing::warn!(device = %device, subject = %subject, body = %body, "Configuration change alert");
        Ok(())
    }
}
