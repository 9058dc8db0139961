//! Device counter retrieval.
//!
//! The transport session itself lives in an external snmpget-style binary;
//! this module owns process invocation, per-call timeout bounding, and
//! output parsing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use confwatch_core::{Device, Transport};

/// Errors from a single counter query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    #[error("unparseable counter value: {0:?}")]
    Malformed(String),
}

/// Retrieves one raw counter value from a device.
#[async_trait]
pub trait DeviceQuerier: Send + Sync {
    async fn query(&self, device: &Device, key: &str) -> Result<u64, QueryError>;
}

/// Querier that shells out to an snmpget-compatible binary.
///
/// Invoked once per counter with `-O qvt` so the output is a bare numeric
/// value. Every call is bounded by its own timeout so one slow device
/// cannot stall a round.
pub struct SnmpGetQuerier {
    binary: String,
    timeout: Duration,
}

impl SnmpGetQuerier {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
        }
    }

    /// Verify the binary is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String, QueryError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| QueryError::Unreachable(format!("{}: {e}", self.binary)))?;

        // net-snmp tools print the version banner on stderr.
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        String::from_utf8(banner).map_err(|e| QueryError::Malformed(e.to_string()))
    }

    fn build_args(&self, device: &Device, key: &str) -> Vec<String> {
        let mut args = vec!["-O".to_string(), "qvt".to_string()];
        match device.transport {
            Transport::V2c => {
                args.push("-v2c".to_string());
                args.push("-c".to_string());
                args.push(device.credentials.security_name.clone());
            }
            Transport::V3 => {
                args.push("-v3".to_string());
                args.push("-u".to_string());
                args.push(device.credentials.security_name.clone());
                args.push("-A".to_string());
                args.push(device.credentials.auth_passphrase.clone());
                if device.credentials.priv_passphrase.is_empty() {
                    args.push("-l".to_string());
                    args.push("authNoPriv".to_string());
                } else {
                    args.push("-X".to_string());
                    args.push(device.credentials.priv_passphrase.clone());
                    args.push("-l".to_string());
                    args.push("authPriv".to_string());
                }
            }
        }
        args.push(format!("{}:{}", device.address, device.port));
        args.push(key.to_string());
        args
    }
}

#[async_trait]
impl DeviceQuerier for SnmpGetQuerier {
    async fn query(&self, device: &Device, key: &str) -> Result<u64, QueryError> {
        let args = self.build_args(device, key);
        let invocation = Command::new(&self.binary).args(&args).output();

        let output = tokio::time::timeout(self.timeout, invocation)
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))?
            .map_err(|e| QueryError::Unreachable(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim(), self.timeout));
        }

        parse_counter(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Map snmpget stderr to the failure taxonomy.
fn classify_failure(stderr: &str, timeout: Duration) -> QueryError {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication")
        || lower.contains("unknown user name")
        || lower.contains("authorization")
        || lower.contains("wrong digest")
    {
        QueryError::AuthFailed(stderr.to_string())
    } else if lower.contains("timeout") || lower.contains("no response") {
        QueryError::Timeout(timeout)
    } else {
        QueryError::Unreachable(stderr.to_string())
    }
}

/// Parse the bare numeric value printed under `-O qvt`.
fn parse_counter(stdout: &str) -> Result<u64, QueryError> {
    let token = stdout.split_whitespace().next().unwrap_or("");
    token
        .parse::<u64>()
        .map_err(|_| QueryError::Malformed(stdout.trim().to_string()))
}
