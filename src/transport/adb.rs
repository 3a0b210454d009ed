//! adb transport
//!
//! Uses `tokio::process::Command` to drive the adb binary. Each call spawns
//! one adb process, bounded by `tokio::time::timeout`; a process still
//! running at the deadline is killed on drop.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{classify, parse_device_list, AttachedDevice, Execution, Outcome, RemoteCommand, Transport};

/// adb command-line client
pub struct AdbTransport {
    binary: String,
}

impl AdbTransport {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run adb with `args` and classify the result
    async fn run(&self, args: &[&str], timeout: Duration) -> Execution {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(timeout, command.output()).await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let combined = if stderr.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    format!("{}\n{}", stdout.trim(), stderr.trim())
                        .trim()
                        .to_string()
                };
                let outcome = classify(output.status.success(), &combined);
                if outcome != Outcome::Success {
                    tracing::debug!(
                        "[Transport] adb {} -> {:?}: {}",
                        args.join(" "),
                        outcome,
                        combined
                    );
                }
                Execution::new(combined, outcome)
            }
            Ok(Err(e)) => Execution::new(
                format!("failed to launch {}: {}", self.binary, e),
                Outcome::TransportError,
            ),
            Err(_) => Execution::new(
                format!("adb {} timed out after {:?}", args.join(" "), timeout),
                Outcome::Timeout,
            ),
        }
    }
}

#[async_trait]
impl Transport for AdbTransport {
    async fn available(&self, timeout: Duration) -> bool {
        self.run(&["version"], timeout).await.is_success()
    }

    async fn attached_devices(&self, timeout: Duration) -> Vec<AttachedDevice> {
        let execution = self.run(&["devices"], timeout).await;
        if !execution.is_success() {
            return Vec::new();
        }
        parse_device_list(&execution.output)
    }

    async fn connect(&self, address: &str, timeout: Duration) -> Execution {
        let execution = self.run(&["connect", address], timeout).await;
        // adb connect exits 0 even when it could not connect
        let lower = execution.output.to_lowercase();
        if execution.is_success() && !lower.contains("connected to") {
            return Execution::new(execution.output, Outcome::TransportError);
        }
        execution
    }

    async fn execute(
        &self,
        serial: &str,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Execution {
        match command {
            RemoteCommand::Shell(line) => {
                self.run(&["-s", serial, "shell", line.as_str()], timeout)
                    .await
            }
            RemoteCommand::Pull { remote, local } => {
                let local = local.to_string_lossy();
                self.run(&["-s", serial, "pull", remote.as_str(), local.as_ref()], timeout)
                    .await
            }
        }
    }
}
