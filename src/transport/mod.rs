//! Command-channel transport to remote devices
//!
//! - `adb`: `tokio::process` implementation driving the adb binary
//!
//! A transport executes one remote operation against one device serial,
//! bounded by a timeout, and classifies the outcome. It never retries;
//! retry policy belongs to the extraction engine.

pub mod adb;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use self::adb::AdbTransport;

/// Marker the remote shell prints when a command lacks privileges.
///
/// Detection is a heuristic on command output, not a protocol-level signal:
/// the remote shell gives no other reliable indication, so a firmware that
/// words the denial differently is reported as a plain transport error.
pub const PERMISSION_DENIED_MARKER: &str = "Permission denied";

/// Port used when an address is given without one
pub const DEFAULT_DEVICE_PORT: u16 = 5555;

/// Outcome of one remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PermissionDenied,
    Timeout,
    TransportError,
}

/// A single remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Shell command line run on the device
    Shell(String),
    /// Copy a device file to local storage
    Pull { remote: String, local: PathBuf },
}

impl std::fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteCommand::Shell(cmd) => write!(f, "shell {}", cmd),
            RemoteCommand::Pull { remote, local } => {
                write!(f, "pull {} {}", remote, local.display())
            }
        }
    }
}

/// Captured output plus classified outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub output: String,
    pub outcome: Outcome,
}

impl Execution {
    pub fn new(output: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            output: output.into(),
            outcome,
        }
    }

    #[cfg(test)]
    pub fn success(output: impl Into<String>) -> Self {
        Self::new(output, Outcome::Success)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Device listed by the transport as currently attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub serial: String,
    pub state: String,
}

impl AttachedDevice {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Confirm the command channel itself is usable
    async fn available(&self, timeout: Duration) -> bool;

    /// Devices the transport currently sees, online or not
    async fn attached_devices(&self, timeout: Duration) -> Vec<AttachedDevice>;

    /// Attach to a network-addressed device
    async fn connect(&self, address: &str, timeout: Duration) -> Execution;

    /// Run one remote operation against `serial`
    async fn execute(&self, serial: &str, command: &RemoteCommand, timeout: Duration)
        -> Execution;
}

/// Classify a finished command from its exit status and combined output.
///
/// The denial marker wins over the exit status because some privilege
/// wrappers exit 0 after refusing.
pub fn classify(exit_ok: bool, output: &str) -> Outcome {
    if output.contains(PERMISSION_DENIED_MARKER) {
        Outcome::PermissionDenied
    } else if exit_ok {
        Outcome::Success
    } else {
        Outcome::TransportError
    }
}

/// Device serial the transport uses for a network address
pub fn device_serial(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:{}", address, DEFAULT_DEVICE_PORT)
    }
}

/// Whether `serial` names a device attached over the network (`host:port`)
/// rather than one plugged in directly
pub fn is_network_serial(serial: &str) -> bool {
    match serial.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Parse the device table printed by `adb devices`.
pub fn parse_device_list(output: &str) -> Vec<AttachedDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(AttachedDevice {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(true, "ok"), Outcome::Success);
        assert_eq!(classify(false, "error: closed"), Outcome::TransportError);
        assert_eq!(
            classify(false, "cp: /data/data/x: Permission denied"),
            Outcome::PermissionDenied
        );
        // su refusing with a zero exit status
        assert_eq!(classify(true, "Permission denied"), Outcome::PermissionDenied);
    }

    #[test]
    fn test_device_serial() {
        assert_eq!(device_serial("192.168.1.20"), "192.168.1.20:5555");
        assert_eq!(device_serial("192.168.1.20:5037"), "192.168.1.20:5037");
    }

    #[test]
    fn test_is_network_serial() {
        assert!(is_network_serial("192.168.1.20:5555"));
        assert!(is_network_serial("tablet.local:5037"));
        assert!(!is_network_serial("R58M123ABC"));
        assert!(!is_network_serial("emulator-5554"));
        assert!(!is_network_serial("weird:serial"));
    }

    #[test]
    fn test_parse_device_list() {
        let out = "* daemon not running; starting now at tcp:5037\n\
                   * daemon started successfully\n\
                   List of devices attached\n\
                   R58M123ABC\tdevice\n\
                   192.168.1.20:5555\toffline\n\
                   \n";
        let devices = parse_device_list(out);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "R58M123ABC");
        assert!(devices[0].is_online());
        assert!(!devices[1].is_online());
    }

    #[test]
    fn test_parse_empty_device_list() {
        assert!(parse_device_list("List of devices attached\n\n").is_empty());
    }
}
