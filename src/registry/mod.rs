//! Device registry
//!
//! Known device addresses with optional display names and the last observed
//! connectivity. Pure data plus CRUD; the only I/O is `probe` and
//! `discover_attached`, which go through a `Transport`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::transport::{device_serial, is_network_serial, RemoteCommand, Transport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredDevice")]
pub struct DeviceEntry {
    pub address: String,
    pub name: Option<String>,
    pub last_connected: Option<bool>,
}

/// On-disk shapes accepted for a device entry, including the bare address
/// strings written by older configs.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDevice {
    Bare(String),
    Full {
        #[serde(alias = "ip")]
        address: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        last_connected: Option<bool>,
    },
}

impl From<StoredDevice> for DeviceEntry {
    fn from(stored: StoredDevice) -> Self {
        match stored {
            StoredDevice::Bare(address) => DeviceEntry {
                address,
                name: None,
                last_connected: None,
            },
            StoredDevice::Full {
                address,
                name,
                last_connected,
            } => DeviceEntry {
                address,
                name,
                last_connected,
            },
        }
    }
}

impl From<Vec<DeviceEntry>> for DeviceRegistry {
    fn from(devices: Vec<DeviceEntry>) -> Self {
        Self::new(devices)
    }
}

impl From<DeviceRegistry> for Vec<DeviceEntry> {
    fn from(registry: DeviceRegistry) -> Self {
        registry.devices
    }
}

impl DeviceEntry {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Ordered device list; the address is the unique key (exact match).
/// Loading keeps the first entry for a repeated address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DeviceEntry>", into = "Vec<DeviceEntry>")]
pub struct DeviceRegistry {
    devices: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<DeviceEntry>) -> Self {
        let mut registry = Self::default();
        for device in devices {
            if registry.get(&device.address).is_none() {
                registry.devices.push(device);
            }
        }
        registry
    }

    pub fn list(&self) -> &[DeviceEntry] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.address == address)
    }

    fn get_mut(&mut self, address: &str) -> Result<&mut DeviceEntry, AppError> {
        self.devices
            .iter_mut()
            .find(|d| d.address == address)
            .ok_or_else(|| AppError::NotFound(format!("Device {} is not registered", address)))
    }

    /// Add a device. Without a name the entry is called `Device N`.
    pub fn add(&mut self, address: &str, name: Option<&str>) -> Result<&DeviceEntry, AppError> {
        let address = validate_address(address)?;
        if self.get(address).is_some() {
            return Err(AppError::Duplicate(format!(
                "Device {} is already registered",
                address
            )));
        }

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => format!("Device {}", self.devices.len() + 1),
        };

        self.devices.push(DeviceEntry {
            address: address.to_string(),
            name: Some(name),
            last_connected: None,
        });
        tracing::info!("[Registry] Added device {}", address);

        Ok(&self.devices[self.devices.len() - 1])
    }

    pub fn remove(&mut self, address: &str) -> Result<DeviceEntry, AppError> {
        let idx = self
            .devices
            .iter()
            .position(|d| d.address == address)
            .ok_or_else(|| AppError::NotFound(format!("Device {} is not registered", address)))?;

        tracing::info!("[Registry] Removed device {}", address);
        Ok(self.devices.remove(idx))
    }

    pub fn rename(&mut self, address: &str, name: &str) -> Result<&DeviceEntry, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Device name must not be empty".to_string()));
        }

        let entry = self.get_mut(address)?;
        entry.name = Some(name.to_string());
        tracing::info!("[Registry] Renamed device {} to {}", address, name);
        Ok(&*entry)
    }

    /// Record the result of a probe. Unknown addresses are ignored.
    pub fn set_connected(&mut self, address: &str, connected: bool) -> bool {
        match self.get_mut(address) {
            Ok(entry) => {
                entry.last_connected = Some(connected);
                true
            }
            Err(_) => false,
        }
    }

    /// Addresses in probe order: `preferred` first when registered, then
    /// registry order.
    pub fn probe_order(&self, preferred: Option<&str>) -> Vec<String> {
        let mut order: Vec<String> = Vec::with_capacity(self.devices.len());
        if let Some(p) = preferred.filter(|p| self.get(p).is_some()) {
            order.push(p.to_string());
        }
        for device in &self.devices {
            if Some(device.address.as_str()) != preferred {
                order.push(device.address.clone());
            }
        }
        order
    }
}

pub fn validate_address(address: &str) -> Result<&str, AppError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AppError::Validation("Device address is required".to_string()));
    }
    if address.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(format!(
            "Device address must not contain whitespace: {}",
            address
        )));
    }
    Ok(address)
}

/// Result of a reachability check
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub address: String,
    pub connected: bool,
    pub output: String,
}

/// Lightweight reachability check: attach, then run a trivial command.
/// Never fails; anything short of a clean answer is `connected: false`.
pub async fn probe(transport: &dyn Transport, address: &str, timeout: Duration) -> ProbeReport {
    let mut transcript = String::new();

    let attach = transport.connect(address, timeout).await;
    transcript.push_str(&format!("$ connect {}\n{}\n", address, attach.output));

    let connected = if attach.is_success() {
        let serial = device_serial(address);
        let echo = transport
            .execute(&serial, &RemoteCommand::Shell("echo ok".to_string()), timeout)
            .await;
        transcript.push_str(&format!("$ -s {} shell echo ok\n{}\n", serial, echo.output));
        echo.is_success() && echo.output.contains("ok")
    } else {
        false
    };

    tracing::debug!(
        "[Registry] Probe {} -> {}",
        address,
        if connected { "connected" } else { "unreachable" }
    );

    ProbeReport {
        address: address.to_string(),
        connected,
        output: transcript,
    }
}

/// First online device plugged in directly. Network devices adb still
/// holds from earlier connects are skipped; they are reached through the
/// registry's probe order instead.
pub async fn discover_attached(transport: &dyn Transport, timeout: Duration) -> Option<String> {
    transport
        .attached_devices(timeout)
        .await
        .into_iter()
        .find(|d| d.is_online() && !is_network_serial(&d.serial))
        .map(|d| d.serial)
}
