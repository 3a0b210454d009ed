//! Persisted configuration file
//!
//! A single pretty-printed JSON document. Missing fields take defaults, so
//! older or hand-edited files load without error. A field of the wrong type
//! is dropped on its own; the rest of the document still loads.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::registry::DeviceRegistry;

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedConfig {
    #[serde(alias = "auto_enabled")]
    pub scheduler_enabled: bool,
    #[serde(deserialize_with = "lenient_minutes")]
    pub interval_minutes: u32,
    pub webhook_enabled: bool,
    pub webhook_port: u16,
    #[serde(alias = "adb_ips")]
    pub devices: DeviceRegistry,
    pub preferred_device: Option<String>,
    pub last_locations: usize,
    #[serde(alias = "last_cars")]
    pub last_vehicles: usize,
    #[serde(alias = "last_loads")]
    pub last_groups: usize,
    pub last_processed: Option<DateTime<Utc>>,
}

impl Default for PersistedConfig {
    fn default() -> Self {
        Self {
            scheduler_enabled: false,
            interval_minutes: 5,
            webhook_enabled: true,
            webhook_port: 5680,
            devices: DeviceRegistry::default(),
            preferred_device: None,
            last_locations: 0,
            last_vehicles: 0,
            last_groups: 0,
            last_processed: None,
        }
    }
}

impl PersistedConfig {
    /// Pull out-of-range values from a hand-edited file back into range
    fn normalize(mut self) -> Self {
        self.interval_minutes = self
            .interval_minutes
            .clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES);
        if let Some(p) = &self.preferred_device {
            if self.devices.get(p).is_none() {
                self.preferred_device = None;
            }
        }
        self
    }
}

/// Interval as written by hand: any finite number, rounded and clamped
fn lenient_minutes<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let minutes = f64::deserialize(deserializer)?;
    if !minutes.is_finite() {
        return Err(D::Error::custom("interval_minutes must be a finite number"));
    }
    Ok(minutes
        .round()
        .clamp(MIN_INTERVAL_MINUTES as f64, MAX_INTERVAL_MINUTES as f64) as u32)
}

/// Keep every top-level field that deserializes, dropping the rest
fn salvage(raw: &[u8]) -> Option<PersistedConfig> {
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(raw) else {
        return None;
    };

    let mut accepted = Map::new();
    for (key, value) in fields {
        accepted.insert(key.clone(), value);
        if serde_json::from_value::<PersistedConfig>(Value::Object(accepted.clone())).is_err() {
            tracing::warn!("Ignoring invalid config field '{}'", key);
            accepted.remove(&key);
        }
    }

    serde_json::from_value(Value::Object(accepted)).ok()
}

/// Accept an interval iff it lies in `[1, 1440]` minutes.
pub fn validate_interval(minutes: i64) -> Result<u32, AppError> {
    if minutes < MIN_INTERVAL_MINUTES as i64 || minutes > MAX_INTERVAL_MINUTES as i64 {
        return Err(AppError::Validation(format!(
            "Interval must be between {} and {} minutes, got {}",
            MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES, minutes
        )));
    }
    Ok(minutes as u32)
}

/// Backing file for `PersistedConfig`
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file, falling back to defaults. Never fails: a missing file
    /// is created, an unreadable one is logged and ignored.
    pub async fn load(&self) -> PersistedConfig {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "Config file {} not found, creating defaults",
                    self.path.display()
                );
                let config = PersistedConfig::default();
                if let Err(e) = self.save(&config).await {
                    tracing::warn!("{}", e);
                }
                return config;
            }
            Err(e) => {
                tracing::error!("Error reading config {}: {}", self.path.display(), e);
                return PersistedConfig::default();
            }
        };

        match serde_json::from_slice::<PersistedConfig>(&raw) {
            Ok(config) => config.normalize(),
            Err(e) => {
                tracing::error!("Error parsing config {}: {}", self.path.display(), e);
                salvage(&raw).unwrap_or_default().normalize()
            }
        }
    }

    /// Write the whole document through a temp file and rename, so a crash
    /// mid-write leaves the previous file intact.
    pub async fn save(&self, config: &PersistedConfig) -> Result<(), AppError> {
        let fail = |e: std::io::Error| {
            AppError::Persistence(format!("Saving {} failed: {}", self.path.display(), e))
        };

        let body = serde_json::to_vec_pretty(config)
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &body).await.map_err(fail)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(fail)?;
        Ok(())
    }
}
