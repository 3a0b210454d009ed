//! Configuration module
//!
//! Read-only process settings. The mutable, persisted configuration lives in
//! `state::persist`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub records: RecordSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// Overrides the persisted webhook port when set
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    #[serde(default = "default_source_path")]
    pub source_path: String,
    #[serde(default = "default_staging_path")]
    pub staging_path: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_local_file")]
    pub local_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordSettings {
    #[serde(default = "default_location_table")]
    pub location_table: String,
    #[serde(default = "default_vehicle_table")]
    pub vehicle_table: String,
    #[serde(default = "default_group_field")]
    pub group_field: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            source_path: default_source_path(),
            staging_path: default_staging_path(),
            command_timeout_secs: default_command_timeout(),
            pull_timeout_secs: default_pull_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            data_dir: default_data_dir(),
            local_file: default_local_file(),
        }
    }
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            location_table: default_location_table(),
            vehicle_table: default_vehicle_table(),
            group_field: default_group_field(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_source_path() -> String {
    "/data/data/com.bca.bcatrack/cache/cache/data/sql.db".to_string()
}

fn default_staging_path() -> String {
    "/sdcard/sql.db".to_string()
}

fn default_command_timeout() -> u64 {
    8
}

fn default_pull_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_state_file() -> PathBuf {
    PathBuf::from("trackpull_config.json")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("db")
}

fn default_local_file() -> String {
    "sql.db".to_string()
}

fn default_location_table() -> String {
    "DWJJOB".to_string()
}

fn default_vehicle_table() -> String {
    "DWVVEH".to_string()
}

fn default_group_field() -> String {
    "dwjLoad".to_string()
}

fn default_cooldown() -> u64 {
    30
}

impl DeviceSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl StorageSettings {
    /// Final location of the pulled file
    pub fn local_path(&self) -> PathBuf {
        self.data_dir.join(&self.local_file)
    }
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("TRACKPULL").separator("__"))
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        Ok(settings)
    }
}
