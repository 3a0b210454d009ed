//! Status handler

use std::time::Duration;

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::ApiState;
use crate::models::{ExtractionSnapshot, SchedulerStatus};

use super::devices::{device_views, DeviceView};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: ExtractionSnapshot,
    pub scheduler_enabled: bool,
    pub interval_minutes: u32,
    pub webhook_enabled: bool,
    pub webhook_port: u16,
    pub device_count: usize,
    pub devices: Vec<DeviceView>,
    pub preferred_device: Option<String>,
    pub scheduler: SchedulerStatus,
    pub last_locations: usize,
    pub last_vehicles: usize,
    pub last_groups: usize,
    pub last_processed: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
    pub server_time: DateTime<Utc>,
}

/// GET /status - Config, snapshot and uptime, read fresh per request
pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let config = state.shared.config().await;
    let snapshot = state.shared.snapshot();
    let uptime = state.shared.uptime();

    Json(StatusResponse {
        snapshot: (*snapshot).clone(),
        scheduler_enabled: config.scheduler_enabled,
        interval_minutes: config.interval_minutes,
        webhook_enabled: config.webhook_enabled,
        webhook_port: config.webhook_port,
        device_count: config.devices.len(),
        devices: device_views(&config),
        preferred_device: config.preferred_device,
        scheduler: state.shared.scheduler_status(),
        last_locations: config.last_locations,
        last_vehicles: config.last_vehicles,
        last_groups: config.last_groups,
        last_processed: config.last_processed,
        uptime_seconds: uptime.as_secs(),
        uptime_formatted: format_uptime(uptime),
        server_time: Utc::now(),
    })
}

pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let mins = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, mins)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
