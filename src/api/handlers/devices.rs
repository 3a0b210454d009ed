//! Device list handlers

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::extract::ValidJson;
use crate::api::ApiState;
use crate::error::AppError;
use crate::registry::{validate_address, DeviceEntry};
use crate::state::PersistedConfig;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub address: String,
    pub name: String,
    pub connected: Option<bool>,
    pub preferred: bool,
}

impl DeviceView {
    pub(crate) fn new(entry: &DeviceEntry, preferred: Option<&str>) -> Self {
        Self {
            address: entry.address.clone(),
            name: entry.display_name().to_string(),
            connected: entry.last_connected,
            preferred: preferred == Some(entry.address.as_str()),
        }
    }
}

/// Views of every registered device, in registry order
pub(crate) fn device_views(config: &PersistedConfig) -> Vec<DeviceView> {
    let preferred = config.preferred_device.as_deref();
    config
        .devices
        .list()
        .iter()
        .map(|d| DeviceView::new(d, preferred))
        .collect()
}

/// GET /devices - Stored connectivity flags; no probing
pub async fn list_devices(State(state): State<ApiState>) -> impl IntoResponse {
    let config = state.shared.config().await;
    Json(device_views(&config))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceRequest {
    Add {
        address: String,
        name: Option<String>,
    },
    Remove {
        address: String,
    },
    Rename {
        address: String,
        name: String,
    },
}

/// POST /devices - Add, remove or rename
pub async fn mutate_devices(
    State(state): State<ApiState>,
    ValidJson(request): ValidJson<DeviceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let body = match request {
        DeviceRequest::Add { address, name } => {
            let device = state
                .shared
                .update_config(|c| {
                    let preferred = c.preferred_device.clone();
                    let entry = c.devices.add(&address, name.as_deref())?;
                    Ok(DeviceView::new(entry, preferred.as_deref()))
                })
                .await?;
            json!({
                "status": "success",
                "message": format!("Device {} added", device.address),
                "device": device,
            })
        }
        DeviceRequest::Remove { address } => {
            let removed = state
                .shared
                .update_config(|c| {
                    let removed = c.devices.remove(address.trim())?;
                    if c.preferred_device.as_deref() == Some(removed.address.as_str()) {
                        c.preferred_device = None;
                    }
                    Ok(removed)
                })
                .await?;
            json!({
                "status": "success",
                "message": format!("Device {} removed", removed.address),
            })
        }
        DeviceRequest::Rename { address, name } => {
            let device = state
                .shared
                .update_config(|c| {
                    let preferred = c.preferred_device.clone();
                    let entry = c.devices.rename(address.trim(), &name)?;
                    Ok(DeviceView::new(entry, preferred.as_deref()))
                })
                .await?;
            json!({
                "status": "success",
                "message": format!("Device {} renamed to {}", device.address, device.name),
                "device": device,
            })
        }
    };

    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct TestDeviceRequest {
    pub address: String,
}

/// POST /devices/test - Probe one address; a registered one gets its flag updated
pub async fn test_device(
    State(state): State<ApiState>,
    ValidJson(request): ValidJson<TestDeviceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let address = validate_address(&request.address)?.to_string();
    let report = state.runner.engine().probe(&address).await;

    state
        .shared
        .update_config(|c| {
            c.devices.set_connected(&address, report.connected);
            Ok(())
        })
        .await?;

    Ok(Json(json!({
        "address": report.address,
        "connected": report.connected,
        "output": report.output,
    })))
}
