//! Control handler: scheduler, interval, on-demand runs

use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::api::extract::ValidJson;
use crate::api::ApiState;
use crate::error::AppError;
use crate::state::validate_interval;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    ToggleScheduler,
    SetInterval { minutes: i64 },
    RunNow,
    Reparse,
    SetPreferredDevice { address: Option<String> },
}

/// POST /control
pub async fn control(
    State(state): State<ApiState>,
    ValidJson(request): ValidJson<ControlRequest>,
) -> Result<impl IntoResponse, AppError> {
    let body = match request {
        ControlRequest::ToggleScheduler => {
            let enabled = state
                .shared
                .update_config(|c| {
                    c.scheduler_enabled = !c.scheduler_enabled;
                    Ok(c.scheduler_enabled)
                })
                .await?;
            tracing::info!("Scheduler {}", if enabled { "enabled" } else { "disabled" });
            json!({
                "status": "success",
                "message": format!("Scheduler {}", if enabled { "enabled" } else { "disabled" }),
                "schedulerEnabled": enabled,
            })
        }
        ControlRequest::SetInterval { minutes } => {
            let minutes = validate_interval(minutes)?;
            state
                .shared
                .update_config(|c| {
                    c.interval_minutes = minutes;
                    Ok(())
                })
                .await?;
            tracing::info!("Interval set to {} min", minutes);
            json!({
                "status": "success",
                "message": format!("Interval set to {} minutes", minutes),
                "intervalMinutes": minutes,
            })
        }
        ControlRequest::RunNow => {
            let snapshot = state.runner.run_now().await?;
            json!({
                "status": "success",
                "message": format!(
                    "Extracted {} locations and {} vehicles",
                    snapshot.location_count, snapshot.vehicle_count
                ),
                "snapshot": *snapshot,
            })
        }
        ControlRequest::Reparse => {
            let snapshot = state.runner.reparse().await?;
            json!({
                "status": "success",
                "message": format!(
                    "Re-parsed {} locations and {} vehicles",
                    snapshot.location_count, snapshot.vehicle_count
                ),
                "snapshot": *snapshot,
            })
        }
        ControlRequest::SetPreferredDevice { address } => {
            let address = address
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());
            let preferred = state
                .shared
                .update_config(|c| {
                    if let Some(a) = &address {
                        if c.devices.get(a).is_none() {
                            return Err(AppError::NotFound(format!("Device {} is not registered", a)));
                        }
                    }
                    c.preferred_device = address.clone();
                    Ok(address.clone())
                })
                .await?;
            json!({
                "status": "success",
                "message": match &preferred {
                    Some(a) => format!("Preferred device set to {}", a),
                    None => "Preferred device cleared".to_string(),
                },
                "preferredDevice": preferred,
            })
        }
    };

    Ok(Json(body))
}
