//! Record collection handlers

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::api::ApiState;
use crate::error::AppError;
use crate::records::{group_breakdown, Record};

/// Serialize a borrowed collection without cloning it out of the snapshot
fn json_array(records: &[Record]) -> Result<Response, AppError> {
    let body = serde_json::to_vec(records).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// GET /records/locations
pub async fn get_locations(State(state): State<ApiState>) -> Result<Response, AppError> {
    json_array(&state.shared.snapshot().location_records)
}

/// GET /records/vehicles
pub async fn get_vehicles(State(state): State<ApiState>) -> Result<Response, AppError> {
    json_array(&state.shared.snapshot().vehicle_records)
}

#[derive(Serialize)]
pub struct GroupCount {
    pub value: String,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupsResponse {
    pub field: String,
    pub groups: Vec<GroupCount>,
    pub total_groups: usize,
    pub total_records: usize,
}

/// GET /records/groups - Distinct grouping values with per-value counts
pub async fn get_groups(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.shared.snapshot();
    let field = &state.runner.engine().options().group_field;

    let groups: Vec<GroupCount> = group_breakdown(&snapshot.location_records, field)
        .into_iter()
        .map(|(value, count)| GroupCount { value, count })
        .collect();

    Json(GroupsResponse {
        field: field.clone(),
        total_groups: groups.len(),
        total_records: snapshot.location_records.len(),
        groups,
    })
}
