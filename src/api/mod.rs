//! API module - HTTP handlers and routes

pub mod extract;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::extract::ExtractionRunner;
use crate::state::SharedState;

/// Handles shared by every handler
#[derive(Clone)]
pub struct ApiState {
    pub shared: Arc<SharedState>,
    pub runner: Arc<ExtractionRunner>,
}

pub fn routes() -> Router<ApiState> {
    Router::new()
        // Liveness
        .route("/healthz", get(handlers::healthz))
        // Status and records
        .route("/status", get(handlers::get_status))
        .route("/records/locations", get(handlers::get_locations))
        .route("/records/vehicles", get(handlers::get_vehicles))
        .route("/records/groups", get(handlers::get_groups))
        // Control
        .route("/control", post(handlers::control))
        // Devices
        .route("/devices", get(handlers::list_devices))
        .route("/devices", post(handlers::mutate_devices))
        .route("/devices/test", post(handlers::test_device))
}
