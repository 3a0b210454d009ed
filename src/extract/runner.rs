//! Guarded extraction runs
//!
//! Both the scheduler and the control surface go through here, so every run
//! holds the one extraction permit from discovery to publication.

use std::sync::Arc;

use crate::error::AppError;
use crate::models::ExtractionSnapshot;
use crate::state::{ExtractionPermit, SharedState};

use super::ExtractionEngine;

/// What one scheduler cycle did
#[derive(Debug)]
pub enum CycleOutcome {
    Extracted,
    Failed(AppError),
    /// No device to extract from; recorded in the snapshot as an error
    NoDevice,
    /// Another extraction held the permit
    Busy,
}

pub struct ExtractionRunner {
    state: Arc<SharedState>,
    engine: Arc<ExtractionEngine>,
}

impl ExtractionRunner {
    pub fn new(state: Arc<SharedState>, engine: Arc<ExtractionEngine>) -> Self {
        Self { state, engine }
    }

    pub fn engine(&self) -> &ExtractionEngine {
        &self.engine
    }

    /// On-demand extraction. Fails with `Busy` when one is already running;
    /// every other failure is also recorded in the snapshot.
    pub async fn run_now(&self) -> Result<Arc<ExtractionSnapshot>, AppError> {
        let permit = self.state.begin_extraction()?;

        match self.locate().await {
            Ok(Some(serial)) => self.extract_with(permit, &serial).await,
            Ok(None) => {
                let err = no_device();
                tracing::warn!("[Extraction] {}", err);
                permit.fail(&err);
                Err(err)
            }
            Err(e) => {
                tracing::warn!("[Extraction] {}", e);
                permit.fail(&e);
                Err(e)
            }
        }
    }

    /// One scheduler cycle. An absent device skips the extraction; the
    /// failure is still recorded in the snapshot, prior records kept.
    pub async fn run_scheduled(&self) -> CycleOutcome {
        let permit = match self.state.begin_extraction() {
            Ok(permit) => permit,
            Err(_) => return CycleOutcome::Busy,
        };

        match self.locate().await {
            Ok(Some(serial)) => match self.extract_with(permit, &serial).await {
                Ok(_) => CycleOutcome::Extracted,
                Err(e) => CycleOutcome::Failed(e),
            },
            Ok(None) => {
                permit.fail(&no_device());
                CycleOutcome::NoDevice
            }
            Err(e) => {
                tracing::debug!("[Extraction] {}", e);
                permit.fail(&e);
                CycleOutcome::NoDevice
            }
        }
    }

    /// Rebuild the snapshot from the last pulled file
    pub async fn reparse(&self) -> Result<Arc<ExtractionSnapshot>, AppError> {
        let permit = self.state.begin_extraction()?;
        let previous = self.state.snapshot();

        match self.engine.reparse().await {
            Ok(mut snapshot) => {
                snapshot.device = previous.device.clone();
                snapshot.access = previous.access.clone();
                self.record_counters(&snapshot).await;
                Ok(permit.complete(snapshot))
            }
            Err(e @ AppError::NotFound(_)) => {
                permit.abandon();
                Err(e)
            }
            Err(e) => {
                permit.fail(&e);
                Err(e)
            }
        }
    }

    async fn locate(&self) -> Result<Option<String>, AppError> {
        let config = self.state.config().await;
        self.engine
            .discover(&config.devices, config.preferred_device.as_deref())
            .await
    }

    async fn extract_with(
        &self,
        permit: ExtractionPermit,
        serial: &str,
    ) -> Result<Arc<ExtractionSnapshot>, AppError> {
        match self.engine.extract(serial).await {
            Ok(snapshot) => {
                self.record_counters(&snapshot).await;
                Ok(permit.complete(snapshot))
            }
            Err(e) => {
                tracing::error!("[Extraction] {} ({})", e, e.kind());
                permit.fail(&e);
                Err(e)
            }
        }
    }

    async fn record_counters(&self, snapshot: &ExtractionSnapshot) {
        let result = self
            .state
            .update_config(|config| {
                config.last_locations = snapshot.location_count;
                config.last_vehicles = snapshot.vehicle_count;
                config.last_groups = snapshot.distinct_group_count;
                config.last_processed = snapshot.last_success_at;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!("[Extraction] Counters not recorded: {}", e);
        }
    }
}

fn no_device() -> AppError {
    AppError::DeviceUnreachable(
        "No device attached and no registered device responded".to_string(),
    )
}
