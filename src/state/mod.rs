//! Shared state between the scheduler and the control surface
//!
//! - `persist`: the persisted configuration document and its file store
//!
//! Two independent locks live here. The configuration sits behind an async
//! `RwLock` whose write side also covers the save, so writes are serialized
//! and readers never see a half-applied change. The snapshot is an `Arc`
//! swapped under a short synchronous lock. The extraction gate is a third,
//! separate mutex that is only ever `try_lock`ed, so status reads never wait
//! behind a running extraction.

pub mod persist;

use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, OwnedMutexGuard, RwLock};

use crate::error::AppError;
use crate::models::{ExtractionSnapshot, ExtractionStatus, SchedulerStatus};

pub use self::persist::{validate_interval, ConfigStore, PersistedConfig};

/// Atomically replaced snapshot slot
#[derive(Debug, Default)]
pub struct SnapshotCell {
    inner: StdRwLock<Arc<ExtractionSnapshot>>,
}

impl SnapshotCell {
    pub fn load(&self) -> Arc<ExtractionSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&ExtractionSnapshot) -> ExtractionSnapshot) -> Arc<ExtractionSnapshot> {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(f(&slot));
        *slot = next.clone();
        next
    }
}

/// Held for the whole of one extraction. Settling it publishes the result;
/// dropping it unsettled records an aborted attempt.
pub struct ExtractionPermit {
    snapshot: Arc<SnapshotCell>,
    previous_status: ExtractionStatus,
    settled: bool,
    _guard: OwnedMutexGuard<()>,
}

impl ExtractionPermit {
    /// Publish a successful result
    pub fn complete(mut self, snapshot: ExtractionSnapshot) -> Arc<ExtractionSnapshot> {
        self.settled = true;
        self.snapshot.update(|_| snapshot)
    }

    /// Record a failure, keeping the prior records
    pub fn fail(mut self, err: &AppError) -> Arc<ExtractionSnapshot> {
        self.settled = true;
        self.snapshot.update(|current| current.failed(err))
    }

    /// Nothing was attempted; restore the status seen before the permit
    pub fn abandon(mut self) {
        self.settled = true;
        let previous = self.previous_status;
        self.snapshot.update(|current| current.with_status(previous));
    }
}

impl Drop for ExtractionPermit {
    fn drop(&mut self) {
        if !self.settled {
            let err = AppError::Internal("Extraction aborted before completion".to_string());
            self.snapshot.update(|current| current.failed(&err));
        }
    }
}

pub struct SharedState {
    config: RwLock<PersistedConfig>,
    store: ConfigStore,
    snapshot: Arc<SnapshotCell>,
    extraction_gate: Arc<Mutex<()>>,
    scheduler: StdRwLock<SchedulerStatus>,
    scheduler_wake: Notify,
    started_at: Instant,
}

impl SharedState {
    pub fn new(store: ConfigStore, config: PersistedConfig) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            snapshot: Arc::new(SnapshotCell::default()),
            extraction_gate: Arc::new(Mutex::new(())),
            scheduler: StdRwLock::new(SchedulerStatus::default()),
            scheduler_wake: Notify::new(),
            started_at: Instant::now(),
        }
    }

    /// Load the persisted configuration once, at startup
    pub async fn load(store: ConfigStore) -> Self {
        let config = store.load().await;
        tracing::info!(
            "Config loaded from {}: scheduler={}, interval={}m, devices={}",
            store.path().display(),
            config.scheduler_enabled,
            config.interval_minutes,
            config.devices.len()
        );
        Self::new(store, config)
    }

    /// Point-in-time copy of the configuration
    pub async fn config(&self) -> PersistedConfig {
        self.config.read().await.clone()
    }

    /// Apply `f` to a copy of the configuration. On `Ok` the copy replaces
    /// the live value and is saved; on `Err` nothing changes. A failed save
    /// is logged and the in-memory change stands.
    pub async fn update_config<T>(
        &self,
        f: impl FnOnce(&mut PersistedConfig) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut guard = self.config.write().await;
        let mut next = guard.clone();
        let value = f(&mut next)?;

        if next != *guard {
            *guard = next;
            if let Err(e) = self.store.save(&guard).await {
                tracing::error!("{}", e);
            }
            self.scheduler_wake.notify_one();
        }

        Ok(value)
    }

    pub fn snapshot(&self) -> Arc<ExtractionSnapshot> {
        self.snapshot.load()
    }

    /// Claim the single extraction slot, or fail with `Busy`.
    pub fn begin_extraction(&self) -> Result<ExtractionPermit, AppError> {
        let guard = self
            .extraction_gate
            .clone()
            .try_lock_owned()
            .map_err(|_| AppError::Busy("An extraction is already in progress".to_string()))?;

        let mut previous_status = ExtractionStatus::Idle;
        self.snapshot.update(|current| {
            previous_status = current.status;
            current.processing()
        });

        Ok(ExtractionPermit {
            snapshot: self.snapshot.clone(),
            previous_status,
            settled: false,
            _guard: guard,
        })
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_scheduler_status(&self, status: SchedulerStatus) {
        *self.scheduler.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Resolves after the next configuration change
    pub async fn config_changed(&self) {
        self.scheduler_wake.notified().await;
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ParsedRecords;

    fn state_in(dir: &tempfile::TempDir) -> SharedState {
        SharedState::new(
            ConfigStore::new(dir.path().join("config.json")),
            PersistedConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_update_config_persists() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        state
            .update_config(|c| {
                c.interval_minutes = 60;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(state.config().await.interval_minutes, 60);
        let reloaded = ConfigStore::new(dir.path().join("config.json")).load().await;
        assert_eq!(reloaded.interval_minutes, 60);
    }

    #[tokio::test]
    async fn test_update_config_error_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        let result: Result<(), AppError> = state
            .update_config(|c| {
                c.interval_minutes = 999;
                Err(AppError::Validation("nope".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(state.config().await.interval_minutes, 5);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every save fail
        let blocked = dir.path().join("config.json");
        std::fs::create_dir(&blocked).unwrap();
        let state = SharedState::new(ConfigStore::new(&blocked), PersistedConfig::default());

        state
            .update_config(|c| {
                c.scheduler_enabled = true;
                Ok(())
            })
            .await
            .unwrap();

        assert!(state.config().await.scheduler_enabled);
    }

    #[tokio::test]
    async fn test_second_permit_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        let permit = state.begin_extraction().unwrap();
        assert_eq!(state.snapshot().status, ExtractionStatus::Processing);
        assert!(matches!(state.begin_extraction(), Err(AppError::Busy(_))));

        permit.complete(ExtractionSnapshot::processed(
            ParsedRecords::default(),
            "dwjLoad",
            None,
            None,
        ));
        assert_eq!(state.snapshot().status, ExtractionStatus::Processed);
        assert!(state.begin_extraction().is_ok());
    }

    #[tokio::test]
    async fn test_abandon_restores_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        state.begin_extraction().unwrap().abandon();
        assert_eq!(state.snapshot().status, ExtractionStatus::Idle);
    }

    #[tokio::test]
    async fn test_dropped_permit_records_abort() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        drop(state.begin_extraction().unwrap());
        let snap = state.snapshot();
        assert_eq!(snap.status, ExtractionStatus::Error);
        assert!(snap.last_error.is_some());
    }
}
