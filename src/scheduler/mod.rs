//! Periodic extraction scheduler
//!
//! Stopped until the persisted flag is enabled, then one cycle immediately
//! and one per interval after that. A cycle that finds no device, or dies,
//! is recorded in the snapshot and retried after a short cooldown instead
//! of a full interval. The loop re-reads the configuration before every
//! cycle, so disabling takes effect before the next one starts; a cycle
//! already running is left to finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::extract::{CycleOutcome, ExtractionRunner};
use crate::models::{SchedulerPhase, SchedulerStatus};
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextCycle {
    Interval,
    Retry,
}

/// Retry delay after a skipped or crashed cycle; always shorter than the interval
pub fn retry_delay(cooldown: Duration, interval: Duration) -> Duration {
    cooldown.min(interval / 2)
}

pub struct Scheduler {
    state: Arc<SharedState>,
    runner: Arc<ExtractionRunner>,
    cooldown: Duration,
}

impl Scheduler {
    pub fn new(state: Arc<SharedState>, runner: Arc<ExtractionRunner>, cooldown: Duration) -> Self {
        Self {
            state,
            runner,
            cooldown,
        }
    }

    /// Run until `shutdown` turns true or its sender goes away
    pub async fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("[Scheduler] Started");

        let mut last: Option<(Instant, NextCycle)> = None;
        let mut running = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let config = self.state.config().await;

            if !config.scheduler_enabled {
                if running {
                    tracing::info!("[Scheduler] Disabled");
                    running = false;
                    last = None;
                }
                self.publish(SchedulerPhase::Stopped, None);

                tokio::select! {
                    _ = self.state.config_changed() => continue,
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !running {
                tracing::info!(
                    "[Scheduler] Enabled, interval {} min",
                    config.interval_minutes
                );
                running = true;
            }

            let interval = Duration::from_secs(u64::from(config.interval_minutes) * 60);
            let due = match last {
                None => Instant::now(),
                Some((at, NextCycle::Interval)) => at + interval,
                Some((at, NextCycle::Retry)) => at + retry_delay(self.cooldown, interval),
            };
            self.publish(SchedulerPhase::Running, Some(due));

            if due > Instant::now() {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    // interval or flag may have changed; recompute
                    _ = self.state.config_changed() => continue,
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !self.state.config().await.scheduler_enabled || *shutdown.borrow() {
                continue;
            }

            let started = Instant::now();
            let next = match self.run_cycle().await {
                Ok(CycleOutcome::Extracted) => NextCycle::Interval,
                Ok(CycleOutcome::Failed(e)) => {
                    tracing::warn!("[Scheduler] Cycle failed: {} ({})", e, e.kind());
                    NextCycle::Interval
                }
                Ok(CycleOutcome::NoDevice) => {
                    tracing::info!(
                        "[Scheduler] No device reachable, retrying in {}s",
                        retry_delay(self.cooldown, interval).as_secs_f32()
                    );
                    NextCycle::Retry
                }
                Ok(CycleOutcome::Busy) => {
                    tracing::debug!("[Scheduler] Extraction already running, cycle skipped");
                    NextCycle::Interval
                }
                Err(e) => {
                    tracing::error!("[Scheduler] Cycle crashed: {:#}", e);
                    NextCycle::Retry
                }
            };
            last = Some((started, next));

            let mut status = self.state.scheduler_status();
            status.last_cycle_at = Some(Utc::now());
            self.state.set_scheduler_status(status);
        }

        self.publish(SchedulerPhase::Stopped, None);
        tracing::info!("[Scheduler] Shut down");
    }

    /// One cycle on its own task, so a panic surfaces as an error here
    async fn run_cycle(&self) -> anyhow::Result<CycleOutcome> {
        let runner = self.runner.clone();
        let outcome = tokio::spawn(async move { runner.run_scheduled().await }).await?;
        Ok(outcome)
    }

    fn publish(&self, phase: SchedulerPhase, due: Option<Instant>) {
        let next_run_at = due.map(|due| {
            let wait = due.saturating_duration_since(Instant::now());
            Utc::now() + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero())
        });
        let previous = self.state.scheduler_status();
        self.state.set_scheduler_status(SchedulerStatus {
            phase,
            next_run_at,
            last_cycle_at: previous.last_cycle_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ErrorKind;
    use crate::extract::ExtractionEngine;
    use crate::models::ExtractionStatus;
    use crate::state::{ConfigStore, PersistedConfig};
    use crate::testing::{engine_options, ScriptedTransport, StaticParser};

    struct Fixture {
        _dir: tempfile::TempDir,
        state: Arc<SharedState>,
        transport: Arc<ScriptedTransport>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(transport: ScriptedTransport, config: PersistedConfig, cooldown: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(SharedState::new(
            ConfigStore::new(dir.path().join("config.json")),
            config,
        ));
        let transport = Arc::new(transport);
        let engine = Arc::new(ExtractionEngine::new(
            transport.clone(),
            Arc::new(StaticParser::sample()),
            engine_options(dir.path()),
        ));
        let runner = Arc::new(ExtractionRunner::new(state.clone(), engine));
        let scheduler = Arc::new(Scheduler::new(state.clone(), runner, cooldown));

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(scheduler.start(rx));
        Fixture {
            _dir: dir,
            state,
            transport,
            shutdown,
            task,
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    async fn set_enabled(state: &SharedState, enabled: bool) {
        state
            .update_config(|c| {
                c.scheduler_enabled = enabled;
                Ok(())
            })
            .await
            .unwrap();
    }

    fn enabled_with_unreachable_device() -> PersistedConfig {
        let mut config = PersistedConfig::default();
        config.scheduler_enabled = true;
        config.devices.add("10.0.0.9", None).unwrap();
        config
    }

    fn connects(transport: &ScriptedTransport) -> usize {
        transport
            .calls()
            .iter()
            .filter(|c| c.starts_with("connect "))
            .count()
    }

    #[test]
    fn test_retry_delay_below_interval() {
        let minute = Duration::from_secs(60);
        assert_eq!(retry_delay(Duration::from_secs(30), minute), Duration::from_secs(30));
        assert_eq!(retry_delay(Duration::from_secs(90), minute), Duration::from_secs(30));
        assert!(retry_delay(Duration::from_secs(3600), minute) < minute);
    }

    #[tokio::test]
    async fn test_disabled_stays_stopped_until_enabled() {
        let f = start(
            ScriptedTransport::new().with_attached("USB1", "device"),
            PersistedConfig::default(),
            Duration::from_millis(30),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.state.scheduler_status().phase, SchedulerPhase::Stopped);
        assert!(f.transport.calls().is_empty());

        set_enabled(&f.state, true).await;
        assert!(wait_for(|| f.state.snapshot().status == ExtractionStatus::Processed).await);

        let status = f.state.scheduler_status();
        assert_eq!(status.phase, SchedulerPhase::Running);
        assert!(status.next_run_at.is_some());
    }

    #[tokio::test]
    async fn test_no_device_retries_without_disabling() {
        let f = start(
            ScriptedTransport::new().with_reachable("10.0.0.1"),
            enabled_with_unreachable_device(),
            Duration::from_millis(30),
        );

        assert!(wait_for(|| connects(&f.transport) >= 3).await);
        assert!(f.state.config().await.scheduler_enabled);

        let snap = f.state.snapshot();
        assert_eq!(snap.status, ExtractionStatus::Error);
        assert_eq!(snap.last_error_kind, Some(ErrorKind::DeviceUnreachable));
    }

    #[tokio::test]
    async fn test_missing_adb_surfaces_in_snapshot() {
        let mut config = PersistedConfig::default();
        config.scheduler_enabled = true;
        let f = start(
            ScriptedTransport::new().unavailable(),
            config,
            Duration::from_millis(20),
        );

        assert!(wait_for(|| f.state.snapshot().last_error.is_some()).await);
        let snap = f.state.snapshot();
        assert_eq!(snap.status, ExtractionStatus::Error);
        assert_eq!(snap.last_error.as_deref(), Some("adb not available"));
        assert_eq!(f.state.scheduler_status().phase, SchedulerPhase::Running);
    }

    #[tokio::test]
    async fn test_disable_stops_new_cycles() {
        let f = start(
            ScriptedTransport::new(),
            enabled_with_unreachable_device(),
            Duration::from_millis(20),
        );

        assert!(wait_for(|| connects(&f.transport) >= 2).await);
        set_enabled(&f.state, false).await;
        assert!(wait_for(|| f.state.scheduler_status().phase == SchedulerPhase::Stopped).await);

        let settled = connects(&f.transport);
        let snapshot = f.state.snapshot();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connects(&f.transport), settled);
        assert_eq!(f.state.snapshot().timestamp, snapshot.timestamp);
    }

    #[tokio::test]
    async fn test_disable_mid_cycle_lets_extraction_finish() {
        let mut config = PersistedConfig::default();
        config.scheduler_enabled = true;
        let f = start(
            ScriptedTransport::new()
                .with_attached("USB1", "device")
                .with_delay(Duration::from_millis(50)),
            config,
            Duration::from_millis(20),
        );

        assert!(wait_for(|| f.state.snapshot().status == ExtractionStatus::Processing).await);
        set_enabled(&f.state, false).await;

        assert!(wait_for(|| f.state.scheduler_status().phase == SchedulerPhase::Stopped).await);
        let snapshot = f.state.snapshot();
        assert_eq!(snapshot.status, ExtractionStatus::Processed);

        let calls = f.transport.calls().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.transport.calls().len(), calls);
        assert_eq!(f.state.snapshot().timestamp, snapshot.timestamp);
    }

    #[tokio::test]
    async fn test_crashed_cycle_is_retried() {
        let mut config = PersistedConfig::default();
        config.scheduler_enabled = true;
        let f = start(
            ScriptedTransport::new()
                .with_attached("USB1", "device")
                .with_responder(|_, _| panic!("transport blew up")),
            config,
            Duration::from_millis(20),
        );

        assert!(wait_for(|| f.transport.calls().len() >= 2).await);
        assert_eq!(f.state.scheduler_status().phase, SchedulerPhase::Running);
        // the unwound permit recorded the abort
        assert_eq!(f.state.snapshot().status, ExtractionStatus::Error);
    }

    #[tokio::test]
    async fn test_shutdown_ends_loop() {
        let f = start(
            ScriptedTransport::new(),
            enabled_with_unreachable_device(),
            Duration::from_millis(20),
        );

        f.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), f.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.state.scheduler_status().phase, SchedulerPhase::Stopped);
    }
}
