//! Data models for trackpull

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, ErrorKind};
use crate::records::{distinct_group_count, ParsedRecords, Record};

// ============================================================================
// Extraction snapshot
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Idle,
    Processing,
    Processed,
    Error,
}

/// Bundle of extraction results. Never mutated in place: every change
/// produces a new value that replaces the old one as a whole.
///
/// Record collections are shared, so carrying them over into an error or
/// processing snapshot costs a reference count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSnapshot {
    /// When the last attempt finished, successful or not
    pub timestamp: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub location_records: Arc<Vec<Record>>,
    #[serde(skip)]
    pub vehicle_records: Arc<Vec<Record>>,
    pub location_count: usize,
    pub vehicle_count: usize,
    pub distinct_group_count: usize,
    pub status: ExtractionStatus,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    /// Serial of the device the records came from
    pub device: Option<String>,
    /// Access strategy that retrieved the file
    pub access: Option<String>,
}

impl Default for ExtractionSnapshot {
    fn default() -> Self {
        Self {
            timestamp: None,
            last_success_at: None,
            location_records: Arc::new(Vec::new()),
            vehicle_records: Arc::new(Vec::new()),
            location_count: 0,
            vehicle_count: 0,
            distinct_group_count: 0,
            status: ExtractionStatus::Idle,
            last_error: None,
            last_error_kind: None,
            device: None,
            access: None,
        }
    }
}

impl ExtractionSnapshot {
    /// Complete snapshot for freshly parsed records; counts derive from the
    /// collections themselves.
    pub fn processed(
        parsed: ParsedRecords,
        group_field: &str,
        device: Option<String>,
        access: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            timestamp: Some(now),
            last_success_at: Some(now),
            location_count: parsed.locations.len(),
            vehicle_count: parsed.vehicles.len(),
            distinct_group_count: distinct_group_count(&parsed.locations, group_field),
            location_records: Arc::new(parsed.locations),
            vehicle_records: Arc::new(parsed.vehicles),
            status: ExtractionStatus::Processed,
            last_error: None,
            last_error_kind: None,
            device,
            access,
        }
    }

    /// Same results, marked as in progress
    pub fn processing(&self) -> Self {
        Self {
            status: ExtractionStatus::Processing,
            ..self.clone()
        }
    }

    /// Same results with a different status; used to back out of a
    /// processing mark that never ran
    pub fn with_status(&self, status: ExtractionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Failed attempt: prior records and counts stay, the error is recorded.
    pub fn failed(&self, err: &AppError) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            status: ExtractionStatus::Error,
            last_error: Some(err.message().to_string()),
            last_error_kind: Some(err.kind()),
            ..self.clone()
        }
    }
}

// ============================================================================
// Scheduler status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub phase: SchedulerPhase,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            phase: SchedulerPhase::Stopped,
            next_run_at: None,
            last_cycle_at: None,
        }
    }
}
