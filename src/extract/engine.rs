//! Extraction engine: locate a device, pull the data file, parse it
//!
//! Per strategy the pull is four remote steps: clear the staging path, copy
//! the source file onto it, transfer it to local storage, delete the staging
//! copy. The transfer lands in a `.part` file that is only promoted over the
//! last good local copy once it has parsed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::error::AppError;
use crate::models::ExtractionSnapshot;
use crate::records::RecordParser;
use crate::registry::{self, DeviceRegistry, ProbeReport};
use crate::transport::{device_serial, Execution, Outcome, RemoteCommand, Transport};

use super::strategy::{default_strategies, AccessStrategy};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub source_path: String,
    pub staging_path: String,
    pub local_path: PathBuf,
    pub group_field: String,
    pub command_timeout: Duration,
    pub pull_timeout: Duration,
    pub probe_timeout: Duration,
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            source_path: settings.device.source_path.clone(),
            staging_path: settings.device.staging_path.clone(),
            local_path: settings.storage.local_path(),
            group_field: settings.records.group_field.clone(),
            command_timeout: settings.device.command_timeout(),
            pull_timeout: settings.device.pull_timeout(),
            probe_timeout: settings.device.probe_timeout(),
        }
    }

    fn part_path(&self) -> PathBuf {
        let mut part = self.local_path.clone().into_os_string();
        part.push(".part");
        PathBuf::from(part)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ClearStaging,
    Copy,
    Transfer,
}

impl Step {
    fn as_str(&self) -> &'static str {
        match self {
            Step::ClearStaging => "clear staging",
            Step::Copy => "copy to staging",
            Step::Transfer => "transfer",
        }
    }
}

/// Where and how one strategy gave up
#[derive(Debug)]
struct StrategyFailure {
    strategy: &'static str,
    step: Step,
    execution: Execution,
}

impl StrategyFailure {
    /// Whether the device answered at all during this strategy
    fn reached_device(&self) -> bool {
        self.execution.outcome == Outcome::PermissionDenied || self.step != Step::ClearStaging
    }
}

/// Turn the failures of every strategy into one terminal error.
fn summarize(failures: &[StrategyFailure]) -> AppError {
    let detail = failures
        .iter()
        .map(|f| {
            format!(
                "{} failed at {} ({:?}): {}",
                f.strategy,
                f.step.as_str(),
                f.execution.outcome,
                f.execution.output.lines().next().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");

    let reached = failures.iter().any(StrategyFailure::reached_device);
    let any = |outcome: Outcome| failures.iter().any(|f| f.execution.outcome == outcome);
    let all = |outcome: Outcome| failures.iter().all(|f| f.execution.outcome == outcome);

    if !reached {
        if !failures.is_empty() && all(Outcome::Timeout) {
            AppError::Timeout(detail)
        } else {
            AppError::DeviceUnreachable(detail)
        }
    } else if any(Outcome::PermissionDenied) {
        AppError::PermissionDenied(detail)
    } else if any(Outcome::Timeout) {
        AppError::Timeout(detail)
    } else {
        AppError::Transport(detail)
    }
}

pub struct ExtractionEngine {
    transport: Arc<dyn Transport>,
    parser: Arc<dyn RecordParser>,
    options: EngineOptions,
    strategies: Vec<AccessStrategy>,
}

impl ExtractionEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        parser: Arc<dyn RecordParser>,
        options: EngineOptions,
    ) -> Self {
        Self {
            transport,
            parser,
            options,
            strategies: default_strategies(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Reachability check for one address
    pub async fn probe(&self, address: &str) -> ProbeReport {
        registry::probe(self.transport.as_ref(), address, self.options.probe_timeout).await
    }

    /// Pick the device to extract from. A device plugged in directly wins;
    /// otherwise registered addresses are probed in order (preferred
    /// first). `Ok(None)` means nothing answered.
    pub async fn discover(
        &self,
        devices: &DeviceRegistry,
        preferred: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        if !self.transport.available(self.options.command_timeout).await {
            return Err(AppError::DeviceUnreachable("adb not available".to_string()));
        }

        if let Some(serial) =
            registry::discover_attached(self.transport.as_ref(), self.options.probe_timeout).await
        {
            tracing::debug!("[Extraction] Using attached device {}", serial);
            return Ok(Some(serial));
        }

        for address in devices.probe_order(preferred) {
            if self.probe(&address).await.connected {
                tracing::info!("[Extraction] Using addressed device {}", address);
                return Ok(Some(device_serial(&address)));
            }
        }

        Ok(None)
    }

    /// Pull the data file from `serial`, parse it and promote it to the
    /// local copy.
    pub async fn extract(&self, serial: &str) -> Result<ExtractionSnapshot, AppError> {
        let part = self.options.part_path();
        let strategy = self.pull(serial, &part).await?;

        let parsed = match self.parser.parse(&part).await {
            Ok(parsed) => parsed,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&part, &self.options.local_path)
            .await
            .map_err(|e| {
                AppError::Internal(format!(
                    "Promoting {} failed: {}",
                    self.options.local_path.display(),
                    e
                ))
            })?;

        tracing::info!(
            "[Extraction] {} location / {} vehicle records from {} via {}",
            parsed.locations.len(),
            parsed.vehicles.len(),
            serial,
            strategy
        );

        Ok(ExtractionSnapshot::processed(
            parsed,
            &self.options.group_field,
            Some(serial.to_string()),
            Some(strategy.to_string()),
        ))
    }

    /// Rebuild results from the last pulled local copy
    pub async fn reparse(&self) -> Result<ExtractionSnapshot, AppError> {
        let path = &self.options.local_path;
        if tokio::fs::metadata(path).await.is_err() {
            return Err(AppError::NotFound(format!(
                "No pulled file at {}",
                path.display()
            )));
        }

        let parsed = self.parser.parse(path).await?;
        Ok(ExtractionSnapshot::processed(
            parsed,
            &self.options.group_field,
            None,
            None,
        ))
    }

    /// Try every strategy in order; the first to land a file wins.
    async fn pull(&self, serial: &str, part: &Path) -> Result<&'static str, AppError> {
        if let Some(parent) = part.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("{}: {}", parent.display(), e)))?;
        }

        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let _ = tokio::fs::remove_file(part).await;

            match self.run_strategy(serial, strategy, part).await {
                Ok(()) => return Ok(strategy.name),
                Err(failure) => {
                    tracing::warn!(
                        "[Extraction] Strategy {} failed at {} ({:?})",
                        failure.strategy,
                        failure.step.as_str(),
                        failure.execution.outcome
                    );
                    failures.push(failure);
                }
            }
        }

        Err(summarize(&failures))
    }

    async fn run_strategy(
        &self,
        serial: &str,
        strategy: &AccessStrategy,
        part: &Path,
    ) -> Result<(), StrategyFailure> {
        let staging = &self.options.staging_path;
        let steps = [
            (
                Step::ClearStaging,
                RemoteCommand::Shell(strategy.wrap(&format!("rm -f {}", staging))),
                self.options.command_timeout,
            ),
            (
                Step::Copy,
                RemoteCommand::Shell(
                    strategy.wrap(&format!("cp {} {}", self.options.source_path, staging)),
                ),
                self.options.command_timeout,
            ),
            (
                Step::Transfer,
                RemoteCommand::Pull {
                    remote: staging.clone(),
                    local: part.to_path_buf(),
                },
                self.options.pull_timeout,
            ),
        ];

        for (step, command, timeout) in steps {
            let mut execution = self.transport.execute(serial, &command, timeout).await;

            if execution.is_success() && step == Step::Transfer && !has_content(part).await {
                execution = Execution::new(
                    format!("{} is missing or empty after transfer", part.display()),
                    Outcome::TransportError,
                );
            }

            if !execution.is_success() {
                let partial = step != Step::ClearStaging;
                if partial
                    && matches!(execution.outcome, Outcome::Timeout | Outcome::TransportError)
                {
                    self.clear_staging(serial, strategy).await;
                }
                return Err(StrategyFailure {
                    strategy: strategy.name,
                    step,
                    execution,
                });
            }
        }

        self.clear_staging(serial, strategy).await;
        Ok(())
    }

    /// Best-effort removal of the staging copy
    async fn clear_staging(&self, serial: &str, strategy: &AccessStrategy) {
        let command =
            RemoteCommand::Shell(strategy.wrap(&format!("rm -f {}", self.options.staging_path)));
        let execution = self
            .transport
            .execute(serial, &command, self.options.command_timeout)
            .await;
        if !execution.is_success() {
            tracing::warn!(
                "[Extraction] Could not remove staging copy on {}: {}",
                serial,
                execution.output
            );
        }
    }
}

async fn has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
