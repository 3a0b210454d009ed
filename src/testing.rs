//! In-memory stand-ins for the transport and the parser, shared by unit tests

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;
use crate::extract::EngineOptions;
use crate::records::{ParsedRecords, Record, RecordParser};
use crate::transport::{device_serial, AttachedDevice, Execution, Outcome, RemoteCommand, Transport};

type Responder = Arc<dyn Fn(&str, &RemoteCommand) -> Option<Execution> + Send + Sync>;

/// Scripted transport. Known serials are the attached ones plus reachable
/// addresses; everything else answers like a missing device. Shell commands
/// succeed, pulls write `payload`, unless the responder says otherwise.
pub struct ScriptedTransport {
    available: bool,
    attached: Vec<AttachedDevice>,
    reachable: HashSet<String>,
    responder: Option<Responder>,
    delay: Duration,
    payload: Vec<u8>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            available: true,
            attached: Vec::new(),
            reachable: HashSet::new(),
            responder: None,
            delay: Duration::ZERO,
            payload: b"SQLite format 3\0".to_vec(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_attached(mut self, serial: &str, state: &str) -> Self {
        self.attached.push(AttachedDevice {
            serial: serial.to_string(),
            state: state.to_string(),
        });
        self
    }

    pub fn with_reachable(mut self, address: &str) -> Self {
        self.reachable.insert(device_serial(address));
        self
    }

    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &RemoteCommand) -> Option<Execution> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(f));
        self
    }

    /// Every `execute` sleeps this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// `execute` calls as `"<serial> <command>"`, connects as `"connect <address>"`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn knows(&self, serial: &str) -> bool {
        self.reachable.contains(serial)
            || self
                .attached
                .iter()
                .any(|d| d.serial == serial && d.is_online())
    }

    async fn respond(&self, serial: &str, command: &RemoteCommand) -> Execution {
        if !self.knows(serial) {
            return Execution::new(
                format!("error: device '{}' not found", serial),
                Outcome::TransportError,
            );
        }
        if let Some(execution) = self.responder.as_ref().and_then(|f| f(serial, command)) {
            return execution;
        }
        match command {
            RemoteCommand::Shell(line) if line.starts_with("echo ") => {
                Execution::success(line.trim_start_matches("echo ").to_string())
            }
            RemoteCommand::Shell(_) => Execution::success(""),
            RemoteCommand::Pull { remote, local } => {
                match tokio::fs::write(local, &self.payload).await {
                    Ok(()) => Execution::success(format!("{}: 1 file pulled", remote)),
                    Err(e) => Execution::new(e.to_string(), Outcome::TransportError),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn available(&self, _timeout: Duration) -> bool {
        self.available
    }

    async fn attached_devices(&self, _timeout: Duration) -> Vec<AttachedDevice> {
        self.attached.clone()
    }

    async fn connect(&self, address: &str, _timeout: Duration) -> Execution {
        self.calls.lock().unwrap().push(format!("connect {}", address));
        let serial = device_serial(address);
        if self.reachable.contains(&serial) {
            Execution::success(format!("connected to {}", serial))
        } else {
            Execution::new(
                format!("failed to connect to '{}': Connection refused", serial),
                Outcome::TransportError,
            )
        }
    }

    async fn execute(&self, serial: &str, command: &RemoteCommand, _timeout: Duration) -> Execution {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", serial, command));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let execution = self.respond(serial, command).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        execution
    }
}

/// Parser returning fixed records, or a fixed failure
pub struct StaticParser {
    result: Result<ParsedRecords, AppError>,
    calls: AtomicUsize,
}

impl StaticParser {
    /// Three locations over two groups, two vehicles
    pub fn sample() -> Self {
        let location = |id: &str, load: &str| -> Record {
            [("dwjId", id), ("dwjLoad", load)].into_iter().collect()
        };
        let vehicle = |vin: &str| -> Record { [("dwvVin", vin)].into_iter().collect() };
        Self::with_records(ParsedRecords {
            locations: vec![
                location("1", "L100"),
                location("2", "L200"),
                location("3", "L100"),
            ],
            vehicles: vec![vehicle("VIN1"), vehicle("VIN2")],
        })
    }

    pub fn with_records(records: ParsedRecords) -> Self {
        Self {
            result: Ok(records),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(AppError::ParseFailure("file is not a database".to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordParser for StaticParser {
    async fn parse(&self, _path: &Path) -> Result<ParsedRecords, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Engine options rooted in a scratch directory, with short timeouts
pub fn engine_options(dir: &Path) -> EngineOptions {
    EngineOptions {
        source_path: "/data/data/app/sql.db".to_string(),
        staging_path: "/sdcard/sql.db".to_string(),
        local_path: dir.join("db").join("sql.db"),
        group_field: "dwjLoad".to_string(),
        command_timeout: Duration::from_secs(1),
        pull_timeout: Duration::from_secs(1),
        probe_timeout: Duration::from_secs(1),
    }
}
