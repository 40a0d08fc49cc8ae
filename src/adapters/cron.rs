//! Scheduled invocation adapter.
//!
//! Each registered function runs on its own thread according to a schedule
//! read from its `cron` config:
//!
//! - `interval`: a humantime duration (`"30s"`, `"1m"`) or seconds, first run
//!   one interval after `start`;
//! - `at`: daily wall-clock time `"HH:MM"` (or `"HH:MM:SS"`), UTC.
//!
//! Services are invoked with no arguments. Client functions produce the
//! argument object for an outbound call to their target service through the
//! [`ClientTable`] entry of their protocol.

use chrono::{DateTime, NaiveTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{AdapterConfig, ProtocolAdapter, Registration};
use crate::client::{CallOptions, ClientTable, ServiceClient};
use crate::registry::{ClientMetadata, Kwargs, ProtocolConfig, ServiceMetadata};
use crate::types::{duration_field, opt_str_field, Error, Protocol, Result};

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    DailyAt(NaiveTime),
}

impl Schedule {
    /// Read the schedule keys of a function's config.
    pub fn from_config(config: &ProtocolConfig) -> Result<Self> {
        if let Some(interval) = duration_field(config, "interval")? {
            return Ok(Schedule::Every(interval));
        }
        if let Some(at) = opt_str_field(config, "at") {
            let time = NaiveTime::parse_from_str(at.trim(), "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(at.trim(), "%H:%M:%S"))
                .map_err(|_| Error::configuration(format!("invalid time of day {:?}, expected HH:MM", at)))?;
            return Ok(Schedule::DailyAt(time));
        }
        if config.contains_key("cron_expression") {
            return Err(Error::configuration("cron expressions are not supported, use interval or at"));
        }
        Err(Error::configuration("missing schedule: set interval or at"))
    }

    /// Delay from `now` until the next run.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Schedule::Every(interval) => *interval,
            Schedule::DailyAt(time) => {
                let today = now.date_naive().and_time(*time).and_utc();
                let next = if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                };
                (next - now).to_std().unwrap_or_default()
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Task {
    Service(Arc<ServiceMetadata>),
    Client {
        client: Arc<ClientMetadata>,
        outbound: Arc<ServiceClient>,
    },
}

impl Task {
    fn name(&self) -> &str {
        match self {
            Task::Service(service) => &service.name,
            Task::Client { client, .. } => &client.name,
        }
    }

    fn run(&self) -> Result<Value> {
        match self {
            Task::Service(service) => service.function.invoke(Kwargs::new()),
            Task::Client { client, outbound } => {
                let args = match client.function.invoke(Kwargs::new())? {
                    Value::Object(args) => args,
                    Value::Null => Kwargs::new(),
                    other => {
                        return Err(Error::handler(format!(
                            "client function must return an object of call arguments, got {}",
                            other
                        )))
                    }
                };
                let options = CallOptions {
                    protocol: None,
                    path: opt_str_field(&client.config, "path"),
                    method: opt_str_field(&client.config, "method"),
                };
                outbound.call(&client.target_service, &args, &options)
            }
        }
    }
}

struct Job {
    task: Task,
    schedule: Schedule,
    runs: Arc<AtomicU64>,
    thread: Option<(JoinHandle<()>, Receiver<()>)>,
}

/// Adapter that drives functions on a timer.
pub struct CronAdapter {
    clients: ClientTable,
    jobs: BTreeMap<String, Job>,
    running: Arc<AtomicBool>,
}

impl Default for CronAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CronAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronAdapter")
            .field("clients", &self.clients.protocols())
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CronAdapter {
    pub fn new() -> Self {
        Self {
            clients: ClientTable::default(),
            jobs: BTreeMap::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Outbound clients received in `setup`.
    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn schedule(&self, name: &str) -> Option<Schedule> {
        self.jobs.get(name).map(|job| job.schedule)
    }

    /// Completed runs of a job (successful or not).
    pub fn run_count(&self, name: &str) -> Option<u64> {
        self.jobs.get(name).map(|job| job.runs.load(Ordering::SeqCst))
    }

    fn add_job(&mut self, task: Task, config: &ProtocolConfig) -> Result<()> {
        let schedule = Schedule::from_config(config)
            .map_err(|e| Error::registration(Protocol::Cron, task.name(), e.to_string()))?;
        debug!(service = %task.name(), schedule = ?schedule, "scheduled");
        self.jobs.insert(
            task.name().to_string(),
            Job {
                task,
                schedule,
                runs: Arc::new(AtomicU64::new(0)),
                thread: None,
            },
        );
        Ok(())
    }
}

fn spawn_job(task: Task, schedule: Schedule, runs: Arc<AtomicU64>, running: Arc<AtomicBool>) -> std::io::Result<(JoinHandle<()>, Receiver<()>)> {
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name(format!("cron-{}", task.name()))
        .spawn(move || {
            loop {
                let deadline = Instant::now() + schedule.next_delay(Utc::now());
                while running.load(Ordering::SeqCst) && Instant::now() < deadline {
                    thread::sleep(SLEEP_SLICE.min(deadline.saturating_duration_since(Instant::now())));
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match task.run() {
                    Ok(result) => info!(service = %task.name(), result = %result, "scheduled run completed"),
                    Err(e) => warn!(service = %task.name(), error = %e, "scheduled run failed"),
                }
                runs.fetch_add(1, Ordering::SeqCst);
            }
            let _ = done_tx.send(());
        })?;
    Ok((handle, done_rx))
}

impl ProtocolAdapter for CronAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Cron
    }

    fn setup(&mut self, config: AdapterConfig) -> Result<()> {
        if let Some(clients) = config.clients {
            debug!(protocols = ?clients.protocols(), "cron outbound clients");
            self.clients = clients;
        }
        Ok(())
    }

    fn register_function(&mut self, registration: Registration) -> Result<()> {
        if self.is_running() {
            return Err(Error::registration(Protocol::Cron, registration.name(), "adapter already started"));
        }
        match registration {
            Registration::Service(service) => {
                let config = service.config(Protocol::Cron);
                self.add_job(Task::Service(service), &config)
            }
            Registration::Client(client) => {
                let outbound = self.clients.get(client.protocol).ok_or_else(|| {
                    Error::registration(
                        Protocol::Cron,
                        client.name.clone(),
                        format!("no outbound client for protocol {}", client.protocol),
                    )
                })?;
                let config = client.config.clone();
                self.add_job(Task::Client { client, outbound }, &config)
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let running = Arc::new(AtomicBool::new(true));
        self.running = Arc::clone(&running);

        let mut failures = Vec::new();
        for (name, job) in self.jobs.iter_mut() {
            match spawn_job(job.task.clone(), job.schedule, Arc::clone(&job.runs), Arc::clone(&running)) {
                Ok(thread) => job.thread = Some(thread),
                Err(e) => failures.push(format!("{}: {}", name, e)),
            }
        }
        info!(jobs = self.jobs.len() - failures.len(), "cron adapter started");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::adapter_start(Protocol::Cron, failures.join("; ")))
        }
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for (name, job) in self.jobs.iter_mut() {
            let Some((handle, done)) = job.thread.take() else {
                continue;
            };
            match done.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        warn!(service = %name, "cron thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(service = %name, "cron job still running, abandoning its thread");
                }
            }
        }
        info!("cron adapter stopped");
        Ok(())
    }
}

impl Drop for CronAdapter {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
