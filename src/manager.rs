//! Lifecycle manager: the single owner of the daemon record.
//!
//! The manager composes a health probe, an installer and one supervisor
//! strategy. Every state transition happens here, under one mutex whose
//! critical sections never span network calls, process spawns or sleeps.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{DaemonError, WardenError};
use crate::health::{HealthCheck, HealthReport, HttpProbe};
use crate::installer::Installer;
use crate::layout::Layout;
use crate::release::GithubReleases;
use crate::supervisor::{ChildExit, Launch, Strategy, Supervisor};
use crate::types::{DaemonState, DaemonStatus, format_uptime};

/// Health polling after a launch: 20 probes, 250 ms apart.
const HEALTH_ATTEMPTS: u32 = 20;
const HEALTH_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// What the manager believes about the daemon.
#[derive(Debug, Default)]
pub(crate) struct DaemonRecord {
    state: DaemonState,
    managed: bool,
    start_time: Option<Instant>,
    version: String,
    last_error: String,
    pid: Option<u32>,
}

impl DaemonRecord {
    /// A healthy answer from the endpoint.
    ///
    /// A running daemon stays managed only if we already managed it or the
    /// strategy still tracks a live process it launched (`tracked`, which
    /// each strategy only reports after checking the process is really
    /// its own). Anything else is an instance somebody else started.
    fn apply_probe(&mut self, report: HealthReport, tracked: Option<u32>) {
        let keep = self.managed && self.state == DaemonState::Running;
        self.state = DaemonState::Running;
        self.version = report.version;
        self.last_error.clear();
        self.managed = keep || tracked.is_some();
        self.pid = tracked.or(if keep { self.pid } else { None });
        if !self.managed {
            self.start_time = None;
        }
    }

    /// No healthy answer. Only a `Running` record is demoted.
    fn apply_probe_failure(&mut self) {
        if self.state == DaemonState::Running {
            self.state = DaemonState::Stopped;
            self.managed = false;
            self.start_time = None;
            self.pid = None;
        }
    }

    /// An owned child exited. Returns whether the event applied.
    fn apply_child_exit(&mut self, exit: &ChildExit) -> bool {
        if self.pid != Some(exit.pid) {
            return false;
        }
        self.pid = None;
        self.managed = false;
        self.start_time = None;
        if exit.success {
            self.state = DaemonState::Stopped;
            self.last_error.clear();
        } else {
            self.state = DaemonState::Error;
            self.last_error = format!("daemon exited unexpectedly ({exit})");
        }
        true
    }

    fn fail(&mut self, detail: impl Into<String>) {
        self.state = DaemonState::Error;
        self.last_error = detail.into();
    }

    fn snapshot(&self) -> DaemonStatus {
        let uptime = match self.start_time {
            Some(t) if self.state == DaemonState::Running && self.managed => {
                format_uptime(t.elapsed())
            }
            _ => String::new(),
        };
        DaemonStatus {
            state: self.state,
            version: self.version.clone(),
            pid: self.pid.unwrap_or(0),
            uptime,
            error: self.last_error.clone(),
            managed: self.managed,
        }
    }
}

fn lock(record: &Mutex<DaemonRecord>) -> MutexGuard<'_, DaemonRecord> {
    record.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Health polling budget used by `start`.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub health_attempts: u32,
    pub health_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            health_attempts: HEALTH_ATTEMPTS,
            health_interval: HEALTH_INTERVAL,
        }
    }
}

pub struct Manager {
    record: Arc<Mutex<DaemonRecord>>,
    probe: Box<dyn HealthCheck>,
    installer: Installer,
    supervisor: Box<dyn Supervisor>,
    launch: Launch,
    timing: Timing,
    stop_on_exit: bool,
}

impl Manager {
    pub fn new(
        probe: Box<dyn HealthCheck>,
        installer: Installer,
        supervisor: Box<dyn Supervisor>,
        launch: Launch,
    ) -> Self {
        let record = DaemonRecord {
            version: installer.local_version(),
            ..DaemonRecord::default()
        };
        Self {
            record: Arc::new(Mutex::new(record)),
            probe,
            installer,
            supervisor,
            launch,
            timing: Timing::default(),
            stop_on_exit: true,
        }
    }

    /// Build the production manager described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, WardenError> {
        let strategy =
            Strategy::from_config(&config.supervisor.strategy).map_err(WardenError::Config)?;
        let layout = Layout::new(&config.agent.data_dir);
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let supervisor = strategy.build(&layout, &config.supervisor.service_label, events_tx);
        let source = GithubReleases::new(&config.release.latest_url, &config.release.download_base);
        let launch = Launch::new(&layout, config.agent.env.clone());
        let installer = Installer::new(layout, Box::new(source));
        debug!(%strategy, data_dir = %config.agent.data_dir.display(), "building lifecycle manager");

        Ok(Self::new(
            Box::new(HttpProbe::new(&config.agent.health_url)),
            installer,
            supervisor,
            launch,
        )
        .with_stop_on_exit(config.agent.stop_on_exit)
        .with_exit_events(events_rx))
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_stop_on_exit(mut self, stop_on_exit: bool) -> Self {
        self.stop_on_exit = stop_on_exit;
        self
    }

    /// Apply owned-child exit events from `events` on a listener thread.
    /// The thread ends once every sender is dropped.
    pub fn with_exit_events(self, events: Receiver<ChildExit>) -> Self {
        let record = Arc::clone(&self.record);
        let spawned = thread::Builder::new()
            .name("warden-exit-listener".to_string())
            .spawn(move || {
                for exit in events {
                    if lock(&record).apply_child_exit(&exit) {
                        info!(pid = exit.pid, %exit, "agent process exited");
                    } else {
                        debug!(pid = exit.pid, %exit, "ignoring exit of untracked process");
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start exit listener; child exits will go unnoticed");
        }
        self
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    pub fn strategy(&self) -> Strategy {
        self.supervisor.strategy()
    }

    /// Current record without re-probing.
    pub fn snapshot(&self) -> DaemonStatus {
        lock(&self.record).snapshot()
    }

    /// Re-validate the record against a fresh probe.
    fn refresh(&self) {
        let report = self.probe.probe();
        let tracked = self.supervisor.pid();
        let mut rec = lock(&self.record);
        match report {
            Some(report) => rec.apply_probe(report, tracked),
            None => rec.apply_probe_failure(),
        }
    }

    /// Bring the daemon up, adopting a healthy instance if one is already
    /// answering.
    pub fn start(&self) -> Result<(), DaemonError> {
        {
            let mut rec = lock(&self.record);
            if matches!(rec.state, DaemonState::Running | DaemonState::Starting) {
                debug!(state = %rec.state, "start requested; already up");
                return Ok(());
            }
            rec.state = DaemonState::Starting;
        }

        if let Some(report) = self.probe.probe() {
            let tracked = self.supervisor.pid();
            let mut rec = lock(&self.record);
            rec.apply_probe(report, tracked);
            info!(version = %rec.version, managed = rec.managed, "found a running agent; adopting it");
            return Ok(());
        }

        if let Err(e) = self.installer.ensure_binary() {
            lock(&self.record).fail(e.to_string());
            return Err(e);
        }

        lock(&self.record).last_error.clear();
        let pid = match self.supervisor.start(&self.launch) {
            Ok(pid) => pid,
            Err(e) => {
                warn!(error = %e, "agent failed to launch");
                lock(&self.record).fail(e.to_string());
                return Err(e);
            }
        };
        // Tracked before it is healthy so an early exit is attributed.
        lock(&self.record).pid = pid;

        for _ in 0..self.timing.health_attempts {
            thread::sleep(self.timing.health_interval);
            if let Some(report) = self.probe.probe() {
                let mut rec = lock(&self.record);
                rec.state = DaemonState::Running;
                rec.version = report.version;
                rec.managed = true;
                rec.start_time = Some(Instant::now());
                rec.last_error.clear();
                if pid.is_some() {
                    rec.pid = pid;
                }
                info!(version = %rec.version, pid = rec.pid.unwrap_or(0), strategy = %self.supervisor.strategy(), "agent is up");
                return Ok(());
            }
            let rec = lock(&self.record);
            if pid.is_some() && rec.pid.is_none() && rec.state == DaemonState::Error {
                return Err(DaemonError::Start(rec.last_error.clone()));
            }
        }

        let budget = self.timing.health_interval * self.timing.health_attempts;
        let mut rec = lock(&self.record);
        rec.fail(format!(
            "daemon started but not responding after {}s",
            budget.as_secs()
        ));
        warn!(budget_ms = budget.as_millis() as u64, "agent never answered the health probe");
        Err(DaemonError::HealthTimeout)
    }

    /// Stop the daemon if it is running and this manager is responsible
    /// for it.
    ///
    /// Anything else is a no-op: a healthy instance somebody else started
    /// is left alone, and nothing is signalled unless the fresh probe says
    /// the daemon is up. Supervisor failures are logged; once attempted, a
    /// stop always succeeds.
    pub fn stop(&self) -> Result<(), DaemonError> {
        self.refresh();
        {
            let mut rec = lock(&self.record);
            match (rec.state, rec.managed) {
                (DaemonState::Running, true) => {}
                (DaemonState::Running, false) => {
                    info!("agent was not started by warden; leaving it running");
                    return Ok(());
                }
                (state, _) => {
                    debug!(%state, "stop requested; agent not running");
                    return Ok(());
                }
            }
            // The exit this stop causes is not an unexpected one.
            rec.pid = None;
        }

        if let Err(e) = self.supervisor.stop() {
            warn!(error = %e, "supervisor failed to stop the agent");
        }

        let mut rec = lock(&self.record);
        rec.state = DaemonState::Stopped;
        rec.managed = false;
        rec.last_error.clear();
        rec.start_time = None;
        rec.pid = None;
        info!("agent stopped");
        Ok(())
    }

    pub fn restart(&self) -> Result<(), DaemonError> {
        self.stop()?;
        self.start()
    }

    /// Fresh snapshot; always re-probes first.
    pub fn status(&self) -> DaemonStatus {
        self.refresh();
        self.snapshot()
    }

    /// Replace the binary with the latest release and start it again.
    /// Returns the installed tag.
    pub fn update(&self) -> Result<String, DaemonError> {
        self.stop()?;
        let tag = self.installer.latest_tag()?;
        let version = self.installer.download(&tag)?;
        lock(&self.record).version = version;

        self.start()
            .map_err(|e| DaemonError::PartialUpdate(e.to_string()))?;
        let rec = lock(&self.record);
        if !rec.managed {
            warn!(serving = %rec.version, "an agent not started by warden is still serving; the update takes effect once it restarts");
        }
        Ok(tag)
    }

    /// Apply the exit policy: only an owned child is tied to this process.
    pub fn shutdown(&self) {
        if self.supervisor.strategy() == Strategy::Child && self.stop_on_exit {
            info!("stopping owned agent on exit");
            let _ = self.stop();
            // A child that never answered the probe is still ours to reap.
            if self.supervisor.pid().is_some()
                && let Err(e) = self.supervisor.stop()
            {
                warn!(error = %e, "failed to stop owned agent on exit");
            }
        } else {
            debug!(strategy = %self.supervisor.strategy(), "leaving agent running on exit");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
