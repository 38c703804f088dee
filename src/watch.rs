//! Foreground supervision for `warden run`.
//!
//! Starts the daemon, then re-checks its status on a fixed interval and
//! logs every state change until SIGINT or SIGTERM arrives. On the way out
//! the manager's exit policy decides whether the daemon is stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use signal_hook::flag;
use tracing::{info, warn};

use crate::manager::Manager;
use crate::types::DaemonStatus;

/// Granularity at which the shutdown flag is checked between status polls.
const TICK: Duration = Duration::from_millis(100);

/// Register SIGTERM/SIGINT handlers that raise the returned flag.
pub fn register_signal_handler() -> Result<Arc<AtomicBool>> {
    let term = Arc::new(AtomicBool::new(false));
    flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))
        .context("registering SIGTERM handler")?;
    flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))
        .context("registering SIGINT handler")?;
    Ok(term)
}

/// Whether the change from `prev` to `next` is worth reporting.
fn changed(prev: Option<&DaemonStatus>, next: &DaemonStatus) -> bool {
    match prev {
        None => true,
        Some(p) => {
            p.state != next.state
                || p.managed != next.managed
                || p.version != next.version
                || p.error != next.error
        }
    }
}

/// Run until `shutdown` is raised. `on_change` sees the first status and
/// every status that differs from the one before it.
pub fn run_loop<F>(manager: &Manager, interval: Duration, shutdown: &AtomicBool, mut on_change: F)
where
    F: FnMut(&DaemonStatus),
{
    if let Err(e) = manager.start() {
        warn!(error = %e, "initial start failed; watching anyway");
    }

    let mut last: Option<DaemonStatus> = None;
    let mut next_check = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        if Instant::now() >= next_check {
            let status = manager.status();
            if changed(last.as_ref(), &status) {
                info!(state = %status.state, managed = status.managed, version = %status.version, "agent status");
                on_change(&status);
            }
            last = Some(status);
            next_check = Instant::now() + interval;
        }
        thread::sleep(TICK);
    }

    info!("shutting down");
    manager.shutdown();
}
