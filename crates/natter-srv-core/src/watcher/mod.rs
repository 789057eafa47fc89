//! External IP watcher
//!
//! Wakes on a short fixed interval but only calls the resolver once the
//! configured check interval has elapsed, so most wakes are no-ops. When the
//! address changes it sets the restart flag and terminates the child, which
//! closes its output and lets the supervisor loop notice right away.

use crate::control::Control;
use crate::resolver::IpResolver;
use crate::supervisor::ChildHandle;

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;
use tracing::{info, warn};

/// Last known external IP, shared between the watcher and the orchestrator
#[derive(Debug, Clone, Default)]
pub struct ExternalIp {
    inner: Arc<Mutex<Option<Ipv4Addr>>>,
}

impl ExternalIp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Ipv4Addr> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, ip: Ipv4Addr) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(ip);
    }
}

/// What a single wake did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The check interval has not elapsed yet
    NotDue,
    /// Every lookup service failed; nothing changed
    LookupFailed,
    /// First successful check; the address was recorded
    Recorded(Ipv4Addr),
    /// The address is the same as before
    Unchanged(Ipv4Addr),
    /// The address changed and a restart was requested
    Changed { from: Ipv4Addr, to: Ipv4Addr },
}

/// Background external IP watcher
pub struct IpWatcher {
    resolver: Arc<IpResolver>,
    control: Control,
    child: ChildHandle,
    external_ip: ExternalIp,
    wake_interval: Duration,
    check_interval: Duration,
    last_check: Option<Instant>,
}

impl IpWatcher {
    pub fn new(
        resolver: Arc<IpResolver>,
        control: Control,
        child: ChildHandle,
        external_ip: ExternalIp,
        wake_interval: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            resolver,
            control,
            child,
            external_ip,
            wake_interval,
            check_interval,
            last_check: None,
        }
    }

    /// Run until shutdown
    pub async fn run(mut self) {
        info!(
            "IP watcher started (check every {}s)",
            self.check_interval.as_secs()
        );

        while self.control.sleep(self.wake_interval).await {
            self.tick().await;
        }

        info!("IP watcher stopped");
    }

    /// One wake: check the address if the interval has elapsed
    pub async fn tick(&mut self) -> CheckOutcome {
        let now = Instant::now();
        if let Some(last) = self.last_check
            && now.duration_since(last) < self.check_interval
        {
            return CheckOutcome::NotDue;
        }
        self.last_check = Some(now);

        info!("Checking whether the external IP changed...");

        let ip = match self.resolver.resolve().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Could not determine the external IP, skipping this check: {}", e);
                log_next_check(self.check_interval);
                return CheckOutcome::LookupFailed;
            }
        };

        let Some(previous) = self.external_ip.get() else {
            self.external_ip.set(ip);
            info!("Current external IP: {}", ip);
            log_next_check(self.check_interval);
            return CheckOutcome::Recorded(ip);
        };

        if previous == ip {
            info!("External IP unchanged: {}", ip);
            log_next_check(self.check_interval);
            return CheckOutcome::Unchanged(ip);
        }

        warn!("External IP changed: {} -> {}", previous, ip);
        self.external_ip.set(ip);
        self.control.request_restart();

        if self.child.terminate().await {
            warn!("Terminated natter so it restarts on the new address");
        }

        CheckOutcome::Changed {
            from: previous,
            to: ip,
        }
    }
}

/// Wall-clock time of the next check, if it can be represented
pub fn next_check_at(check_interval: Duration) -> Option<DateTime<Local>> {
    let interval = chrono::TimeDelta::from_std(check_interval).ok()?;
    Local::now().checked_add_signed(interval)
}

/// Log the wall-clock time of the next check
pub fn log_next_check(check_interval: Duration) {
    match next_check_at(check_interval) {
        Some(next) => info!("Next IP check at {}", next.format("%Y-%m-%d %H:%M:%S")),
        None => info!("Next IP check at unknown time (in {}s)", check_interval.as_secs()),
    }
}
