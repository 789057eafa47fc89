//! Orchestrator
//!
//! Ties the supervisor, reconciler and IP watcher into the run loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   lines    ┌──────────────┐  Endpoint  ┌──────────────┐
//! │ natter      │──────────► │ Supervisor   │──────────► │ Reconciler   │──► DnsApi
//! │ (child)     │            └──────────────┘            └──────────────┘
//! └─────────────┘                   ▲ restart flag
//!        ▲ SIGTERM                  │
//!        └──────────────────┌──────────────┐
//!                           │ IpWatcher    │──► IpResolver
//!                           └──────────────┘
//! ```
//!
//! ## Loop
//!
//! 1. Start natter (retry every 60s on spawn failure)
//! 2. Monitor its output, reconciling each new endpoint
//! 3. Restart if the watcher asked for it, otherwise back off 10s after
//!    an abnormal exit
//! 4. Repeat until shutdown, then stop natter and the watcher

use crate::config::{SupervisorConfig, Timings};
use crate::control::Control;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::resolver::IpResolver;
use crate::srv::validate_srv_name;
use crate::supervisor::{ChildHandle, MonitorOutcome, Supervisor};
use crate::traits::{DnsApi, EndpointSink};
use crate::watcher::{ExternalIp, IpWatcher, log_next_check};

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the Orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Run loop started
    Started { srv_name: String },

    /// natter was spawned
    ChildStarted { pid: u32 },

    /// natter could not be spawned
    ChildStartFailed { error: String },

    /// A new endpoint was parsed from natter's output
    EndpointObserved { endpoint: Endpoint },

    /// Both records were written
    Reconciled { report: ReconcileReport },

    /// Reconciliation stopped at a failing call
    ReconcileFailed { endpoint: Endpoint, error: String },

    /// The external IP was seeded after the first endpoint
    ExternalIpSeeded { ip: Ipv4Addr },

    /// natter's output closed without a restart request
    AbnormalExit { code: Option<i32> },

    /// The watcher asked for a restart
    RestartRequested,

    /// natter was restarted after a restart request
    Restarted { pid: u32 },

    /// Run loop stopped
    Stopped { reason: String },
}

/// Non-blocking event emitter; a full channel drops the event
#[derive(Debug, Clone)]
struct EventSender {
    tx: mpsc::Sender<SupervisorEvent>,
}

impl EventSender {
    fn emit(&self, event: SupervisorEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping event: {:?}", event);
            }
            // Nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Endpoint sink used by the run loop
///
/// Reconciles in-line, then seeds the watcher's last known IP once.
struct ReconcileSink {
    reconciler: Reconciler,
    resolver: Arc<IpResolver>,
    external_ip: ExternalIp,
    check_interval: Duration,
    events: EventSender,
}

#[async_trait]
impl EndpointSink for ReconcileSink {
    async fn endpoint_changed(&mut self, endpoint: Endpoint) {
        self.events
            .emit(SupervisorEvent::EndpointObserved { endpoint });

        match self.reconciler.reconcile(&endpoint).await {
            Ok(report) => {
                info!("DNS records now point at {}", endpoint);
                self.events.emit(SupervisorEvent::Reconciled { report });
            }
            Err(e) => {
                error!("DNS reconciliation for {} failed: {}", endpoint, e);
                self.events.emit(SupervisorEvent::ReconcileFailed {
                    endpoint,
                    error: e.to_string(),
                });
            }
        }

        if self.external_ip.get().is_none() {
            match self.resolver.resolve().await {
                Ok(ip) => {
                    self.external_ip.set(ip);
                    info!("Current external IP: {}", ip);
                    log_next_check(self.check_interval);
                    self.events.emit(SupervisorEvent::ExternalIpSeeded { ip });
                }
                Err(e) => debug!("Could not seed external IP: {}", e),
            }
        }
    }
}

/// Top-level run loop
///
/// ## Lifecycle
///
/// 1. Create with [`Orchestrator::new()`]
/// 2. Optionally take a [`Control`] handle for shutdown
/// 3. Start with [`Orchestrator::run()`]; it returns after SIGINT/SIGTERM
pub struct Orchestrator {
    config: SupervisorConfig,
    api: Box<dyn DnsApi>,
    resolver: Arc<IpResolver>,
    control: Control,
    external_ip: ExternalIp,
    timings: Timings,
    events: EventSender,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver)
    pub fn new(
        config: SupervisorConfig,
        api: Box<dyn DnsApi>,
        resolver: IpResolver,
    ) -> Result<(Self, mpsc::Receiver<SupervisorEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let orchestrator = Self {
            config,
            api,
            resolver: Arc::new(resolver),
            control: Control::new(),
            external_ip: ExternalIp::new(),
            timings: Timings::default(),
            events: EventSender { tx },
        };

        Ok((orchestrator, rx))
    }

    /// Override the fixed delays
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Shared flags; `control().shutdown()` stops the loop
    pub fn control(&self) -> Control {
        self.control.clone()
    }

    /// Last known external IP (shared with the watcher)
    pub fn external_ip(&self) -> ExternalIp {
        self.external_ip.clone()
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_internal(ShutdownTrigger::Signals).await
    }

    /// Run until `shutdown_rx` fires (or `Control::shutdown` is called)
    ///
    /// With `None`, only `Control::shutdown` stops the loop.
    pub async fn run_with_shutdown(self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let trigger = match shutdown_rx {
            Some(rx) => ShutdownTrigger::Channel(rx),
            None => ShutdownTrigger::ControlOnly,
        };
        self.run_internal(trigger).await
    }

    async fn run_internal(self, trigger: ShutdownTrigger) -> Result<()> {
        let Self {
            config,
            api,
            resolver,
            control,
            external_ip,
            timings,
            events,
        } = self;

        validate_srv_name(&config.srv.name)?;

        info!("natter-srv starting");
        info!("SRV record: {}", config.srv.name);
        info!("natter port: {}", config.natter.port);
        info!(
            "IP check interval: {}s ({} min)",
            config.ip_check_interval,
            config.ip_check_interval / 60
        );
        events.emit(SupervisorEvent::Started {
            srv_name: config.srv.name.clone(),
        });

        let mut supervisor = Supervisor::new(&config.natter, control.clone(), &timings);
        let child = supervisor.handle();

        let listener = tokio::spawn(listen_for_shutdown(trigger, control.clone(), child.clone()));

        let watcher = IpWatcher::new(
            Arc::clone(&resolver),
            control.clone(),
            child.clone(),
            external_ip.clone(),
            timings.ip_wake_interval,
            config.ip_check_interval(),
        );
        let watcher_task = tokio::spawn(watcher.run());
        info!("IP watcher launched");

        let mut sink = ReconcileSink {
            reconciler: Reconciler::new(api, &config),
            resolver,
            external_ip,
            check_interval: config.ip_check_interval(),
            events: events.clone(),
        };

        while control.is_running() {
            if !supervisor.is_started() {
                match supervisor.start().await {
                    Ok(pid) => events.emit(SupervisorEvent::ChildStarted { pid }),
                    Err(e) => {
                        error!(
                            "{}; retrying in {}s",
                            e,
                            timings.spawn_retry.as_secs()
                        );
                        events.emit(SupervisorEvent::ChildStartFailed {
                            error: e.to_string(),
                        });
                        control.sleep(timings.spawn_retry).await;
                        continue;
                    }
                }
            }

            let outcome = supervisor.monitor(&mut sink).await;

            if !control.is_running() {
                break;
            }

            match outcome {
                MonitorOutcome::Shutdown => break,
                MonitorOutcome::RestartRequested => {
                    events.emit(SupervisorEvent::RestartRequested);
                    match supervisor.restart().await {
                        Ok(pid) => events.emit(SupervisorEvent::Restarted { pid }),
                        // The next iteration starts it again
                        Err(e) => warn!("Restart did not complete: {}", e),
                    }
                }
                MonitorOutcome::Exited { status } => {
                    let code = status.and_then(|s| s.code());
                    match status {
                        Some(status) => error!("natter exited abnormally: {}", status),
                        None => error!("natter output closed unexpectedly"),
                    }
                    events.emit(SupervisorEvent::AbnormalExit { code });

                    supervisor.stop().await;
                    warn!(
                        "Restarting natter in {}s",
                        timings.abnormal_exit_backoff.as_secs()
                    );
                    control.sleep(timings.abnormal_exit_backoff).await;
                }
            }
        }

        info!("Shutting down");
        control.shutdown();
        supervisor.stop().await;

        if let Err(e) = watcher_task.await {
            warn!("IP watcher task ended abnormally: {}", e);
        }
        listener.abort();

        events.emit(SupervisorEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!("natter-srv stopped");

        Ok(())
    }
}

/// Where the shutdown request comes from
enum ShutdownTrigger {
    /// SIGINT / SIGTERM (production)
    Signals,
    /// A oneshot channel (tests and embedding)
    Channel(oneshot::Receiver<()>),
    /// Only `Control::shutdown`
    ControlOnly,
}

/// Flip `running` off and terminate natter when the trigger fires
///
/// Terminating the child closes its output, which unblocks the monitor loop.
async fn listen_for_shutdown(trigger: ShutdownTrigger, control: Control, child: ChildHandle) {
    let reason = match trigger {
        ShutdownTrigger::Signals => wait_for_signal().await,
        ShutdownTrigger::Channel(rx) => {
            tokio::select! {
                _ = rx => "shutdown channel",
                _ = control.stopped() => return,
            }
        }
        ShutdownTrigger::ControlOnly => return,
    };

    info!("Received {}, cleaning up...", reason);
    control.shutdown();
    child.terminate().await;
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install signal handlers: {}", e);
            return match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(_) => std::future::pending().await,
            };
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            error!("Failed to wait for CTRL-C: {}", e);
            std::future::pending().await
        }
    }
}
