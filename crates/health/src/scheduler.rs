//! Per-backend probe scheduling and the health state machine.
//!
//! One prober task per `(service, backend)` target, each with its own ticker
//! at the service's configured interval. Probers own their state machine
//! outright, so probes for a target are naturally serialized and no lock is
//! held across I/O or observer callbacks.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use common::{Error, Result, Ticker, TickerFactory};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::checker::Checker;

/// Health state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "UNKNOWN"),
            HealthState::Healthy => write!(f, "HEALTHY"),
            HealthState::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Identity of a probe target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendKey {
    pub service: String,
    pub backend: Ipv4Addr,
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.backend)
    }
}

/// One probe target, materialized from a service's health stanza.
#[derive(Debug, Clone)]
pub struct Target {
    pub key: BackendKey,
    pub check_port: u16,
    pub interval: Duration,
    pub timeout: Duration,
    pub fail_after: u32,
    pub recover_after: u32,
    pub configured_weight: u32,
}

/// Emitted when a backend's health state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub key: BackendKey,
    pub old: HealthState,
    pub new: HealthState,
}

/// Emitted when a backend's effective weight changes. `old` is `None` before
/// the first publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightChange {
    pub key: BackendKey,
    pub old: Option<u32>,
    pub new: u32,
    pub reason: &'static str,
}

/// Callback target for health events. Implementations must not call back
/// into the scheduler.
pub trait HealthObserver: Send + Sync {
    fn on_state_change(&self, change: StateChange);
    fn on_weight_change(&self, change: WeightChange);
}

/// Owns the prober tasks for one config generation.
pub struct Scheduler {
    stop_tx: watch::Sender<bool>,
    probers: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl Scheduler {
    /// Validate the targets and start one prober per target.
    pub fn start(
        checker: Arc<dyn Checker>,
        observer: Arc<dyn HealthObserver>,
        targets: Vec<Target>,
        tickers: TickerFactory,
    ) -> Result<Self> {
        let mut seen: HashSet<BackendKey> = HashSet::new();
        for target in &targets {
            validate_target(target)?;
            if !seen.insert(target.key.clone()) {
                return Err(Error::health(format!("duplicate target: {}", target.key)));
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let probers = targets
            .into_iter()
            .map(|target| {
                let ticker = tickers(target.interval);
                tokio::spawn(run_prober(
                    target,
                    checker.clone(),
                    observer.clone(),
                    ticker,
                    stop_rx.clone(),
                ))
            })
            .collect();

        Ok(Self {
            stop_tx,
            probers,
            stopped: false,
        })
    }

    pub fn target_count(&self) -> usize {
        self.probers.len()
    }

    /// Signal every prober and wait for each to finish. Idempotent; an
    /// in-flight probe completes (bounded by its timeout) before its task
    /// exits.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let _ = self.stop_tx.send(true);
        for handle in self.probers.drain(..) {
            let _ = handle.await;
        }
    }
}

fn validate_target(target: &Target) -> Result<()> {
    if target.key.service.is_empty() {
        return Err(Error::health("missing service name"));
    }
    if target.check_port < 1 {
        return Err(Error::health(format!(
            "invalid check port: {}",
            target.check_port
        )));
    }
    if target.interval.is_zero() {
        return Err(Error::health("invalid interval: 0"));
    }
    if target.timeout.is_zero() {
        return Err(Error::health("invalid timeout: 0"));
    }
    if target.fail_after < 1 {
        return Err(Error::health(format!(
            "invalid fail_after: {}",
            target.fail_after
        )));
    }
    if target.recover_after < 1 {
        return Err(Error::health(format!(
            "invalid recover_after: {}",
            target.recover_after
        )));
    }
    Ok(())
}

async fn run_prober(
    target: Target,
    checker: Arc<dyn Checker>,
    observer: Arc<dyn HealthObserver>,
    mut ticker: Box<dyn Ticker>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut state = HealthState::Unknown;
    let mut consecutive_successes: u32 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut effective_weight: Option<u32> = None;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => return,
            _ = ticker.tick() => {}
        }

        let success = checker
            .check(target.key.backend, target.check_port, target.timeout)
            .await
            .is_ok();

        let old_state = state;
        let old_weight = effective_weight;

        if success {
            consecutive_successes += 1;
            consecutive_failures = 0;
            match state {
                HealthState::Unknown => state = HealthState::Healthy,
                HealthState::Unhealthy if consecutive_successes >= target.recover_after => {
                    state = HealthState::Healthy
                }
                _ => {}
            }
        } else {
            consecutive_failures += 1;
            consecutive_successes = 0;
            match state {
                HealthState::Unknown => state = HealthState::Unhealthy,
                HealthState::Healthy if consecutive_failures >= target.fail_after => {
                    state = HealthState::Unhealthy
                }
                _ => {}
            }
        }

        match state {
            HealthState::Healthy => effective_weight = Some(target.configured_weight),
            HealthState::Unhealthy => effective_weight = Some(0),
            HealthState::Unknown => {}
        }

        if state != old_state {
            if state == HealthState::Unhealthy {
                warn!(target = %target.key, old = %old_state, new = %state, "backend health changed");
            } else {
                debug!(target = %target.key, old = %old_state, new = %state, "backend health changed");
            }
            observer.on_state_change(StateChange {
                key: target.key.clone(),
                old: old_state,
                new: state,
            });
        }
        if effective_weight != old_weight {
            if let Some(new) = effective_weight {
                observer.on_weight_change(WeightChange {
                    key: target.key.clone(),
                    old: old_weight,
                    new,
                    reason: "health",
                });
            }
        }
    }
}
