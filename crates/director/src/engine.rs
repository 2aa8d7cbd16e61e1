//! The reconciliation engine: a VIP-gated state machine that drives kernel
//! state toward the declarative config.
//!
//! One task owns the select over shutdown / ticker / reconcile-request /
//! reload, so the three wakeup sources are totally ordered. All durable
//! runtime state (config snapshot, VIP flag, pending flags, effective-weight
//! map, retry bookkeeping) lives behind a single mutex; the lock is never
//! held across I/O or observer callbacks.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use common::{Error, Result, TickerFactory};
use health::{
    BackendKey, Checker, HealthObserver, HealthState, Scheduler, StateChange, Target, TcpChecker,
    WeightChange,
};
use observability::{AuditEvent, Auditor, MetricsRegistry};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::netmon::NetworkManager;

/// The engine's view of the IPVS reconciler.
pub trait Reconciler: Send + Sync {
    /// One pass toward `desired`; an empty list empties kernel state for the
    /// managed VIP.
    fn apply(&self, desired: &[config::Service], vip: Ipv4Addr) -> Result<()>;
}

impl Reconciler for ipvs::Reconciler {
    fn apply(&self, desired: &[config::Service], vip: Ipv4Addr) -> Result<()> {
        ipvs::Reconciler::apply(self, desired, vip)
    }
}

/// Engine construction parameters. Collaborators are injected; nothing here
/// reaches for process-wide state.
pub struct EngineOptions {
    pub config_path: PathBuf,
    pub network: Arc<dyn NetworkManager>,
    pub reconciler: Arc<dyn Reconciler>,
    /// Coalesced reload pings (SIGHUP).
    pub reload_rx: mpsc::Receiver<()>,
    pub metrics: Arc<MetricsRegistry>,
    pub auditor: Auditor,
    pub checker: Arc<dyn Checker>,
    pub ticker_factory: TickerFactory,
}

impl EngineOptions {
    pub fn new(
        config_path: impl Into<PathBuf>,
        network: Arc<dyn NetworkManager>,
        reconciler: Arc<dyn Reconciler>,
        reload_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            network,
            reconciler,
            reload_rx,
            metrics: Arc::new(MetricsRegistry::new()),
            auditor: Auditor::default().with_component("daemon"),
            checker: Arc::new(TcpChecker::new()),
            ticker_factory: common::interval_ticker_factory(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_auditor(mut self, auditor: Auditor) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_ticker_factory(mut self, factory: TickerFactory) -> Self {
        self.ticker_factory = factory;
        self
    }
}

#[derive(Default)]
struct EngineState {
    cfg: Option<Arc<config::Config>>,
    cfg_hash: String,
    active: bool,
    pending_reconcile: bool,
    pending_disable: bool,
    backend_weights: HashMap<BackendKey, u32>,
    reconcile_attempts: u32,
    next_retry: Option<Instant>,
}

struct EngineInner {
    config_path: PathBuf,
    network: Arc<dyn NetworkManager>,
    reconciler: Arc<dyn Reconciler>,
    metrics: Arc<MetricsRegistry>,
    auditor: Auditor,
    checker: Arc<dyn Checker>,
    tickers: TickerFactory,
    reconcile_tx: mpsc::Sender<()>,
    state: Mutex<EngineState>,
}

/// The top-level control loop. Constructed once, consumed by [`Engine::run`].
pub struct Engine {
    inner: Arc<EngineInner>,
    reload_rx: mpsc::Receiver<()>,
    reconcile_rx: mpsc::Receiver<()>,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Result<Self> {
        if opts.config_path.as_os_str().is_empty() {
            return Err(Error::other("missing config path"));
        }

        // Capacity 1: weight changes between two passes coalesce into one
        // request; the desired state composed at reconcile time already
        // reflects the latest weights.
        let (reconcile_tx, reconcile_rx) = mpsc::channel(1);

        let inner = Arc::new(EngineInner {
            config_path: opts.config_path,
            network: opts.network,
            reconciler: opts.reconciler,
            metrics: opts.metrics,
            auditor: opts.auditor,
            checker: opts.checker,
            tickers: opts.ticker_factory,
            reconcile_tx,
            state: Mutex::new(EngineState::default()),
        });

        Ok(Self {
            inner,
            reload_rx: opts.reload_rx,
            reconcile_rx,
        })
    }

    /// Run until the shutdown flag flips. Startup failures (unreadable or
    /// invalid config) are fatal; everything after that retries in place.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Engine {
            inner,
            mut reload_rx,
            mut reconcile_rx,
        } = self;

        inner.load_and_set_config(true)?;

        let mut scheduler = EngineInner::start_health_scheduler(&inner)?;

        if let Err(e) = inner.initial_vip_sync() {
            warn!(error = %e, "initial VIP sync failed");
        }

        let mut tick_interval = inner.reconcile_interval();
        let mut ticker = (inner.tickers)(tick_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    inner.on_tick();
                }
                Some(_) = reconcile_rx.recv() => {
                    inner.try_reconcile();
                }
                Some(_) = reload_rx.recv() => {
                    EngineInner::on_reload(&inner, &mut scheduler).await;
                    let next_interval = inner.reconcile_interval();
                    if next_interval != tick_interval {
                        info!(
                            interval_ms = next_interval.as_millis() as u64,
                            "reconcile interval changed; restarting ticker"
                        );
                        ticker = (inner.tickers)(next_interval);
                        tick_interval = next_interval;
                    }
                }
            }
        }

        if let Some(mut scheduler) = scheduler.take() {
            scheduler.stop().await;
        }
        Ok(())
    }
}

impl EngineInner {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_config(&self) -> Option<Arc<config::Config>> {
        self.state().cfg.clone()
    }

    fn reconcile_interval(&self) -> Duration {
        match self.current_config() {
            Some(cfg) => Duration::from_millis(cfg.daemon.reconcile_interval_ms),
            None => Duration::from_secs(1),
        }
    }

    /// Load, validate, and install a new config snapshot. On any failure the
    /// previous snapshot stays untouched.
    fn load_and_set_config(&self, startup: bool) -> Result<()> {
        let cfg = config::load(&self.config_path).map_err(Error::config)?;
        config::validate(&cfg).map_err(Error::config)?;
        let hash = hash_config(&cfg)?;

        let services_count = cfg.services.len();
        let backends_count = cfg.backend_count();

        let old_hash = {
            let mut state = self.state();
            let old_hash = std::mem::replace(&mut state.cfg_hash, hash.clone());
            state.cfg = Some(Arc::new(cfg));
            // New snapshots start with a clean slate; fresh probes republish.
            state.backend_weights.clear();
            old_hash
        };

        self.auditor.emit(
            AuditEvent::ConfigLoaded,
            vec![
                ("config_hash", hash.clone()),
                ("services_count", services_count.to_string()),
                ("backends_count", backends_count.to_string()),
                ("startup", startup.to_string()),
            ],
        );
        if !old_hash.is_empty() && old_hash != hash {
            self.auditor.emit(
                AuditEvent::ConfigChanged,
                vec![("old_hash", old_hash), ("new_hash", hash)],
            );
        }

        Ok(())
    }

    /// Build probe targets from the current snapshot and start one prober
    /// per target. Returns `None` when no service has health enabled.
    fn start_health_scheduler(inner: &Arc<EngineInner>) -> Result<Option<Scheduler>> {
        let cfg = inner
            .current_config()
            .ok_or_else(|| Error::other("missing config"))?;

        let targets = health_targets(&cfg.services);
        if targets.is_empty() {
            return Ok(None);
        }

        let observer = Arc::new(EngineObserver {
            inner: Arc::downgrade(inner),
        });
        let scheduler = Scheduler::start(
            inner.checker.clone(),
            observer,
            targets,
            inner.tickers.clone(),
        )?;

        Ok(Some(scheduler))
    }

    fn frontend_vip(cfg: &config::Config) -> Option<Ipv4Addr> {
        cfg.network.frontend.vip
    }

    fn initial_vip_sync(&self) -> Result<()> {
        let cfg = self
            .current_config()
            .ok_or_else(|| Error::other("missing config"))?;
        let vip = Self::frontend_vip(&cfg).ok_or_else(|| Error::config("missing VIP"))?;

        let present = self.network.vip_present(vip)?;

        {
            let mut state = self.state();
            state.active = present;
            state.pending_reconcile = present;
            state.pending_disable = false;
        }
        self.metrics
            .set_vip_owner(&cfg.node.name, &vip.to_string(), present);

        if present {
            info!(vip = %vip, "VIP present at startup; starting active");
            self.try_reconcile();
        } else {
            info!(vip = %vip, "VIP not present at startup; starting standby");
        }
        Ok(())
    }

    /// Per-tick VIP check with edge-triggered transitions.
    fn on_tick(&self) {
        let Some(cfg) = self.current_config() else {
            return;
        };
        let Some(vip) = Self::frontend_vip(&cfg) else {
            return;
        };
        let was_active = self.state().active;

        let present = match self.network.vip_present(vip) {
            Ok(present) => present,
            Err(e) => {
                warn!(vip = %vip, error = %e, "VIP check failed");
                return;
            }
        };

        match (present, was_active) {
            (true, false) => self.on_vip_acquired(&cfg, vip),
            (false, true) => self.on_vip_released(&cfg, vip),
            _ => self
                .metrics
                .set_vip_owner(&cfg.node.name, &vip.to_string(), present),
        }

        if present {
            self.try_reconcile();
        } else {
            self.try_disable();
        }
    }

    fn on_vip_acquired(&self, cfg: &config::Config, vip: Ipv4Addr) {
        info!(vip = %vip, "VIP acquired; becoming active");
        self.auditor
            .emit(AuditEvent::VipAcquired, vec![("vip", vip.to_string())]);

        {
            let mut state = self.state();
            state.active = true;
            state.pending_disable = false;
            state.pending_reconcile = true;
        }

        self.metrics
            .inc_vip_transition(&cfg.node.name, &vip.to_string(), "acquire");
        self.metrics
            .set_vip_owner(&cfg.node.name, &vip.to_string(), true);
    }

    fn on_vip_released(&self, cfg: &config::Config, vip: Ipv4Addr) {
        info!(vip = %vip, "VIP released; becoming standby");
        self.auditor
            .emit(AuditEvent::VipReleased, vec![("vip", vip.to_string())]);

        {
            let mut state = self.state();
            state.active = false;
            state.pending_reconcile = false;
            state.pending_disable = true;
        }

        self.metrics
            .inc_vip_transition(&cfg.node.name, &vip.to_string(), "release");
        self.metrics
            .set_vip_owner(&cfg.node.name, &vip.to_string(), false);
    }

    async fn on_reload(inner: &Arc<EngineInner>, scheduler: &mut Option<Scheduler>) {
        info!("reload requested (SIGHUP)");

        // Load and validate the new config first; the old scheduler keeps
        // running until the replacement is known good.
        if let Err(e) = inner.load_and_set_config(false) {
            error!(
                error = %e,
                "config reload failed; keeping previous config and health scheduler"
            );
            return;
        }

        if let Some(mut old) = scheduler.take() {
            old.stop().await;
        }
        match Self::start_health_scheduler(inner) {
            Ok(new) => *scheduler = new,
            Err(e) => {
                error!(error = %e, "failed to restart health scheduler after reload");
            }
        }

        let active = {
            let mut state = inner.state();
            state.pending_reconcile = true;
            state.active
        };
        if active {
            inner.try_reconcile();
        }
    }

    /// One reconcile attempt, gated on active + pending + the retry deadline.
    fn try_reconcile(&self) {
        let (cfg, active, pending, weights, attempts) = {
            let state = self.state();
            if let Some(deadline) = state.next_retry {
                if Instant::now() < deadline {
                    return;
                }
            }
            (
                state.cfg.clone(),
                state.active,
                state.pending_reconcile,
                state.backend_weights.clone(),
                state.reconcile_attempts,
            )
        };

        let Some(cfg) = cfg else { return };
        if !active || !pending {
            return;
        }
        let Some(vip) = Self::frontend_vip(&cfg) else {
            return;
        };

        let desired = apply_effective_weights(&cfg.services, &weights);

        let start = Instant::now();
        let result = self.reconciler.apply(&desired, vip);
        self.metrics
            .set_reconcile_duration_ms(&cfg.node.name, start.elapsed().as_millis() as i64);

        match result {
            Ok(()) => {
                self.metrics.inc_reconcile_run(&cfg.node.name, "success");
                let mut state = self.state();
                state.pending_reconcile = false;
                state.reconcile_attempts = 0;
                state.next_retry = None;
            }
            Err(e) => {
                self.metrics.inc_reconcile_run(&cfg.node.name, "failure");

                let backoff = backoff_for_attempt(attempts + 1);
                {
                    let mut state = self.state();
                    state.pending_reconcile = true;
                    state.reconcile_attempts += 1;
                    state.next_retry = Some(Instant::now() + backoff);
                }
                error!(
                    error = %e,
                    attempts = attempts + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "reconcile failed"
                );
            }
        }
    }

    /// One disable attempt. Deletes are cheap and idempotent, so standby
    /// retries every tick without backoff.
    fn try_disable(&self) {
        let (cfg, active, pending) = {
            let state = self.state();
            (state.cfg.clone(), state.active, state.pending_disable)
        };

        let Some(cfg) = cfg else { return };
        if active || !pending {
            return;
        }
        let Some(vip) = Self::frontend_vip(&cfg) else {
            return;
        };

        let start = Instant::now();
        let result = self.reconciler.apply(&[], vip);
        self.metrics
            .set_reconcile_duration_ms(&cfg.node.name, start.elapsed().as_millis() as i64);

        match result {
            Ok(()) => {
                self.metrics.inc_reconcile_run(&cfg.node.name, "success");
                self.state().pending_disable = false;
            }
            Err(e) => {
                self.metrics.inc_reconcile_run(&cfg.node.name, "failure");
                error!(error = %e, "disable failed");
            }
        }
    }

    fn on_health_state_change(&self, change: StateChange) {
        let Some(cfg) = self.current_config() else {
            return;
        };

        self.metrics.set_backend_healthy(
            &cfg.node.name,
            &change.key.service,
            &change.key.backend.to_string(),
            change.new == HealthState::Healthy,
        );

        self.auditor.emit(
            AuditEvent::HealthStateChanged,
            vec![
                ("service_name", change.key.service.clone()),
                ("backend", change.key.backend.to_string()),
                ("old_state", change.old.to_string()),
                ("new_state", change.new.to_string()),
            ],
        );
    }

    fn on_health_weight_change(&self, change: WeightChange) {
        let active = {
            let mut state = self.state();
            if state.cfg.is_none() {
                return;
            }
            state.backend_weights.insert(change.key.clone(), change.new);
            state.pending_reconcile = true;
            state.active
        };
        let Some(cfg) = self.current_config() else {
            return;
        };

        self.metrics.set_backend_weight(
            &cfg.node.name,
            &change.key.service,
            &change.key.backend.to_string(),
            i64::from(change.new),
        );

        self.auditor.emit(
            AuditEvent::BackendWeightChanged,
            vec![
                ("service_name", change.key.service.clone()),
                ("backend", change.key.backend.to_string()),
                (
                    "old_weight",
                    change
                        .old
                        .map_or_else(|| "unset".to_string(), |w| w.to_string()),
                ),
                ("new_weight", change.new.to_string()),
                ("reason", change.reason.to_string()),
            ],
        );

        if active {
            // Full channel means a reconcile is already queued.
            let _ = self.reconcile_tx.try_send(());
        }
    }
}

/// Observer handed to the health scheduler. Holds a weak reference so the
/// scheduler can never keep the engine alive (or reach past this interface).
struct EngineObserver {
    inner: Weak<EngineInner>,
}

impl HealthObserver for EngineObserver {
    fn on_state_change(&self, change: StateChange) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_health_state_change(change);
        }
    }

    fn on_weight_change(&self, change: WeightChange) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_health_weight_change(change);
        }
    }
}

/// SHA-256 over the canonical JSON serialization; stable across reloads of
/// an unchanged config.
fn hash_config(cfg: &config::Config) -> Result<String> {
    let bytes = serde_json::to_vec(cfg)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Probe targets for every backend of every health-enabled service.
fn health_targets(services: &[config::Service]) -> Vec<Target> {
    let mut targets = Vec::new();
    for svc in services {
        if !svc.health.enabled {
            continue;
        }
        for backend in &svc.backends {
            targets.push(Target {
                key: BackendKey {
                    service: svc.name.clone(),
                    backend: backend.address,
                },
                check_port: svc.health.port,
                interval: Duration::from_millis(svc.health.interval_ms),
                timeout: Duration::from_millis(svc.health.timeout_ms),
                fail_after: svc.health.fail_after,
                recover_after: svc.health.recover_after,
                configured_weight: backend.weight,
            });
        }
    }
    targets
}

/// Overlay published effective weights onto a copy of the declarative
/// services. Backends without a published weight keep their configured one.
fn apply_effective_weights(
    services: &[config::Service],
    weights: &HashMap<BackendKey, u32>,
) -> Vec<config::Service> {
    let mut copied = services.to_vec();
    for svc in &mut copied {
        for backend in &mut svc.backends {
            let key = BackendKey {
                service: svc.name.clone(),
                backend: backend.address,
            };
            if let Some(weight) = weights.get(&key) {
                backend.weight = *weight;
            }
        }
    }
    copied
}

/// Exponential backoff for consecutive reconcile failures.
///
/// Attempt 1 retries immediately, attempt 2 after 5s (+ up to 1s jitter),
/// attempt 3 and later after 10s (+ up to 2s jitter).
fn backoff_for_attempt(attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }

    let mut rng = rand::thread_rng();
    if attempt == 2 {
        Duration::from_secs(5) + Duration::from_millis(rng.gen_range(0..1000))
    } else {
        Duration::from_secs(10) + Duration::from_millis(rng.gen_range(0..2000))
    }
}
