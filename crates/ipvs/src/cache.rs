//! Read-through TTL cache over the kernel director.
//!
//! Halves netlink round-trips in the reconcile loop: reads are served from
//! cache while fresh, any write invalidates everything. Readers always get
//! deep copies, so caller mutation cannot poison cached state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use common::Result;

use crate::director::Director;
use crate::types::{Destination, Service};

/// Settings for the state cache, typically derived from
/// `daemon.state_cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            // Half the typical 1s reconcile interval.
            ttl: Duration::from_millis(500),
        }
    }
}

impl CacheSettings {
    pub fn from_daemon(cfg: &config::StateCacheConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            ttl: Duration::from_millis(cfg.ttl_ms),
        }
    }
}

#[derive(Default)]
struct CacheState {
    services: Option<Vec<Service>>,
    fetched_at: Option<Instant>,
    destinations: HashMap<String, Vec<Destination>>,
    dest_fetched_at: HashMap<String, Instant>,
}

impl CacheState {
    fn valid_services(&self, ttl: Duration) -> Option<&Vec<Service>> {
        let fetched_at = self.fetched_at?;
        if fetched_at.elapsed() < ttl {
            self.services.as_ref()
        } else {
            None
        }
    }

    fn valid_destinations(&self, key: &str, ttl: Duration) -> Option<&Vec<Destination>> {
        let fetched_at = self.dest_fetched_at.get(key)?;
        if fetched_at.elapsed() < ttl {
            self.destinations.get(key)
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.services = None;
        self.fetched_at = None;
        self.destinations.clear();
        self.dest_fetched_at.clear();
    }
}

/// A [`Director`] decorator caching reads for a bounded TTL.
pub struct CachedDirector {
    inner: Arc<dyn Director>,
    ttl: Duration,
    enabled: bool,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedDirector {
    pub fn new(inner: Arc<dyn Director>, settings: CacheSettings) -> Self {
        Self {
            inner,
            ttl: settings.ttl,
            enabled: settings.enabled,
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Cache hit/miss statistics.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Drop everything; the next read fetches fresh kernel state. Used by
    /// reload and by tests.
    pub fn invalidate(&self) {
        self.write_state().clear();
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate_on_success(&self, result: Result<()>) -> Result<()> {
        if result.is_ok() {
            self.invalidate();
        }
        result
    }
}

impl Director for CachedDirector {
    fn services(&self) -> Result<Vec<Service>> {
        if !self.enabled {
            return self.inner.services();
        }

        // Fast path under the shared lock.
        {
            let state = self.read_state();
            if let Some(services) = state.valid_services(self.ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(services.clone());
            }
        }

        // Slow path: re-check under the exclusive lock before fetching.
        let mut state = self.write_state();
        if let Some(services) = state.valid_services(self.ttl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(services.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let services = self.inner.services()?;

        // A fresh service list obsoletes cached destinations.
        state.clear();
        state.services = Some(services.clone());
        state.fetched_at = Some(Instant::now());

        Ok(services)
    }

    fn destinations(&self, svc: &Service) -> Result<Vec<Destination>> {
        if !self.enabled {
            return self.inner.destinations(svc);
        }

        let key = svc.key();

        {
            let state = self.read_state();
            if let Some(dests) = state.valid_destinations(&key, self.ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(dests.clone());
            }
        }

        let mut state = self.write_state();
        if let Some(dests) = state.valid_destinations(&key, self.ttl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(dests.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let dests = self.inner.destinations(svc)?;

        state.destinations.insert(key.clone(), dests.clone());
        state.dest_fetched_at.insert(key, Instant::now());

        Ok(dests)
    }

    fn create_service(&self, svc: &Service) -> Result<()> {
        self.invalidate_on_success(self.inner.create_service(svc))
    }

    fn update_service(&self, svc: &Service) -> Result<()> {
        self.invalidate_on_success(self.inner.update_service(svc))
    }

    fn delete_service(&self, svc: &Service) -> Result<()> {
        self.invalidate_on_success(self.inner.delete_service(svc))
    }

    fn create_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        self.invalidate_on_success(self.inner.create_destination(svc, dst))
    }

    fn update_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        self.invalidate_on_success(self.inner.update_destination(svc, dst))
    }

    fn delete_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        self.invalidate_on_success(self.inner.delete_destination(svc, dst))
    }
}
