//! In-memory director used by tests and by platforms without the kernel
//! IPVS subsystem.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use common::{Error, Result};

use crate::director::Director;
use crate::types::{Destination, Service};

/// Operation counters exposed for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCounts {
    /// Calls to `services()`.
    pub enumerations: u64,
    /// Calls to `destinations()`.
    pub destination_reads: u64,
    /// Mutation calls (create/update/delete of services and destinations).
    pub mutations: u64,
}

#[derive(Default)]
struct MockState {
    services: BTreeMap<String, Service>,
    destinations: BTreeMap<String, Vec<Destination>>,
    counts: MockCounts,
    fail_next_enumeration: bool,
    failing_service_keys: HashSet<String>,
}

/// An in-memory [`Director`] with scripted failures and call counting.
#[derive(Default)]
pub struct MockDirector {
    state: Mutex<MockState>,
}

impl MockDirector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a service without counting it as a mutation.
    pub fn seed_service(&self, svc: Service) {
        let mut state = self.state();
        state.services.insert(svc.key(), svc);
    }

    /// Seed destinations for a service key without counting a mutation.
    pub fn seed_destinations(&self, key: &str, dests: Vec<Destination>) {
        self.state().destinations.insert(key.to_string(), dests);
    }

    /// The next `services()` call fails once.
    pub fn fail_next_enumeration(&self) {
        self.state().fail_next_enumeration = true;
    }

    /// Every mutation touching the given service key fails.
    pub fn fail_service_mutations(&self, key: &str) {
        self.state().failing_service_keys.insert(key.to_string());
    }

    pub fn counts(&self) -> MockCounts {
        self.state().counts
    }

    pub fn reset_counts(&self) {
        self.state().counts = MockCounts::default();
    }

    pub fn service_count(&self) -> usize {
        self.state().services.len()
    }

    pub fn service_keys(&self) -> Vec<String> {
        self.state().services.keys().cloned().collect()
    }

    pub fn get_service(&self, key: &str) -> Option<Service> {
        self.state().services.get(key).cloned()
    }

    pub fn get_destinations(&self, key: &str) -> Vec<Destination> {
        self.state().destinations.get(key).cloned().unwrap_or_default()
    }

    fn check_failure(state: &MockState, key: &str) -> Result<()> {
        if state.failing_service_keys.contains(key) {
            return Err(Error::ipvs(format!("scripted failure for {}", key)));
        }
        Ok(())
    }
}

impl Director for MockDirector {
    fn services(&self) -> Result<Vec<Service>> {
        let mut state = self.state();
        state.counts.enumerations += 1;
        if state.fail_next_enumeration {
            state.fail_next_enumeration = false;
            return Err(Error::ipvs("scripted enumeration failure"));
        }
        Ok(state.services.values().cloned().collect())
    }

    fn destinations(&self, svc: &Service) -> Result<Vec<Destination>> {
        let mut state = self.state();
        state.counts.destination_reads += 1;
        Ok(state.destinations.get(&svc.key()).cloned().unwrap_or_default())
    }

    fn create_service(&self, svc: &Service) -> Result<()> {
        let mut state = self.state();
        state.counts.mutations += 1;
        let key = svc.key();
        Self::check_failure(&state, &key)?;
        state.services.insert(key, svc.clone());
        Ok(())
    }

    fn update_service(&self, svc: &Service) -> Result<()> {
        let mut state = self.state();
        state.counts.mutations += 1;
        let key = svc.key();
        Self::check_failure(&state, &key)?;
        if !state.services.contains_key(&key) {
            return Err(Error::ipvs(format!("service not found: {}", key)));
        }
        state.services.insert(key, svc.clone());
        Ok(())
    }

    fn delete_service(&self, svc: &Service) -> Result<()> {
        let mut state = self.state();
        state.counts.mutations += 1;
        let key = svc.key();
        Self::check_failure(&state, &key)?;
        state.services.remove(&key);
        state.destinations.remove(&key);
        Ok(())
    }

    fn create_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        let mut state = self.state();
        state.counts.mutations += 1;
        let key = svc.key();
        Self::check_failure(&state, &key)?;
        state.destinations.entry(key).or_default().push(dst.clone());
        Ok(())
    }

    fn update_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        let mut state = self.state();
        state.counts.mutations += 1;
        let key = svc.key();
        Self::check_failure(&state, &key)?;
        let dests = state
            .destinations
            .get_mut(&key)
            .ok_or_else(|| Error::ipvs(format!("service not found: {}", key)))?;
        for existing in dests.iter_mut() {
            if existing.key() == dst.key() {
                *existing = dst.clone();
                return Ok(());
            }
        }
        Err(Error::ipvs(format!("destination not found: {}", dst.key())))
    }

    fn delete_destination(&self, svc: &Service, dst: &Destination) -> Result<()> {
        let mut state = self.state();
        state.counts.mutations += 1;
        let key = svc.key();
        Self::check_failure(&state, &key)?;
        if let Some(dests) = state.destinations.get_mut(&key) {
            dests.retain(|d| d.key() != dst.key());
        }
        Ok(())
    }
}
