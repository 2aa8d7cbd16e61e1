//! Expansion and diff: turns a declarative service list into kernel records
//! and drives the director toward them with the minimum mutation sequence.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use common::{Error, Result};
use tracing::{error, info};

use crate::director::Director;
use crate::types::{Destination, Protocol, Scheduler, Service};

/// One expanded kernel service with its desired destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntry {
    pub service: Service,
    pub destinations: Vec<Destination>,
}

/// Expand a declarative service list into kernel records for the given VIP.
///
/// Pure and deterministic: explicit ports come first, ranges expand
/// left-to-right, backends keep declared order. A backend port of 0 inherits
/// the kernel service port it appears under.
pub fn expand(services: &[config::Service], vip: Ipv4Addr) -> BTreeMap<String, DesiredEntry> {
    let mut result = BTreeMap::new();

    for svc in services {
        let protocol = Protocol::from(svc.protocol);
        let scheduler = Scheduler::from(svc.scheduler);

        let mut ports: Vec<u16> = svc.ports.clone();
        for range in &svc.port_ranges {
            ports.extend(range.start..=range.end);
        }

        for port in ports {
            let service = Service {
                address: vip,
                protocol,
                port,
                scheduler: scheduler.clone(),
            };
            let destinations = svc
                .backends
                .iter()
                .map(|backend| Destination {
                    address: backend.address,
                    port: if backend.port == 0 { port } else { backend.port },
                    weight: backend.weight,
                })
                .collect();

            result.insert(service.key(), DesiredEntry { service, destinations });
        }
    }

    result
}

/// Drives kernel state toward a desired service list, scoped to one VIP.
pub struct Reconciler {
    director: Arc<dyn Director>,
}

impl Reconciler {
    pub fn new(director: Arc<dyn Director>) -> Self {
        Self { director }
    }

    /// One reconcile pass: enumerate, diff, mutate.
    ///
    /// An empty `desired` list deletes every kernel service owned by the
    /// managed VIP (the disable path). Services at other addresses are never
    /// touched. Per-service mutation failures do not abort the pass; they
    /// are logged, the remaining services are still reconciled, and the
    /// accumulated failures surface as one error so callers retry.
    pub fn apply(&self, desired: &[config::Service], vip: Ipv4Addr) -> Result<()> {
        let desired = expand(desired, vip);

        let current = self
            .director
            .services()
            .map_err(|e| Error::reconcile(format!("failed to enumerate IPVS services: {}", e)))?;

        self.reconcile(&desired, current, vip)
    }

    fn reconcile(
        &self,
        desired: &BTreeMap<String, DesiredEntry>,
        current: Vec<Service>,
        managed_vip: Ipv4Addr,
    ) -> Result<()> {
        let current_map: BTreeMap<String, Service> =
            current.into_iter().map(|svc| (svc.key(), svc)).collect();

        let mut failed: Vec<String> = Vec::new();

        // Creates and updates first, deletes last, so the window in which a
        // service has no backends stays minimal.
        for (key, entry) in desired {
            match current_map.get(key) {
                None => {
                    info!(service = %key, "creating IPVS service");
                    if let Err(e) = self.director.create_service(&entry.service) {
                        error!(service = %key, error = %e, "failed to create service");
                        failed.push(key.clone());
                        continue;
                    }
                    if let Err(e) =
                        self.reconcile_destinations(&entry.service, &entry.destinations, &[])
                    {
                        error!(service = %key, error = %e, "failed to reconcile destinations");
                        failed.push(key.clone());
                    }
                }
                Some(current_svc) => {
                    if current_svc.scheduler != entry.service.scheduler {
                        info!(
                            service = %key,
                            scheduler = %entry.service.scheduler,
                            "updating IPVS service"
                        );
                        if let Err(e) = self.director.update_service(&entry.service) {
                            error!(service = %key, error = %e, "failed to update service");
                            failed.push(key.clone());
                        }
                    }

                    let current_dests = match self.director.destinations(current_svc) {
                        Ok(dests) => dests,
                        Err(e) => {
                            error!(service = %key, error = %e, "failed to get destinations");
                            failed.push(key.clone());
                            continue;
                        }
                    };
                    if let Err(e) = self.reconcile_destinations(
                        &entry.service,
                        &entry.destinations,
                        &current_dests,
                    ) {
                        error!(service = %key, error = %e, "failed to reconcile destinations");
                        failed.push(key.clone());
                    }
                }
            }
        }

        for (key, svc) in &current_map {
            // Strict tenancy: services at other addresses are invisible.
            if svc.address != managed_vip {
                continue;
            }
            if !desired.contains_key(key) {
                info!(service = %key, "deleting IPVS service");
                if let Err(e) = self.director.delete_service(svc) {
                    error!(service = %key, error = %e, "failed to delete service");
                    failed.push(key.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort();
            failed.dedup();
            Err(Error::reconcile(format!(
                "{} service(s) failed to reconcile: {}",
                failed.len(),
                failed.join(", ")
            )))
        }
    }

    fn reconcile_destinations(
        &self,
        svc: &Service,
        desired: &[Destination],
        current: &[Destination],
    ) -> Result<()> {
        let current_map: BTreeMap<String, &Destination> =
            current.iter().map(|dst| (dst.key(), dst)).collect();

        for dst in desired {
            match current_map.get(&dst.key()) {
                None => self.director.create_destination(svc, dst)?,
                Some(existing) if existing.weight != dst.weight => {
                    self.director.update_destination(svc, dst)?
                }
                Some(_) => {}
            }
        }

        let desired_keys: HashSet<String> = desired.iter().map(Destination::key).collect();
        for dst in current {
            if !desired_keys.contains(&dst.key()) {
                self.director.delete_destination(svc, dst)?;
            }
        }

        Ok(())
    }
}
