//! State cache behavior: TTL, write invalidation, copy-out semantics,
//! disabled passthrough, and error handling.

use std::sync::Arc;
use std::time::Duration;

use ipvs::{CacheSettings, CachedDirector, Destination, Director, MockDirector};

fn kernel_service(port: u16) -> ipvs::Service {
    ipvs::Service {
        address: "192.0.2.10".parse().unwrap(),
        protocol: ipvs::Protocol::Tcp,
        port,
        scheduler: ipvs::Scheduler::RoundRobin,
    }
}

fn cached(mock: &Arc<MockDirector>, ttl: Duration) -> CachedDirector {
    CachedDirector::new(
        mock.clone() as Arc<dyn Director>,
        CacheSettings { enabled: true, ttl },
    )
}

#[test]
fn second_read_within_ttl_is_served_from_cache() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service(80));
    let cache = cached(&mock, Duration::from_secs(60));

    let first = cache.services().unwrap();
    let second = cache.services().unwrap();
    assert_eq!(first, second);
    assert_eq!(mock.counts().enumerations, 1);

    let (hits, misses) = cache.stats();
    assert_eq!(hits, 1);
    assert_eq!(misses, 1);
}

#[test]
fn expired_entry_triggers_a_fresh_fetch() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service(80));
    let cache = cached(&mock, Duration::from_millis(20));

    cache.services().unwrap();
    std::thread::sleep(Duration::from_millis(40));
    cache.services().unwrap();

    assert_eq!(mock.counts().enumerations, 2);
}

#[test]
fn any_write_invalidates_both_caches() {
    let mock = Arc::new(MockDirector::new());
    let svc = kernel_service(80);
    mock.seed_service(svc.clone());
    mock.seed_destinations(
        &svc.key(),
        vec![Destination {
            address: "10.0.0.1".parse().unwrap(),
            port: 80,
            weight: 1,
        }],
    );
    let cache = cached(&mock, Duration::from_secs(60));

    cache.services().unwrap();
    cache.destinations(&svc).unwrap();

    cache.create_service(&kernel_service(443)).unwrap();

    cache.services().unwrap();
    cache.destinations(&svc).unwrap();
    let counts = mock.counts();
    assert_eq!(counts.enumerations, 2);
    assert_eq!(counts.destination_reads, 2);
}

#[test]
fn callers_cannot_poison_the_cache_through_returned_copies() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service(80));
    let cache = cached(&mock, Duration::from_secs(60));

    let mut first = cache.services().unwrap();
    first[0].port = 9999;
    first[0].scheduler = ipvs::Scheduler::Other("mangled".to_string());

    let second = cache.services().unwrap();
    assert_eq!(second[0].port, 80);
    assert_eq!(second[0].scheduler, ipvs::Scheduler::RoundRobin);
}

#[test]
fn destination_reads_are_cached_per_service() {
    let mock = Arc::new(MockDirector::new());
    let svc = kernel_service(80);
    mock.seed_service(svc.clone());
    mock.seed_destinations(
        &svc.key(),
        vec![Destination {
            address: "10.0.0.1".parse().unwrap(),
            port: 80,
            weight: 1,
        }],
    );
    let cache = cached(&mock, Duration::from_secs(60));

    cache.destinations(&svc).unwrap();
    cache.destinations(&svc).unwrap();
    assert_eq!(mock.counts().destination_reads, 1);

    // A different service key misses independently.
    let other = kernel_service(443);
    cache.destinations(&other).unwrap();
    assert_eq!(mock.counts().destination_reads, 2);
}

#[test]
fn disabled_cache_is_a_passthrough() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service(80));
    let cache = CachedDirector::new(
        mock.clone() as Arc<dyn Director>,
        CacheSettings {
            enabled: false,
            ttl: Duration::from_secs(60),
        },
    );

    cache.services().unwrap();
    cache.services().unwrap();
    assert_eq!(mock.counts().enumerations, 2);
    assert_eq!(cache.stats(), (0, 0));
}

#[test]
fn errors_are_never_cached() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service(80));
    let cache = cached(&mock, Duration::from_secs(60));

    mock.fail_next_enumeration();
    assert!(cache.services().is_err());

    // The failure was not stored; the next read goes back to the kernel.
    let services = cache.services().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(mock.counts().enumerations, 2);
}

#[test]
fn manual_invalidation_forces_a_fetch() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service(80));
    let cache = cached(&mock, Duration::from_secs(60));

    cache.services().unwrap();
    cache.invalidate();
    cache.services().unwrap();
    assert_eq!(mock.counts().enumerations, 2);
}
