//! Reconciler behavior against the in-memory director: expansion, diffing,
//! idempotence, tenancy, and failure accumulation.

use std::net::Ipv4Addr;
use std::sync::Arc;

use config::{Backend, HealthCheck, PortRange, Protocol, Scheduler, Service};
use ipvs::{Destination, MockDirector, Reconciler};

fn vip() -> Ipv4Addr {
    "192.0.2.10".parse().unwrap()
}

fn backend(address: &str, port: u16, weight: u32) -> Backend {
    Backend {
        address: address.parse().unwrap(),
        port,
        weight,
    }
}

fn service(name: &str, protocol: Protocol, ports: Vec<u16>, backends: Vec<Backend>) -> Service {
    Service {
        name: name.to_string(),
        protocol,
        ports,
        port_ranges: vec![],
        scheduler: Scheduler::Rr,
        backends,
        health: HealthCheck::default(),
    }
}

fn kernel_service(addr: &str, port: u16, scheduler: ipvs::Scheduler) -> ipvs::Service {
    ipvs::Service {
        address: addr.parse().unwrap(),
        protocol: ipvs::Protocol::Tcp,
        port,
        scheduler,
    }
}

#[test]
fn create_then_noop() {
    let mock = Arc::new(MockDirector::new());
    let reconciler = Reconciler::new(mock.clone());

    let desired = vec![service(
        "web",
        Protocol::Tcp,
        vec![80, 443],
        vec![backend("10.0.0.1", 0, 1)],
    )];

    reconciler.apply(&desired, vip()).unwrap();

    assert_eq!(mock.service_count(), 2);
    let dests_80 = mock.get_destinations("tcp:192.0.2.10:80");
    assert_eq!(dests_80.len(), 1);
    assert_eq!(dests_80[0].port, 80);
    assert_eq!(dests_80[0].weight, 1);
    let dests_443 = mock.get_destinations("tcp:192.0.2.10:443");
    assert_eq!(dests_443[0].port, 443);

    // Second pass with unchanged inputs issues zero mutations.
    mock.reset_counts();
    reconciler.apply(&desired, vip()).unwrap();
    let counts = mock.counts();
    assert_eq!(counts.mutations, 0);
    assert_eq!(counts.enumerations, 1);
}

#[test]
fn port_range_expansion_inherits_service_port() {
    let mock = Arc::new(MockDirector::new());
    let reconciler = Reconciler::new(mock.clone());

    let mut svc = service("dns", Protocol::Udp, vec![], vec![backend("10.0.0.1", 0, 1)]);
    svc.port_ranges = vec![PortRange { start: 100, end: 102 }];
    let vip: Ipv4Addr = "192.168.1.100".parse().unwrap();

    reconciler.apply(&[svc], vip).unwrap();

    for port in 100..=102u16 {
        let key = format!("udp:192.168.1.100:{}", port);
        let svc = mock.get_service(&key).unwrap_or_else(|| panic!("missing {}", key));
        assert_eq!(svc.port, port);
        let dests = mock.get_destinations(&key);
        assert_eq!(dests.len(), 1);
        assert_eq!(dests[0].port, port);
    }
    assert_eq!(mock.service_count(), 3);
}

#[test]
fn explicit_backend_port_overrides_expansion_port() {
    let mock = Arc::new(MockDirector::new());
    let reconciler = Reconciler::new(mock.clone());

    let desired = vec![service(
        "web",
        Protocol::Tcp,
        vec![80, 443],
        vec![backend("10.0.0.1", 80, 1)],
    )];
    reconciler.apply(&desired, vip()).unwrap();

    // The backend pins port 80, so even the :443 service targets :80.
    assert_eq!(mock.get_destinations("tcp:192.0.2.10:443")[0].port, 80);
}

#[test]
fn expansion_is_faithful_to_ports_times_backends() {
    let mut svc = service(
        "grid",
        Protocol::Tcp,
        vec![80],
        vec![backend("10.0.0.1", 0, 1), backend("10.0.0.2", 0, 2)],
    );
    svc.port_ranges = vec![PortRange { start: 9000, end: 9002 }];

    let expanded = ipvs::expand(&[svc], vip());
    assert_eq!(expanded.len(), 4); // 1 explicit + 3 from the range
    for entry in expanded.values() {
        assert_eq!(entry.destinations.len(), 2);
        for dst in &entry.destinations {
            assert_eq!(dst.port, entry.service.port);
        }
    }
}

#[test]
fn scheduler_change_issues_exactly_one_update() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service("192.0.2.10", 80, ipvs::Scheduler::RoundRobin));
    mock.seed_destinations(
        "tcp:192.0.2.10:80",
        vec![Destination {
            address: "10.0.0.1".parse().unwrap(),
            port: 80,
            weight: 1,
        }],
    );

    let reconciler = Reconciler::new(mock.clone());
    let mut desired = service("web", Protocol::Tcp, vec![80], vec![backend("10.0.0.1", 0, 1)]);
    desired.scheduler = Scheduler::Wrr;

    reconciler.apply(&[desired], vip()).unwrap();

    assert_eq!(mock.counts().mutations, 1);
    assert_eq!(
        mock.get_service("tcp:192.0.2.10:80").unwrap().scheduler,
        ipvs::Scheduler::WeightedRoundRobin
    );
    // Destinations untouched.
    assert_eq!(mock.get_destinations("tcp:192.0.2.10:80").len(), 1);
}

#[test]
fn weight_change_issues_exactly_one_destination_update() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service("192.0.2.10", 80, ipvs::Scheduler::RoundRobin));
    mock.seed_destinations(
        "tcp:192.0.2.10:80",
        vec![Destination {
            address: "10.0.0.1".parse().unwrap(),
            port: 80,
            weight: 5,
        }],
    );

    let reconciler = Reconciler::new(mock.clone());
    let desired = vec![service("web", Protocol::Tcp, vec![80], vec![backend("10.0.0.1", 0, 2)])];
    reconciler.apply(&desired, vip()).unwrap();

    assert_eq!(mock.counts().mutations, 1);
    assert_eq!(mock.get_destinations("tcp:192.0.2.10:80")[0].weight, 2);
}

#[test]
fn removed_port_deletes_its_kernel_service() {
    let mock = Arc::new(MockDirector::new());
    let reconciler = Reconciler::new(mock.clone());

    let mut desired = vec![service(
        "web",
        Protocol::Tcp,
        vec![80, 443],
        vec![backend("10.0.0.1", 0, 1)],
    )];
    reconciler.apply(&desired, vip()).unwrap();
    assert_eq!(mock.service_count(), 2);

    desired[0].ports = vec![80];
    reconciler.apply(&desired, vip()).unwrap();

    assert_eq!(mock.service_count(), 1);
    assert!(mock.get_service("tcp:192.0.2.10:443").is_none());
    assert!(mock.get_service("tcp:192.0.2.10:80").is_some());
}

#[test]
fn empty_desired_deletes_only_managed_vip_services() {
    let mock = Arc::new(MockDirector::new());
    for port in [80, 443, 8080] {
        mock.seed_service(kernel_service("192.0.2.10", port, ipvs::Scheduler::RoundRobin));
    }
    // A service owned by someone else on the same host.
    mock.seed_service(kernel_service("198.51.100.7", 80, ipvs::Scheduler::SourceHashing));

    let reconciler = Reconciler::new(mock.clone());
    reconciler.apply(&[], vip()).unwrap();

    assert_eq!(mock.service_keys(), vec!["tcp:198.51.100.7:80".to_string()]);
}

#[test]
fn foreign_vip_services_are_never_touched() {
    let mock = Arc::new(MockDirector::new());
    mock.seed_service(kernel_service("198.51.100.7", 80, ipvs::Scheduler::SourceHashing));

    let reconciler = Reconciler::new(mock.clone());
    let desired = vec![service("web", Protocol::Tcp, vec![80], vec![backend("10.0.0.1", 0, 1)])];
    reconciler.apply(&desired, vip()).unwrap();

    let foreign = mock.get_service("tcp:198.51.100.7:80").unwrap();
    assert_eq!(foreign.scheduler, ipvs::Scheduler::SourceHashing);
    assert_eq!(mock.service_count(), 2);
}

#[test]
fn per_service_failures_accumulate_but_do_not_abort_the_pass() {
    let mock = Arc::new(MockDirector::new());
    mock.fail_service_mutations("tcp:192.0.2.10:80");

    let reconciler = Reconciler::new(mock.clone());
    let desired = vec![
        service("web", Protocol::Tcp, vec![80], vec![backend("10.0.0.1", 0, 1)]),
        service("api", Protocol::Tcp, vec![8443], vec![backend("10.0.0.2", 0, 1)]),
    ];

    let err = reconciler.apply(&desired, vip()).unwrap_err();
    assert!(err.to_string().contains("tcp:192.0.2.10:80"));

    // The healthy service was still reconciled.
    assert!(mock.get_service("tcp:192.0.2.10:8443").is_some());
    assert_eq!(mock.get_destinations("tcp:192.0.2.10:8443").len(), 1);
}

#[test]
fn enumeration_failure_aborts_before_any_mutation() {
    let mock = Arc::new(MockDirector::new());
    mock.fail_next_enumeration();

    let reconciler = Reconciler::new(mock.clone());
    let desired = vec![service("web", Protocol::Tcp, vec![80], vec![backend("10.0.0.1", 0, 1)])];

    assert!(reconciler.apply(&desired, vip()).is_err());
    assert_eq!(mock.counts().mutations, 0);
}
