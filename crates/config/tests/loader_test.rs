//! Loader integration tests: include merging, env substitution, and the
//! file-shape rules for main and service files.

use std::fs;

use config::types::{Protocol, Scheduler};
use config::ConfigError;
use tempfile::tempdir;

const MAIN_CONFIG: &str = r#"
mode: dr
node:
  name: node-a
  role: primary
network:
  frontend:
    interface: ens160
    vip: 192.0.2.10
    cidr: 24
  backend:
    interface: ens192
vrrp:
  vrid: 10
  priority_primary: 100
  priority_secondary: 90
  advert_interval_ms: 1000
daemon:
  reconcile_interval_ms: 1000
  state_cache:
    enabled: true
    ttl_ms: 500
include: "config.d/*.yaml"
"#;

#[test]
fn load_merges_included_services_in_lexicographic_order() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(&main, MAIN_CONFIG).unwrap();

    let confd = dir.path().join("config.d");
    fs::create_dir(&confd).unwrap();
    fs::write(
        confd.join("20-api.yaml"),
        r#"
services:
  - name: api
    protocol: tcp
    ports: [8443]
    scheduler: wrr
    backends:
      - address: 10.0.0.2
        weight: 3
"#,
    )
    .unwrap();
    fs::write(
        confd.join("10-web.yaml"),
        r#"
services:
  - name: web
    protocol: tcp
    ports: [80, 443]
    scheduler: rr
    backends:
      - address: 10.0.0.1
        weight: 1
"#,
    )
    .unwrap();

    let cfg = config::load(&main).unwrap();
    config::validate(&cfg).unwrap();

    assert_eq!(cfg.services.len(), 2);
    assert_eq!(cfg.services[0].name, "web");
    assert_eq!(cfg.services[1].name, "api");
    assert_eq!(cfg.services[0].protocol, Protocol::Tcp);
    assert_eq!(cfg.services[1].scheduler, Scheduler::Wrr);
    assert_eq!(cfg.backend_count(), 2);
}

#[test]
fn services_in_main_file_rejected() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(
        &main,
        r#"
node:
  name: node-a
  role: primary
services:
  - name: web
    protocol: tcp
    ports: [80]
    scheduler: rr
"#,
    )
    .unwrap();

    match config::load(&main) {
        Err(ConfigError::ServicesInMainFile) => {}
        other => panic!("expected ServicesInMainFile, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn service_file_with_extra_keys_rejected() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(&main, MAIN_CONFIG).unwrap();

    let confd = dir.path().join("config.d");
    fs::create_dir(&confd).unwrap();
    fs::write(
        confd.join("bad.yaml"),
        r#"
services: []
mode: nat
"#,
    )
    .unwrap();

    match config::load(&main) {
        Err(ConfigError::ServiceFileShape(path)) => {
            assert!(path.ends_with("bad.yaml"));
        }
        other => panic!("expected ServiceFileShape, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn empty_service_file_is_ignored() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(&main, MAIN_CONFIG).unwrap();

    let confd = dir.path().join("config.d");
    fs::create_dir(&confd).unwrap();
    fs::write(confd.join("empty.yaml"), "").unwrap();

    let cfg = config::load(&main).unwrap();
    assert!(cfg.services.is_empty());
}

#[test]
fn env_vars_are_substituted() {
    std::env::set_var("LOADER_TEST_BACKEND_ADDR", "10.0.0.9");

    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(&main, MAIN_CONFIG).unwrap();

    let confd = dir.path().join("config.d");
    fs::create_dir(&confd).unwrap();
    fs::write(
        confd.join("svc.yaml"),
        r#"
services:
  - name: web
    protocol: tcp
    ports: [80]
    scheduler: rr
    backends:
      - address: ${LOADER_TEST_BACKEND_ADDR}
        weight: 1
"#,
    )
    .unwrap();

    let cfg = config::load(&main).unwrap();
    assert_eq!(
        cfg.services[0].backends[0].address,
        "10.0.0.9".parse::<std::net::Ipv4Addr>().unwrap()
    );
}

#[test]
fn unset_env_var_fails_the_load() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(
        &main,
        r#"
node:
  name: ${LOADER_TEST_DEFINITELY_UNSET_VAR}
  role: primary
"#,
    )
    .unwrap();

    match config::load(&main) {
        Err(ConfigError::MissingEnv(vars)) => {
            assert_eq!(vars, vec!["LOADER_TEST_DEFINITELY_UNSET_VAR".to_string()]);
        }
        other => panic!("expected MissingEnv, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn duplicate_names_across_included_files_rejected_by_validation() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(&main, MAIN_CONFIG).unwrap();

    let confd = dir.path().join("config.d");
    fs::create_dir(&confd).unwrap();
    for file in ["a.yaml", "b.yaml"] {
        fs::write(
            confd.join(file),
            r#"
services:
  - name: web
    protocol: tcp
    ports: [80]
    scheduler: rr
"#,
        )
        .unwrap();
    }

    let cfg = config::load(&main).unwrap();
    let err = config::validate(&cfg).unwrap_err();
    assert!(err.to_string().contains("duplicate service name"));
}

#[test]
fn defaults_fill_daemon_section() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("config.yaml");
    fs::write(
        &main,
        r#"
node:
  name: node-a
  role: primary
"#,
    )
    .unwrap();

    let cfg = config::load(&main).unwrap();
    assert_eq!(cfg.daemon.reconcile_interval_ms, 1000);
    assert_eq!(cfg.daemon.state_cache.ttl_ms, 500);
    assert!(!cfg.daemon.state_cache.enabled);
}
