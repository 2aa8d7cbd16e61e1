//! Semantic validation of a loaded configuration.
//!
//! Field-range constraints are expressed as `validator` attributes on the
//! types; everything cross-field (duplicate names, conditional sections,
//! per-service rules) lives here. Validation never mutates the config;
//! defaults are applied at deserialization time.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use validator::{Validate, ValidationError};

use crate::types::{Config, Service};
use crate::ConfigError;

const INJECTION_CHARS: &[char] = &[';', '\'', '"', '`', '&', '|', '>', '<'];

const MIN_STATE_CACHE_TTL_MS: u64 = 1;
const MAX_STATE_CACHE_TTL_MS: u64 = 60_000;
const MIN_HEALTH_INTERVAL_MS: u64 = 100;
const MIN_HEALTH_TIMEOUT_MS: u64 = 100;
const MAX_SERVICE_NAME_LEN: usize = 64;

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("name pattern"))
}

/// Validate the whole configuration.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    validate_global(cfg)?;
    validate_services(&cfg.services)?;
    Ok(())
}

fn validate_global(cfg: &Config) -> Result<(), ConfigError> {
    // Mode
    let mode = cfg.mode.trim().to_ascii_lowercase();
    if !mode.is_empty() && mode != "dr" && mode != "nat" {
        return Err(invalid(format!("invalid mode: {}", cfg.mode)));
    }

    // Node
    cfg.node.validate()?;
    if cfg.node.role != "primary" && cfg.node.role != "secondary" {
        return Err(invalid(format!("invalid node role: {}", cfg.node.role)));
    }

    // Network
    cfg.network.frontend.validate()?;
    if cfg.network.frontend.vip.is_none() {
        return Err(invalid("frontend VIP is required"));
    }
    cfg.network.backend.validate()?;

    // VRRP
    cfg.vrrp.validate()?;

    // Observability: logging
    let console_level = cfg.observability.logging.console.level.to_ascii_lowercase();
    match console_level.as_str() {
        "" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(invalid(format!(
                "invalid console log level: {}",
                cfg.observability.logging.console.level
            )));
        }
    }
    let gelf = &cfg.observability.logging.gelf;
    if gelf.enabled {
        if gelf.host.is_empty() {
            return Err(invalid("gelf.host is required when gelf.enabled is true"));
        }
        if gelf.port < 1 {
            return Err(invalid(format!("invalid gelf.port: {}", gelf.port)));
        }
        let proto = gelf.protocol.to_ascii_lowercase();
        if proto != "udp" && proto != "tcp" {
            return Err(invalid(format!("invalid gelf.protocol: {}", gelf.protocol)));
        }
        if gelf.facility.is_empty() {
            return Err(invalid("gelf.facility is required when gelf.enabled is true"));
        }
    }

    // Observability: metrics
    let influx = &cfg.observability.metrics.influxdb;
    if influx.enabled {
        if influx.url.is_empty()
            || influx.token.is_empty()
            || influx.org.is_empty()
            || influx.bucket.is_empty()
        {
            return Err(invalid(
                "influxdb url/token/org/bucket are required when influxdb.enabled is true",
            ));
        }
        if influx.push_interval_seconds < 1 {
            return Err(invalid(format!(
                "invalid influxdb.push_interval_seconds: {}",
                influx.push_interval_seconds
            )));
        }
    }
    let prom = &cfg.observability.metrics.prometheus;
    if prom.enabled {
        if prom.port < 1 {
            return Err(invalid(format!("invalid prometheus.port: {}", prom.port)));
        }
        if prom.path.is_empty() || !prom.path.starts_with('/') {
            return Err(invalid(format!("invalid prometheus.path: {}", prom.path)));
        }
        if !prom.bind.is_empty()
            && prom.bind != "0.0.0.0"
            && prom.bind != "::"
            && prom.bind.parse::<std::net::IpAddr>().is_err()
        {
            return Err(invalid(format!("invalid prometheus.bind: {}", prom.bind)));
        }
    }

    // System
    let profile = cfg.system.tuning_profile.to_ascii_lowercase();
    match profile.as_str() {
        "" | "minimal" | "balanced" | "aggressive" => {}
        _ => {
            return Err(invalid(format!(
                "invalid tuning_profile: {}",
                cfg.system.tuning_profile
            )));
        }
    }

    // Daemon
    cfg.daemon.validate()?;
    let cache = &cfg.daemon.state_cache;
    if cache.enabled
        && !(MIN_STATE_CACHE_TTL_MS..=MAX_STATE_CACHE_TTL_MS).contains(&cache.ttl_ms)
    {
        return Err(invalid(format!(
            "invalid daemon.state_cache.ttl_ms: {}",
            cache.ttl_ms
        )));
    }

    Ok(())
}

fn validate_services(services: &[Service]) -> Result<(), ConfigError> {
    let mut names: HashSet<&str> = HashSet::new();

    for (i, svc) in services.iter().enumerate() {
        if !is_valid_name(&svc.name) {
            return Err(invalid(format!("service[{}]: invalid name: {}", i, svc.name)));
        }
        if svc.name.len() > MAX_SERVICE_NAME_LEN {
            return Err(invalid(format!("service[{}]: name too long: {}", i, svc.name)));
        }
        if !names.insert(&svc.name) {
            return Err(invalid(format!("duplicate service name: {}", svc.name)));
        }

        if svc.ports.is_empty() && svc.port_ranges.is_empty() {
            return Err(invalid(format!("service {}: no ports defined", svc.name)));
        }
        for &port in &svc.ports {
            if port < 1 {
                return Err(invalid(format!("service {}: invalid port: {}", svc.name, port)));
            }
        }
        for range in &svc.port_ranges {
            if range.start < 1 || range.end < 1 {
                return Err(invalid(format!(
                    "service {}: invalid port range: {}-{}",
                    svc.name, range.start, range.end
                )));
            }
            if range.start > range.end {
                return Err(invalid(format!(
                    "service {}: invalid port range start > end: {}-{}",
                    svc.name, range.start, range.end
                )));
            }
        }

        for (j, backend) in svc.backends.iter().enumerate() {
            if backend.weight < 1 {
                return Err(invalid(format!(
                    "service {} backend[{}]: invalid weight: {}",
                    svc.name, j, backend.weight
                )));
            }
            // Port 0 inherits the service port; any other u16 value is valid.
        }

        let health = &svc.health;
        if health.enabled {
            if health.port < 1 {
                return Err(invalid(format!(
                    "service {}: invalid health check port: {}",
                    svc.name, health.port
                )));
            }
            if health.interval_ms < MIN_HEALTH_INTERVAL_MS {
                return Err(invalid(format!(
                    "service {}: health interval too low: {}",
                    svc.name, health.interval_ms
                )));
            }
            if health.timeout_ms < MIN_HEALTH_TIMEOUT_MS {
                return Err(invalid(format!(
                    "service {}: health timeout too low: {}",
                    svc.name, health.timeout_ms
                )));
            }
            if health.fail_after < 1 {
                return Err(invalid(format!(
                    "service {}: invalid health fail_after: {}",
                    svc.name, health.fail_after
                )));
            }
            if health.recover_after < 1 {
                return Err(invalid(format!(
                    "service {}: invalid health recover_after: {}",
                    svc.name, health.recover_after
                )));
            }
        }
    }

    Ok(())
}

/// Custom validator for name-shaped fields (node name, interfaces).
pub fn validate_name(value: &str) -> Result<(), ValidationError> {
    if is_valid_name(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_name"))
    }
}

fn is_valid_name(value: &str) -> bool {
    !value.is_empty()
        && name_regex().is_match(value)
        && !value.contains(INJECTION_CHARS)
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
