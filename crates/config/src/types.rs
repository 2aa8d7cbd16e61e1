//! Declarative configuration types.
//!
//! The main YAML file carries globals only; `services` may appear solely in
//! files pulled in through the `include` glob. Field-level range constraints
//! live here as `validator` attributes; cross-field rules are enforced in
//! [`crate::validate`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use validator::Validate;

pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_STATE_CACHE_TTL_MS: u64 = 500;

/// Root configuration: main-file globals plus the services merged from
/// included files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub vrrp: VrrpConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub include: String,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Config {
    /// Total backend count across all services.
    pub fn backend_count(&self) -> usize {
        self.services.iter().map(|s| s.backends.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct NodeConfig {
    #[validate(custom = "crate::validate::validate_name")]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub frontend: FrontendConfig,
    #[serde(default)]
    pub backend: BackendNetConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct FrontendConfig {
    #[validate(custom = "crate::validate::validate_name")]
    pub interface: String,
    /// The managed VIP. Required; optional here only so validation can report
    /// its absence instead of failing deserialization.
    pub vip: Option<Ipv4Addr>,
    #[validate(range(min = 1, max = 32))]
    #[serde(default)]
    pub cidr: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct BackendNetConfig {
    #[validate(custom = "crate::validate::validate_name")]
    pub interface: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct VrrpConfig {
    #[validate(range(min = 1, max = 255))]
    pub vrid: u16,
    #[validate(range(min = 1, max = 255))]
    pub priority_primary: u16,
    #[validate(range(min = 1, max = 255))]
    pub priority_secondary: u16,
    #[validate(range(min = 100))]
    pub advert_interval_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub console: ConsoleLogConfig,
    #[serde(default)]
    pub gelf: GelfLogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub level: String,
}

fn default_true() -> bool {
    true
}

impl Default for ConsoleLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GelfLogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub facility: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub influxdb: InfluxConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub bind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfluxConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub push_interval_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub state_dir: String,
    #[serde(default)]
    pub frr_config: String,
    #[serde(default)]
    pub sysctl_file: String,
    #[serde(default)]
    pub tuning_profile: String,
    #[serde(default)]
    pub lock_idle_timeout_minutes: u32,
}

/// Runtime daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DaemonConfig {
    #[validate(range(min = 100, max = 60000))]
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    #[serde(default)]
    pub state_cache: StateCacheConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            state_cache: StateCacheConfig::default(),
        }
    }
}

fn default_reconcile_interval_ms() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_MS
}

/// Settings for the in-memory IPVS state cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_state_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for StateCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_ms: DEFAULT_STATE_CACHE_TTL_MS,
        }
    }
}

fn default_state_cache_ttl_ms() -> u64 {
    DEFAULT_STATE_CACHE_TTL_MS
}

/// Root struct for included service files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFile {
    #[serde(default)]
    pub services: Vec<Service>,
}

/// A user-visible load-balanced service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub port_ranges: Vec<PortRange>,
    pub scheduler: Scheduler,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default)]
    pub health: HealthCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduler {
    /// Round-robin.
    Rr,
    /// Weighted round-robin.
    Wrr,
    /// Source hashing.
    Sh,
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduler::Rr => write!(f, "rr"),
            Scheduler::Wrr => write!(f, "wrr"),
            Scheduler::Sh => write!(f, "sh"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// A real server behind a service. `port` 0 means "inherit the kernel
/// service port the backend appears under".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub address: Ipv4Addr,
    #[serde(default)]
    pub port: u16,
    pub weight: u32,
}

/// Health probe stanza for a service. Zero values are permitted while
/// disabled; validation applies only when `enabled` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub check_type: HealthCheckType,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub fail_after: u32,
    #[serde(default)]
    pub recover_after: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    #[default]
    Tcp,
}
