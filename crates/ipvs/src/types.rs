//! IPVS data types: kernel service and destination records.
//!
//! Keys are stable strings used for set semantics throughout the reconciler
//! and the state cache.

use std::fmt;
use std::net::Ipv4Addr;

const IPPROTO_TCP: u16 = 6;
const IPPROTO_UDP: u16 = 17;

/// IP protocol of a kernel service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    /// A protocol this controller does not manage (seen in kernel dumps).
    Other(u16),
}

impl Protocol {
    /// Kernel protocol number (IPPROTO_*).
    pub fn number(self) -> u16 {
        match self {
            Protocol::Tcp => IPPROTO_TCP,
            Protocol::Udp => IPPROTO_UDP,
            Protocol::Other(n) => n,
        }
    }

    pub fn from_number(n: u16) -> Self {
        match n {
            IPPROTO_TCP => Protocol::Tcp,
            IPPROTO_UDP => Protocol::Udp,
            other => Protocol::Other(other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Other(n) => write!(f, "ip({})", n),
        }
    }
}

impl From<config::Protocol> for Protocol {
    fn from(p: config::Protocol) -> Self {
        match p {
            config::Protocol::Tcp => Protocol::Tcp,
            config::Protocol::Udp => Protocol::Udp,
        }
    }
}

/// Kernel scheduling algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduler {
    RoundRobin,
    WeightedRoundRobin,
    SourceHashing,
    /// A scheduler this controller does not manage (seen in kernel dumps).
    Other(String),
}

impl Scheduler {
    /// Kernel scheduler name as carried on the netlink channel.
    pub fn kernel_name(&self) -> &str {
        match self {
            Scheduler::RoundRobin => "rr",
            Scheduler::WeightedRoundRobin => "wrr",
            Scheduler::SourceHashing => "sh",
            Scheduler::Other(name) => name,
        }
    }

    pub fn from_kernel_name(name: &str) -> Self {
        match name {
            "rr" => Scheduler::RoundRobin,
            "wrr" => Scheduler::WeightedRoundRobin,
            "sh" => Scheduler::SourceHashing,
            other => Scheduler::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kernel_name())
    }
}

impl From<config::Scheduler> for Scheduler {
    fn from(s: config::Scheduler) -> Self {
        match s {
            config::Scheduler::Rr => Scheduler::RoundRobin,
            config::Scheduler::Wrr => Scheduler::WeightedRoundRobin,
            config::Scheduler::Sh => Scheduler::SourceHashing,
        }
    }
}

/// An IPVS service (virtual server) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub address: Ipv4Addr,
    pub protocol: Protocol,
    pub port: u16,
    pub scheduler: Scheduler,
}

impl Service {
    /// Stable identity used as a map key: `protocol:address:port`.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.protocol, self.address, self.port)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} ({})",
            self.protocol, self.address, self.port, self.scheduler
        )
    }
}

/// An IPVS destination (real server) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: Ipv4Addr,
    pub port: u16,
    pub weight: u32,
}

impl Destination {
    /// Stable identity within a service: `address:port`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
