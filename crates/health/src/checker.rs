//! Health check probes.
//!
//! The [`Checker`] trait is the injection seam: production uses
//! [`TcpChecker`], tests script outcomes without real sockets.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use common::{Error, Result};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// A single probe attempt against one backend.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Ok(()) means the backend passed the probe.
    async fn check(&self, address: Ipv4Addr, port: u16, timeout: Duration) -> Result<()>;
}

/// TCP connect probe: success is an established (and immediately closed)
/// connection within the timeout.
#[derive(Debug, Default)]
pub struct TcpChecker;

impl TcpChecker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Checker for TcpChecker {
    async fn check(&self, address: Ipv4Addr, port: u16, probe_timeout: Duration) -> Result<()> {
        if port < 1 {
            return Err(Error::health(format!("invalid port: {}", port)));
        }
        if probe_timeout.is_zero() {
            return Err(Error::health("invalid timeout: 0"));
        }

        let target = SocketAddr::from((address, port));
        match timeout(probe_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                debug!(target = %target, "tcp probe succeeded");
                Ok(())
            }
            Ok(Err(e)) => {
                debug!(target = %target, error = %e, "tcp probe failed");
                Err(Error::health(format!("connect {}: {}", target, e)))
            }
            Err(_) => {
                debug!(target = %target, timeout_ms = probe_timeout.as_millis() as u64, "tcp probe timed out");
                Err(Error::health(format!(
                    "connect {} timed out after {}ms",
                    target,
                    probe_timeout.as_millis()
                )))
            }
        }
    }
}
