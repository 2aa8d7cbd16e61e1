//! The director daemon: a VIP-gated engine reconciling kernel IPVS state
//! against declarative configuration, with health-driven backend weights.

pub mod engine;
pub mod netmon;
#[cfg(unix)]
pub mod signals;

pub use engine::{Engine, EngineOptions, Reconciler};
pub use netmon::{NetworkManager, SystemNetworkManager};
