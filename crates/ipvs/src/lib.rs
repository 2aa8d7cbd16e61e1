//! IPVS management for directord: typed CRUD over the kernel's connection
//! director, a read-through state cache, and the declarative reconciler.
//!
//! The kernel is reached over generic netlink directly; no libnl or CGo-style
//! helpers. The [`Director`] trait is the seam between the pure reconciler
//! logic and the kernel: production wires [`NetlinkDirector`] (optionally
//! wrapped in [`CachedDirector`]), tests wire [`MockDirector`].

#[cfg(target_os = "linux")]
mod commands;
#[cfg(target_os = "linux")]
mod messages;
#[cfg(target_os = "linux")]
mod netlink;

pub mod cache;
pub mod director;
pub mod mock;
pub mod reconciler;
pub mod types;

pub use cache::{CacheSettings, CachedDirector};
pub use director::{Director, NetlinkDirector};
pub use mock::{MockCounts, MockDirector};
pub use reconciler::{DesiredEntry, Reconciler, expand};
pub use types::{Destination, Protocol, Scheduler, Service};
