//! Backend health probing: TCP checks and per-target prober scheduling with
//! an N-fail / M-recover state machine.

pub mod checker;
pub mod scheduler;

pub use checker::{Checker, TcpChecker};
pub use scheduler::{
    BackendKey, HealthObserver, HealthState, Scheduler, StateChange, Target, WeightChange,
};
