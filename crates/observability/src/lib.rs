//! Observability primitives for directord: the injected Prometheus metrics
//! registry and the audit event stream. Exporters live outside this crate
//! and consume these surfaces.

pub mod audit;
pub mod metrics;

pub use audit::{AuditEvent, AuditRecord, AuditSink, Auditor, TracingSink};
pub use metrics::MetricsRegistry;
