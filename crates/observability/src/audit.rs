//! Audit events: stable, machine-parseable identifiers emitted on every
//! significant state transition.
//!
//! The sink is injectable so the engine stays free of global state and tests
//! can capture the exact event stream.

use std::fmt;
use std::sync::Arc;

use tracing::info;

/// Stable audit event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEvent {
    ConfigLoaded,
    ConfigChanged,
    VipAcquired,
    VipReleased,
    ServiceAdded,
    ServiceRemoved,
    BackendAdded,
    BackendRemoved,
    BackendWeightChanged,
    HealthStateChanged,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::ConfigLoaded => "config_loaded",
            AuditEvent::ConfigChanged => "config_changed",
            AuditEvent::VipAcquired => "vip_acquired",
            AuditEvent::VipReleased => "vip_released",
            AuditEvent::ServiceAdded => "service_added",
            AuditEvent::ServiceRemoved => "service_removed",
            AuditEvent::BackendAdded => "backend_added",
            AuditEvent::BackendRemoved => "backend_removed",
            AuditEvent::BackendWeightChanged => "backend_weight_changed",
            AuditEvent::HealthStateChanged => "health_state_changed",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub component: &'static str,
    pub fields: Vec<(&'static str, String)>,
}

/// Where audit records go. The default sink logs through `tracing`.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: AuditRecord);
}

/// Emits audit records as structured log events under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, record: AuditRecord) {
        let fields = record
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            target: "audit",
            event = record.event.as_str(),
            component = record.component,
            %fields,
            "AUDIT"
        );
    }
}

/// Records audit events through the configured sink.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
    component: &'static str,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            component: "",
        }
    }

    /// A copy of the auditor tagging emitted events with a component name.
    pub fn with_component(&self, component: &'static str) -> Self {
        Self {
            sink: self.sink.clone(),
            component,
        }
    }

    pub fn emit(&self, event: AuditEvent, fields: Vec<(&'static str, String)>) {
        self.sink.emit(AuditRecord {
            event,
            component: self.component,
            fields,
        });
    }
}

impl Default for Auditor {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditSink for RecordingSink {
        fn emit(&self, record: AuditRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    #[test]
    fn auditor_routes_records_to_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let auditor = Auditor::new(sink.clone()).with_component("daemon");

        auditor.emit(
            AuditEvent::VipAcquired,
            vec![("vip", "192.0.2.10".to_string())],
        );

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, AuditEvent::VipAcquired);
        assert_eq!(records[0].component, "daemon");
        assert_eq!(records[0].fields[0], ("vip", "192.0.2.10".to_string()));
    }

    #[test]
    fn event_identifiers_are_stable() {
        assert_eq!(AuditEvent::ConfigLoaded.as_str(), "config_loaded");
        assert_eq!(AuditEvent::BackendWeightChanged.as_str(), "backend_weight_changed");
        assert_eq!(AuditEvent::HealthStateChanged.as_str(), "health_state_changed");
    }
}
