use crate::monitor::MonitorStatus;
use serde::Serialize;
use tag_core::Reconciliation;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorUiEvent {
    Snapshot {
        status: MonitorStatus,
        reconciliation: Reconciliation,
    },
    ConnectionChanged {
        connected: bool,
    },
}

impl MonitorUiEvent {
    /// SSE event name; matches the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            MonitorUiEvent::Snapshot { .. } => "snapshot",
            MonitorUiEvent::ConnectionChanged { .. } => "connection_changed",
        }
    }
}
