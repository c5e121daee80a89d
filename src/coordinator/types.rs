//! Typed records for the coordinator's collections.
//!
//! The backend stores loosely-typed documents; everything crossing the
//! gateway boundary is validated into these tagged records. Status fields
//! are integer-coded on the wire.

use serde::{Deserialize, Serialize};

/// Marker written into an execution's logs when the agent picks it up.
pub const START_MARKER: &str = "Execution started...\n";

/// Machine status as stored by the coordinator.
///
/// Wire encoding: `0 = Offline`, `1 = Busy`, `2 = Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MachineStatus {
    #[default]
    Offline,
    Busy,
    Idle,
}

impl From<MachineStatus> for u8 {
    fn from(status: MachineStatus) -> Self {
        match status {
            MachineStatus::Offline => 0,
            MachineStatus::Busy => 1,
            MachineStatus::Idle => 2,
        }
    }
}

impl TryFrom<u8> for MachineStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MachineStatus::Offline),
            1 => Ok(MachineStatus::Busy),
            2 => Ok(MachineStatus::Idle),
            other => Err(format!("invalid machine status code {other}")),
        }
    }
}

/// Execution status as stored by the coordinator.
///
/// Wire encoding: `0 = Pending`, `1 = Running`, `2 = Success`, `3 = Error`.
/// Success and Error are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

impl ExecutionStatus {
    /// Next value in the heartbeat probe's status cycle.
    ///
    /// The invisible heartbeat record cycles through all four codes purely
    /// as a liveness signal; the values carry no execution semantics there.
    pub fn cycled(self) -> Self {
        match self {
            ExecutionStatus::Pending => ExecutionStatus::Running,
            ExecutionStatus::Running => ExecutionStatus::Success,
            ExecutionStatus::Success => ExecutionStatus::Error,
            ExecutionStatus::Error => ExecutionStatus::Pending,
        }
    }
}

impl From<ExecutionStatus> for u8 {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Pending => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Success => 2,
            ExecutionStatus::Error => 3,
        }
    }
}

impl TryFrom<u8> for ExecutionStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(ExecutionStatus::Pending),
            1 => Ok(ExecutionStatus::Running),
            2 => Ok(ExecutionStatus::Success),
            3 => Ok(ExecutionStatus::Error),
            other => Err(format!("invalid execution status code {other}")),
        }
    }
}

/// The coordinator's record for this agent's host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub status: MachineStatus,
    /// Free-form state payload that survives across executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Machine {
    /// The persisted state blob, with the backend's empty placeholders
    /// (null, empty string) normalized away.
    pub fn context(&self) -> Option<&serde_json::Value> {
        self.data.as_ref().filter(|v| {
            !v.is_null() && !matches!(v, serde_json::Value::String(s) if s.is_empty())
        })
    }
}

/// Partial update for a machine record. Unset fields are not sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MachinePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MachineStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl MachinePatch {
    /// Patch carrying only a status change.
    pub fn status(status: MachineStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Patch carrying only a state blob change.
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }
}

/// A unit of remote code to run, tracked as a coordinator record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    /// Owning machine reference.
    #[serde(default)]
    pub machine: String,
    /// Heartbeat probe records are invisible; user work is not.
    #[serde(default)]
    pub invisible: bool,
    #[serde(default)]
    pub completed: bool,
    /// Source code payload.
    #[serde(default)]
    pub executable: String,
    /// Free text result.
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    /// Run time in seconds.
    #[serde(default)]
    pub duration: f64,
}

/// Fields for creating a new execution record.
#[derive(Debug, Clone, Serialize)]
pub struct NewExecution {
    pub machine: String,
    pub invisible: bool,
    pub completed: bool,
    pub executable: String,
    pub logs: String,
    pub status: ExecutionStatus,
}

impl NewExecution {
    /// The invisible heartbeat record for a machine.
    pub fn heartbeat(machine_id: &str) -> Self {
        Self {
            machine: machine_id.to_string(),
            invisible: true,
            completed: false,
            executable: String::new(),
            logs: String::new(),
            status: ExecutionStatus::Pending,
        }
    }
}

/// Partial update for an execution record. Unset fields are not sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl ExecutionPatch {
    /// Start marker: the agent has picked the execution up.
    pub fn started() -> Self {
        Self {
            logs: Some(START_MARKER.to_string()),
            status: Some(ExecutionStatus::Running),
            ..Default::default()
        }
    }

    /// Heartbeat probe: only the status cycles.
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Terminal result of a finished execution.
    pub fn finished(logs: String, succeeded: bool, duration_secs: f64) -> Self {
        Self {
            logs: Some(logs),
            status: Some(if succeeded {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Error
            }),
            completed: Some(true),
            duration: Some(duration_secs),
        }
    }
}

/// Query filter for looking up a single execution record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionFilter {
    pub machine: Option<String>,
    pub invisible: Option<bool>,
}

impl ExecutionFilter {
    /// Filter matching a machine's invisible heartbeat record.
    pub fn heartbeat(machine_id: &str) -> Self {
        Self {
            machine: Some(machine_id.to_string()),
            invisible: Some(true),
        }
    }
}

/// Action attached to a realtime record event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// A realtime change notification for an execution record.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordEvent {
    pub action: EventAction,
    pub record: ExecutionRecord,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_status_wire_encoding() {
        let machine = Machine {
            id: "m1".to_string(),
            ip: String::new(),
            mac: String::new(),
            name: String::new(),
            region: String::new(),
            status: MachineStatus::Idle,
            data: None,
        };
        let value = serde_json::to_value(&machine).unwrap();
        assert_eq!(value["status"], json!(2));

        let decoded: Machine = serde_json::from_value(json!({"id": "m1", "status": 1})).unwrap();
        assert_eq!(decoded.status, MachineStatus::Busy);

        let bad = serde_json::from_value::<Machine>(json!({"id": "m1", "status": 7}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_execution_status_cycle_visits_all_codes() {
        let mut status = ExecutionStatus::Pending;
        let mut seen = Vec::new();
        for _ in 0..4 {
            status = status.cycled();
            seen.push(u8::from(status));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(status, ExecutionStatus::Pending);
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let patch = MachinePatch::status(MachineStatus::Busy);
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({"status": 1}));

        let patch = ExecutionPatch::finished("done".to_string(), true, 1.5);
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            value,
            json!({"logs": "done", "status": 2, "completed": true, "duration": 1.5})
        );
    }

    #[test]
    fn test_machine_context_normalizes_empty_placeholders() {
        let mut machine: Machine =
            serde_json::from_value(json!({"id": "m1", "status": 2})).unwrap();
        assert_eq!(machine.context(), None);

        machine.data = Some(json!(""));
        assert_eq!(machine.context(), None);

        machine.data = Some(json!(null));
        assert_eq!(machine.context(), None);

        machine.data = Some(json!({"k": 1}));
        assert_eq!(machine.context(), Some(&json!({"k": 1})));
    }

    #[test]
    fn test_event_action_tolerates_unknown_actions() {
        let event: RecordEvent = serde_json::from_value(json!({
            "action": "archive",
            "record": {"id": "e1"}
        }))
        .unwrap();
        assert_eq!(event.action, EventAction::Other);

        let event: RecordEvent = serde_json::from_value(json!({
            "action": "create",
            "record": {"id": "e1", "machine": "m1", "executable": "print(1)"}
        }))
        .unwrap();
        assert_eq!(event.action, EventAction::Create);
        assert_eq!(event.record.status, ExecutionStatus::Pending);
        assert!(!event.record.completed);
    }
}
