use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{CycleRequest, CycleResult, Insight, Task};

const COMMAND_TYPES: &[&str] = &["run_cycle", "ping", "cancel"];

/// Message from host to worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    RunCycle(CycleRequest),
    Ping,
    Cancel { cycle_id: String },
}

/// Message from worker to host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StatusUpdate {
        cycle_id: String,
        message: String,
    },
    MemoryConsolidated {
        cycle_id: String,
        items_consolidated: u32,
        timestamp: DateTime<Utc>,
    },
    InsightGenerated {
        cycle_id: String,
        content: String,
        confidence: f64,
    },
    TaskCreated {
        cycle_id: String,
        #[serde(flatten)]
        task: Task,
    },
    CycleComplete {
        result: CycleResult,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cycle_id: Option<String>,
        error: String,
    },
    Cancelled {
        cycle_id: String,
    },
    Pong,
}

impl Event {
    pub fn status(cycle_id: &str, message: impl Into<String>) -> Self {
        Event::StatusUpdate {
            cycle_id: cycle_id.to_string(),
            message: message.into(),
        }
    }

    pub fn insight(cycle_id: &str, insight: &Insight) -> Self {
        Event::InsightGenerated {
            cycle_id: cycle_id.to_string(),
            content: insight.content.clone(),
            confidence: insight.confidence,
        }
    }

    pub fn error(cycle_id: Option<&str>, error: impl ToString) -> Self {
        Event::Error {
            cycle_id: cycle_id.map(str::to_string),
            error: error.to_string(),
        }
    }

    /// Cycle this event belongs to, if any
    pub fn cycle_id(&self) -> Option<&str> {
        match self {
            Event::StatusUpdate { cycle_id, .. }
            | Event::MemoryConsolidated { cycle_id, .. }
            | Event::InsightGenerated { cycle_id, .. }
            | Event::TaskCreated { cycle_id, .. }
            | Event::Cancelled { cycle_id } => Some(cycle_id),
            Event::CycleComplete { result } => Some(&result.id),
            Event::Error { cycle_id, .. } => cycle_id.as_deref(),
            Event::Pong => None,
        }
    }

    /// Whether this event ends a cycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::CycleComplete { .. } | Event::Error { .. } | Event::Cancelled { .. }
        )
    }

    /// Wire tag, as used for report types and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Event::StatusUpdate { .. } => "status_update",
            Event::MemoryConsolidated { .. } => "memory_consolidated",
            Event::InsightGenerated { .. } => "insight_generated",
            Event::TaskCreated { .. } => "task_created",
            Event::CycleComplete { .. } => "cycle_complete",
            Event::Error { .. } => "error",
            Event::Cancelled { .. } => "cancelled",
            Event::Pong => "pong",
        }
    }
}

/// Parse an incoming wire payload as a Command.
///
/// The `type` tag is checked first so an unrecognized command is reported by
/// name instead of as a generic decode failure.
pub fn parse_command(payload: &[u8]) -> Result<Command, ProtocolError> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| ProtocolError::Malformed {
        cycle_id: None,
        reason: e.to_string(),
    })?;

    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    if !COMMAND_TYPES.contains(&tag) {
        return Err(ProtocolError::UnknownType(tag.to_string()));
    }

    let cycle_id = value
        .get("cycle_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        cycle_id,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CycleConfig;

    #[test]
    fn test_parse_command_run_cycle() {
        let json = r#"{
            "type": "run_cycle",
            "cycle_id": "c1",
            "config": {"max_tasks": 3, "consolidation_threshold": 0.5}
        }"#;

        let cmd = parse_command(json.as_bytes()).unwrap();
        assert_eq!(
            cmd,
            Command::RunCycle(CycleRequest::new("c1", CycleConfig::new(3, 0.5)))
        );
    }

    #[test]
    fn test_parse_command_ping() {
        let cmd = parse_command(br#"{"type": "ping"}"#).unwrap();
        assert_eq!(cmd, Command::Ping);
    }

    #[test]
    fn test_parse_command_cancel() {
        let cmd = parse_command(br#"{"type": "cancel", "cycle_id": "c9"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Cancel {
                cycle_id: "c9".to_string()
            }
        );
    }

    #[test]
    fn test_parse_command_unknown_type() {
        let err = parse_command(br#"{"type": "dream"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref t) if t == "dream"));
        assert!(err.to_string().contains("dream"));
    }

    #[test]
    fn test_parse_command_missing_type() {
        let err = parse_command(br#"{"cycle_id": "c1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));
    }

    #[test]
    fn test_parse_command_invalid_json() {
        let err = parse_command(b"not valid json {[}").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { cycle_id: None, .. }));
    }

    #[test]
    fn test_parse_command_missing_field() {
        // run_cycle without config
        let err = parse_command(br#"{"type": "run_cycle", "cycle_id": "c1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
        assert_eq!(err.cycle_id(), Some("c1"));
    }

    #[test]
    fn test_parse_command_bad_config_keeps_cycle_id() {
        let json = r#"{
            "type": "run_cycle",
            "cycle_id": "c1",
            "config": {"max_tasks": -1, "consolidation_threshold": 0.5}
        }"#;
        let err = parse_command(json.as_bytes()).unwrap_err();
        assert_eq!(err.cycle_id(), Some("c1"));
        assert!(err.to_string().starts_with("malformed command:"));
    }

    #[test]
    fn test_event_wire_tags() {
        let pong = serde_json::to_value(Event::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));

        let err = serde_json::to_value(Event::error(None, "unknown command type: x")).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"type": "error", "error": "unknown command type: x"})
        );
    }

    #[test]
    fn test_task_created_flattens_task() {
        let event = Event::TaskCreated {
            cycle_id: "c1".to_string(),
            task: Task {
                id: "task-c1-0".to_string(),
                description: "advance goal".to_string(),
                parent_goal: "g1".to_string(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "task_created");
        assert_eq!(value["id"], "task-c1-0");
        assert_eq!(value["parent_goal"], "g1");

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_helpers() {
        let status = Event::status("c1", "starting");
        assert_eq!(status.cycle_id(), Some("c1"));
        assert!(!status.is_terminal());
        assert_eq!(status.kind(), "status_update");

        let cancelled = Event::Cancelled {
            cycle_id: "c2".to_string(),
        };
        assert!(cancelled.is_terminal());

        assert_eq!(Event::Pong.cycle_id(), None);
        assert!(Event::error(Some("c3"), "boom").is_terminal());
    }
}
