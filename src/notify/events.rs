//! Progress event wire types.
//!
//! These shapes are consumed by external observers; field names and
//! enumeration values are part of the wire contract.

use crate::models::{RunStatus, SectionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event published for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunUpdate(RunUpdate),
    SectionUpdate(SectionUpdate),
    FrameworkUpdate(FrameworkUpdate),
}

impl Event {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            Event::RunUpdate(e) => &e.run_id,
            Event::SectionUpdate(e) => &e.run_id,
            Event::FrameworkUpdate(e) => &e.run_id,
        }
    }

    /// Whether this event reports a terminal run state.
    pub fn is_final(&self) -> bool {
        matches!(self, Event::RunUpdate(e) if e.status.is_terminal())
    }
}

/// Run-level status and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub run_id: String,
    pub status: RunStatus,
    /// Percentage, 0..=100.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionUpdate {
    pub run_id: String,
    pub framework: String,
    pub section_id: String,
    pub status: SectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Emitted once per framework after its last section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkUpdate {
    pub run_id: String,
    pub framework: String,
    /// AND of every section status in the framework.
    pub success: bool,
    /// First section error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_update_wire_shape() {
        let event = Event::RunUpdate(RunUpdate {
            run_id: "r1".into(),
            status: RunStatus::InProgress,
            progress: 50.0,
            message: Some("halfway".into()),
        });

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "run_update",
                "run_id": "r1",
                "status": "in_progress",
                "progress": 50.0,
                "message": "halfway"
            })
        );
        assert!(!event.is_final());
    }

    #[test]
    fn test_section_update_wire_shape() {
        let event = Event::SectionUpdate(SectionUpdate {
            run_id: "r1".into(),
            framework: "stride".into(),
            section_id: "threats".into(),
            status: SectionStatus::Failed,
            content: None,
            error: Some("timeout".into()),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "section_update");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["section_id"], "threats");
        assert!(value.get("content").is_none());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_final_event_detection() {
        let event = Event::RunUpdate(RunUpdate {
            run_id: "r1".into(),
            status: RunStatus::Cancelled,
            progress: 10.0,
            message: None,
        });
        assert!(event.is_final());
        assert_eq!(event.run_id(), "r1");
    }
}
