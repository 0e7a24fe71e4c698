//! Data models for analysis runs.
//!
//! This module contains the core data structures shared by the
//! orchestrator, executors, persistence backends, and report rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of an analysis run.
///
/// ```text
/// pending → in_progress → completed
///                       → failed
///         → cancelled   (from pending or in_progress)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further section results.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid next states from the current state.
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Cancelled],
            Self::InProgress => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Whether `next` is reachable from this state in one step.
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Completed,
    Failed,
}

impl SectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation hint for a section's structured content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Table,
    Chart,
    Diagram,
    #[default]
    Text,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Table => write!(f, "table"),
            TemplateKind::Chart => write!(f, "chart"),
            TemplateKind::Diagram => write!(f, "diagram"),
            TemplateKind::Text => write!(f, "text"),
        }
    }
}

/// A section an executor is able to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Identifier, unique within the framework.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Presentation hint.
    #[serde(default)]
    pub template: TemplateKind,
}

impl SectionSpec {
    pub fn new(id: impl Into<String>, title: impl Into<String>, template: TemplateKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            template,
        }
    }
}

/// One execution of a set of frameworks against one system description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Run identity.
    pub id: String,
    /// Free-text description of the system under review.
    pub system_description: String,
    /// Requested framework identifiers, in submission order.
    pub frameworks: Vec<String>,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// Overall progress, 0..=100.
    #[serde(default)]
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the run failed outside section isolation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Recovered, non-fatal notes (e.g. skipped frameworks).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl AnalysisRun {
    /// Creates a new pending run with a fresh identity.
    ///
    /// Duplicate framework identifiers are dropped, keeping the first occurrence.
    pub fn new(system_description: impl Into<String>, frameworks: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(frameworks.len());
        for framework in frameworks {
            if !unique.contains(&framework) {
                unique.push(framework);
            }
        }

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            system_description: system_description.into(),
            frameworks: unique,
            status: RunStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            notes: Vec::new(),
        }
    }

    /// Whether the run still accepts section results.
    pub fn is_accepting_results(&self) -> bool {
        self.status == RunStatus::InProgress
    }
}

/// Result of one (run, framework, section) triple. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionResult {
    pub run_id: String,
    pub framework: String,
    pub section_id: String,
    pub title: String,
    pub template: TemplateKind,
    pub status: SectionStatus,
    /// Structured content, opaque to the core.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SectionResult {
    /// Creates a successful section result.
    pub fn completed(run_id: &str, framework: &str, spec: &SectionSpec, content: Value) -> Self {
        Self {
            run_id: run_id.to_string(),
            framework: framework.to_string(),
            section_id: spec.id.clone(),
            title: spec.title.clone(),
            template: spec.template,
            status: SectionStatus::Completed,
            content,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Creates a failed section result.
    pub fn failed(run_id: &str, framework: &str, spec: &SectionSpec, error: String) -> Self {
        Self {
            run_id: run_id.to_string(),
            framework: framework.to_string(),
            section_id: spec.id.clone(),
            title: spec.title.clone(),
            template: spec.template,
            status: SectionStatus::Failed,
            content: Value::Null,
            error: Some(error),
            created_at: Utc::now(),
        }
    }

    /// Artifact key this result is stored under.
    pub fn artifact_key(&self) -> String {
        artifact_key(&self.framework, &self.section_id)
    }

    pub fn is_success(&self) -> bool {
        self.status == SectionStatus::Completed
    }
}

/// Default artifact key for a framework section: `{framework}_{section_id}`.
pub fn artifact_key(framework: &str, section_id: &str) -> String {
    format!("{}_{}", framework, section_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::InProgress));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::InProgress.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Completed.allowed_next_states().is_empty());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_run_status_wire_names() {
        assert_eq!(
            serde_json::to_value(RunStatus::InProgress).unwrap(),
            json!("in_progress")
        );
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_new_run_dedupes_frameworks() {
        let run = AnalysisRun::new(
            "desc",
            vec!["stride".into(), "stpa_sec".into(), "stride".into()],
        );
        assert_eq!(run.frameworks, vec!["stride", "stpa_sec"]);
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.started_at.is_none());
        assert!(!run.is_accepting_results());
    }

    #[test]
    fn test_section_result_constructors() {
        let spec = SectionSpec::new("threats", "Threats", TemplateKind::Table);
        let ok = SectionResult::completed("r1", "stride", &spec, json!({"rows": []}));
        assert!(ok.is_success());
        assert_eq!(ok.artifact_key(), "stride_threats");

        let failed = SectionResult::failed("r1", "stride", &spec, "boom".into());
        assert_eq!(failed.status, SectionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.content.is_null());
    }

    #[test]
    fn test_template_kind_default_and_parse() {
        let spec: SectionSpec = serde_json::from_value(json!({"id": "a", "title": "A"})).unwrap();
        assert_eq!(spec.template, TemplateKind::Text);
        let spec: SectionSpec =
            serde_json::from_value(json!({"id": "a", "title": "A", "template": "diagram"}))
                .unwrap();
        assert_eq!(spec.template, TemplateKind::Diagram);
    }
}
