//! Control-structure consistency validation.
//!
//! The validator is a pure read-side computation over a run's artifacts.
//! It never mutates them and is safe to call while the run is still going.

pub mod checks;
pub mod graph;
pub mod report;

pub use graph::{ControlStructureGraph, GraphAssembly, CONTROL_STRUCTURE_KEY};
pub use report::{category, IssueSeverity, ValidationIssue, ValidationReport, ValidationSummary};

use crate::store::ArtifactStore;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Artifact key the quality gate stores its report under.
pub const VALIDATION_REPORT_KEY: &str = "control_structure_validation";

/// Produces categorized consistency and completeness reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlStructureValidator;

impl ControlStructureValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate an already-assembled graph.
    pub fn validate_graph(&self, graph: &ControlStructureGraph) -> ValidationReport {
        let mut issues = Vec::new();
        checks::referential_integrity(graph, &mut issues);
        checks::structural_completeness(graph, &mut issues);
        ValidationReport::from_issues(issues)
    }

    /// Validate the control structure found in a set of artifacts.
    pub fn validate_artifacts(&self, artifacts: &HashMap<String, Value>) -> ValidationReport {
        let assembly = ControlStructureGraph::from_artifacts(artifacts);
        let mut issues: Vec<ValidationIssue> = assembly
            .problems
            .iter()
            .map(|p| {
                ValidationIssue::error(
                    category::CONTROL_STRUCTURE,
                    format!("Malformed control-structure data: {}", p),
                )
            })
            .collect();

        checks::referential_integrity(&assembly.graph, &mut issues);
        checks::structural_completeness(&assembly.graph, &mut issues);
        ValidationReport::from_issues(issues)
    }

    /// Validate the control structure accumulated for a run.
    pub fn validate_run(&self, store: &ArtifactStore, run_id: &str) -> ValidationReport {
        let artifacts = store.snapshot(run_id);
        let report = self.validate_artifacts(&artifacts);
        debug!(
            "Validated run {}: {} errors, {} warnings, {} info",
            run_id, report.summary.errors, report.summary.warnings, report.summary.info
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArtifactKind;
    use serde_json::json;

    fn validate(structure: Value) -> ValidationReport {
        let mut artifacts = HashMap::new();
        artifacts.insert(CONTROL_STRUCTURE_KEY.to_string(), structure);
        ControlStructureValidator::new().validate_artifacts(&artifacts)
    }

    fn errors(report: &ValidationReport) -> Vec<&ValidationIssue> {
        report.issues_with(IssueSeverity::Error).collect()
    }

    #[test]
    fn test_empty_graph_is_complete() {
        let report = ControlStructureValidator::new().validate_artifacts(&HashMap::new());
        assert!(report.is_complete);
        assert!(report.issues.is_empty());

        let report = ControlStructureValidator::new().validate_graph(&ControlStructureGraph::default());
        assert!(report.is_complete);
    }

    #[test]
    fn test_missing_feedback_is_single_warning() {
        let report = validate(json!({
            "controllers": [{"id": "CTRL-1"}],
            "controlled_processes": [{"id": "PROC-1"}],
            "control_actions": [{"source": "CTRL-1", "target": "PROC-1"}]
        }));

        assert!(report.is_complete);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.issues[0].severity, IssueSeverity::Warning);
        assert!(report.issues[0]
            .message
            .to_lowercase()
            .contains("missing feedback for closed-loop control"));
    }

    #[test]
    fn test_closed_loop_has_no_issues() {
        let report = validate(json!({
            "controllers": [{"id": "CTRL-1"}],
            "controlled_processes": [{"id": "PROC-1"}],
            "control_actions": [{"source": "CTRL-1", "target": "PROC-1"}],
            "feedback_mechanisms": [{"source": "PROC-1", "target": "CTRL-1"}]
        }));
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_emergency_action_needs_no_feedback() {
        let report = validate(json!({
            "controllers": [{"id": "CTRL-1"}],
            "controlled_processes": [{"id": "PROC-1"}],
            "control_actions": [{"source": "CTRL-1", "target": "PROC-1", "tags": ["emergency"]}]
        }));
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_unknown_controller_yields_one_error() {
        let report = validate(json!({
            "controllers": [{"id": "CTRL-1"}],
            "controlled_processes": [{"id": "PROC-1"}],
            "control_actions": [
                {"source": "CTRL-1", "target": "PROC-1"},
                {"id": "CA-2", "source": "CTRL-404", "target": "PROC-1"}
            ],
            "feedback_mechanisms": [{"source": "PROC-1", "target": "CTRL-1"}]
        }));

        let errors = errors(&report);
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].category == category::CONTROL_STRUCTURE
                || errors[0].category == category::CONNECTIVITY
        );
        assert_eq!(errors[0].component_id.as_deref(), Some("CA-2"));
        assert!(!report.is_complete);
    }

    #[test]
    fn test_single_member_trust_boundary() {
        let report = validate(json!({
            "controllers": [{"id": "CTRL-1"}],
            "controlled_processes": [{"id": "PROC-1"}],
            "control_actions": [{"source": "CTRL-1", "target": "PROC-1"}],
            "feedback_mechanisms": [{"source": "PROC-1", "target": "CTRL-1"}],
            "trust_boundaries": [{"id": "TB-1", "members": ["CTRL-1"]}]
        }));

        let errors = errors(&report);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, category::TRUST_BOUNDARIES);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_single_unknown_member_still_one_error() {
        let report = validate(json!({
            "trust_boundaries": [{"id": "TB-1", "members": ["GHOST"]}]
        }));
        assert_eq!(errors(&report).len(), 1);
        assert_eq!(report.issues[0].category, category::TRUST_BOUNDARIES);
    }

    #[test]
    fn test_structural_findings() {
        let report = validate(json!({
            "controllers": [{"id": "C1"}, {"id": "C2"}],
            "controlled_processes": [{"id": "P1"}, {"id": "P2"}],
            "control_actions": [{"source": "C1", "target": "P1"}],
            "feedback_mechanisms": [
                {"source": "P1", "target": "C1"},
                {"source": "P2", "target": "C2"}
            ],
            "trust_boundaries": [
                {"id": "TB-1", "members": ["C1", "P1"]},
                {"id": "TB-2", "members": ["C1", "C2", "P2"]}
            ]
        }));

        assert!(report.is_complete);
        let messages: Vec<&str> = report.issues.iter().map(|i| i.message.as_str()).collect();
        // C2 orphan, P2 without incoming action.
        assert_eq!(report.summary.warnings, 2, "{:?}", messages);
        // P2->C2 feedback without reverse action, C1 in two boundaries.
        assert_eq!(report.summary.info, 2, "{:?}", messages);
        assert!(report
            .issues
            .iter()
            .any(|i| i.component_id.as_deref() == Some("C1")
                && i.category == category::TRUST_BOUNDARIES));
    }

    #[test]
    fn test_referential_errors_for_models_and_contexts() {
        let report = validate(json!({
            "controllers": [{"id": "C1"}],
            "controlled_processes": [{"id": "P1"}],
            "control_actions": [{"id": "CA-1", "source": "C1", "target": "P1"}],
            "feedback_mechanisms": [{"source": "P1", "target": "C1"}, {"source": "P9", "target": "C1"}],
            "trust_boundaries": [{"id": "TB-1", "members": ["C1", "X"]}],
            "process_models": [{"controller": "C1", "process": "P404"}],
            "contexts": [{"controller_id": "C1", "action_id": "CA-1"}, {"controller_id": "C1", "action_id": "CA-9"}]
        }));

        let errors = errors(&report);
        assert_eq!(errors.len(), 4, "{:?}", errors);
        assert!(errors.iter().any(|e| e.category == category::FEEDBACK));
        assert!(errors.iter().any(|e| e.category == category::TRUST_BOUNDARIES));
        assert!(errors.iter().any(|e| e.message.contains("P404")));
        assert!(errors.iter().any(|e| e.message.contains("CA-9")));
    }

    #[test]
    fn test_malformed_entries_are_errors() {
        let report = validate(json!({"controllers": [{"name": "nameless"}]}));
        assert_eq!(report.summary.errors, 1);
        assert!(report.issues[0].message.contains("Malformed"));
    }

    #[test]
    fn test_validate_run_reads_store_without_mutation() {
        let store = ArtifactStore::new();
        store.put("r1", "controllers", json!([{"id": "C1"}]), ArtifactKind::Semantic);
        store.put(
            "r1",
            "controlled_processes",
            json!([{"id": "P1"}]),
            ArtifactKind::Semantic,
        );
        store.put(
            "r1",
            "control_actions",
            json!([{"source": "C1", "target": "P1"}]),
            ArtifactKind::Semantic,
        );

        let validator = ControlStructureValidator::new();
        let first = validator.validate_run(&store, "r1");
        let second = validator.validate_run(&store, "r1");
        assert_eq!(first, second);
        assert_eq!(first.summary.warnings, 1);
        assert_eq!(store.keys("r1").len(), 3);
    }
}
