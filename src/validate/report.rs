//! Validation findings and the report wire shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Issue categories.
pub mod category {
    pub const CONTROL_STRUCTURE: &str = "control_structure";
    pub const FEEDBACK: &str = "feedback";
    pub const TRUST_BOUNDARIES: &str = "trust_boundaries";
    pub const CONNECTIVITY: &str = "connectivity";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueSeverity::Info => write!(f, "Info"),
            IssueSeverity::Warning => write!(f, "Warning"),
            IssueSeverity::Error => write!(f, "Error"),
        }
    }
}

impl IssueSeverity {
    pub fn emoji(&self) -> &'static str {
        match self {
            IssueSeverity::Info => "🔵",
            IssueSeverity::Warning => "🟡",
            IssueSeverity::Error => "🔴",
        }
    }
}

/// A single consistency or completeness finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ValidationIssue {
    pub fn new(severity: IssueSeverity, category: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.to_string(),
            message: message.into(),
            component_id: None,
            details: None,
        }
    }

    pub fn error(category: &str, message: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, category, message)
    }

    pub fn warning(category: &str, message: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, category, message)
    }

    pub fn info(category: &str, message: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Info, category, message)
    }

    pub fn component(mut self, id: impl Into<String>) -> Self {
        self.component_id = Some(id.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
}

/// Result of validating a control structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_complete: bool,
    pub issues: Vec<ValidationIssue>,
    pub summary: ValidationSummary,
}

impl ValidationReport {
    /// Builds a report; completeness means no error-severity issues.
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let mut summary = ValidationSummary::default();
        for issue in &issues {
            match issue.severity {
                IssueSeverity::Error => summary.errors += 1,
                IssueSeverity::Warning => summary.warnings += 1,
                IssueSeverity::Info => summary.info += 1,
            }
        }

        Self {
            is_complete: summary.errors == 0,
            issues,
            summary,
        }
    }

    pub fn issues_with(&self, severity: IssueSeverity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_and_completeness() {
        let report = ValidationReport::from_issues(vec![
            ValidationIssue::warning(category::FEEDBACK, "w"),
            ValidationIssue::info(category::TRUST_BOUNDARIES, "i"),
        ]);
        assert!(report.is_complete);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.summary.info, 1);

        let report = ValidationReport::from_issues(vec![ValidationIssue::error(
            category::CONTROL_STRUCTURE,
            "e",
        )]);
        assert!(!report.is_complete);
        assert_eq!(report.issues_with(IssueSeverity::Error).count(), 1);
    }

    #[test]
    fn test_wire_shape() {
        let report = ValidationReport::from_issues(vec![ValidationIssue::error(
            category::TRUST_BOUNDARIES,
            "too small",
        )
        .component("TB-1")
        .details(json!({"members": 1}))]);

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "is_complete": false,
                "issues": [{
                    "severity": "error",
                    "category": "trust_boundaries",
                    "message": "too small",
                    "component_id": "TB-1",
                    "details": {"members": 1}
                }],
                "summary": {"errors": 1, "warnings": 0, "info": 0}
            })
        );
    }

    #[test]
    fn test_empty_report_is_complete() {
        let report = ValidationReport::from_issues(Vec::new());
        assert!(report.is_complete);
        assert_eq!(report.summary, ValidationSummary::default());
    }
}
