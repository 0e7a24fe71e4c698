//! Run reports.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, render_content};

use crate::models::{AnalysisRun, SectionResult, SectionStatus};
use crate::validate::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: AnalysisRun,
    pub model_used: String,
    pub generated_at: DateTime<Utc>,
    pub sections: Vec<SectionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

impl RunReport {
    pub fn new(
        run: AnalysisRun,
        model_used: impl Into<String>,
        mut sections: Vec<SectionResult>,
        validation: Option<ValidationReport>,
    ) -> Self {
        // Stable grouping: run framework order, then section completion time.
        sections.sort_by_key(|s| {
            let position = run
                .frameworks
                .iter()
                .position(|f| *f == s.framework)
                .unwrap_or(usize::MAX);
            (position, s.created_at)
        });
        Self {
            run,
            model_used: model_used.into(),
            generated_at: Utc::now(),
            sections,
            validation,
        }
    }

    /// Sections belonging to one framework, in report order.
    pub fn framework_sections<'a>(
        &'a self,
        framework: &'a str,
    ) -> impl Iterator<Item = &'a SectionResult> + 'a {
        self.sections.iter().filter(move |s| s.framework == framework)
    }

    pub fn failed_sections(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.status == SectionStatus::Failed)
            .count()
    }

    /// Run duration, if the run started and finished.
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.run.started_at, self.run.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
