//! Markdown report generation.
//!
//! This module renders a finished run, its section results, and the control
//! structure validation into a Markdown or JSON report.

use super::RunReport;
use crate::models::{AnalysisRun, SectionResult, SectionStatus, TemplateKind};
use crate::store::value_text;
use crate::validate::{IssueSeverity, ValidationReport};
use anyhow::Result;
use serde_json::{Map, Value};

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Threat Analysis Report\n\n");

    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_system_section(&report.run.system_description));
    output.push_str(&generate_summary_section(report));

    for framework in &report.run.frameworks {
        output.push_str(&generate_framework_section(report, framework));
    }

    if let Some(ref validation) = report.validation {
        output.push_str(&generate_validation_section(validation));
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &RunReport) -> String {
    let run = &report.run;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Run:** `{}`\n", run.id));
    section.push_str(&format!("- **Status:** {}\n", run.status));
    section.push_str(&format!("- **Frameworks:** {}\n", run.frameworks.join(", ")));
    section.push_str(&format!("- **Model Used:** `{}`\n", report.model_used));
    section.push_str(&format!(
        "- **Created:** {}\n",
        run.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(completed) = run.completed_at {
        section.push_str(&format!(
            "- **Finished:** {}\n",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(duration) = report.duration_seconds() {
        section.push_str(&format!("- **Duration:** {:.1}s\n", duration));
    }
    if let Some(ref error) = run.error {
        section.push_str(&format!("- **Error:** {}\n", error));
    }
    section.push('\n');

    if !run.notes.is_empty() {
        section.push_str("**Notes:**\n\n");
        for note in &run.notes {
            section.push_str(&format!("- {}\n", note));
        }
        section.push('\n');
    }

    section
}

fn anchor(text: &str) -> String {
    text.to_lowercase().replace(['/', '.', ' ', '_'], "-")
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &RunReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [System Description](#system-description)\n");
    toc.push_str("- [Summary](#summary)\n");
    for framework in &report.run.frameworks {
        toc.push_str(&format!("- [{}](#{})\n", framework, anchor(framework)));
    }
    if report.validation.is_some() {
        toc.push_str("- [Control Structure Validation](#control-structure-validation)\n");
    }
    toc.push('\n');

    toc
}

fn generate_system_section(description: &str) -> String {
    let mut section = String::new();
    section.push_str("## System Description\n\n");
    section.push_str(description.trim());
    section.push_str("\n\n");
    section
}

/// Generate the summary section.
fn generate_summary_section(report: &RunReport) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Framework | ✓ Completed | ✗ Failed |\n");
    section.push_str("|:---|:---:|:---:|\n");

    for framework in &report.run.frameworks {
        let (completed, failed) =
            report
                .framework_sections(framework)
                .fold((0, 0), |(ok, bad), s| match s.status {
                    SectionStatus::Completed => (ok + 1, bad),
                    SectionStatus::Failed => (ok, bad + 1),
                });
        section.push_str(&format!("| {} | {} | {} |\n", framework, completed, failed));
    }
    section.push_str(&format!(
        "| **Total** | **{}** | **{}** |\n\n",
        report.sections.len() - report.failed_sections(),
        report.failed_sections()
    ));

    section
}

fn generate_framework_section(report: &RunReport, framework: &str) -> String {
    let mut section = String::new();
    section.push_str(&format!("## {} {{#{}}}\n\n", framework, anchor(framework)));

    let mut any = false;
    for result in report.framework_sections(framework) {
        any = true;
        section.push_str(&generate_section_block(result));
    }
    if !any {
        section.push_str("*No sections were recorded for this framework.*\n\n");
    }

    section
}

/// Generate a single section block.
fn generate_section_block(result: &SectionResult) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {}\n\n", result.title));
    block.push_str(&format!(
        "*Section: `{}` | Template: {}*\n\n",
        result.section_id, result.template
    ));

    match result.status {
        SectionStatus::Completed => block.push_str(&render_content(result.template, &result.content)),
        SectionStatus::Failed => block.push_str(&format!(
            "> ❌ **Failed:** {}\n\n",
            result.error.as_deref().unwrap_or("unknown error")
        )),
    }

    block
}

/// Render section content according to its template.
///
/// Tables use the first array of objects found in the content; diagrams
/// and charts are shown as JSON. Anything that cannot be tabulated falls
/// back to text, or JSON for structured content.
pub fn render_content(template: TemplateKind, content: &Value) -> String {
    match template {
        TemplateKind::Table => match find_rows(content) {
            Some(rows) => render_table(rows),
            None => render_text(content),
        },
        TemplateKind::Diagram | TemplateKind::Chart => render_json(content),
        TemplateKind::Text => render_text(content),
    }
}

fn render_text(content: &Value) -> String {
    match content {
        Value::Object(map) if map.len() == 1 && map.contains_key("text") => {
            format!("{}\n\n", value_text(&map["text"]))
        }
        Value::String(text) => format!("{}\n\n", text),
        Value::Null => "*No content.*\n\n".to_string(),
        other => render_json(other),
    }
}

fn render_json(content: &Value) -> String {
    let pretty = serde_json::to_string_pretty(content).unwrap_or_else(|_| content.to_string());
    format!("```json\n{}\n```\n\n", pretty)
}

fn find_rows(content: &Value) -> Option<&Vec<Value>> {
    let is_rows = |v: &Value| matches!(v, Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object));
    match content {
        Value::Array(items) if is_rows(content) => Some(items),
        Value::Object(map) => map.values().find(|v| is_rows(v)).and_then(Value::as_array),
        _ => None,
    }
}

fn render_table(rows: &[Value]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows.iter().filter_map(Value::as_object) {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut table = String::new();
    table.push_str(&format!("| {} |\n", columns.join(" | ")));
    table.push_str(&format!("|{}\n", ":---|".repeat(columns.len())));
    let empty = Map::new();
    for row in rows {
        let row = row.as_object().unwrap_or(&empty);
        let cells: Vec<String> = columns
            .iter()
            .map(|c| row.get(*c).map(cell).unwrap_or_default())
            .collect();
        table.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    table.push('\n');
    table
}

fn cell(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate the control structure validation section.
fn generate_validation_section(validation: &ValidationReport) -> String {
    let mut section = String::new();

    section.push_str("## Control Structure Validation\n\n");
    section.push_str(&format!(
        "**Complete:** {}\n\n",
        if validation.is_complete { "yes" } else { "no" }
    ));
    section.push_str(&format!(
        "| {} Errors | {} Warnings | {} Info |\n",
        IssueSeverity::Error.emoji(),
        IssueSeverity::Warning.emoji(),
        IssueSeverity::Info.emoji()
    ));
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} |\n\n",
        validation.summary.errors, validation.summary.warnings, validation.summary.info
    ));

    if validation.issues.is_empty() {
        section.push_str("No issues were found in the control structure.\n\n");
        return section;
    }

    for severity in [IssueSeverity::Error, IssueSeverity::Warning, IssueSeverity::Info] {
        for issue in validation.issues_with(severity) {
            section.push_str(&format!(
                "- {} **{}** `{}`: {}",
                severity.emoji(),
                severity,
                issue.category,
                issue.message
            ));
            if let Some(ref component) = issue.component_id {
                section.push_str(&format!(" (component `{}`)", component));
            }
            section.push('\n');
        }
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by threatloom v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// One-line status for console output.
pub fn status_line(run: &AnalysisRun, sections: usize, failed: usize) -> String {
    format!(
        "Run {} {}: {} sections, {} failed",
        run.id, run.status, sections, failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunStatus, SectionSpec};
    use crate::validate::{category, ValidationIssue};
    use chrono::Utc;
    use serde_json::json;

    fn create_test_report() -> RunReport {
        let mut run = AnalysisRun::new(
            "An online banking portal.",
            vec!["stride".into(), "stpa_sec".into()],
        );
        run.status = RunStatus::Completed;
        run.started_at = Some(Utc::now());
        run.completed_at = run.started_at;
        run.notes.push("Framework 'linddun' is not registered; skipped".into());

        let threats = SectionSpec::new("threats", "Threats", TemplateKind::Table);
        let cs = SectionSpec::new("control_structure", "Control Structure", TemplateKind::Diagram);
        let losses = SectionSpec::new("losses", "Losses", TemplateKind::Text);
        let sections = vec![
            SectionResult::failed(&run.id, "stpa_sec", &losses, "timeout".into()),
            SectionResult::completed(
                &run.id,
                "stride",
                &threats,
                json!({"threats": [
                    {"id": "T-1", "category": "Spoofing", "description": "Stolen | session"},
                    {"id": "T-2", "category": "Tampering"}
                ]}),
            ),
            SectionResult::completed(&run.id, "stpa_sec", &cs, json!({"controllers": [{"id": "C1"}]})),
        ];

        let validation = ValidationReport::from_issues(vec![ValidationIssue::warning(
            category::FEEDBACK,
            "Missing feedback for closed-loop control: 'CA-1'",
        )
        .component("CA-1")]);

        RunReport::new(run, "llama3.2:latest", sections, Some(validation))
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Threat Analysis Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("## stride"));
        assert!(markdown.contains("## Control Structure Validation"));
        assert!(markdown.contains("linddun"));
        assert!(markdown.contains("> ❌ **Failed:** timeout"));
        assert!(markdown.contains("| stride | 1 | 0 |"));
        assert!(markdown.contains("| stpa_sec | 1 | 1 |"));
        assert!(markdown.contains("component `CA-1`"));
    }

    #[test]
    fn test_sections_follow_framework_order() {
        let report = create_test_report();
        assert_eq!(report.sections[0].framework, "stride");
        assert_eq!(report.framework_sections("stpa_sec").count(), 2);
        assert_eq!(report.failed_sections(), 1);
        assert_eq!(report.duration_seconds(), Some(0.0));
    }

    #[test]
    fn test_render_table() {
        let rendered = render_content(
            TemplateKind::Table,
            &json!({"threats": [{"id": "T-1", "tags": ["a", "b"]}, {"id": "T-2", "note": "x|y"}]}),
        );
        assert!(rendered.contains("| id | tags | note |"));
        assert!(rendered.contains("| T-1 | a, b |  |"));
        assert!(rendered.contains("x\\|y"));
    }

    #[test]
    fn test_render_fallbacks() {
        assert_eq!(
            render_content(TemplateKind::Text, &json!({"text": "plain words"})),
            "plain words\n\n"
        );
        assert!(render_content(TemplateKind::Table, &json!({"summary": "none"})).contains("none"));
        assert!(render_content(TemplateKind::Diagram, &json!({"a": 1})).starts_with("```json"));
        assert_eq!(render_content(TemplateKind::Text, &Value::Null), "*No content.*\n\n");
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"run\""));
        assert!(json.contains("\"sections\""));
        assert!(json.contains("\"validation\""));

        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sections.len(), 3);
    }

    #[test]
    fn test_status_line() {
        let report = create_test_report();
        let line = status_line(&report.run, 3, 1);
        assert!(line.contains("completed"));
        assert!(line.contains("1 failed"));
    }
}
