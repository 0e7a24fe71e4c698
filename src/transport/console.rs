//! Terminal transport.
//!
//! Consumes one subscriber connection and renders the run on stderr with an
//! indicatif progress bar, until the run's final event arrives.

use crate::models::{RunStatus, SectionStatus};
use crate::notify::{Event, EventStream, FrameworkUpdate};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

/// What the transport observed for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportSummary {
    pub events: usize,
    pub sections_completed: usize,
    pub sections_failed: usize,
    pub frameworks: Vec<FrameworkUpdate>,
    pub final_status: Option<RunStatus>,
    pub final_message: Option<String>,
}

impl TransportSummary {
    /// The run reached a terminal state while we were listening.
    pub fn finished(&self) -> bool {
        self.final_status.is_some()
    }
}

/// Renders events for a single run.
pub struct ConsoleTransport {
    bar: ProgressBar,
    summary: TransportSummary,
}

impl ConsoleTransport {
    pub fn new(show_progress: bool) -> Self {
        let bar = if show_progress {
            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        Self {
            bar,
            summary: TransportSummary::default(),
        }
    }

    /// Apply one event. Returns `true` once the run's final event was seen.
    pub fn apply(&mut self, event: &Event) -> bool {
        self.summary.events += 1;
        match event {
            Event::RunUpdate(update) => {
                self.bar.set_position(update.progress.clamp(0.0, 100.0) as u64);
                if let Some(ref message) = update.message {
                    self.bar.set_message(message.clone());
                }
                if update.status.is_terminal() {
                    self.summary.final_status = Some(update.status);
                    self.summary.final_message = update.message.clone();
                    let line = format!(
                        "{} Run {}: {}",
                        status_icon(update.status),
                        update.status,
                        update.message.as_deref().unwrap_or("")
                    );
                    self.bar.finish_with_message(line);
                    return true;
                }
            }
            Event::SectionUpdate(update) => {
                let line = match update.status {
                    SectionStatus::Completed => {
                        self.summary.sections_completed += 1;
                        format!("   ✓ {}/{}", update.framework, update.section_id)
                    }
                    SectionStatus::Failed => {
                        self.summary.sections_failed += 1;
                        format!(
                            "   ✗ {}/{}: {}",
                            update.framework,
                            update.section_id,
                            update.error.as_deref().unwrap_or("unknown error")
                        )
                    }
                };
                self.bar.println(line);
            }
            Event::FrameworkUpdate(update) => {
                let line = if update.success {
                    format!("📦 {} finished", update.framework)
                } else {
                    format!(
                        "📦 {} finished with failures ({})",
                        update.framework,
                        update.error.as_deref().unwrap_or("unknown error")
                    )
                };
                self.bar.println(line);
                self.summary.frameworks.push(update.clone());
            }
        }
        false
    }

    /// Read events until the run ends or the connection closes.
    pub async fn consume(mut self, mut stream: EventStream) -> TransportSummary {
        while let Some(event) = stream.recv().await {
            if self.apply(&event) {
                break;
            }
        }
        if !self.summary.finished() {
            debug!(
                "Connection {} closed before the run finished",
                stream.connection_id()
            );
            self.bar.abandon();
        }
        self.summary
    }
}

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "✅",
        RunStatus::Failed => "❌",
        RunStatus::Cancelled => "⛔",
        RunStatus::Pending | RunStatus::InProgress => "⏳",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notifier, RunUpdate, SectionUpdate};

    fn run_update(status: RunStatus, progress: f64) -> Event {
        Event::RunUpdate(RunUpdate {
            run_id: "r1".into(),
            status,
            progress,
            message: Some(format!("{} at {}", status, progress)),
        })
    }

    fn section(section_id: &str, status: SectionStatus) -> Event {
        Event::SectionUpdate(SectionUpdate {
            run_id: "r1".into(),
            framework: "stride".into(),
            section_id: section_id.into(),
            status,
            content: None,
            error: (status == SectionStatus::Failed).then(|| "timeout".to_string()),
        })
    }

    #[test]
    fn test_apply_tracks_run() {
        let mut transport = ConsoleTransport::new(false);
        assert!(!transport.apply(&run_update(RunStatus::InProgress, 0.0)));
        assert!(!transport.apply(&section("assets", SectionStatus::Completed)));
        assert!(!transport.apply(&section("threats", SectionStatus::Failed)));
        assert!(!transport.apply(&Event::FrameworkUpdate(FrameworkUpdate {
            run_id: "r1".into(),
            framework: "stride".into(),
            success: false,
            error: Some("timeout".into()),
        })));
        assert!(transport.apply(&run_update(RunStatus::Completed, 100.0)));

        let summary = transport.summary;
        assert_eq!(summary.events, 5);
        assert_eq!(summary.sections_completed, 1);
        assert_eq!(summary.sections_failed, 1);
        assert_eq!(summary.frameworks.len(), 1);
        assert_eq!(summary.final_status, Some(RunStatus::Completed));
        assert!(summary.finished());
    }

    #[tokio::test]
    async fn test_consume_stops_at_final_event() {
        let notifier = Notifier::new();
        let stream = notifier.connect("cli", 16);
        notifier.subscribe("cli", "r1");

        notifier.publish("r1", run_update(RunStatus::InProgress, 50.0));
        notifier.publish("r1", run_update(RunStatus::Cancelled, 50.0));
        notifier.publish("r1", section("late", SectionStatus::Completed));

        let summary = ConsoleTransport::new(false).consume(stream).await;
        assert_eq!(summary.events, 2);
        assert_eq!(summary.final_status, Some(RunStatus::Cancelled));
        assert_eq!(summary.sections_completed, 0);
    }

    #[tokio::test]
    async fn test_consume_handles_closed_connection() {
        let notifier = Notifier::new();
        let stream = notifier.connect("cli", 16);
        notifier.subscribe("cli", "r1");
        notifier.publish("r1", run_update(RunStatus::InProgress, 10.0));
        notifier.disconnect("cli");

        let summary = ConsoleTransport::new(false).consume(stream).await;
        assert_eq!(summary.events, 1);
        assert!(!summary.finished());
    }
}
