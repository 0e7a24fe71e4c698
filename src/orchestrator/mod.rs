//! Run orchestration.
//!
//! The orchestrator owns the run state machine. `start` hands a run to a
//! background task that drives every framework's executor section by
//! section, persists and stores each result, and reports progress through
//! the notifier. Section and framework failures are isolated; only
//! failures outside that isolation (persistence) fail the run.

pub mod persistence;

pub use persistence::{JsonFilePersistence, MemoryPersistence, Persistence};

use crate::agent::{AgentExecutor, ExecutorRegistry, SectionContext};
use crate::config::Config;
use crate::error::OrchestratorError;
use crate::models::{AnalysisRun, RunStatus, SectionResult, SectionSpec};
use crate::notify::{Event, FrameworkUpdate, Notifier, RunUpdate, SectionUpdate};
use crate::store::{value_text, ArtifactKind, ArtifactStore, ContextHit, ContextRetriever};
use crate::validate::{
    ControlStructureGraph, ControlStructureValidator, ValidationReport, VALIDATION_REPORT_KEY,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-framework list of section ids to run instead of the executor's own list.
pub type SectionFilter = HashMap<String, Vec<String>>;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Frameworks of one run executed concurrently.
    pub max_concurrent_frameworks: usize,
    /// Attach retrieval hits to section contexts.
    pub retrieval_enabled: bool,
    /// Hits per section query.
    pub retrieval_top_k: usize,
    /// Validate the control structure after all frameworks finish.
    pub quality_gate: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_frameworks: 4,
            retrieval_enabled: true,
            retrieval_top_k: 3,
            quality_gate: true,
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent_frameworks: config.general.max_concurrent_frameworks.max(1),
            retrieval_enabled: config.retrieval.enabled,
            retrieval_top_k: config.retrieval.top_k,
            quality_gate: config.validation.quality_gate,
        }
    }
}

/// Sections scheduled for one framework.
struct FrameworkPlan {
    framework: String,
    executor: Arc<dyn AgentExecutor>,
    sections: Vec<SectionSpec>,
}

/// What happened to one framework.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkOutcome {
    pub framework: String,
    pub sections_run: usize,
    pub success: bool,
    pub first_error: Option<String>,
    /// The run left `in_progress` before the framework finished.
    pub interrupted: bool,
}

struct RunProgress {
    total: usize,
    completed: AtomicUsize,
}

impl RunProgress {
    fn advance(&self) -> f64 {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        percent(done, self.total)
    }

    fn current(&self) -> f64 {
        percent(self.completed.load(Ordering::SeqCst), self.total)
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// Coordinates analysis runs.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    registry: ExecutorRegistry,
    notifier: Arc<Notifier>,
    store: Arc<ArtifactStore>,
    retriever: Arc<dyn ContextRetriever>,
    persistence: Arc<dyn Persistence>,
    validator: ControlStructureValidator,
    runs: Mutex<HashMap<String, AnalysisRun>>,
    /// Per-run gate serializing section commits with `cancel`.
    commit_gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: ExecutorRegistry,
        notifier: Arc<Notifier>,
        store: Arc<ArtifactStore>,
        retriever: Arc<dyn ContextRetriever>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                notifier,
                store,
                retriever,
                persistence,
                validator: ControlStructureValidator::new(),
                runs: Mutex::new(HashMap::new()),
                commit_gates: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.inner.notifier
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.inner.registry
    }

    /// Create and persist a pending run.
    pub async fn submit(
        &self,
        system_description: impl Into<String>,
        frameworks: Vec<String>,
    ) -> Result<AnalysisRun, OrchestratorError> {
        let run = AnalysisRun::new(system_description, frameworks);
        if run.frameworks.is_empty() {
            return Err(OrchestratorError::NoFrameworks(run.id));
        }

        self.inner.persistence.save_run(&run).await?;
        self.inner.store.init_run(&run.id);
        self.inner.lock_runs().insert(run.id.clone(), run.clone());
        info!(
            "Submitted run {} with frameworks: {}",
            run.id,
            run.frameworks.join(", ")
        );
        Ok(run)
    }

    /// Begin executing a pending run in the background.
    ///
    /// The run moves to `in_progress` before this returns, so a second call
    /// for the same run is rejected. The returned handle may be ignored.
    pub fn start(
        &self,
        run_id: &str,
        filter: Option<SectionFilter>,
    ) -> Result<JoinHandle<()>, OrchestratorError> {
        {
            let mut runs = self.inner.lock_runs();
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| OrchestratorError::NotFound(run_id.to_string()))?;

            if run.status != RunStatus::Pending {
                return Err(OrchestratorError::InvalidTransition {
                    run_id: run_id.to_string(),
                    from: run.status,
                    to: RunStatus::InProgress,
                });
            }
            if run.frameworks.is_empty() {
                return Err(OrchestratorError::NoFrameworks(run_id.to_string()));
            }

            run.status = RunStatus::InProgress;
            run.started_at = Some(Utc::now());
        }

        let inner = self.inner.clone();
        let run_id = run_id.to_string();
        Ok(tokio::spawn(async move {
            inner.execute(run_id, filter.unwrap_or_default()).await;
        }))
    }

    /// Cancel a pending or in-progress run.
    ///
    /// Returns `Ok(false)` without touching the run when it is already
    /// terminal. A section already executing is allowed to finish; its
    /// result is discarded. A section commit already underway completes
    /// first, so a result is either fully recorded before the cancel or
    /// not recorded at all.
    pub async fn cancel(&self, run_id: &str) -> Result<bool, OrchestratorError> {
        if self.run(run_id).is_none() {
            return Err(OrchestratorError::NotFound(run_id.to_string()));
        }
        let gate = self.inner.commit_gate(run_id);
        let snapshot = {
            let _commit = gate.lock().await;
            let mut runs = self.inner.lock_runs();
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| OrchestratorError::NotFound(run_id.to_string()))?;

            if !run.status.can_transition_to(RunStatus::Cancelled) {
                debug!("Ignoring cancel for run {} in state {}", run_id, run.status);
                return Ok(false);
            }

            run.status = RunStatus::Cancelled;
            run.completed_at = Some(Utc::now());
            let snapshot = run.clone();
            self.inner.notifier.publish(
                run_id,
                Event::RunUpdate(RunUpdate {
                    run_id: run_id.to_string(),
                    status: RunStatus::Cancelled,
                    progress: snapshot.progress,
                    message: Some("Run cancelled".to_string()),
                }),
            );
            snapshot
        };

        info!("Cancelled run {}", run_id);
        if let Err(e) = self.inner.persistence.save_run(&snapshot).await {
            error!("Failed to persist cancellation of run {}: {}", run_id, e);
        }
        Ok(true)
    }

    /// Current in-memory state of a run.
    pub fn run(&self, run_id: &str) -> Option<AnalysisRun> {
        self.inner.lock_runs().get(run_id).cloned()
    }

    /// Run state, falling back to persistence for runs not held in memory.
    pub async fn load_run(&self, run_id: &str) -> Result<AnalysisRun, OrchestratorError> {
        if let Some(run) = self.run(run_id) {
            return Ok(run);
        }
        Ok(self.inner.persistence.load_run(run_id).await?)
    }

    /// Persisted section results of a run.
    pub async fn section_results(
        &self,
        run_id: &str,
    ) -> Result<Vec<SectionResult>, OrchestratorError> {
        Ok(self.inner.persistence.load_section_results(run_id).await?)
    }

    /// Validate the control structure accumulated so far for a run.
    pub fn validate(&self, run_id: &str) -> ValidationReport {
        self.inner.validator.validate_run(&self.inner.store, run_id)
    }

    /// Release the in-memory state of a terminal run.
    ///
    /// Returns `false` if the run is unknown or still active.
    pub fn teardown(&self, run_id: &str) -> bool {
        let released = {
            let mut runs = self.inner.lock_runs();
            match runs.get(run_id).map(|r| r.status) {
                Some(status) if status.is_terminal() => runs.remove(run_id).is_some(),
                Some(_) => return false,
                None => false,
            }
        };
        if released {
            self.inner.lock_gates().remove(run_id);
        }
        self.inner.store.cleanup(run_id);
        released
    }
}

impl Inner {
    fn lock_runs(&self) -> MutexGuard<'_, HashMap<String, AnalysisRun>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_gates(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.commit_gates.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit_gate(&self, run_id: &str) -> Arc<AsyncMutex<()>> {
        self.lock_gates().entry(run_id.to_string()).or_default().clone()
    }

    fn snapshot(&self, run_id: &str) -> Option<AnalysisRun> {
        self.lock_runs().get(run_id).cloned()
    }

    fn is_in_progress(&self, run_id: &str) -> bool {
        self.lock_runs()
            .get(run_id)
            .is_some_and(|r| r.status == RunStatus::InProgress)
    }

    /// Publish only while the run is still in progress.
    ///
    /// Checked under the run lock so nothing is emitted after a cancel's
    /// final event.
    fn publish_if_active(&self, run_id: &str, event: Event) -> bool {
        let runs = self.lock_runs();
        if runs
            .get(run_id)
            .is_some_and(|r| r.status == RunStatus::InProgress)
        {
            self.notifier.publish(run_id, event);
            true
        } else {
            false
        }
    }

    fn progress_update(&self, run_id: &str, progress: f64, message: String) {
        {
            let mut runs = self.lock_runs();
            if let Some(run) = runs.get_mut(run_id) {
                if run.status == RunStatus::InProgress {
                    run.progress = progress;
                }
            }
        }
        self.publish_if_active(
            run_id,
            Event::RunUpdate(RunUpdate {
                run_id: run_id.to_string(),
                status: RunStatus::InProgress,
                progress,
                message: Some(message),
            }),
        );
    }

    async fn execute(self: Arc<Self>, run_id: String, filter: SectionFilter) {
        match self.drive(&run_id, &filter).await {
            Ok(summary) => self.complete(&run_id, summary).await,
            Err(e) => {
                error!("Run {} failed: {}", run_id, e);
                self.fail(&run_id, e.to_string()).await;
            }
        }
    }

    /// Run every framework. Returns the final status message.
    async fn drive(&self, run_id: &str, filter: &SectionFilter) -> Result<String, OrchestratorError> {
        let run = self
            .snapshot(run_id)
            .ok_or_else(|| OrchestratorError::NotFound(run_id.to_string()))?;
        self.persistence.save_run(&run).await?;

        info!("Starting run {} ({} frameworks)", run_id, run.frameworks.len());
        self.progress_update(run_id, 0.0, "Run started".to_string());

        let mut plans = Vec::new();
        for framework in &run.frameworks {
            let Some(executor) = self.registry.get(framework) else {
                let note = format!("Framework '{}' is not registered; skipped", framework);
                warn!("Run {}: {}", run_id, note);
                if let Some(run) = self.lock_runs().get_mut(run_id) {
                    run.notes.push(note.clone());
                }
                self.progress_update(run_id, 0.0, note);
                continue;
            };

            let sections = match filter.get(framework) {
                Some(ids) => executor.resolve_sections(ids),
                None => executor.list_sections(),
            };
            plans.push(FrameworkPlan {
                framework: framework.clone(),
                executor,
                sections,
            });
        }

        let progress = RunProgress {
            total: plans.iter().map(|p| p.sections.len()).sum(),
            completed: AtomicUsize::new(0),
        };

        let mut outcomes = Vec::with_capacity(plans.len());
        {
            let mut frameworks = stream::iter(
                plans
                    .into_iter()
                    .map(|plan| self.run_framework(run_id, &run.system_description, plan, &progress)),
            )
            .buffer_unordered(self.config.max_concurrent_frameworks.max(1));

            while let Some(outcome) = frameworks.next().await {
                outcomes.push(outcome?);
            }
        }

        let sections_run: usize = outcomes.iter().map(|o| o.sections_run).sum();
        let failed_frameworks = outcomes.iter().filter(|o| !o.success).count();
        let mut message = format!(
            "Run completed: {} sections across {} frameworks ({} with failures)",
            sections_run,
            outcomes.len(),
            failed_frameworks
        );

        if self.config.quality_gate && self.is_in_progress(run_id) {
            if let Some(report) = self.quality_gate(run_id) {
                message.push_str(&format!(
                    "; control structure: {} errors, {} warnings",
                    report.summary.errors, report.summary.warnings
                ));
            }
        }

        debug!("Run {} progress at finish: {:.1}%", run_id, progress.current());
        Ok(message)
    }

    /// Validate the run's control structure, if it has one.
    fn quality_gate(&self, run_id: &str) -> Option<ValidationReport> {
        let artifacts = self.store.snapshot(run_id);
        if !ControlStructureGraph::present_in(&artifacts) {
            return None;
        }

        let report = self.validator.validate_artifacts(&artifacts);
        if !report.is_complete {
            warn!(
                "Run {}: control structure has {} validation errors",
                run_id, report.summary.errors
            );
        }
        match serde_json::to_value(&report) {
            Ok(value) => self
                .store
                .put(run_id, VALIDATION_REPORT_KEY, value, ArtifactKind::Semantic),
            Err(e) => warn!("Could not store validation report for run {}: {}", run_id, e),
        }
        Some(report)
    }

    async fn section_context(
        &self,
        run_id: &str,
        framework: &str,
        system_description: &str,
        section: &SectionSpec,
    ) -> SectionContext {
        let related = if self.config.retrieval_enabled {
            self.related_context(run_id, framework, &section.id).await
        } else {
            Vec::new()
        };

        SectionContext {
            run_id: run_id.to_string(),
            framework: framework.to_string(),
            section: section.clone(),
            system_description: system_description.to_string(),
            artifacts: self.store.snapshot(run_id),
            related,
        }
    }

    async fn related_context(&self, run_id: &str, framework: &str, section_id: &str) -> Vec<ContextHit> {
        let query = format!("{} {} analysis", framework, section_id);
        match self
            .retriever
            .query(run_id, &query, self.config.retrieval_top_k, None)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Context retrieval failed for '{}': {}", query, e);
                Vec::new()
            }
        }
    }

    async fn run_framework(
        &self,
        run_id: &str,
        system_description: &str,
        plan: FrameworkPlan,
        progress: &RunProgress,
    ) -> Result<FrameworkOutcome, OrchestratorError> {
        let FrameworkPlan {
            framework,
            executor,
            sections,
        } = plan;
        let total = sections.len();
        let mut outcome = FrameworkOutcome {
            framework: framework.clone(),
            sections_run: 0,
            success: true,
            first_error: None,
            interrupted: false,
        };

        let gate = self.commit_gate(run_id);
        info!("Run {}: framework {} with {} sections", run_id, framework, total);

        for spec in &sections {
            if !self.is_in_progress(run_id) {
                info!("Run {} is no longer in progress; stopping {}", run_id, framework);
                outcome.interrupted = true;
                return Ok(outcome);
            }

            self.progress_update(
                run_id,
                progress.current(),
                format!("Running {}/{}", framework, spec.id),
            );

            let context = self
                .section_context(run_id, &framework, system_description, spec)
                .await;

            let (result, extra_artifacts) = match executor.analyze_section(&spec.id, &context).await {
                Ok(output) => (
                    SectionResult::completed(run_id, &framework, spec, output.content),
                    output.artifacts,
                ),
                Err(e) => {
                    warn!("Run {}: section {}/{} failed: {}", run_id, framework, spec.id, e);
                    (
                        SectionResult::failed(run_id, &framework, spec, e.to_string()),
                        Vec::new(),
                    )
                }
            };

            // Status check, persist, and artifact writes happen under the
            // commit gate so a concurrent cancel lands entirely before or after.
            {
                let _commit = gate.lock().await;
                if !self.is_in_progress(run_id) {
                    info!(
                        "Run {} left in_progress during {}/{}; discarding result",
                        run_id, framework, spec.id
                    );
                    outcome.interrupted = true;
                    return Ok(outcome);
                }

                self.persistence.save_section_result(&result).await?;
                self.record_artifacts(&result, extra_artifacts);

                self.publish_if_active(
                    run_id,
                    Event::SectionUpdate(SectionUpdate {
                        run_id: run_id.to_string(),
                        framework: framework.clone(),
                        section_id: result.section_id.clone(),
                        status: result.status,
                        content: (!result.content.is_null()).then(|| result.content.clone()),
                        error: result.error.clone(),
                    }),
                );
            }

            if !result.is_success() {
                outcome.success = false;
                if outcome.first_error.is_none() {
                    outcome.first_error = result.error.clone();
                }
            }
            outcome.sections_run += 1;

            let overall = progress.advance();
            self.progress_update(
                run_id,
                overall,
                format!(
                    "{}: {}/{} sections ({:.0}%)",
                    framework,
                    outcome.sections_run,
                    total,
                    percent(outcome.sections_run, total)
                ),
            );
        }

        self.publish_if_active(
            run_id,
            Event::FrameworkUpdate(FrameworkUpdate {
                run_id: run_id.to_string(),
                framework: framework.clone(),
                success: outcome.success,
                error: outcome.first_error.clone(),
            }),
        );
        info!(
            "Run {}: framework {} finished (success: {})",
            run_id, framework, outcome.success
        );

        Ok(outcome)
    }

    fn record_artifacts(&self, result: &SectionResult, extra: Vec<(String, Value)>) {
        let run_id = result.run_id.as_str();
        let value = serde_json::to_value(result).unwrap_or_default();
        self.store
            .put(run_id, &result.artifact_key(), value, ArtifactKind::Section);

        for (key, value) in extra {
            self.store.put(run_id, &key, value, ArtifactKind::Semantic);
        }

        if result.is_success() {
            let mut metadata = HashMap::new();
            metadata.insert("framework".to_string(), result.framework.clone());
            metadata.insert("section_id".to_string(), result.section_id.clone());
            self.store.record_entry(
                run_id,
                format!(
                    "{}/{}: {}\n{}",
                    result.framework,
                    result.section_id,
                    result.title,
                    value_text(&result.content)
                ),
                metadata,
            );
        }
    }

    async fn complete(&self, run_id: &str, message: String) {
        let snapshot = {
            let runs = self.lock_runs();
            match runs.get(run_id) {
                Some(run) if run.status == RunStatus::InProgress => {
                    let mut done = run.clone();
                    done.status = RunStatus::Completed;
                    done.progress = 100.0;
                    done.completed_at = Some(Utc::now());
                    done
                }
                _ => return,
            }
        };

        if let Err(e) = self.persistence.save_run(&snapshot).await {
            error!("Failed to persist completion of run {}: {}", run_id, e);
            self.fail(run_id, e.to_string()).await;
            return;
        }

        let mut runs = self.lock_runs();
        if let Some(run) = runs.get_mut(run_id) {
            if run.status != RunStatus::InProgress {
                return;
            }
            *run = snapshot;
            info!("Run {} completed", run_id);
            self.notifier.publish(
                run_id,
                Event::RunUpdate(RunUpdate {
                    run_id: run_id.to_string(),
                    status: RunStatus::Completed,
                    progress: 100.0,
                    message: Some(message),
                }),
            );
        }
    }

    async fn fail(&self, run_id: &str, message: String) {
        let snapshot = {
            let mut runs = self.lock_runs();
            let Some(run) = runs.get_mut(run_id) else {
                return;
            };
            if run.status.is_terminal() {
                return;
            }
            run.status = RunStatus::Failed;
            run.error = Some(message.clone());
            run.completed_at = Some(Utc::now());
            self.notifier.publish(
                run_id,
                Event::RunUpdate(RunUpdate {
                    run_id: run_id.to_string(),
                    status: RunStatus::Failed,
                    progress: run.progress,
                    message: Some(message),
                }),
            );
            run.clone()
        };

        if let Err(e) = self.persistence.save_run(&snapshot).await {
            error!("Failed to persist failure of run {}: {}", run_id, e);
        }
    }
}
