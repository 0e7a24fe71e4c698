//! Durable storage contract for runs and section results.
//!
//! The orchestrator treats any error from these calls as fatal to the run
//! being saved.

use crate::error::PersistenceError;
use crate::models::{AnalysisRun, SectionResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert or replace a run record.
    async fn save_run(&self, run: &AnalysisRun) -> Result<(), PersistenceError>;

    /// Store a section result.
    async fn save_section_result(&self, result: &SectionResult) -> Result<(), PersistenceError>;

    /// Load a run record.
    async fn load_run(&self, run_id: &str) -> Result<AnalysisRun, PersistenceError>;

    /// Load every section result of a run, oldest first.
    async fn load_section_results(
        &self,
        run_id: &str,
    ) -> Result<Vec<SectionResult>, PersistenceError>;
}

/// Process-local storage, mainly for tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryPersistence {
    runs: RwLock<HashMap<String, AnalysisRun>>,
    sections: RwLock<HashMap<String, Vec<SectionResult>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save_run(&self, run: &AnalysisRun) -> Result<(), PersistenceError> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn save_section_result(&self, result: &SectionResult) -> Result<(), PersistenceError> {
        self.sections
            .write()
            .await
            .entry(result.run_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<AnalysisRun, PersistenceError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(run_id.to_string()))
    }

    async fn load_section_results(
        &self,
        run_id: &str,
    ) -> Result<Vec<SectionResult>, PersistenceError> {
        Ok(self
            .sections
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// JSON files under a state directory:
///
/// ```text
/// <root>/<run_id>/run.json
/// <root>/<run_id>/sections/<framework>/<section_id>.json
/// ```
pub struct JsonFilePersistence {
    root: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf, PersistenceError> {
        Ok(self.root.join(safe_component(run_id)?))
    }

    async fn write_json(path: &Path, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Reject identifiers that would escape the state directory.
fn safe_component(id: &str) -> Result<&str, PersistenceError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        Err(PersistenceError::Backend(format!("invalid identifier: {:?}", id)))
    } else {
        Ok(id)
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn save_run(&self, run: &AnalysisRun) -> Result<(), PersistenceError> {
        let path = self.run_dir(&run.id)?.join("run.json");
        let bytes = serde_json::to_vec_pretty(run)?;
        Self::write_json(&path, bytes).await?;
        debug!("Saved run {} to {}", run.id, path.display());
        Ok(())
    }

    async fn save_section_result(&self, result: &SectionResult) -> Result<(), PersistenceError> {
        let file = format!("{}.json", safe_component(&result.section_id)?);
        let path = self
            .run_dir(&result.run_id)?
            .join("sections")
            .join(safe_component(&result.framework)?)
            .join(file);
        let bytes = serde_json::to_vec_pretty(result)?;
        Self::write_json(&path, bytes).await
    }

    async fn load_run(&self, run_id: &str) -> Result<AnalysisRun, PersistenceError> {
        let path = self.run_dir(run_id)?.join("run.json");
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(run_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn load_section_results(
        &self,
        run_id: &str,
    ) -> Result<Vec<SectionResult>, PersistenceError> {
        let dir = self.run_dir(run_id)?.join("sections");
        let mut frameworks = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results: Vec<SectionResult> = Vec::new();
        while let Some(framework) = frameworks.next_entry().await? {
            if !framework.file_type().await?.is_dir() {
                continue;
            }
            let mut sections = tokio::fs::read_dir(framework.path()).await?;
            while let Some(entry) = sections.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = tokio::fs::read(&path).await?;
                results.push(serde_json::from_slice(&bytes)?);
            }
        }

        results.sort_by_key(|r| r.created_at);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunStatus, SectionSpec, TemplateKind};
    use serde_json::json;

    fn sample_results(run_id: &str) -> Vec<SectionResult> {
        let a = SectionSpec::new("assets", "Assets", TemplateKind::Table);
        let b = SectionSpec::new("threats", "Threats", TemplateKind::Table);
        vec![
            SectionResult::completed(run_id, "stride", &a, json!({"rows": []})),
            SectionResult::failed(run_id, "stride", &b, "timeout".into()),
        ]
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryPersistence::new();
        let mut run = AnalysisRun::new("desc", vec!["stride".into()]);
        store.save_run(&run).await.unwrap();
        run.status = RunStatus::InProgress;
        store.save_run(&run).await.unwrap();

        assert_eq!(store.load_run(&run.id).await.unwrap().status, RunStatus::InProgress);
        assert!(matches!(
            store.load_run("missing").await,
            Err(PersistenceError::NotFound(_))
        ));

        for result in sample_results(&run.id) {
            store.save_section_result(&result).await.unwrap();
        }
        let loaded = store.load_section_results(&run.id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].section_id, "assets");
        assert!(store.load_section_results("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        let run = AnalysisRun::new("desc", vec!["stride".into()]);
        store.save_run(&run).await.unwrap();

        let loaded = store.load_run(&run.id).await.unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.frameworks, vec!["stride"]);
        assert!(dir.path().join(&run.id).join("run.json").exists());

        assert!(store.load_section_results(&run.id).await.unwrap().is_empty());
        for result in sample_results(&run.id) {
            store.save_section_result(&result).await.unwrap();
        }
        let results = store.load_section_results(&run.id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.error.as_deref() == Some("timeout")));
    }

    #[tokio::test]
    async fn test_json_file_keeps_underscore_lookalikes_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        let run = AnalysisRun::new("desc", vec!["A".into(), "A_b".into()]);

        let b_c = SectionSpec::new("b_c", "B C", TemplateKind::Text);
        let c = SectionSpec::new("c", "C", TemplateKind::Text);
        let first = SectionResult::completed(&run.id, "A", &b_c, json!({"from": "A"}));
        let second = SectionResult::completed(&run.id, "A_b", &c, json!({"from": "A_b"}));
        assert_eq!(first.artifact_key(), second.artifact_key());

        store.save_section_result(&first).await.unwrap();
        store.save_section_result(&second).await.unwrap();

        let results = store.load_section_results(&run.id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .any(|r| r.framework == "A" && r.section_id == "b_c" && r.content["from"] == "A"));
        assert!(results
            .iter()
            .any(|r| r.framework == "A_b" && r.section_id == "c" && r.content["from"] == "A_b"));
        assert!(dir
            .path()
            .join(&run.id)
            .join("sections")
            .join("A")
            .join("b_c.json")
            .exists());
    }

    #[tokio::test]
    async fn test_json_file_missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());

        assert!(matches!(
            store.load_run("nope").await,
            Err(PersistenceError::NotFound(_))
        ));
        assert!(matches!(
            store.load_run("../escape").await,
            Err(PersistenceError::Backend(_))
        ));
    }
}
