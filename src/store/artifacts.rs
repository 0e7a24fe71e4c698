//! Per-run artifact storage.
//!
//! Artifacts are keyed structured values written by a run's own worker and
//! read by later sections, the retriever, and the validator. Each run owns a
//! separate bucket so writes never contend across runs; reads take cloned
//! snapshots and hold the bucket lock only for the copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Origin of a stored item, used for retrieval filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// `{framework}_{section}` result content.
    Section,
    /// Framework-chosen semantic tag such as `control_structure`.
    Semantic,
    /// Conversation-style textual entry.
    Conversation,
}

/// A stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub key: String,
    pub value: Value,
    pub kind: ArtifactKind,
    /// Monotonic write order within the run.
    pub sequence: u64,
    pub stored_at: DateTime<Utc>,
}

/// A textual entry recorded during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct RunArtifacts {
    artifacts: HashMap<String, Artifact>,
    entries: Vec<ConversationEntry>,
    sequence: u64,
}

impl RunArtifacts {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

type Bucket = Arc<RwLock<RunArtifacts>>;

/// Keyed storage of structured results, scoped per run.
#[derive(Default)]
pub struct ArtifactStore {
    runs: RwLock<HashMap<String, Bucket>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, run_id: &str) -> Option<Bucket> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.get(run_id).cloned()
    }

    fn bucket_or_init(&self, run_id: &str) -> Bucket {
        if let Some(bucket) = self.bucket(run_id) {
            return bucket;
        }
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.entry(run_id.to_string()).or_default().clone()
    }

    /// Prepare storage for a run. Idempotent.
    pub fn init_run(&self, run_id: &str) {
        self.bucket_or_init(run_id);
    }

    /// Whether any storage exists for the run.
    pub fn contains_run(&self, run_id: &str) -> bool {
        self.bucket(run_id).is_some()
    }

    /// Store a value, overwriting any previous value under the same key.
    pub fn put(&self, run_id: &str, key: &str, value: Value, kind: ArtifactKind) {
        let bucket = self.bucket_or_init(run_id);
        let mut run = bucket.write().unwrap_or_else(|e| e.into_inner());
        let sequence = run.next_sequence();
        run.artifacts.insert(
            key.to_string(),
            Artifact {
                key: key.to_string(),
                value,
                kind,
                sequence,
                stored_at: Utc::now(),
            },
        );
        debug!("Stored artifact {} for run {}", key, run_id);
    }

    /// Read a value.
    pub fn get(&self, run_id: &str, key: &str) -> Option<Value> {
        let bucket = self.bucket(run_id)?;
        let run = bucket.read().unwrap_or_else(|e| e.into_inner());
        run.artifacts.get(key).map(|a| a.value.clone())
    }

    /// All artifact values for a run, keyed.
    pub fn snapshot(&self, run_id: &str) -> HashMap<String, Value> {
        self.artifacts(run_id)
            .into_iter()
            .map(|a| (a.key, a.value))
            .collect()
    }

    /// All artifacts for a run, oldest first.
    pub fn artifacts(&self, run_id: &str) -> Vec<Artifact> {
        let Some(bucket) = self.bucket(run_id) else {
            return Vec::new();
        };
        let run = bucket.read().unwrap_or_else(|e| e.into_inner());
        let mut artifacts: Vec<Artifact> = run.artifacts.values().cloned().collect();
        artifacts.sort_by_key(|a| a.sequence);
        artifacts
    }

    /// Artifact keys for a run, oldest first.
    pub fn keys(&self, run_id: &str) -> Vec<String> {
        self.artifacts(run_id).into_iter().map(|a| a.key).collect()
    }

    /// Record a textual entry for retrieval.
    pub fn record_entry(&self, run_id: &str, content: String, metadata: HashMap<String, String>) {
        let bucket = self.bucket_or_init(run_id);
        let mut run = bucket.write().unwrap_or_else(|e| e.into_inner());
        let sequence = run.next_sequence();
        run.entries.push(ConversationEntry {
            content,
            metadata,
            sequence,
            recorded_at: Utc::now(),
        });
    }

    /// Recorded entries, oldest first.
    pub fn entries(&self, run_id: &str) -> Vec<ConversationEntry> {
        match self.bucket(run_id) {
            Some(bucket) => bucket
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .entries
                .clone(),
            None => Vec::new(),
        }
    }

    /// Release everything held for a run. Safe to call repeatedly and on
    /// runs that were never initialized. Returns whether anything was released.
    pub fn cleanup(&self, run_id: &str) -> bool {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        let removed = runs.remove(run_id).is_some();
        if removed {
            debug!("Released artifacts for run {}", run_id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_overwrites() {
        let store = ArtifactStore::new();
        store.put("r1", "hazards", json!(["h1"]), ArtifactKind::Semantic);
        store.put("r1", "hazards", json!(["h1", "h2"]), ArtifactKind::Semantic);

        assert_eq!(store.get("r1", "hazards"), Some(json!(["h1", "h2"])));
        assert_eq!(store.keys("r1"), vec!["hazards"]);
    }

    #[test]
    fn test_runs_are_isolated() {
        let store = ArtifactStore::new();
        store.put("r1", "k", json!(1), ArtifactKind::Section);
        store.put("r2", "k", json!(2), ArtifactKind::Section);

        assert_eq!(store.get("r1", "k"), Some(json!(1)));
        assert_eq!(store.get("r2", "k"), Some(json!(2)));
        assert_eq!(store.get("r3", "k"), None);
    }

    #[test]
    fn test_artifacts_keep_write_order() {
        let store = ArtifactStore::new();
        store.put("r1", "b", json!(1), ArtifactKind::Section);
        store.put("r1", "a", json!(2), ArtifactKind::Section);
        store.put("r1", "b", json!(3), ArtifactKind::Section);

        assert_eq!(store.keys("r1"), vec!["a", "b"]);
        assert_eq!(store.snapshot("r1").len(), 2);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let store = ArtifactStore::new();
        assert!(!store.cleanup("never"));

        store.init_run("r1");
        store.record_entry("r1", "note".into(), HashMap::new());
        assert!(store.contains_run("r1"));
        assert!(store.cleanup("r1"));
        assert!(!store.cleanup("r1"));
        assert!(store.entries("r1").is_empty());
        assert!(store.artifacts("r1").is_empty());
    }

    #[test]
    fn test_concurrent_reads_and_writes() {
        let store = Arc::new(ArtifactStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.put("r1", &format!("k{}", i), json!(i), ArtifactKind::Section);
                }
            })
        };
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let _ = store.snapshot("r1");
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.keys("r1").len(), 200);
    }
}
