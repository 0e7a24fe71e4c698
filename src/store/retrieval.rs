//! Context retrieval over stored artifacts.
//!
//! Retrieval is advisory. Executors receive whatever hits are available and
//! an empty list is always a valid answer.

use super::artifacts::{ArtifactKind, ArtifactStore};
use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A ranked retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextHit {
    pub content: String,
    pub metadata: HashMap<String, String>,
    /// Relevance, higher is better.
    pub score: f64,
}

/// Ranks previously stored material against a free-text query.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn query(
        &self,
        run_id: &str,
        query: &str,
        top_k: usize,
        kind_filter: Option<ArtifactKind>,
    ) -> Result<Vec<ContextHit>, RetrievalError>;
}

/// Retriever that never has anything to say.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRetriever;

#[async_trait]
impl ContextRetriever for NullRetriever {
    async fn query(
        &self,
        _run_id: &str,
        _query: &str,
        _top_k: usize,
        _kind_filter: Option<ArtifactKind>,
    ) -> Result<Vec<ContextHit>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Ranks artifacts and conversation entries by keyword overlap with the
/// query; ties go to the most recently written item.
pub struct KeywordRetriever {
    store: Arc<ArtifactStore>,
}

impl KeywordRetriever {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }
}

struct Candidate {
    content: String,
    metadata: HashMap<String, String>,
    sequence: u64,
}

#[async_trait]
impl ContextRetriever for KeywordRetriever {
    async fn query(
        &self,
        run_id: &str,
        query: &str,
        top_k: usize,
        kind_filter: Option<ArtifactKind>,
    ) -> Result<Vec<ContextHit>, RetrievalError> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "query contains no searchable terms".to_string(),
            ));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let wants = |kind: ArtifactKind| kind_filter.map_or(true, |k| k == kind);
        let mut candidates = Vec::new();

        for artifact in self.store.artifacts(run_id) {
            if !wants(artifact.kind) {
                continue;
            }
            let mut metadata = HashMap::new();
            metadata.insert("key".to_string(), artifact.key.clone());
            metadata.insert("kind".to_string(), kind_name(artifact.kind).to_string());
            candidates.push(Candidate {
                content: format!("{}: {}", artifact.key, value_text(&artifact.value)),
                metadata,
                sequence: artifact.sequence,
            });
        }

        if wants(ArtifactKind::Conversation) {
            for entry in self.store.entries(run_id) {
                let mut metadata = entry.metadata.clone();
                metadata.insert(
                    "kind".to_string(),
                    kind_name(ArtifactKind::Conversation).to_string(),
                );
                candidates.push(Candidate {
                    content: entry.content,
                    metadata,
                    sequence: entry.sequence,
                });
            }
        }

        let mut scored: Vec<(f64, u64, Candidate)> = candidates
            .into_iter()
            .filter_map(|c| {
                let words = tokenize(&c.content);
                let overlap = terms.iter().filter(|t| words.contains(*t)).count();
                if overlap == 0 {
                    None
                } else {
                    Some((overlap as f64 / terms.len() as f64, c.sequence, c))
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, _, c)| ContextHit {
                content: c.content,
                metadata: c.metadata,
                score,
            })
            .collect())
    }
}

fn kind_name(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Section => "section",
        ArtifactKind::Semantic => "semantic",
        ArtifactKind::Conversation => "conversation",
    }
}

/// Lowercased alphanumeric words of two or more characters.
///
/// Underscores split words so `stride_threats` matches `stride threats`.
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Flatten a JSON value into searchable text (object keys and scalar leaves).
pub fn value_text(value: &Value) -> String {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Null => {}
            Value::Bool(b) => out.push(b.to_string()),
            Value::Number(n) => out.push(n.to_string()),
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => {
                for (k, v) in map {
                    out.push(k.clone());
                    walk(v, out);
                }
            }
        }
    }

    let mut parts = Vec::new();
    walk(value, &mut parts);
    parts.join(" ")
}
