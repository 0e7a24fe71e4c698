//! The executor contract consumed by the orchestrator.
//!
//! Each framework is implemented by one `AgentExecutor`, registered under the
//! framework identifier at startup.

use crate::error::SectionError;
use crate::models::{SectionSpec, TemplateKind};
use crate::store::ContextHit;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an executor gets to see for one section.
#[derive(Debug, Clone)]
pub struct SectionContext {
    pub run_id: String,
    pub framework: String,
    pub section: SectionSpec,
    /// Free-text description of the system under review.
    pub system_description: String,
    /// Artifacts accumulated by the run so far.
    pub artifacts: HashMap<String, Value>,
    /// Retrieval hits for this section's semantic query. May be empty.
    pub related: Vec<ContextHit>,
}

/// What an executor hands back for a section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionOutput {
    /// Structured content stored in the section result.
    pub content: Value,
    /// Extra artifacts to store under framework-chosen keys.
    pub artifacts: Vec<(String, Value)>,
}

impl SectionOutput {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.artifacts.push((key.into(), value));
        self
    }
}

/// A pluggable analyzer for one framework.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Sections this executor can produce, in default execution order.
    fn list_sections(&self) -> Vec<SectionSpec>;

    /// Produce one section. Errors are isolated to the section.
    async fn analyze_section(
        &self,
        section_id: &str,
        context: &SectionContext,
    ) -> Result<SectionOutput, SectionError>;

    /// Resolve requested section ids against `list_sections`.
    ///
    /// Unknown ids are kept with a placeholder spec so the executor can
    /// reject them and the failure is recorded like any other section.
    fn resolve_sections(&self, requested: &[String]) -> Vec<SectionSpec> {
        let known = self.list_sections();
        requested
            .iter()
            .map(|id| {
                known
                    .iter()
                    .find(|s| &s.id == id)
                    .cloned()
                    .unwrap_or_else(|| SectionSpec::new(id.clone(), id.clone(), TemplateKind::Text))
            })
            .collect()
    }
}

/// Lookup table of executors keyed by framework identifier.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn AgentExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the framework.
    pub fn register(&mut self, framework: impl Into<String>, executor: Arc<dyn AgentExecutor>) {
        self.executors.insert(framework.into(), executor);
    }

    pub fn get(&self, framework: &str) -> Option<Arc<dyn AgentExecutor>> {
        self.executors.get(framework).cloned()
    }

    pub fn contains(&self, framework: &str) -> bool {
        self.executors.contains_key(framework)
    }

    /// Registered framework identifiers, sorted.
    pub fn frameworks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl AgentExecutor for Echo {
        fn list_sections(&self) -> Vec<SectionSpec> {
            vec![
                SectionSpec::new("one", "One", TemplateKind::Table),
                SectionSpec::new("two", "Two", TemplateKind::Chart),
            ]
        }

        async fn analyze_section(
            &self,
            section_id: &str,
            _context: &SectionContext,
        ) -> Result<SectionOutput, SectionError> {
            Ok(SectionOutput::new(json!({ "section": section_id })))
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        registry.register("zeta", Arc::new(Echo));
        registry.register("alpha", Arc::new(Echo));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("alpha"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.frameworks(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_resolve_sections_keeps_order_and_unknowns() {
        let resolved = Echo.resolve_sections(&["two".to_string(), "nope".to_string()]);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].template, TemplateKind::Chart);
        assert_eq!(resolved[1].id, "nope");
        assert_eq!(resolved[1].template, TemplateKind::Text);
    }

    #[test]
    fn test_section_output_builder() {
        let output = SectionOutput::new(json!({"a": 1})).with_artifact("hazards", json!([]));
        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].0, "hazards");
    }
}
