//! Pluggable analyzers.
//!
//! This module provides the executor contract the orchestrator drives and
//! the LLM-backed executor used for configured frameworks.

pub mod executor;
pub mod llm;

pub use executor::{AgentExecutor, ExecutorRegistry, SectionContext, SectionOutput};
pub use llm::LlmExecutor;

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;

/// Register an `LlmExecutor` for every framework in the configuration.
pub fn build_registry(config: &Config) -> Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    for framework in &config.frameworks {
        let executor = LlmExecutor::new(config.model.clone(), framework.clone())?;
        registry.register(framework.id.clone(), Arc::new(executor));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_registry_from_default_config() {
        let registry = build_registry(&Config::default()).unwrap();
        assert_eq!(registry.frameworks(), vec!["stpa_sec", "stride"]);
        assert_eq!(registry.get("stride").unwrap().list_sections().len(), 3);
    }
}
