//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.threatloom.toml` files.

use crate::models::{SectionSpec, TemplateKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".threatloom.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Context retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Validation settings.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Analysis frameworks available to runs.
    #[serde(default = "default_frameworks")]
    pub frameworks: Vec<FrameworkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            model: ModelConfig::default(),
            retrieval: RetrievalConfig::default(),
            validation: ValidationConfig::default(),
            frameworks: default_frameworks(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of frameworks executed concurrently within a run.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_frameworks: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            max_concurrent_frameworks: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "threatloom_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds, per section.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    600
}

/// Context retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Attach related artifacts to each section's context.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of hits per section.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

/// Validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Validate the control structure after all frameworks finish.
    #[serde(default = "default_true")]
    pub quality_gate: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { quality_gate: true }
    }
}

fn default_true() -> bool {
    true
}

/// One analysis framework definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Framework identifier used in run requests.
    pub id: String,
    /// Human-readable name.
    pub title: String,
    /// Methodology instructions given to the model for every section.
    #[serde(default)]
    pub instructions: String,
    /// Sections in default execution order.
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

/// One section of a framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub template: TemplateKind,
    /// Also store the section content under this artifact key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    /// Section-specific instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl SectionConfig {
    pub fn spec(&self) -> SectionSpec {
        SectionSpec::new(self.id.clone(), self.title.clone(), self.template)
    }
}

impl FrameworkConfig {
    pub fn section(&self, id: &str) -> Option<&SectionConfig> {
        self.sections.iter().find(|s| s.id == id)
    }
}

fn section(
    id: &str,
    title: &str,
    template: TemplateKind,
    artifact_key: Option<&str>,
    prompt: &str,
) -> SectionConfig {
    SectionConfig {
        id: id.to_string(),
        title: title.to_string(),
        template,
        artifact_key: artifact_key.map(String::from),
        prompt: Some(prompt.to_string()),
    }
}

fn default_frameworks() -> Vec<FrameworkConfig> {
    vec![
        FrameworkConfig {
            id: "stride".to_string(),
            title: "STRIDE Threat Modeling".to_string(),
            instructions: "Apply STRIDE (Spoofing, Tampering, Repudiation, Information disclosure, \
                           Denial of service, Elevation of privilege) to the described system."
                .to_string(),
            sections: vec![
                section(
                    "assets",
                    "Assets and Entry Points",
                    TemplateKind::Table,
                    Some("assets"),
                    "List the assets worth protecting and the entry points that expose them as {\"rows\": [{\"asset\", \"entry_point\", \"description\"}]}.",
                ),
                section(
                    "threats",
                    "Threat Enumeration",
                    TemplateKind::Table,
                    Some("threats"),
                    "Enumerate threats per STRIDE category as {\"rows\": [{\"id\", \"category\", \"asset\", \"threat\", \"impact\"}]}.",
                ),
                section(
                    "mitigations",
                    "Mitigations",
                    TemplateKind::Table,
                    None,
                    "For each threat id, propose mitigations as {\"rows\": [{\"threat_id\", \"mitigation\", \"priority\"}]}.",
                ),
            ],
        },
        FrameworkConfig {
            id: "stpa_sec".to_string(),
            title: "STPA-Sec".to_string(),
            instructions: "Apply STPA-Sec: model the system as a hierarchical control structure \
                           and analyze how unsafe or insecure control can lead to losses."
                .to_string(),
            sections: vec![
                section(
                    "losses",
                    "Losses and Hazards",
                    TemplateKind::Table,
                    Some("hazards"),
                    "Identify losses and system-level hazards as {\"losses\": [{\"id\", \"description\"}], \"hazards\": [{\"id\", \"description\", \"losses\": []}]}.",
                ),
                section(
                    "control_structure",
                    "Control Structure",
                    TemplateKind::Diagram,
                    Some("control_structure"),
                    "Model the control structure as {\"controllers\": [{\"id\", \"name\"}], \"controlled_processes\": [{\"id\", \"name\"}], \"control_actions\": [{\"id\", \"source\", \"target\", \"name\", \"kind\"}], \"feedback_mechanisms\": [{\"id\", \"source\", \"target\"}], \"trust_boundaries\": [{\"id\", \"name\", \"members\": []}], \"process_models\": [{\"controller_id\", \"process_id\", \"variables\": []}], \"contexts\": [{\"controller_id\", \"action_id\", \"conditions\": []}]}.",
                ),
                section(
                    "unsafe_control_actions",
                    "Unsafe Control Actions",
                    TemplateKind::Table,
                    None,
                    "Using the control structure, list unsafe control actions as {\"rows\": [{\"action_id\", \"type\", \"context\", \"hazards\": []}]}.",
                ),
                section(
                    "loss_scenarios",
                    "Loss Scenarios",
                    TemplateKind::Text,
                    None,
                    "Describe causal loss scenarios for the most severe unsafe control actions as {\"scenarios\": [{\"uca\", \"scenario\"}]}.",
                ),
            ],
        },
    ]
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Look up a framework definition.
    pub fn framework(&self, id: &str) -> Option<&FrameworkConfig> {
        self.frameworks.iter().find(|f| f.id == id)
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the user actually passed override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(concurrency) = args.concurrency {
            self.general.max_concurrent_frameworks = concurrency;
        }
        if args.no_retrieval {
            self.retrieval.enabled = false;
        }
        if args.no_quality_gate {
            self.validation.quality_gate = false;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "llama3.2:latest");
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.validation.quality_gate);
        assert!(config.framework("stride").is_some());

        let stpa = config.framework("stpa_sec").unwrap();
        let cs = stpa.section("control_structure").unwrap();
        assert_eq!(cs.artifact_key.as_deref(), Some("control_structure"));
        assert_eq!(cs.spec().template, TemplateKind::Diagram);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"
max_concurrent_frameworks = 2

[model]
name = "qwen2.5:14b"
temperature = 0.2

[retrieval]
top_k = 5

[[frameworks]]
id = "linddun"
title = "LINDDUN"

[[frameworks.sections]]
id = "data_flows"
title = "Data Flows"
template = "diagram"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert_eq!(config.general.max_concurrent_frameworks, 2);
        assert_eq!(config.model.name, "qwen2.5:14b");
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config.retrieval.enabled);
        assert_eq!(config.frameworks.len(), 1);
        assert_eq!(config.frameworks[0].sections[0].template, TemplateKind::Diagram);
    }

    #[test]
    fn test_missing_frameworks_fall_back_to_defaults() {
        let config: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        assert!(config.general.verbose);
        assert_eq!(config.frameworks.len(), 2);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[[frameworks]]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.frameworks, Config::default().frameworks);
    }
}
