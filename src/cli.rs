//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::orchestrator::SectionFilter;
use clap::Parser;
use std::path::PathBuf;

/// Threatloom - multi-framework security analysis runner
///
/// Runs configured threat-modeling frameworks (STRIDE, STPA-Sec, ...) over a
/// system description using a local Ollama model, validates the resulting
/// control structure, and writes a Markdown or JSON report.
///
/// Examples:
///   threatloom --input system.md
///   threatloom --input system.md --frameworks stpa_sec --sections stpa_sec:control_structure
///   threatloom --input system.md --format json --output report.json --state-dir .threatloom
///   threatloom --validate artifacts.json --fail-on-errors
///   threatloom --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// File containing the system description to analyze
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present_any = ["init_config", "validate", "description"]
    )]
    pub input: Option<PathBuf>,

    /// System description given inline instead of --input
    #[arg(short, long, value_name = "TEXT", conflicts_with = "input")]
    pub description: Option<String>,

    /// Frameworks to run (comma-separated). Defaults to every configured framework.
    #[arg(short, long, value_name = "IDS", value_delimiter = ',')]
    pub frameworks: Vec<String>,

    /// Restrict sections, as framework:section pairs (comma-separated)
    ///
    /// Example: --sections stride:threats,stpa_sec:control_structure
    #[arg(long, value_name = "PAIRS", value_delimiter = ',')]
    pub sections: Vec<String>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Output file path for the report. Defaults to the configured output.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Persist runs and section results as JSON files under this directory
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Show which frameworks and sections would run, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Validate a control structure JSON file and exit
    #[arg(long, value_name = "FILE")]
    pub validate: Option<PathBuf>,

    /// Exit with code 2 when control structure validation reports errors
    #[arg(long)]
    pub fail_on_errors: bool,

    /// Ollama model to use for analysis
    #[arg(short, long, env = "THREATLOOM_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Number of frameworks analyzed concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Do not attach retrieved context to section prompts
    #[arg(long)]
    pub no_retrieval: bool,

    /// Skip control structure validation after the run
    #[arg(long)]
    pub no_quality_gate: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .threatloom.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .threatloom.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref path) = self.validate {
            if !path.is_file() {
                return Err(format!("Validation input does not exist: {}", path.display()));
            }
            return Ok(());
        }

        match (&self.input, &self.description) {
            (Some(path), _) if !path.is_file() => {
                return Err(format!("Input file does not exist: {}", path.display()));
            }
            (None, Some(text)) if text.trim().is_empty() => {
                return Err("System description must not be empty".to_string());
            }
            (None, None) => {
                return Err("Either --input or --description is required".to_string());
            }
            _ => {}
        }

        if let Some(ref url) = self.ollama_url {
            if !self.dry_run && !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        self.section_filter().map(|_| ())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Section filter built from `--sections`, if any were given.
    pub fn section_filter(&self) -> Result<Option<SectionFilter>, String> {
        if self.sections.is_empty() {
            return Ok(None);
        }
        parse_section_filter(&self.sections).map(Some)
    }
}

/// Parse `framework:section` pairs into a per-framework section list.
///
/// Order is preserved within a framework; repeated pairs are ignored.
pub fn parse_section_filter(pairs: &[String]) -> Result<SectionFilter, String> {
    let mut filter = SectionFilter::new();
    for pair in pairs {
        let (framework, section) = pair
            .split_once(':')
            .map(|(f, s)| (f.trim(), s.trim()))
            .filter(|(f, s)| !f.is_empty() && !s.is_empty())
            .ok_or_else(|| format!("Invalid section '{}': expected framework:section", pair))?;

        let sections = filter.entry(framework.to_string()).or_default();
        if !sections.iter().any(|s| s == section) {
            sections.push(section.to_string());
        }
    }
    Ok(filter)
}
