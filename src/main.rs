//! Threatloom - multi-framework security analysis runner
//!
//! A CLI that runs configured threat-modeling frameworks over a system
//! description using a local Ollama model and writes a report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, connection, failed or cancelled run, etc.)
//!   2 - Control structure validation errors with --fail-on-errors

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use threatloom::agent::{self, AgentExecutor};
use threatloom::cli::{Args, OutputFormat};
use threatloom::config::{Config, CONFIG_FILE_NAME};
use threatloom::models::RunStatus;
use threatloom::notify::{Notifier, DEFAULT_CONNECTION_CAPACITY};
use threatloom::orchestrator::{
    JsonFilePersistence, MemoryPersistence, Orchestrator, OrchestratorConfig, Persistence,
    SectionFilter,
};
use threatloom::report::{self, RunReport};
use threatloom::store::{ArtifactStore, ContextRetriever, KeywordRetriever, NullRetriever};
use threatloom::transport::ConsoleTransport;
use threatloom::validate::{
    ControlStructureGraph, ControlStructureValidator, IssueSeverity, ValidationReport,
    CONTROL_STRUCTURE_KEY, VALIDATION_REPORT_KEY,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Subscriber id used by the console transport.
const CONSOLE_SUBSCRIBER: &str = "console";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args)?;

    info!("Threatloom v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_cli(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default configuration file.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the model, retrieval, and frameworks.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn run_cli(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    if let Some(ref path) = args.validate {
        return handle_validate(path, args.fail_on_errors);
    }

    let description = read_description(&args)?;
    let frameworks = if args.frameworks.is_empty() {
        config.frameworks.iter().map(|f| f.id.clone()).collect()
    } else {
        args.frameworks.clone()
    };
    let filter = args.section_filter().map_err(anyhow::Error::msg)?;

    let registry = agent::build_registry(&config)?;

    if args.dry_run {
        return handle_dry_run(&registry, &frameworks, filter.as_ref());
    }

    run_analysis(&args, &config, registry, description, frameworks, filter).await
}

/// Run the complete analysis workflow. Returns the exit code.
async fn run_analysis(
    args: &Args,
    config: &Config,
    registry: agent::ExecutorRegistry,
    description: String,
    frameworks: Vec<String>,
    filter: Option<SectionFilter>,
) -> Result<i32> {
    let start_time = Instant::now();

    let notifier = Arc::new(Notifier::new());
    let store = Arc::new(ArtifactStore::new());
    let retriever: Arc<dyn ContextRetriever> = if config.retrieval.enabled {
        Arc::new(KeywordRetriever::new(store.clone()))
    } else {
        Arc::new(NullRetriever)
    };
    let persistence: Arc<dyn Persistence> = match args.state_dir {
        Some(ref dir) => {
            info!("Persisting run state under {}", dir.display());
            Arc::new(JsonFilePersistence::new(dir))
        }
        None => Arc::new(MemoryPersistence::new()),
    };

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from(config),
        registry,
        notifier.clone(),
        store,
        retriever,
        persistence,
    );

    println!("🤖 Model: {} ({})", config.model.name, config.model.ollama_url);
    let run = orchestrator.submit(description, frameworks).await?;
    println!("🔬 Run {}: {}", run.id, run.frameworks.join(", "));

    let stream = notifier.connect(CONSOLE_SUBSCRIBER, DEFAULT_CONNECTION_CAPACITY);
    notifier.subscribe(CONSOLE_SUBSCRIBER, &run.id);
    let transport = tokio::spawn(ConsoleTransport::new(!args.quiet).consume(stream));

    let mut handle = orchestrator.start(&run.id, filter)?;
    tokio::select! {
        joined = &mut handle => joined.context("Run task panicked")?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            } else {
                eprintln!("\n⛔ Cancelling run {}...", run.id);
                orchestrator.cancel(&run.id).await?;
            }
            handle.await.context("Run task panicked")?;
        }
    }

    notifier.disconnect(CONSOLE_SUBSCRIBER);
    let summary = transport.await.context("Console transport panicked")?;
    debug!("Console transport saw {} events", summary.events);

    let finished = orchestrator.load_run(&run.id).await?;
    let sections = orchestrator.section_results(&run.id).await?;
    let validation = stored_validation(&orchestrator, &run.id);

    let report = RunReport::new(finished, config.model.name.clone(), sections, validation);
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| config.general.output.clone().into());
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    orchestrator.teardown(&run.id);

    println!("\n📊 Analysis Summary:");
    println!(
        "   {}",
        report::generator::status_line(&report.run, report.sections.len(), report.failed_sections())
    );
    if let Some(ref validation) = report.validation {
        println!(
            "   Control structure: {} errors, {} warnings, {} info",
            validation.summary.errors, validation.summary.warnings, validation.summary.info
        );
    }
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    println!("   Report saved to: {}", output_path.display());

    match report.run.status {
        RunStatus::Completed => {}
        RunStatus::Failed => bail!(
            "Run failed: {}",
            report.run.error.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::Cancelled => {
            eprintln!("\n⛔ Run cancelled.");
            return Ok(1);
        }
        other => bail!("Run ended in unexpected state {}", other),
    }

    Ok(validation_exit_code(report.validation.as_ref(), args.fail_on_errors))
}

/// The validation report stored by the quality gate, if any.
fn stored_validation(orchestrator: &Orchestrator, run_id: &str) -> Option<ValidationReport> {
    let value = orchestrator.store().get(run_id, VALIDATION_REPORT_KEY)?;
    match serde_json::from_value(value) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!("Stored validation report is unreadable: {}", e);
            None
        }
    }
}

fn validation_exit_code(validation: Option<&ValidationReport>, fail_on_errors: bool) -> i32 {
    match validation {
        Some(report) if fail_on_errors && report.summary.errors > 0 => {
            eprintln!(
                "\n⛔ Control structure has {} validation errors. Failing (exit code 2).",
                report.summary.errors
            );
            2
        }
        _ => 0,
    }
}

/// Handle --validate: check a control structure document and print the findings.
fn handle_validate(path: &Path, fail_on_errors: bool) -> Result<i32> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    // Either an artifact map or a bare control structure.
    let artifacts: HashMap<String, Value> = match document {
        Value::Object(map) => {
            let map: HashMap<String, Value> = map.into_iter().collect();
            if ControlStructureGraph::present_in(&map) {
                map
            } else {
                HashMap::from([(CONTROL_STRUCTURE_KEY.to_string(), Value::Object(map.into_iter().collect()))])
            }
        }
        other => HashMap::from([(CONTROL_STRUCTURE_KEY.to_string(), other)]),
    };

    let report = ControlStructureValidator::new().validate_artifacts(&artifacts);

    println!("🔍 Control structure validation: {}", path.display());
    println!(
        "   Complete: {} | {} errors, {} warnings, {} info",
        if report.is_complete { "yes" } else { "no" },
        report.summary.errors,
        report.summary.warnings,
        report.summary.info
    );
    for severity in [IssueSeverity::Error, IssueSeverity::Warning, IssueSeverity::Info] {
        for issue in report.issues_with(severity) {
            println!(
                "   {} [{}] {}",
                severity.emoji(),
                issue.category,
                issue.message
            );
        }
    }

    Ok(validation_exit_code(Some(&report), fail_on_errors))
}

/// Handle --dry-run: print what would run, exit.
fn handle_dry_run(
    registry: &agent::ExecutorRegistry,
    frameworks: &[String],
    filter: Option<&SectionFilter>,
) -> Result<i32> {
    println!("\n🔍 Dry run: resolving frameworks (no LLM calls)...\n");

    for framework in frameworks {
        let Some(executor) = registry.get(framework) else {
            println!("   ⚠️  {} is not configured; it would be skipped", framework);
            continue;
        };
        let sections = match filter.and_then(|f| f.get(framework)) {
            Some(ids) => executor.resolve_sections(ids),
            None => executor.list_sections(),
        };
        println!("   📦 {} ({} sections)", framework, sections.len());
        for section in sections {
            println!("      - {} [{}] {}", section.id, section.template, section.title);
        }
    }

    println!("\n✅ Dry run complete. No LLM calls were made.");
    Ok(0)
}

/// Read the system description from --input or --description.
fn read_description(args: &Args) -> Result<String> {
    let description = match (&args.input, &args.description) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, Some(text)) => text.clone(),
        (None, None) => bail!("No system description given"),
    };
    if description.trim().is_empty() {
        bail!("System description is empty");
    }
    Ok(description)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
