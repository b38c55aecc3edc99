mod metrics;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use extract::build_model;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workflow::{AppConfig, Settings, WorkflowContext, WorkflowRegistry};

use crate::metrics::{Metrics, TimedOperation};

#[derive(Parser)]
#[command(name = "medminer", version, about = "Structured extraction from medical letters")]
struct Cli {
    /// TOML settings file, overridden by MEDMINER_* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a workflow over a letter file or a directory of letters
    Extract(ExtractArgs),
    /// List the available workflows
    List,
}

#[derive(Args)]
struct ExtractArgs {
    /// Workflow name, see `medminer list`
    workflow: String,

    /// A `.txt` letter or a directory of them
    path: PathBuf,

    /// Criterion for the boolean statement workflow
    #[arg(long)]
    statement: Option<String>,

    #[arg(long)]
    model_provider: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    base_url: Option<String>,

    /// Output directory for the CSV files
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// One output subdirectory per patient
    #[arg(long)]
    split_patient: bool,

    #[arg(long)]
    snowstorm_base_url: Option<String>,

    #[arg(long)]
    icd_client_id: Option<String>,

    #[arg(long)]
    icd_client_secret: Option<String>,
}

impl ExtractArgs {
    /// Command line values as settings, keyed like the settings file
    fn overrides(&self, current: &Settings) -> Settings {
        let mut settings = Settings::new();

        let provider = self
            .model_provider
            .as_deref()
            .or(current.get_str("model_provider"))
            .unwrap_or("ollama")
            .to_lowercase();

        let mut set = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                settings.set(key, value);
            }
        };
        set("model_provider", self.model_provider.as_deref());
        set(&format!("{}_model", provider), self.model.as_deref());
        set(&format!("{}_api_key", provider), self.api_key.as_deref());
        set(&format!("{}_base_url", provider), self.base_url.as_deref());
        let base_dir = self.base_dir.as_deref().map(Path::to_string_lossy);
        set("base_dir", base_dir.as_deref());
        set("snowstorm_base_url", self.snowstorm_base_url.as_deref());
        set("icd_client_id", self.icd_client_id.as_deref());
        set("icd_client_secret", self.icd_client_secret.as_deref());
        if self.split_patient {
            set("split_patient", Some("true"));
        }

        settings
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn extract(args: ExtractArgs, mut settings: Settings) -> Result<()> {
    settings.merge(args.overrides(&settings));
    let config = AppConfig::from_settings(&settings).context("Invalid configuration")?;

    info!(
        provider = %config.model.provider,
        model = %config.model.model,
        base_dir = %config.storage.base_dir.display(),
        "Starting extraction"
    );

    let model = build_model(&config.model).context("Failed to create model client")?;
    let mut ctx = WorkflowContext::new(model, config);
    if let Some(statement) = &args.statement {
        ctx = ctx.with_statement(statement.as_str());
    }

    let workflow = WorkflowRegistry::with_defaults().build(&args.workflow, &ctx)?;
    let documents = ingest::load_letters(&args.path).await?;
    info!(workflow = workflow.name(), documents = documents.len(), "Loaded letters");

    let metrics = Metrics::new();
    for document in &documents {
        let timer = TimedOperation::start();

        match workflow.run(document).await {
            Ok(summary) => {
                metrics.record_success(timer.elapsed(), summary.extracted, summary.stored);
                info!(
                    patient_id = %summary.patient_id,
                    extracted = summary.extracted,
                    stored = summary.stored,
                    "Letter processed"
                );
            }
            Err(e) if e.is_fatal() => {
                metrics.record_failure(timer.elapsed());
                error!(patient_id = %document.patient_id(), error = %e, "Aborting batch");
                return Err(e).with_context(|| {
                    format!("Workflow '{}' failed on {}", workflow.name(), document.patient_id())
                });
            }
            Err(e) => {
                metrics.record_failure(timer.elapsed());
                warn!(patient_id = %document.patient_id(), error = %e, "Skipping letter");
            }
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        processed = snapshot.documents_processed,
        failed = snapshot.documents_failed,
        avg_ms = snapshot.avg_run_time_ms,
        "Batch finished"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Extract(args) => extract(args, settings).await,
        Command::List => {
            for name in WorkflowRegistry::with_defaults().names() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ExtractArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Extract(args) => args,
            Command::List => panic!("expected extract"),
        }
    }

    #[test]
    fn test_overrides_use_provider_prefix() {
        let args = parse(&[
            "medminer", "extract", "medication_extraction_workflow", "letters",
            "--model-provider", "openai", "--model", "gpt-4o-mini", "--api-key", "sk-test",
            "--split-patient",
        ]);

        let overrides = args.overrides(&Settings::new());

        assert_eq!(overrides.get_str("model_provider"), Some("openai"));
        assert_eq!(overrides.get_str("openai_model"), Some("gpt-4o-mini"));
        assert_eq!(overrides.get_str("openai_api_key"), Some("sk-test"));
        assert_eq!(overrides.get_str("split_patient"), Some("true"));
        assert_eq!(overrides.get_str("base_dir"), None);
    }

    #[test]
    fn test_overrides_follow_configured_provider() {
        let args = parse(&["medminer", "extract", "diagnosis_extraction_workflow", "a.txt", "--model", "mistral"]);
        let mut current = Settings::new();
        current.set("model_provider", "ollama");

        let overrides = args.overrides(&current);

        assert_eq!(overrides.get_str("ollama_model"), Some("mistral"));
        assert_eq!(overrides.get_str("model_provider"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_base_dir_is_kept() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut args = parse(&["medminer", "extract", "medication_extraction_workflow", "letters"]);
        args.base_dir = Some(PathBuf::from(OsStr::from_bytes(b"out\xff")));

        let overrides = args.overrides(&Settings::new());

        assert_eq!(overrides.get_str("base_dir"), Some("out\u{FFFD}"));
    }

    #[tokio::test]
    async fn test_extract_rejects_directory_without_letters() {
        let letters = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(letters.path().join("notes.md"), "not a letter").unwrap();

        let args = parse(&[
            "medminer", "extract", "medication_extraction_workflow",
            letters.path().to_str().unwrap(),
            "--base-dir", output.path().to_str().unwrap(),
        ]);
        let err = extract(args, Settings::new()).await.unwrap_err();

        assert!(err.to_string().contains("No .txt letters found"));
        assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
    }
}
