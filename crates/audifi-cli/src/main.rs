use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use audifi_core::{
    build_client, Annotation, AuditError, AuditPipeline, AuditRequest, ConsoleLine, Credential,
    ExportDecision, LineKind, PipelineOutcome, ProviderSettings, RetryPolicy, RiskLevel,
    ScoreBand,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::{Config, Environment, File};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const ENV_PREFIX: &str = "AUDIFI";
const API_KEY_ENV: &str = "AUDIFI_API_KEY";
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "audifi",
    author,
    version,
    about = "LLM-assisted smart contract auditor"
)]
struct Cli {
    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Audit a smart contract source file
    Check(CheckArgs),
}

#[derive(clap::Args, Debug, Default)]
struct CheckArgs {
    /// Contract source file, relative to the working directory
    file: PathBuf,

    /// Write a PDF report next to the source without asking
    #[arg(long, conflicts_with = "no_export")]
    export: bool,

    /// Never write a PDF report
    #[arg(long)]
    no_export: bool,

    /// Model provider (gemini, openai, anthropic, replay)
    #[arg(long, value_name = "NAME")]
    provider: Option<String>,

    /// Model name override
    #[arg(long, value_name = "NAME")]
    model: Option<String>,

    /// Bound for a single model call, e.g. `45s` or `2m`
    #[arg(long, value_name = "DURATION")]
    timeout: Option<humantime::Duration>,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Check(args) => check(args, cli.config.as_deref()).await,
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn check(args: CheckArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let source_path = resolve_source(&args.file)?;
    let source_text = tokio::fs::read_to_string(&source_path)
        .await
        .with_context(|| format!("failed to read {}", source_path.display()))?;

    let settings = load_settings(config_path, Environment::with_prefix(ENV_PREFIX), &args)?;
    tracing::debug!(provider = %settings.provider, model = ?settings.model, "settings resolved");
    let client = build_client(&settings)?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let credential = acquire_credential(&mut stdin).await?;
    let export = export_decision(&args, &source_path, &mut stdin).await?;

    let pipeline = AuditPipeline::new(client, RetryPolicy::from_settings(&settings));
    let request = AuditRequest::new(source_text, credential);

    let outcome = tokio::select! {
        outcome = pipeline.run(&request, export) => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    match outcome {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report_failure(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn resolve_source(file: &Path) -> Result<PathBuf> {
    let path = std::env::current_dir()
        .context("failed to determine working directory")?
        .join(file);
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    if path.is_dir() {
        bail!("Path is a directory, not a file: {}", path.display());
    }
    Ok(path)
}

/// Layer the optional config file, `AUDIFI_*` environment and command-line flags.
fn load_settings(
    config_path: Option<&Path>,
    env: Environment,
    args: &CheckArgs,
) -> Result<ProviderSettings> {
    let mut builder = Config::builder();
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path.to_path_buf()));
    }
    let timeout_secs = args
        .timeout
        .map(|timeout| i64::try_from(timeout.as_secs().max(1)).unwrap_or(i64::MAX));
    let config = builder
        .add_source(env.try_parsing(true))
        .set_override_option("provider", args.provider.clone())?
        .set_override_option("model", args.model.clone())?
        .set_override_option("timeout_secs", timeout_secs)?
        .build()
        .context("failed to load configuration")?;

    let mut settings: ProviderSettings = config
        .try_deserialize()
        .context("invalid configuration")?;
    settings.endpoint = non_blank(settings.endpoint);
    settings.model = non_blank(settings.model);
    settings.api_version = non_blank(settings.api_version);
    Ok(settings)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn acquire_credential<R: AsyncBufRead + Unpin>(stdin: &mut R) -> Result<Credential> {
    let secret = match std::env::var(API_KEY_ENV) {
        Ok(value) => value,
        Err(_) => prompt_line("Enter your API key: ", stdin).await?,
    };
    Credential::new(secret).map_err(|_| anyhow::anyhow!("API key must not be empty"))
}

async fn export_decision<R: AsyncBufRead + Unpin>(
    args: &CheckArgs,
    source_path: &Path,
    stdin: &mut R,
) -> Result<ExportDecision> {
    let wanted = if args.export {
        true
    } else if args.no_export {
        false
    } else {
        is_yes(&prompt_line("Export the report as a PDF? [y/N] ", stdin).await?)
    };
    Ok(if wanted {
        ExportDecision::Export {
            source_path: source_path.to_path_buf(),
        }
    } else {
        ExportDecision::Skip
    })
}

/// Ask on stderr and read one line; end of input yields an empty answer.
async fn prompt_line<R: AsyncBufRead + Unpin>(question: &str, stdin: &mut R) -> Result<String> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(question.as_bytes()).await?;
    stderr.flush().await?;
    let mut line = String::new();
    stdin
        .read_line(&mut line)
        .await
        .context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_outcome(outcome: &PipelineOutcome) {
    for line in outcome.console() {
        println!("{}", paint(line));
    }
    match outcome.export() {
        None => {}
        Some(Ok(path)) => println!("\nPDF report saved to {}", path.display()),
        Some(Err(err)) => eprintln!("{} {err}", "export failed:".red().bold()),
    }
}

fn paint(line: &ConsoleLine) -> String {
    let text = line.text.as_str();
    if line.kind == LineKind::Heading {
        return text.bold().to_string();
    }
    match line.annotation {
        Some(Annotation::Band(ScoreBand::Good)) | Some(Annotation::Risk(RiskLevel::Low)) => {
            text.green().to_string()
        }
        Some(Annotation::Band(ScoreBand::Moderate)) | Some(Annotation::Risk(RiskLevel::Medium)) => {
            text.yellow().to_string()
        }
        Some(Annotation::Band(ScoreBand::Poor)) => text.red().to_string(),
        Some(Annotation::Risk(RiskLevel::High)) => text.red().bold().to_string(),
        None => text.to_string(),
    }
}

fn report_failure(err: &AuditError) {
    eprintln!("{} {err}", "error:".red().bold());
    if let Some(excerpt) = err.raw_excerpt() {
        eprintln!("raw model output (truncated):\n{excerpt}");
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
