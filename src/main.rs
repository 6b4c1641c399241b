use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use leitor_docs::audit::detect_alerts;
use leitor_docs::batch::{
    BatchAnalyzer, BatchFile, BatchHistory, BatchOptions, BatchRecord, BatchSchedule,
    CreditCheck, CreditDecision, HttpAnalysisClient,
};
use leitor_docs::config::AppConfig;
use leitor_docs::llm::parse_model_output;
use leitor_docs::{run_server, AppState};

#[derive(Debug, Parser)]
#[command(name = "leitor-docs", version, about = "Document analysis server and batch client")]
struct Cli {
    /// Configuration file (defaults to ./leitor.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Analyze many files against a running server
    Batch(BatchArgs),
    /// Print audit alerts for a stored AI response
    Audit { file: PathBuf },
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,
    #[arg(long)]
    company: String,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long = "type", default_value = "recibo")]
    analysis_type: String,
    /// Requests in flight at once (defaults to batch.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Start each file as soon as a slot frees instead of waiting for the whole chunk
    #[arg(long)]
    pooled: bool,
    /// Proceed with the affordable files without asking when credits run short
    #[arg(short, long)]
    yes: bool,
    #[arg(long)]
    no_history: bool,
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Starting leitor-docs {}", env!("CARGO_PKG_VERSION"));
            run_server(AppState::new(config))
                .await
                .context("HTTP server failed")
        }
        Command::Batch(args) => run_batch(args, &config).await,
        Command::Audit { file } => run_audit(&file),
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let _ = dotenvy::dotenv();
            AppConfig::load_from(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))
        }
        None => AppConfig::load().context("failed to load configuration"),
    }
}

async fn run_batch(args: BatchArgs, config: &AppConfig) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = BatchFile::from_path(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        files.push(file);
    }

    let timeout = Duration::from_secs(config.providers.request_timeout_secs + 30);
    let client = HttpAnalysisClient::new(&args.server, timeout)
        .with_csrf_names(&config.csrf.cookie_name, &config.csrf.header_name);
    let analyzer = BatchAnalyzer::new(Arc::new(client));

    let schedule = if args.pooled {
        BatchSchedule::Pooled
    } else {
        BatchSchedule::Chunked
    };
    let options = BatchOptions::new(&args.company, &args.provider, &args.analysis_type)
        .with_concurrency(args.concurrency.unwrap_or(config.batch.concurrency))
        .with_schedule(schedule);

    let mut progress = analyzer.subscribe();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            if snapshot.total > 0 {
                println!("[{}/{}] processados", snapshot.processed, snapshot.total);
            }
        }
    });

    let yes = args.yes;
    let outcome = analyzer
        .run(files, &options, |check| decide_credits(check, yes))
        .await;
    drop(analyzer);
    let _ = printer.await;
    let report = outcome?;

    for item in &report.results {
        match &item.error {
            None => println!("OK   {} -> {}", item.file_name, item.result),
            Some(error) => println!("ERRO {}: {}", item.file_name, error),
        }
        for alert in &item.alerts {
            println!("     alerta: {alert}");
        }
    }
    if report.skipped > 0 {
        println!("{} arquivos não enviados por falta de créditos", report.skipped);
    }
    if let Some(usage) = report.usage {
        println!(
            "Uso mensal: {} de {} ({} restantes)",
            usage.monthly_usage, usage.monthly_limit, usage.remaining_credits
        );
    }
    println!("{}", report.summary.message());

    if !args.no_history {
        let history = BatchHistory::new(&config.batch.history_path, config.batch.history_limit);
        let record = BatchRecord::from_report(
            &report,
            &args.company,
            &args.provider,
            &args.analysis_type,
        );
        if let Err(e) = history.append(record).await {
            warn!("Failed to update batch history at {}: {}", history.path().display(), e);
        }
    }

    Ok(())
}

fn decide_credits(check: &CreditCheck, assume_yes: bool) -> CreditDecision {
    println!(
        "Créditos insuficientes: {} arquivos selecionados, {} créditos restantes.",
        check.requested, check.remaining
    );
    if assume_yes {
        return CreditDecision::ProceedWithAffordable;
    }

    print!("Processar apenas os {} primeiros? [s/N] ", check.affordable());
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return CreditDecision::Cancel;
    }
    match answer.trim().to_lowercase().as_str() {
        "s" | "sim" | "y" | "yes" => CreditDecision::ProceedWithAffordable,
        _ => CreditDecision::Cancel,
    }
}

fn run_audit(path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let alerts = detect_alerts(&parse_model_output(&raw));

    if alerts.is_empty() {
        println!("Nenhum alerta");
    }
    for alert in alerts {
        println!("{alert}");
    }
    Ok(())
}
