use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use timeline_harvester::browser::chromium::BrowserSettings;
use timeline_harvester::browser::ChromiumLauncher;
use timeline_harvester::config::Config;
use timeline_harvester::enrich::{self, CommandClassifier, EnrichOptions, Enricher};
use timeline_harvester::export::{CsvSink, MediaDownloader, SummaryWriter};
use timeline_harvester::merge;
use timeline_harvester::session::SessionOrchestrator;
use timeline_harvester::targets::{load_targets, Target};

#[derive(Parser)]
#[command(
    name = "timeline-harvester",
    version,
    about = "Harvest organization timelines, merge the exports and enrich them"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured target into the output directory
    Scrape {
        /// Only scrape these handles (repeatable)
        #[arg(long = "only", value_name = "HANDLE")]
        only: Vec<String>,
    },
    /// Merge all per-target post tables into one table
    Merge {
        /// Merged table path (default: all_company_tweets_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Classify the images of a merged table
    Enrich {
        /// Merged table produced by `merge`
        #[arg(short, long)]
        input: PathBuf,
        /// Enriched table path (default: enhanced_tweets_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Scrape { only } => scrape(&config, &only).await,
        Commands::Merge { output } => {
            let output = output.unwrap_or_else(merge::default_output_path);
            match merge::merge_exports(&config.output_dir, &output)? {
                Some(report) => info!(
                    output = %report.output.display(),
                    rows = report.rows,
                    files = report.files_merged,
                    "Merged post tables"
                ),
                None => info!(dir = %config.output_dir.display(), "Nothing to merge"),
            }
            Ok(())
        }
        Commands::Enrich { input, output } => {
            let output = output.unwrap_or_else(enrich::default_output_path);
            enrich_table(&config, &input, &output).await
        }
    }
}

async fn scrape(config: &Config, only: &[String]) -> Result<()> {
    let targets = select_targets(
        load_targets(config.targets_file.as_deref()).context("Failed to load targets")?,
        only,
    )?;

    info!(
        targets = targets.len(),
        base_url = %config.base_url(),
        output_dir = %config.output_dir.display(),
        login = config.credentials.is_some(),
        "Starting timeline harvest"
    );

    let launcher = ChromiumLauncher::new(BrowserSettings::from_config(config));
    let sink = CsvSink::from_config(config)?;
    let orchestrator = SessionOrchestrator::new(launcher, sink, config)?;

    let mut summary = SummaryWriter::create(&config.output_dir).await?;
    let summaries = orchestrator.run(&targets, &mut summary).await?;

    let records: usize = summaries.iter().map(|s| s.record_count).sum();
    info!(
        targets = summaries.len(),
        records,
        summary = %summary.path().display(),
        "Harvest finished"
    );
    Ok(())
}

fn select_targets(targets: Vec<Target>, only: &[String]) -> Result<Vec<Target>> {
    if only.is_empty() {
        return Ok(targets);
    }
    let wanted: Vec<String> = only
        .iter()
        .map(|h| h.trim_start_matches('@').to_lowercase())
        .collect();
    let selected: Vec<Target> = targets
        .into_iter()
        .filter(|t| wanted.contains(&t.handle.to_lowercase()))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("None of the requested handles are configured targets: {}", only.join(", "));
    }
    Ok(selected)
}

async fn enrich_table(config: &Config, input: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let program = config
        .classifier_command
        .clone()
        .context("CLASSIFIER_COMMAND must be set to run enrichment")?;

    let classifier = CommandClassifier::new(
        program,
        config.classifier_args.clone(),
        config.classifier_timeout,
    );
    let downloader = MediaDownloader::new(config.media_timeout)?;
    let enricher = Enricher::new(classifier, Some(downloader), EnrichOptions::from_config(config));

    let report = enricher.enrich_file(input, output).await?;
    info!(
        output = %report.output.display(),
        rows = report.rows,
        with_people = report.with_people,
        "Enriched table written"
    );
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,timeline_harvester=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
