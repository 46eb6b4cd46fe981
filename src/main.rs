use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use audience_pulse::config::{Config, EnrichProvider};
use audience_pulse::dashboard::report::render_report;
use audience_pulse::dashboard::server::{self, AppState};
use audience_pulse::dashboard::{build_view, DashboardQuery, Dataset};
use audience_pulse::observability::{self, metrics};
use audience_pulse::pipeline::orchestrator::{PipelineRunner, RunOptions, StageReport};
use audience_pulse::pipeline::pipeline_config::Stage;

#[derive(Parser)]
#[command(name = "audience_pulse")]
#[command(about = "Ingest, clean, sentiment-enrich and explore audience comments")]
#[command(version)]
struct Cli {
    /// Path to the TOML config (defaults to $AUDIENCE_PULSE_CONFIG or config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch configured sources into the raw store
    Ingest {
        /// Specific sources to run (comma-separated)
        #[arg(long, value_delimiter = ',')]
        sources: Option<Vec<String>>,
    },
    /// Flatten raw payloads into the bronze file
    Parse,
    /// Clean bronze records into silver, quarantining rejects
    Normalize,
    /// Label silver records with sentiment and emotion
    Enrich {
        /// lexicon or llm; overrides the config
        #[arg(long)]
        provider: Option<EnrichProvider>,
        /// Relabel every record even when a previous label matches
        #[arg(long)]
        force: bool,
    },
    /// Run ingest, parse, normalize and enrich in order
    Run {
        #[arg(long, value_delimiter = ',')]
        sources: Option<Vec<String>>,
        #[arg(long)]
        provider: Option<EnrichProvider>,
        #[arg(long)]
        force: bool,
    },
    /// Serve the dashboard over HTTP
    Serve {
        /// CSV to open instead of the gold file
        #[arg(long)]
        data: Option<PathBuf>,
        /// Address to bind, e.g. 127.0.0.1:8501
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the dashboard overview to the terminal
    Report {
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        episode: Option<String>,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        min_len: Option<usize>,
    },
}

fn print_reports(reports: &[StageReport]) {
    println!("\n📊 Pipeline results:");
    for report in reports {
        println!("   {}", report);
        for error in &report.errors {
            println!("      - {}", error);
        }
    }
}

async fn run_stages(config: Config, options: RunOptions, stages: &[Stage]) -> Result<()> {
    let runner = PipelineRunner::new(config, options);
    let reports = runner.run(stages).await?;
    print_reports(&reports);
    for report in reports.iter().filter(|r| !r.is_clean()) {
        warn!("{} finished with {} errors", report.stage.step_name(), report.errors.len());
    }
    Ok(())
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    Dataset::from_path(path).with_context(|| format!("loading dataset {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = observability::init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { sources } => {
            let options = RunOptions { sources, ..RunOptions::default() };
            run_stages(config, options, &[Stage::Ingest]).await?;
        }
        Commands::Parse => run_stages(config, RunOptions::default(), &[Stage::Parse]).await?,
        Commands::Normalize => run_stages(config, RunOptions::default(), &[Stage::Normalize]).await?,
        Commands::Enrich { provider, force } => {
            let options = RunOptions { provider, force, ..RunOptions::default() };
            run_stages(config, options, &[Stage::Enrich]).await?;
        }
        Commands::Run { sources, provider, force } => {
            let options = RunOptions { sources, provider, force };
            run_stages(config, options, &Stage::ALL).await?;
        }
        Commands::Serve { data, bind } => {
            metrics::init();
            let path = data.unwrap_or_else(|| config.dashboard_dataset());
            let dataset = match load_dataset(&path) {
                Ok(dataset) => {
                    info!("Loaded {} rows from {}", dataset.len(), path.display());
                    Some(dataset)
                }
                Err(e) => {
                    warn!("Starting without a dataset: {:#}", e);
                    None
                }
            };
            let bind = bind.unwrap_or_else(|| config.dashboard.bind.clone());
            let addr: SocketAddr = bind.parse().with_context(|| format!("invalid bind address '{}'", bind))?;
            server::serve(AppState::new(dataset), addr).await?;
        }
        Commands::Report { data, episode, top_n, min_len } => {
            let path = data.unwrap_or_else(|| config.dashboard_dataset());
            let dataset = load_dataset(&path)?;
            let query = DashboardQuery {
                episode,
                top_n: top_n.map(|n| n.to_string()),
                min_len: min_len.map(|n| n.to_string()),
                ..DashboardQuery::default()
            };
            print!("{}", render_report(&build_view(&dataset, &query)));
        }
    }
    Ok(())
}
