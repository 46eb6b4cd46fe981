//! Static dashboard builder
//!
//! Renders the default dashboard view of a CSV into a standalone HTML file
//! that can be opened without running the server.
//!
//! Usage:
//!   cargo run --bin build-dashboard                          # gold file -> dashboard.html
//!   cargo run --bin build-dashboard -- --data x.csv --out report.html

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use audience_pulse::config::Config;
use audience_pulse::dashboard::templates::render_dashboard;
use audience_pulse::dashboard::{build_view, DashboardQuery, Dataset};
use audience_pulse::observability;

#[derive(Parser)]
#[command(name = "build-dashboard")]
#[command(about = "Write a static HTML snapshot of the dashboard")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    /// CSV to render instead of the gold file
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long, default_value = "dashboard.html")]
    out: PathBuf,
}

fn main() -> Result<()> {
    let _log_guard = observability::init_logging();
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let path = args.data.unwrap_or_else(|| config.dashboard_dataset());
    let dataset = Dataset::from_path(&path).with_context(|| format!("loading dataset {}", path.display()))?;
    let view = build_view(&dataset, &DashboardQuery::default());
    let html = render_dashboard(&view, None, false).context("rendering dashboard")?;

    fs::write(&args.out, html).with_context(|| format!("writing {}", args.out.display()))?;
    info!("Dashboard snapshot of {} rows written to {}", dataset.len(), args.out.display());
    println!("✅ Dashboard saved to: {}", args.out.display());
    Ok(())
}
