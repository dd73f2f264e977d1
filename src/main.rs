//! RFM segmentation CLI
//!
//! Runs the pure segmentation pipeline, then hands its result to the
//! reporters: console narrative, CSV tables and optional charts.

use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rfm_segmenter::{load_transactions, report, run_pipeline, viz, Args};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.pipeline_config()?;
    let start_time = Instant::now();

    let transactions = load_transactions(&args.input)
        .with_context(|| format!("failed to load transactions from {}", args.input.display()))?;
    let result = run_pipeline(&transactions, &config).context("segmentation failed")?;

    report::print_quality_table(&result.quality);
    report::print_segment_report(&result);

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    let segments_path = args.output_dir.join(report::CUSTOMER_SEGMENTS_FILE);
    report::write_customer_segments(&segments_path, &result.customers)
        .with_context(|| format!("failed to write {}", segments_path.display()))?;

    let summary_path = args.output_dir.join(report::CLUSTER_SUMMARY_FILE);
    report::write_cluster_summary(&summary_path, &result.summaries)
        .with_context(|| format!("failed to write {}", summary_path.display()))?;

    println!("\nResults saved:");
    println!("  - {} (detailed customer segments)", segments_path.display());
    println!("  - {} (cluster summary statistics)", summary_path.display());

    if !args.no_plots {
        let charts = viz::generate_visualization_report(&result, &args.output_dir)
            .context("failed to render charts")?;
        for chart in charts {
            println!("  - {}", chart.display());
        }
    }

    info!(
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "pipeline complete"
    );
    Ok(())
}
