//! WSI QC - tissue and blur quality control for whole-slide images.
//!
//! This binary parses the command line, sets up logging and runs one of the
//! execution modes.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_qc::{
    config::{Cli, Command, FlowConfig, GraphConfig, RunConfig},
    discover_slides, BatchDriver, BatchReport, ExecutionMode, FlowGraph, GraphExecutor, Reporter,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Run(config) => run_sequential(config).await,
        Command::Flow(config) => run_flow(config).await,
        Command::Graph(config) => run_graph(config).await,
    }
}

// =============================================================================
// Run Command
// =============================================================================

async fn run_sequential(config: RunConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    log_configuration(&config);

    let reporter = Reporter::new(ExecutionMode::Sequential.as_str());
    let driver = BatchDriver::new(config.clone());
    let report = match driver.run(&reporter).await {
        Ok(report) => report,
        Err(e) => {
            error!("Cannot list slides in {}: {}", config.input_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    finish(&config, &report).await
}

// =============================================================================
// Flow Command
// =============================================================================

async fn run_flow(config: FlowConfig) -> ExitCode {
    init_logging(config.run.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    log_configuration(&config.run);
    info!("  Max concurrency: {}", config.max_concurrency());

    let graph = FlowGraph::qc_flow();
    if let Some(ref path) = config.dot {
        match tokio::fs::write(path, graph.to_dot()).await {
            Ok(()) => info!("Wrote stage graph to {}", path.display()),
            Err(e) => warn!("Failed to write stage graph to {}: {}", path.display(), e),
        }
    }

    let executor = match GraphExecutor::new(graph, config.max_concurrency()) {
        Ok(executor) => executor,
        Err(e) => {
            error!("Invalid stage graph: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let files = match discover_slides(&config.run.input_dir, &config.run.extension_list()).await {
        Ok(files) => files,
        Err(e) => {
            error!("Cannot list slides in {}: {}", config.run.input_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("Discovered {} slide(s)", files.len());

    let reporter = Reporter::new(ExecutionMode::Graph.as_str());
    let report = executor.run(&files, &config.run, &reporter).await;

    finish(&config.run, &report).await
}

// =============================================================================
// Graph Command
// =============================================================================

async fn run_graph(config: GraphConfig) -> ExitCode {
    let graph = FlowGraph::qc_flow();
    if let Err(e) = graph.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let dot = graph.to_dot();
    match config.output {
        Some(path) => {
            if let Err(e) = tokio::fs::write(&path, dot).await {
                eprintln!("Error: cannot write {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
        None => print!("{}", dot),
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Helpers
// =============================================================================

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose { "wsi_qc=debug" } else { "wsi_qc=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_configuration(config: &RunConfig) {
    info!("Configuration:");
    info!("  Input: {}", config.input_dir.display());
    info!("  Output: {}", config.output_dir.display());
    info!("  Extensions: {}", config.extension_list().join(", "));
    info!("  Work size: {}", config.work_size);
    info!("  Blur work size: {}", config.effective_blur_work_size());
    info!(
        "  Blur: radius {}, threshold {}, max {}",
        config.blur_radius, config.blur_threshold, config.blur_max
    );
    info!("  Mask statistic: {}", config.mask_statistics);
}

/// Write the batch report and summarize the run.
///
/// Per-slide failures and a failed report write do not change the exit status.
async fn finish(config: &RunConfig, report: &BatchReport) -> ExitCode {
    let path = config.report_path();
    match report.write(&path).await {
        Ok(()) => info!("Wrote report to {}", path.display()),
        Err(e) => error!("Failed to write report to {}: {}", path.display(), e),
    }

    info!(
        "Processed {} slide(s): {} completed, {} failed, {} flagged for rescan in {} ms",
        report.slides.len(),
        report.completed(),
        report.failed(),
        report.flagged(),
        report.elapsed_ms
    );
    for advisory in &report.advisories {
        warn!("{}", advisory.message());
    }

    ExitCode::SUCCESS
}
