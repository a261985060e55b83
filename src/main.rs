//! FPDS Harvester main entry point
//!
//! This is the command-line interface for the FPDS contract-award harvester.

use anyhow::Context;
use clap::Parser;
use fpds_harvester::config::{compute_config_hash, parse_config, validate, Config};
use fpds_harvester::extract::FpdsClient;
use fpds_harvester::harvester::{Collaborators, ExtractionOrchestrator, HarvestPlan, StopHandle};
use fpds_harvester::output::{load_statistics, print_report, print_statistics};
use fpds_harvester::storage::{load_failed_requests, open_storage, LoadedFailures, RunStatus};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// FPDS Harvester: an adaptive, polite contract-award crawler
///
/// Harvests contract actions matching a date range (and optional agency or
/// vendor) from the FPDS ezsearch portal, adapting its request rate to how the
/// site responds, and stores them in SQLite.
#[derive(Parser, Debug)]
#[command(name = "fpds-harvester")]
#[command(version = "1.0.0")]
#[command(about = "An adaptive, polite FPDS contract-award harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the planned harvest without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "retry_failed"])]
    dry_run: bool,

    /// Show statistics of the latest run and exit
    #[arg(long, conflicts_with_all = ["dry_run", "retry_failed"])]
    stats: bool,

    /// Retry the requests saved in the failed-request directory
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    retry_failed: bool,

    /// Override harvester.target-records
    #[arg(long, value_name = "N")]
    target_records: Option<u64>,

    /// Override harvester.worker-count
    #[arg(long, value_name = "N")]
    workers: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = load_with_overrides(&cli)?;
    let config_hash = compute_config_hash(&cli.config)?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_harvest(config, &config_hash, cli.retry_failed).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fpds_harvester=info,warn"),
            1 => EnvFilter::new("fpds_harvester=debug,info"),
            2 => EnvFilter::new("fpds_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Reads the config file, applies command-line overrides, then validates
fn load_with_overrides(cli: &Cli) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read {}", cli.config.display()))?;
    let mut config = parse_config(&content)?;

    if let Some(target) = cli.target_records {
        config.harvester.target_records = target;
    }
    if let Some(workers) = cli.workers {
        config.harvester.worker_count = workers;
    }

    validate(&config)?;
    Ok(config)
}

/// Handles the --dry-run mode: validates config and shows the planned harvest
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let query = config.query.search_query()?;
    // the site is not contacted, so the plan assumes the full target is available
    let plan = HarvestPlan::new(
        config.harvester.target_records,
        0,
        config.harvester.records_per_page,
        config.harvester.worker_count,
        config.harvester.batch_target_multiplier,
    );

    println!("=== FPDS Harvester Dry Run ===\n");

    println!("Query:");
    println!("  {}", query.to_query_string());
    println!("  Site: {}", config.site.base_url);

    println!("\nHarvester:");
    println!("  Workers: {}", config.harvester.worker_count);
    println!("  Target records: {}", config.harvester.target_records);
    println!("  Records per page: {}", config.harvester.records_per_page);
    println!(
        "  Pages: {} in {} batches of {}",
        plan.total_pages,
        plan.batches.len(),
        plan.batch_size
    );

    println!("\nRate control:");
    println!(
        "  Delay: {}ms (min {}ms, max {}ms)",
        config.rate_limit.initial_delay_ms, config.rate_limit.min_delay_ms, config.rate_limit.max_delay_ms
    );
    println!(
        "  Concurrent batches: {}, spaced {}ms",
        config.batching.max_concurrent_batches, config.batching.batch_delay_ms
    );
    println!(
        "  Retries: {} (max {} passes)",
        if config.retry.enable_retry { "on" } else { "off" },
        config.retry.max_retries
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Failed requests: {}", config.output.failed_dir);
    if !config.detail_fields.is_empty() {
        println!("  Extra detail fields: {}", config.detail_fields.len());
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics of the latest run
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_storage(Path::new(&config.output.database_path))?;
    match load_statistics(&store)? {
        Some(stats) => print_statistics(&stats),
        None => println!("No harvest runs recorded yet"),
    }
    Ok(())
}

/// Handles a harvest run, or a retry of saved failures
async fn handle_harvest(config: Config, config_hash: &str, retry_failed: bool) -> anyhow::Result<()> {
    let query = config.query.search_query()?;
    let failed_dir = PathBuf::from(&config.output.failed_dir);

    // loaded before the run so files written by this run are kept
    let mut saved = LoadedFailures::default();
    if retry_failed {
        saved = load_failed_requests(&failed_dir)?;
        if saved.is_empty() {
            println!("No failed requests found in {}", failed_dir.display());
            return Ok(());
        }
    }

    let client = FpdsClient::from_config(&config)?;
    let orchestrator =
        ExtractionOrchestrator::new(&config, query.clone(), Collaborators::from_client(client));
    spawn_interrupt_handler(orchestrator.stop_handle());

    let mut store = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("Failed to open {}", config.output.database_path))?;
    let run_id = store.begin_run(config_hash, &query)?;
    tracing::info!(run_id, query = %query.to_query_string(), "Starting harvest");

    let result = if retry_failed {
        orchestrator.retry_only(std::mem::take(&mut saved.requests), &mut store).await
    } else {
        orchestrator.run(&mut store).await
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            store.finish_run(run_id, RunStatus::Failed)?;
            return Err(e).context("Harvest failed");
        }
    };

    let status = if report.interrupted {
        RunStatus::Interrupted
    } else {
        RunStatus::Completed
    };
    store.finish_run(run_id, status)?;

    if retry_failed && report.failure_file_error.is_none() {
        let removed = saved.remove_files();
        tracing::info!(removed, "Removed consumed failure files");
    }

    print_report(&report);
    Ok(())
}

/// Stops the harvest on the first Ctrl-C, exits on the second
fn spawn_interrupt_handler(stop: StopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received, finishing in-flight pages (Ctrl-C again to abort)");
        stop.stop();

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("Second interrupt, aborting");
            std::process::exit(130);
        }
    });
}
