//! Market-Harvest main entry point
//!
//! This is the command-line interface for the Market-Harvest crawler.

use anyhow::Context;
use clap::Parser;
use market_harvest::config::{load_config_with_hash, Config};
use market_harvest::crawler::{HttpContentFetcher, StaticPageRenderer};
use market_harvest::output::{print_summary, JsonLinesSink, SessionSummary};
use market_harvest::storage::{open_checkpoint_store, CheckpointStore};
use market_harvest::{CrawlCoordinator, SessionState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Market-Harvest: a polite two-tier marketplace crawler
///
/// Market-Harvest walks the listing pages of the configured categories,
/// enriches every item it finds with a detail-page fetch, and checkpoints
/// its progress so an interrupted session can be resumed.
#[derive(Parser, Debug)]
#[command(name = "market-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A polite two-tier marketplace crawler", long_about = None)]
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

    /// Resume the latest unfinished session (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh session, ignoring checkpoints and truncating output
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show the summary of the latest checkpoint and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(config, config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("market_harvest=info,warn"),
            1 => EnvFilter::new("market_harvest=debug,info"),
            2 => EnvFilter::new("market_harvest=trace,debug"),
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

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Market-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!(
        "  Category parallelism: {}",
        config.crawler.category_parallelism
    );
    println!("  Detail workers: {}", config.crawler.detail_workers);
    println!("  Queue depth: {}", config.crawler.queue_depth);
    println!(
        "  Checkpoint: every {}s or {} items",
        config.crawler.checkpoint_interval_secs, config.crawler.checkpoint_every_items
    );

    println!("\nPoliteness:");
    println!(
        "  Base delay: {}ms (+ up to {}ms jitter)",
        config.politeness.base_delay_ms, config.politeness.jitter_ms
    );
    println!(
        "  Backoff: x{} up to {}ms",
        config.politeness.backoff_multiplier, config.politeness.max_delay_ms
    );
    println!("  Identities: {}", config.politeness.identities.len());

    println!("\nOutput:");
    println!("  Records: {}", config.output.records_path);
    println!("  Failures: {}", config.output.failures_path);
    println!("  Checkpoints: {}", config.output.checkpoint_path);

    println!("\nCategories ({}):", config.categories.len());
    for category in &config.categories {
        println!(
            "  - {} [{}], up to {} pages",
            category.display_name, category.id, category.max_pages
        );
        println!("    * {}", category.seed_url);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: summarizes the latest checkpoint
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Checkpoints: {}\n", config.output.checkpoint_path);

    let store = open_checkpoint_store(Path::new(&config.output.checkpoint_path))?;
    match store.load_latest()? {
        Some(checkpoint) => {
            let summary = SessionSummary::from_session(
                &checkpoint.session,
                &config.categories,
                checkpoint.ledger.pending.len(),
            );
            print_summary(&summary);
        }
        None => println!("No sessions recorded yet"),
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    let store = open_checkpoint_store(Path::new(&config.output.checkpoint_path))
        .context("failed to open checkpoint store")?;

    let resume_from = if fresh {
        tracing::info!("Starting fresh session (ignoring previous checkpoints)");
        None
    } else {
        match store.load_latest()? {
            Some(checkpoint) if checkpoint.session.state != SessionState::Completed => {
                tracing::info!(
                    "Found unfinished session {} ({})",
                    checkpoint.session.session_id,
                    checkpoint.session.state
                );
                Some(checkpoint)
            }
            _ => None,
        }
    };

    let sink = JsonLinesSink::open(
        Path::new(&config.output.records_path),
        Path::new(&config.output.failures_path),
        fresh,
    )
    .context("failed to open output files")?;

    let timeout = Duration::from_millis(config.crawler.request_timeout_ms);
    let renderer = StaticPageRenderer::new(timeout)?;
    let fetcher = HttpContentFetcher::new(timeout)?;

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Stop requested, finishing in-flight work");
                stop.cancel();
            }
        });
    }

    let mut coordinator = CrawlCoordinator::new(
        config,
        Arc::new(renderer),
        Arc::new(fetcher),
        Arc::new(sink),
        Box::new(store),
    )
    .with_config_hash(config_hash);

    let summary = coordinator.start(resume_from, stop).await?;
    print_summary(&summary);

    if summary.state == SessionState::Aborted {
        anyhow::bail!(
            "session {} aborted; run again to resume",
            summary.session_id
        );
    }

    Ok(())
}
