//! # Weaver CLI - Scrub through repository history
//!
//! Command-line front end for the Weaver library.
//!
//! ## Features
//! - Assemble snapshots of a git repository with any strategy
//! - Report structural sharing between snapshots
//! - Scrub a timeline and print the lifecycle events it produces
//!
//! ## Usage
//! ```bash
//! # Assemble with maximal sharing and show statistics
//! weaver assemble ./repo --strategy sequential-look-behind
//!
//! # Scrub from the start to the end of history in 20 steps
//! weaver scrub ./repo --steps 20
//!
//! # Scrub backward, skipping build output
//! weaver scrub ./repo --from 1 --to 0 --exclude target
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use weaver::utils::short_hash;
use weaver::{
    Assembler, AssemblerBuilder, AssemblerConfig, DiffStats, GitHistory, ManualClock, Strategy, TimelineDaemon,
    WeaverEvent,
};

/// Weaver CLI - Scrubbable timelines of repository history
#[derive(Parser)]
#[command(name = "weaver")]
#[command(version)]
#[command(about = "Assemble repository history into snapshots and scrub through it")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble snapshots and print statistics
    #[command(alias = "as")]
    Assemble {
        /// Repository to read
        repo: PathBuf,

        #[command(flatten)]
        options: AssembleOptions,
    },

    /// Scrub the timeline and print lifecycle events
    Scrub {
        /// Repository to read
        repo: PathBuf,

        #[command(flatten)]
        options: AssembleOptions,

        /// Starting time
        #[arg(long, default_value_t = 0.0)]
        from: f64,

        /// Final time
        #[arg(long, default_value_t = 1.0)]
        to: f64,

        /// Number of ticks between the two times
        #[arg(long, default_value_t = 10)]
        steps: usize,

        /// Print creation events for the starting snapshot first
        #[arg(long)]
        replay: bool,

        /// Show only per-step statistics
        #[arg(long)]
        stat: bool,
    },
}

#[derive(Args)]
struct AssembleOptions {
    /// Construction strategy
    #[arg(short, long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Chunks for chunked assembly
    #[arg(long)]
    chunks: Option<usize>,

    /// Glob pattern of a subtree to skip (repeatable)
    #[arg(short, long)]
    exclude: Vec<String>,

    /// Worker threads for parallel strategies
    #[arg(short, long)]
    workers: Option<usize>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show progress
    #[arg(long)]
    progress: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Sequential,
    Parallel,
    Lazy,
    ParallelLazy,
    SequentialLookBehind,
    ChunkedParallelLookBehind,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sequential => Strategy::Sequential,
            StrategyArg::Parallel => Strategy::Parallel,
            StrategyArg::Lazy => Strategy::Lazy,
            StrategyArg::ParallelLazy => Strategy::ParallelLazy,
            StrategyArg::SequentialLookBehind => Strategy::SequentialLookBehind,
            StrategyArg::ChunkedParallelLookBehind => Strategy::ChunkedParallelLookBehind,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("weaver=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<weaver::WeaverError>() {
            Some(weaver_error) => weaver_error.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Assemble { repo, options } => cmd_assemble(repo, options),
        Commands::Scrub {
            repo,
            options,
            from,
            to,
            steps,
            replay,
            stat,
        } => cmd_scrub(repo, options, from, to, steps, replay, stat),
    }
}

/// Assemble snapshots and report how much of the history was shared
fn cmd_assemble(repo: PathBuf, options: AssembleOptions) -> Result<()> {
    let start = Instant::now();
    let assembler = assemble(&repo, &options)?;
    let elapsed = start.elapsed();

    let (first, last) = assembler.time_span();
    println!(
        "{} Assembled {} snapshots with {}",
        "✓".green().bold(),
        assembler.snapshot_count().to_string().cyan(),
        assembler.config().strategy.to_string().yellow()
    );
    println!("  From: {}", format_timestamp(first).cyan());
    println!("  To: {}", format_timestamp(last).cyan());
    println!("  Time: {}", format_elapsed(elapsed).cyan());

    let stats = assembler.stats()?;
    println!("\n{}", "Sharing:".bold());
    println!("  Materialized: {}/{}", stats.materialized, stats.snapshots);
    println!(
        "  Nodes: {} unique of {} referenced ({:.1}% shared)",
        stats.unique_nodes.to_string().cyan(),
        stats.node_references,
        stats.node_sharing_ratio() * 100.0
    );
    println!(
        "  Items: {} unique of {} referenced",
        stats.unique_items.to_string().cyan(),
        stats.item_references
    );

    Ok(())
}

/// Drive a daemon from `from` to `to` and print every published event
fn cmd_scrub(
    repo: PathBuf,
    options: AssembleOptions,
    from: f64,
    to: f64,
    steps: usize,
    replay: bool,
    stat_only: bool,
) -> Result<()> {
    let assembler = Arc::new(assemble(&repo, &options)?);

    let clock = ManualClock::new(from);
    let mut daemon = TimelineDaemon::new(clock.clone(), Vec::<WeaverEvent>::new());
    daemon.set_assembler(Some(assembler));
    println!(
        "{} t={:.3} (snapshot {})",
        "Scrubbing from".blue().bold(),
        from,
        daemon.active_index().unwrap_or(0)
    );

    let mut totals = DiffStats::default();
    if replay {
        daemon.publish_active()?;
        let events: Vec<WeaverEvent> = daemon.sink_mut().drain(..).collect();
        report_step(from, &events, stat_only, &mut totals);
    }

    let steps = steps.max(1);
    for step in 1..=steps {
        let time = from + (to - from) * step as f64 / steps as f64;
        clock.set(time);
        daemon
            .tick()
            .with_context(|| format!("Tick at t={:.3} failed", time))?;

        let events: Vec<WeaverEvent> = daemon.sink_mut().drain(..).collect();
        report_step(time, &events, stat_only, &mut totals);
    }

    println!(
        "\n{} {} events ({} created, {} changed, {} destroyed)",
        "Total:".bold(),
        totals.total().to_string().cyan(),
        (totals.nodes_created + totals.items_created).to_string().green(),
        totals.items_changed.to_string().yellow(),
        (totals.nodes_destroyed + totals.items_destroyed).to_string().red()
    );
    Ok(())
}

fn assemble(repo: &Path, options: &AssembleOptions) -> Result<Assembler> {
    let mut config = match &options.config {
        Some(path) => AssemblerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AssemblerConfig::default(),
    };
    if let Some(strategy) = options.strategy {
        config.strategy = strategy.into();
    }
    if let Some(chunks) = options.chunks {
        config.chunk_count = chunks;
    }
    if let Some(workers) = options.workers {
        config.parallel_workers = workers;
    }
    config.excluded_subtrees.extend(options.exclude.iter().cloned());

    let history = GitHistory::open(repo).with_context(|| format!("Failed to open repository {}", repo.display()))?;
    let mut builder = AssemblerBuilder::from_config(config);

    let progress = if options.progress {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} snapshots")
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        let handle = pb.clone();
        builder = builder.progress(move |info| {
            handle.set_length(info.total as u64);
            handle.inc(1);
        });
        Some(pb)
    } else {
        None
    };

    let assembler = builder.build(Arc::new(history));
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    Ok(assembler?)
}

fn report_step(time: f64, events: &[WeaverEvent], stat_only: bool, totals: &mut DiffStats) {
    if events.is_empty() {
        return;
    }
    let stats = DiffStats::from_events(events);

    println!("\n{}", format!("t={:.3}", time).bold());
    if stat_only {
        println!(
            "  {} created, {} changed, {} destroyed",
            (stats.nodes_created + stats.items_created).to_string().green(),
            stats.items_changed.to_string().yellow(),
            (stats.nodes_destroyed + stats.items_destroyed).to_string().red()
        );
    } else {
        for event in events {
            println!("  {}", format_event(event));
        }
    }

    totals.nodes_created += stats.nodes_created;
    totals.nodes_destroyed += stats.nodes_destroyed;
    totals.items_created += stats.items_created;
    totals.items_changed += stats.items_changed;
    totals.items_destroyed += stats.items_destroyed;
}

fn format_event(event: &WeaverEvent) -> String {
    match event {
        WeaverEvent::NodeCreated(node) => format!("{} {}/", "+".green().bold(), display_name(&node.name).green()),
        WeaverEvent::NodeDestroyed(node) => format!("{} {}/", "-".red().bold(), display_name(&node.name).red()),
        WeaverEvent::ItemCreated { item, .. } => {
            format!("{} {} {}", "+".green(), item.name, short_hash(&item.content_hash).dimmed())
        }
        WeaverEvent::ItemChanged { item, .. } => {
            format!("{} {} {}", "~".yellow(), item.name, short_hash(&item.content_hash).dimmed())
        }
        WeaverEvent::ItemDestroyed { item, .. } => format!("{} {}", "-".red(), item.name),
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "<root>"
    } else {
        name
    }
}

fn format_timestamp(seconds: i64) -> String {
    chrono::DateTime::from_timestamp(seconds, 0)
        .map(|time| time.to_rfc2822())
        .unwrap_or_else(|| seconds.to_string())
}

fn format_elapsed(elapsed: Duration) -> String {
    // whole milliseconds keep the output readable
    format_duration(Duration::from_millis(elapsed.as_millis() as u64)).to_string()
}
