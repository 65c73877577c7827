use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use clap::Subcommand;
use clap::ValueHint;
use gradefill_core::IteratorConfig;
use gradefill_core::RunOutcome;
use gradefill_core::RunSummary;
use gradefill_core::StopControl;
use gradefill_core::ThrottledIterator;
use human_panic::Metadata;
use miette::IntoDiagnostic;
use owo_colors::OwoColorize;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;
mod store;

use crate::config::Config;
use crate::store::KdlStore;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Root of the record store, containing a `records` folder
    #[arg(short, long, value_hint(ValueHint::DirPath))]
    path: Utf8PathBuf,

    /// Configuration file, defaults to `gradefill.kdl` in the store root
    #[arg(short, long, value_hint(ValueHint::FilePath))]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    mode: ArgMode,
}

#[derive(Debug, Subcommand)]
enum ArgMode {
    /// Derive the level and subjects fields of every record
    Run {
        /// Report the changes without writing any file
        #[arg(long)]
        dry_run: bool,

        /// Milliseconds to wait between the two writes of a record, dry runs
        /// default to 0
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Label announced for the stop control
        #[arg(long)]
        stop_label: Option<String>,
    },
    /// List the records whose names would halt a run
    Check,
    /// Print every record
    Dump,
}

async fn load_config(args: &Args) -> miette::Result<Config> {
    if let Some(path) = &args.config {
        return config::parse_config(path).await;
    }

    let default_path = args.path.join(config::CONFIG_FILE);
    if tokio::fs::try_exists(&default_path).await.into_diagnostic()? {
        config::parse_config(&default_path).await
    } else {
        Ok(Config::default())
    }
}

fn print_summary(summary: &RunSummary) {
    match summary.outcome {
        RunOutcome::Exhausted => println!(
            "{} {} records updated",
            "Done:".green().bold(),
            summary.processed
        ),
        RunOutcome::Stopped => println!(
            "{} {} records updated before the run was stopped",
            "Stopped:".yellow().bold(),
            summary.processed
        ),
    }
}

/// In-memory dry runs have no store latency to wait for, so they skip the
/// settle interval unless one is given on the command line.
fn settle_interval(configured: Duration, settle_ms: Option<u64>, dry_run: bool) -> Duration {
    match settle_ms {
        Some(millis) => Duration::from_millis(millis),
        None if dry_run => Duration::ZERO,
        None => configured,
    }
}

async fn run(
    store: &mut KdlStore,
    iterator_config: IteratorConfig,
    stop: StopControl,
    dry_run: bool,
) -> miette::Result<RunSummary> {
    if !dry_run {
        return Ok(ThrottledIterator::new(store, iterator_config)
            .with_stop_control(stop)
            .start()
            .await?);
    }

    let mut memory = store.to_memory();
    let summary = ThrottledIterator::new(&mut memory, iterator_config)
        .with_stop_control(stop)
        .start()
        .await?;

    for write in memory.journal() {
        println!(
            "{} {} = {}",
            format!("#{}", write.position).dimmed(),
            write.field.bold(),
            write.value.cyan()
        );
    }

    Ok(summary)
}

fn check(store: &KdlStore, iterator_config: &IteratorConfig) -> miette::Result<()> {
    let failures = store.unparseable_names(&iterator_config.name_field);

    for (position, problem) in &failures {
        println!("{} {}", format!("#{position}").red().bold(), problem);
    }

    if !failures.is_empty() {
        miette::bail!("{} records would halt a run", failures.len());
    }

    println!("{} every record name can be parsed", "Ok:".green().bold());
    Ok(())
}

fn dump(store: &KdlStore) {
    for record in store.records() {
        println!("{} {}", record.kind.bold(), record.at.dimmed());
        for (name, value) in &record.fields {
            println!("    {} {}", name.blue(), value);
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    human_panic::setup_panic!(
        Metadata::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            .authors(env!("CARGO_PKG_AUTHORS"))
    );

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args).await?;
    let mut store = KdlStore::load(&args.path).await?;
    info!(records = store.len(), path = %args.path, "Record store loaded");

    match args.mode {
        ArgMode::Run {
            dry_run,
            settle_ms,
            stop_label,
        } => {
            let mut iterator_config = config.iterator_config();
            iterator_config.settle_interval =
                settle_interval(iterator_config.settle_interval, settle_ms, dry_run);

            let stop = StopControl::new(stop_label.as_deref().unwrap_or(config.stop_label()));
            tokio::spawn({
                let stop = stop.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!(label = stop.label(), "Stop requested, finishing the current record");
                        stop.request_stop();
                    }
                }
            });
            info!(label = stop.label(), "Press Ctrl-C to stop after the current record");

            let summary = run(&mut store, iterator_config, stop, dry_run).await?;
            print_summary(&summary);
        }
        ArgMode::Check => check(&store, &config.iterator_config())?,
        ArgMode::Dump => dump(&store),
    }

    Ok(())
}
