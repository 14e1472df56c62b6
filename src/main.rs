use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use lobtraj::batch::run_per_symbol;
use lobtraj::config::Settings;
use lobtraj::engine::{
    compile_trajectory, lineage_of, resolve_lineage, summarize_trajectories, ActionLog, BookView,
    CancelFlag, Checkpoints, CompileOptions, DepthCriterion, Latencies, QueueView, ReplayEngine,
    ReplayMode, RunOutcome, VolumeView,
};
use lobtraj::persist::{checkpoint, CheckpointStore, FsLogStore, LogStore};
use lobtraj::telemetry;

#[derive(Debug, Parser)]
#[command(name = "lobtraj", about = "Order-book trajectories over compiled market-data logs")]
struct Cli {
    /// Config file; defaults to ./lobtraj.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Session directory under the data dir, e.g. 20240102.
    #[arg(long, global = true)]
    session: Option<String>,
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = 9000)]
    metrics_port: u16,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Per-order lifecycle summaries as CSV.
    Summarize {
        symbol: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Book snapshots after a latency from each target event, as JSON.
    Compile {
        symbol: String,
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        targets: Vec<i64>,
        /// One latency for all targets, in nanoseconds.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true, conflicts_with = "latencies")]
        latency: i64,
        /// One latency per target, in nanoseconds.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        latencies: Option<Vec<i64>>,
        #[arg(long)]
        inclusive: bool,
        /// Start from stored checkpoints when available.
        #[arg(long)]
        checkpoints: bool,
        #[command(flatten)]
        depth: DepthArgs,
    },
    /// Step through the log, one JSON line per boundary.
    Replay {
        symbol: String,
        #[arg(long, value_enum, default_value = "time")]
        by: ReplayBy,
        /// Nanoseconds for `time`, shares for `volume` and `queue`.
        #[arg(long)]
        every: u64,
        #[command(flatten)]
        depth: DepthArgs,
    },
    /// Indices chained after the given seeds.
    Lineage {
        symbol: String,
        #[arg(long, value_delimiter = ',', required = true)]
        seeds: Vec<usize>,
        /// Print each seed's chain instead of the merged set.
        #[arg(long)]
        per_seed: bool,
    },
    /// Summarize every symbol of the session in parallel.
    Batch {
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
        /// Write one SYMBOL.csv per symbol here.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Build and store book checkpoints for a symbol.
    Checkpoint {
        symbol: String,
        #[arg(long)]
        interval: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ViewArg {
    Volume,
    Queue,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReplayBy {
    Time,
    Volume,
    Queue,
}

#[derive(Debug, Args)]
struct DepthArgs {
    #[arg(long, value_enum, default_value = "volume")]
    view: ViewArg,
    /// Best N levels per side.
    #[arg(long, conflicts_with = "spread")]
    levels: Option<usize>,
    /// Levels within this price distance of the mid.
    #[arg(long)]
    spread: Option<u64>,
}

impl DepthArgs {
    fn criterion(&self) -> DepthCriterion {
        match (self.levels, self.spread) {
            (_, Some(spread)) => DepthCriterion::Spread(spread),
            (Some(levels), None) => DepthCriterion::Level(levels),
            (None, None) => DepthCriterion::Level(10),
        }
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(data_dir) = &cli.data_dir {
        settings.data_dir = data_dir.clone();
    }
    if let Some(session) = &cli.session {
        settings.session = Some(session.clone());
    }
    Ok(settings)
}

async fn load_log(store: &FsLogStore, symbol: &str) -> anyhow::Result<ActionLog> {
    store
        .load_actions(symbol)
        .await
        .with_context(|| format!("loading actions for {}", symbol))
}

fn compile_json<V: BookView>(
    log: &ActionLog,
    targets: &[i64],
    latencies: &Latencies,
    criterion: DepthCriterion,
    options: CompileOptions,
    checkpoints: Option<&Checkpoints>,
) -> anyhow::Result<serde_json::Value> {
    let points = compile_trajectory::<V>(log, targets, latencies, criterion, options, checkpoints)?;
    ensure!(
        points.len() == targets.len(),
        "compiled {} points for {} targets",
        points.len(),
        targets.len()
    );
    Ok(serde_json::to_value(points)?)
}

fn replay_lines<V: BookView>(
    log: &ActionLog,
    mode: ReplayMode,
    criterion: DepthCriterion,
    settings: &Settings,
    cancel: &CancelFlag,
) -> anyhow::Result<RunOutcome> {
    let mut engine = ReplayEngine::<V>::new(log, mode, criterion, settings.queue_priority)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut write_error = None;
    let outcome = engine.run_until(cancel, |step| {
        if write_error.is_some() {
            return;
        }
        let line = serde_json::json!({
            "timestamp": step.timestamp,
            "events": step.events.len(),
            "done": step.done,
            "state": step.state,
        });
        if let Err(err) = writeln!(out, "{}", line) {
            // a closed pipe ends the replay
            write_error = Some(err);
            cancel.cancel();
        }
    })?;
    if let Some(err) = write_error {
        if err.kind() != io::ErrorKind::BrokenPipe {
            return Err(err.into());
        }
    }
    Ok(outcome)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    telemetry::init_tracing(&settings.log_filter);
    telemetry::init_metrics(cli.metrics_port)?;

    let store = settings.store(None).context("no session configured")?;
    info!(root = %store.root().display(), "using session");

    match cli.command {
        Command::Summarize { symbol, out } => {
            let log = load_log(&store, &symbol).await?;
            let summaries =
                tokio::task::spawn_blocking(move || summarize_trajectories(&log)).await??;
            let sink: Box<dyn Write> = match out {
                Some(path) => Box::new(
                    std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            let mut writer = csv::Writer::from_writer(sink);
            for summary in &summaries {
                writer.serialize(summary.row())?;
            }
            writer.flush()?;
            info!(orders = summaries.len(), %symbol, "summaries written");
        }
        Command::Compile {
            symbol,
            targets,
            latency,
            latencies,
            inclusive,
            checkpoints,
            depth,
        } => {
            let log = load_log(&store, &symbol).await?;
            let stored = if checkpoints {
                match store.load_checkpoints(&symbol).await? {
                    Some(data) => Some(checkpoint::from_data(&data)?),
                    None => None,
                }
            } else {
                None
            };
            let latencies = match latencies {
                Some(values) => Latencies::PerTarget(values),
                None => Latencies::Uniform(latency),
            };
            let options = CompileOptions {
                inclusive,
                priority: settings.queue_priority,
            };
            let criterion = depth.criterion();
            let value = tokio::task::spawn_blocking(move || {
                let stored = stored.as_ref();
                match depth.view {
                    ViewArg::Volume => compile_json::<VolumeView>(
                        &log, &targets, &latencies, criterion, options, stored,
                    ),
                    ViewArg::Queue => compile_json::<QueueView>(
                        &log, &targets, &latencies, criterion, options, stored,
                    ),
                }
            })
            .await??;
            serde_json::to_writer_pretty(io::stdout().lock(), &value)?;
            println!();
        }
        Command::Replay { symbol, by, every, depth } => {
            let log = load_log(&store, &symbol).await?;
            let mode = match by {
                ReplayBy::Time => ReplayMode::Time(every),
                ReplayBy::Volume => ReplayMode::Volume(every),
                ReplayBy::Queue => ReplayMode::Queue(every),
            };

            let cancel = CancelFlag::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });

            let criterion = depth.criterion();
            let outcome = tokio::task::spawn_blocking(move || match depth.view {
                ViewArg::Volume => {
                    replay_lines::<VolumeView>(&log, mode, criterion, &settings, &cancel)
                }
                ViewArg::Queue => {
                    replay_lines::<QueueView>(&log, mode, criterion, &settings, &cancel)
                }
            })
            .await??;
            info!(?outcome, %symbol, "replay finished");
        }
        Command::Lineage { symbol, seeds, per_seed } => {
            let log = load_log(&store, &symbol).await?;
            let value = if per_seed {
                let chains = seeds
                    .iter()
                    .map(|&seed| lineage_of(&log, seed).map(|chain| (seed, chain)))
                    .collect::<Result<Vec<_>, _>>()?;
                serde_json::to_value(chains)?
            } else {
                serde_json::to_value(resolve_lineage(&log, &seeds)?)?
            };
            println!("{}", value);
        }
        Command::Batch { symbols, out_dir } => {
            let symbols = match symbols {
                Some(symbols) => symbols,
                None => store.list_symbols().await?,
            };
            let report = run_per_symbol(Arc::new(store), symbols, |_, log| {
                summarize_trajectories(&log).map(|s| s.iter().map(|o| o.row()).collect::<Vec<_>>())
            })
            .await;

            if let Some(dir) = &out_dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
                for (symbol, rows) in &report.completed {
                    let mut writer = csv::Writer::from_path(dir.join(format!("{}.csv", symbol)))?;
                    for row in rows {
                        writer.serialize(row)?;
                    }
                    writer.flush()?;
                }
            }
            for (symbol, rows) in &report.completed {
                println!("{}\tok\t{} orders", symbol, rows.len());
            }
            for (symbol, reason) in &report.skipped {
                println!("{}\tskipped\t{}", symbol, reason);
            }
            for (symbol, err) in &report.failed {
                println!("{}\tfailed\t{}", symbol, err);
            }
            ensure!(report.failed.is_empty(), "{} symbols failed", report.failed.len());
        }
        Command::Checkpoint { symbol, interval } => {
            let log = load_log(&store, &symbol).await?;
            let interval = interval.unwrap_or(settings.checkpoint_interval);
            let priority = settings.queue_priority;
            let checkpoints =
                tokio::task::spawn_blocking(move || Checkpoints::build(&log, interval, priority))
                    .await??;
            store
                .save_checkpoints(&symbol, &checkpoint::to_data(&checkpoints))
                .await?;
            info!(%symbol, entries = checkpoints.entries().len(), interval, "checkpoints stored");
        }
    }

    Ok(())
}
