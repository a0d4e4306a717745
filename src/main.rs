//! ADIM CLI
//!
//! Operator tool for the index manager:
//! - Advise indexes for a statement
//! - Match statement logs against tracked queries
//! - Inspect tracked queries, hits and forecasts
//! - Run lifecycle sweeps and manual materialization

use adim::config::{generate_default_config, AdimConfig, LoggingConfig};
use adim::engine::AdimEngine;
use adim::matcher::normalize;
use adim::sources::{DirectoryLogSource, ScriptSchemaExecutor, SnapshotStatistics};
use adim::{AdimError, IndexAdvisor, TrackedQuery};
use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "adim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automatic database index management")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Statistics snapshot (JSON export of statement stats and indexes)
    #[arg(long, global = true)]
    pub stats: Option<PathBuf>,

    /// Script that receives DDL instead of a live database
    #[arg(long, default_value = "adim-ddl.sql", global = true)]
    pub ddl_script: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Propose indexes for a SELECT statement
    Advise {
        sql: String,
        /// File with one existing index definition per line
        #[arg(short, long)]
        existing: Option<PathBuf>,
    },

    /// Print the normalized form of a statement
    Normalize { sql: String },

    /// Record occurrences from the configured log directory
    MatchLogs,

    /// Score the statistics snapshot and admit heavy statements
    Diagnose,

    /// List tracked queries
    Tracked,

    /// Executions of a tracked query
    Hits {
        id: i64,
        /// Look back this many days
        #[arg(short, long, default_value = "7")]
        days: i64,
        /// Only optimized (true) or only unoptimized (false) executions
        #[arg(long)]
        optimized: Option<bool>,
    },

    /// Upcoming forecasts
    Schedules {
        /// Render as cron.d lines running `<command> <id>`
        #[arg(long)]
        cron: Option<String>,
    },

    /// Forecast and evict every auto-indexed query
    Sweep,

    /// Build the stored indexes of a tracked query
    Materialize { id: i64 },

    /// Drop the stored indexes of a tracked query
    Evict { id: i64 },

    /// Enable or disable scheduler management of a tracked query
    AutoIndexing { id: i64, state: Toggle },

    /// Print the default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AdimConfig::load_with_env(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AdimConfig::load_default(),
    };
    init_tracing(&config.logging)?;

    match &cli.command {
        Commands::Advise { sql, existing } => {
            let existing = match existing {
                Some(path) => read_definitions(path)?,
                None => Vec::new(),
            };
            let advisor = IndexAdvisor::new(&config.advisor);
            for statement in advisor.generate_candidates(sql, &existing)? {
                println!("{}", statement);
            }
        }

        Commands::Normalize { sql } => println!("{}", normalize(sql)),

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(path, content)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }

        _ => run_engine_command(&cli, config).await?,
    }

    Ok(())
}

async fn run_engine_command(cli: &Cli, config: AdimConfig) -> anyhow::Result<()> {
    let statistics = match &cli.stats {
        Some(path) => SnapshotStatistics::load(path)
            .await
            .with_context(|| format!("loading statistics {}", path.display()))?,
        None => SnapshotStatistics::default(),
    };
    let executor = ScriptSchemaExecutor::new(&cli.ddl_script);
    let logs = DirectoryLogSource::new(&config.logs.dir, config.logs.extension.clone());
    let engine = AdimEngine::open(config, Arc::new(statistics), Arc::new(executor))?;

    match &cli.command {
        Commands::MatchLogs => {
            let inserted = engine.process_log_source(&logs).await?;
            println!("Recorded {} occurrences", inserted);
        }

        Commands::Diagnose => {
            let tracked = engine.run_diagnostics().await?;
            print_tracked(&tracked);
        }

        Commands::Tracked => print_tracked(&engine.list_tracked_queries()?),

        Commands::Hits {
            id,
            days,
            optimized,
        } => {
            let since = Utc::now() - Duration::days(*days);
            for hit in engine.hits(*id, since, *optimized)? {
                println!(
                    "{}  {}",
                    hit.time_stamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                    if hit.optimized { "optimized" } else { "-" }
                );
            }
        }

        Commands::Schedules { cron } => {
            for update in engine.schedules()? {
                match cron {
                    Some(command) => println!("{}", update.cron_line(command)),
                    None => println!(
                        "{:>6}  {}",
                        update.tracked_query_id,
                        update.next_execution_time.format("%Y-%m-%d %H:%M")
                    ),
                }
            }
        }

        Commands::Sweep => match engine.run_lifecycle_sweep().await {
            Ok(updates) => {
                for update in updates {
                    println!(
                        "{:>6}  next execution {}",
                        update.tracked_query_id,
                        update.next_execution_time.format("%Y-%m-%d %H:%M")
                    );
                }
            }
            Err(AdimError::NoForecastsUpdated) => println!("No forecasts updated"),
            Err(e) => return Err(e.into()),
        },

        Commands::Materialize { id } => {
            let log = engine.materialize_indexes(*id).await?;
            println!("Materialized indexes of {} at {}", id, log.time_stamp);
        }

        Commands::Evict { id } => {
            let log = engine.evict_indexes(*id).await?;
            println!("Evicted indexes of {} at {}", id, log.time_stamp);
        }

        Commands::AutoIndexing { id, state } => {
            let enabled = matches!(state, Toggle::On);
            let query = engine.set_auto_indexing(*id, enabled)?;
            println!(
                "Auto indexing {} for {}",
                if query.auto_indexing { "enabled" } else { "disabled" },
                query.id
            );
        }

        Commands::Advise { .. } | Commands::Normalize { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("adim={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(writer))
            .init();
    }
    Ok(())
}

fn read_definitions(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading index definitions {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn print_tracked(queries: &[TrackedQuery]) {
    println!(
        "{:>6}  {:>6}  {:>10}  {:>8}  {:>4}  query",
        "id", "score", "total_ms", "calls", "auto"
    );
    for query in queries {
        let text: String = query.query.split_whitespace().collect::<Vec<_>>().join(" ");
        let text: String = text.chars().take(60).collect();
        println!(
            "{:>6}  {:>6.3}  {:>10.1}  {:>8}  {:>4}  {}",
            query.id,
            query.score,
            query.metrics.total_exec_time,
            query.metrics.calls,
            if query.auto_indexing { "on" } else { "off" },
            text
        );
    }
}
