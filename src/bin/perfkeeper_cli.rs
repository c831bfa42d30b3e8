use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use perfkeeper::{HeatMap, MetricStore, Storage, StoreConfig, WriteRequest};

#[derive(Parser)]
#[command(name = "perfkeeper-cli", version, about = "Performance sample store tooling")]
struct Cli {
    /// Store root directory (overrides the config file)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases
    Databases,
    /// List metrics of a database
    Metrics { db: String },
    /// Append one sample per field of a JSON object, e.g. '{"cpu": 12.5}'
    Write {
        db: String,
        body: String,
        /// Timestamp in s, ms, us or ns; defaults to now
        #[arg(long)]
        ts: Option<String>,
    },
    /// Raw [timestamp, value] pairs
    Raw { db: String, metric: String },
    Summary { db: String, metric: String },
    Histo { db: String, metric: String },
    Heatmap {
        db: String,
        metric: String,
        /// Display title; defaults to "<db>/<metric>"
        #[arg(long)]
        label: Option<String>,
    },
}

#[derive(Serialize)]
struct LabeledHeatMap {
    title: String,
    #[serde(flatten)]
    heat_map: HeatMap,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        let message = match err.downcast_ref::<perfkeeper::Error>() {
            Some(store_err) => store_err.to_json_body(),
            None => serde_json::json!({ "error": format!("{err:#}") }).to_string(),
        };
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(base_dir) = cli.base_dir {
        config.base_dir = base_dir;
    }
    let store = MetricStore::open(config)?;

    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Databases => emit(&mut out, &store.list_databases()?)?,
        Commands::Metrics { db } => emit(&mut out, &store.list_metrics(&db)?)?,
        Commands::Write { db, body, ts } => {
            let request = WriteRequest::from_body(db, &body, ts.as_deref())?;
            request.apply(&store)?;
            info!(
                "wrote {} samples to {} at {}",
                request.samples.len(),
                request.db,
                request.timestamp
            );
        }
        Commands::Raw { db, metric } => emit(&mut out, &store.raw_values(&db, &metric)?)?,
        Commands::Summary { db, metric } => emit(&mut out, &store.summary(&db, &metric)?)?,
        Commands::Histo { db, metric } => emit(&mut out, &store.histogram(&db, &metric)?)?,
        Commands::Heatmap { db, metric, label } => {
            let heat_map = store.heat_map(&db, &metric)?;
            let title = label.unwrap_or_else(|| format!("{db}/{metric}"));
            emit(&mut out, &LabeledHeatMap { title, heat_map })?;
        }
    }
    out.flush()?;
    Ok(())
}

fn emit<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
