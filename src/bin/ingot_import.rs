//! ingot-import: Decompose JSON documents into relational tables
//!
//! Usage:
//!   # Catalog from a directory of *tables.csv / *fields.csv / *relationships.csv,
//!   # rows to stdout as a single tagged stream
//!   ingot-import --catalog-dir ./catalog events.json
//!
//!   # One .jsonl file per table
//!   ingot-import --catalog-dir ./catalog --sink jsonl -o ./tables data/
//!
//!   # SQLite, creating the tables first, four workers
//!   ingot-import --catalog-json catalog.json --sink sqlite -o events.db --create-schema --jobs 4 data/

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use ingot::catalog::{load_csv, load_csv_dir, load_json};
use ingot::sink::CommitMode;
use ingot::source::{parse_documents, read_all_records, resolve_inputs, split_records};
use ingot::{
    BatchSummary, CancelToken, Catalog, ImportConfig, JsonlDirSink, JsonlStreamSink, MemorySink, SqliteSink,
    TruncationPolicy,
};
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Single JSON Lines stream on stdout, each row tagged with its table
    Stream,
    /// One `<table>.jsonl` file per table in the output directory
    Jsonl,
    /// SQLite database file
    Sqlite,
    /// Decompose and report without writing anything
    DryRun,
}

#[derive(Parser, Debug)]
#[command(name = "ingot-import")]
#[command(about = "Decompose JSON documents into relational tables", long_about = None)]
struct Args {
    /// Input files or directories (use stdin if omitted)
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    /// Directory holding the tables, fields and relationships CSV files
    #[arg(long, conflicts_with_all = ["tables", "catalog_json"])]
    catalog_dir: Option<PathBuf>,

    /// Tables CSV file
    #[arg(long, requires_all = ["fields", "relationships"])]
    tables: Option<PathBuf>,

    /// Fields CSV file
    #[arg(long, requires = "tables")]
    fields: Option<PathBuf>,

    /// Relationships CSV file
    #[arg(long, requires = "tables")]
    relationships: Option<PathBuf>,

    /// Catalog as a single JSON file
    #[arg(long, conflicts_with = "tables")]
    catalog_json: Option<PathBuf>,

    /// Where rows are written
    #[arg(long, value_enum, default_value_t = SinkKind::Stream)]
    sink: SinkKind,

    /// Output directory (jsonl) or database file (sqlite)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Create the catalog's tables in the SQLite database first
    #[arg(long)]
    create_schema: bool,

    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    truncate_policy: Option<TruncationPolicy>,

    #[arg(long, value_enum)]
    commit_mode: Option<CommitMode>,

    /// Search input directories recursively
    #[arg(long, short = 'r')]
    recursive: bool,

    /// Process at most N records in total
    #[arg(long)]
    max_records: Option<usize>,

    /// Take at most N records from each input file
    #[arg(long)]
    max_records_per_file: Option<usize>,

    #[arg(long)]
    max_files: Option<usize>,

    /// Worker threads
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Stop after more than N failed records
    #[arg(long)]
    failure_tolerance: Option<usize>,

    /// Log progress every N records (0 disables)
    #[arg(long)]
    progress_interval: Option<usize>,

    /// Drop repeated values within one enum array
    #[arg(long)]
    dedupe_enum_values: bool,

    /// Print the summary as JSON instead of text
    #[arg(long)]
    summary_json: bool,
}

fn main() -> Result<()> {
    // Log to stderr so the stream sink can own stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let catalog = load_catalog(&args)?;
    info!(tables = catalog.len(), root = %catalog.root().name, "catalog loaded");

    let cancel = CancelToken::new();
    install_ctrl_c(cancel.clone());

    let records = load_inputs(&args, &config, &cancel)?;
    info!(records = records.len(), "input loaded");

    let summary = run(&args, &config, &catalog, &records, cancel)?;

    if args.summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        eprintln!("{}", summary);
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<ImportConfig> {
    let mut config = match &args.config {
        Some(path) => ImportConfig::from_json_file(path)?,
        None => ImportConfig::default(),
    };
    if let Some(policy) = args.truncate_policy {
        config.truncate_policy = policy;
    }
    if let Some(mode) = args.commit_mode {
        config.commit_mode = mode;
    }
    if args.recursive {
        config.recursive = true;
    }
    if args.max_records.is_some() {
        config.max_records = args.max_records;
    }
    if args.max_records_per_file.is_some() {
        config.max_records_per_file = args.max_records_per_file;
    }
    if args.max_files.is_some() {
        config.max_files = args.max_files;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs.max(1);
    }
    if args.failure_tolerance.is_some() {
        config.failure_tolerance = args.failure_tolerance;
    }
    if let Some(interval) = args.progress_interval {
        config.progress_interval = interval;
    }
    if args.dedupe_enum_values {
        config.dedupe_enum_values = true;
    }
    Ok(config)
}

/// Cancel the run on Ctrl+C; records already started are finished first
fn install_ctrl_c(cancel: CancelToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "unable to start the signal runtime");
                return;
            }
        };
        runtime.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupted; stopping after the current record");
                    cancel.cancel();
                }
                Err(err) => error!(error = %err, "unable to install Ctrl+C signal handler"),
            }
        });
    });
}

fn load_catalog(args: &Args) -> Result<Catalog> {
    if let Some(dir) = &args.catalog_dir {
        return load_csv_dir(dir);
    }
    if let Some(path) = &args.catalog_json {
        return load_json(path);
    }
    match (&args.tables, &args.fields, &args.relationships) {
        (Some(tables), Some(fields), Some(relationships)) => load_csv(tables, fields, relationships),
        _ => bail!("No catalog given: use --catalog-dir, --catalog-json or --tables/--fields/--relationships"),
    }
}

/// Read every record up front
fn load_inputs(args: &Args, config: &ImportConfig, cancel: &CancelToken) -> Result<Vec<Value>> {
    if args.inputs.is_empty() {
        let mut content = Vec::new();
        std::io::stdin().read_to_end(&mut content).context("Failed to read stdin")?;
        let mut records: Vec<Value> = parse_documents(&content)?.into_iter().flat_map(split_records).collect();
        if let Some(max) = config.max_records {
            records.truncate(max);
        }
        return Ok(records);
    }

    let files = resolve_inputs(&args.inputs, config.recursive, config.max_files)?;
    if files.is_empty() {
        warn!("no input files found");
    }
    read_all_records(&files, config.max_records_per_file, config.max_records, cancel)
}

fn output_path(args: &Args) -> Result<&PathBuf> {
    args.output
        .as_ref()
        .with_context(|| format!("--output is required for the {:?} sink", args.sink))
}

fn run(
    args: &Args,
    config: &ImportConfig,
    catalog: &Catalog,
    records: &[Value],
    cancel: CancelToken,
) -> Result<BatchSummary> {
    let driver = config.batch_driver(catalog).with_cancel_token(cancel);
    let jobs = config.jobs.max(1);

    match args.sink {
        SinkKind::Stream => {
            if jobs > 1 {
                warn!("the stream sink writes to stdout from a single worker; ignoring --jobs");
            }
            let mut sink = JsonlStreamSink::new(std::io::BufWriter::new(std::io::stdout().lock()));
            driver.run(records, &mut sink)
        }
        SinkKind::Jsonl => {
            let dir = output_path(args)?;
            if jobs == 1 {
                let mut sink = JsonlDirSink::new(dir)?;
                driver.run(records, &mut sink)
            } else {
                driver.run_parallel(records, jobs, |worker| {
                    let part = dir.join(format!("part-{}", worker));
                    Ok(JsonlDirSink::new(part)?.with_key_prefix(format!("{}_", worker)))
                })
            }
        }
        SinkKind::Sqlite => {
            let path = output_path(args)?;
            let mut sink = SqliteSink::open(path)?.with_commit_mode(config.commit_mode);
            if args.create_schema {
                sink.create_schema(catalog)?;
            }
            if jobs == 1 {
                driver.run(records, &mut sink)
            } else {
                if config.commit_mode == CommitMode::PerBatch {
                    warn!("per-batch commits would hold the write lock across workers; committing per record");
                }
                drop(sink);
                driver.run_parallel(records, jobs, |_| {
                    Ok(SqliteSink::open(path)?.with_commit_mode(CommitMode::PerRecord))
                })
            }
        }
        SinkKind::DryRun => {
            if jobs == 1 {
                driver.run(records, &mut MemorySink::new())
            } else {
                driver.run_parallel(records, jobs, |_| Ok(MemorySink::new()))
            }
        }
    }
}
