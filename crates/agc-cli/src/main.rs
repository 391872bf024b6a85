//! AGC ttbar analysis CLI

use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use agc_analysis::{
    AnalysisConfig, CatalogOptions, dump_json, histograms, load_histograms, physics_registry, retrieve_inputs,
    run_analysis, save_histograms, validate,
};
use agc_frame::{DistributedBackend, ExecutionBackend, LocalBackend, LocalProcessCluster, SshCluster, WorkerCluster};

#[derive(Parser)]
#[command(name = "agc")]
#[command(about = "CMS open data ttbar analysis over a lazy columnar engine")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scheduler {
    /// Multi-threaded execution on this machine.
    Mt,
    /// Worker processes on this machine.
    ClusterLocal,
    /// Worker processes started over ssh on `--hosts`.
    ClusterSsh,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis and write the result histograms
    Run {
        /// How many files per sample will be processed (all files if absent)
        #[arg(short = 'n', long)]
        n_max_files_per_sample: Option<usize>,

        /// Local directory holding Parquet copies of the input files
        #[arg(short = 'd', long)]
        data_cache: Option<PathBuf>,

        /// Replacement for the remote prefix of every catalog path
        #[arg(long)]
        remote_data_prefix: Option<String>,

        /// Output file; overwritten if it exists
        #[arg(short, long, default_value = "histograms.json")]
        output: PathBuf,

        /// Execution scheduler
        #[arg(short, long, value_enum, default_value = "mt")]
        scheduler: Scheduler,

        /// Cores to use; workers per host for cluster schedulers
        #[arg(short = 'c', long)]
        ncores: Option<usize>,

        /// Number of partitions per sample for cluster schedulers (default: one per file)
        #[arg(long)]
        npartitions: Option<usize>,

        /// Comma-separated worker hostnames for `cluster-ssh`
        #[arg(long)]
        hosts: Option<String>,

        /// Verbose execution logs (same as `--log-level debug`)
        #[arg(short, long)]
        verbose: bool,

        /// Input catalog
        #[arg(long, default_value = "ntuples.json")]
        input: PathBuf,

        /// Seed for the random smearing helpers
        #[arg(long, default_value = "0")]
        seed: u64,

        /// JSON file overriding analysis constants
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Compare a histogram file with a reference
    Validate {
        /// Histogram file produced by `agc run`
        #[arg(long, default_value = "histograms.json")]
        histos: PathBuf,

        /// Reference histogram file
        #[arg(long, conflicts_with = "dump_json", required_unless_present = "dump_json")]
        reference: Option<PathBuf>,

        /// Print the normalized JSON of `--histos` instead of validating
        #[arg(long)]
        dump_json: bool,
    },

    /// Serve partition tasks on stdin/stdout (started by cluster schedulers)
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match &cli.command {
        Commands::Run { verbose: true, .. } => cli.log_level.max(tracing::Level::DEBUG),
        _ => cli.log_level,
    };
    // Stdout carries results and the worker protocol; logs go to stderr.
    tracing_subscriber::fmt().with_max_level(level).with_target(false).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Run {
            n_max_files_per_sample,
            data_cache,
            remote_data_prefix,
            output,
            scheduler,
            ncores,
            npartitions,
            hosts,
            verbose: _,
            input,
            seed,
            config,
        } => {
            let catalog = CatalogOptions { max_files_per_sample: n_max_files_per_sample, remote_data_prefix, data_cache };
            let cluster = ClusterArgs { scheduler, ncores, npartitions, hosts, log_level: level };
            cmd_run(&input, &catalog, &cluster, config.as_deref(), seed, &output)
        }
        Commands::Validate { histos, reference, dump_json } => cmd_validate(&histos, reference.as_deref(), dump_json),
        Commands::Worker => cmd_worker(),
    }
}

struct ClusterArgs {
    scheduler: Scheduler,
    ncores: Option<usize>,
    npartitions: Option<usize>,
    hosts: Option<String>,
    log_level: tracing::Level,
}

fn default_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn make_backend(args: &ClusterArgs) -> Result<Box<dyn ExecutionBackend>> {
    let registry = Arc::new(physics_registry());
    let ncores = args.ncores.unwrap_or_else(default_cores);
    let worker_args = vec!["--log-level".to_string(), args.log_level.to_string(), "worker".to_string()];
    let cluster: Box<dyn WorkerCluster> = match args.scheduler {
        Scheduler::Mt => {
            tracing::info!(threads = ncores, "multi-threaded execution");
            return Ok(Box::new(LocalBackend::new(ncores, registry)));
        }
        Scheduler::ClusterLocal => {
            let program = std::env::current_exe().context("cannot locate the agc executable")?;
            Box::new(LocalProcessCluster::new(program, worker_args, ncores))
        }
        Scheduler::ClusterSsh => {
            let hosts: Vec<String> = args
                .hosts
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
            tracing::info!(?hosts, "using worker nodes");
            Box::new(SshCluster::new(hosts, ncores)?.with_worker_args(worker_args))
        }
    };
    tracing::info!(cluster = %cluster.describe(), npartitions = ?args.npartitions, "distributed execution");
    Ok(Box::new(DistributedBackend::new(cluster, registry).with_partitions(args.npartitions)))
}

fn cmd_run(
    input: &Path,
    catalog: &CatalogOptions,
    cluster: &ClusterArgs,
    config: Option<&Path>,
    seed: u64,
    output: &Path,
) -> Result<()> {
    let start = Instant::now();
    tracing::info!(version = agc_core::VERSION, "starting analysis");

    let config = match config {
        Some(path) => AnalysisConfig::from_json_file(path)?,
        None => AnalysisConfig::default(),
    };
    let backend = make_backend(cluster)?;
    let samples = retrieve_inputs(input, &config.remote_prefix, catalog)
        .with_context(|| format!("failed to resolve inputs from {}", input.display()))?;
    tracing::info!(samples = samples.len(), "catalog resolved");

    let collected = run_analysis(backend.as_ref(), &samples, &config, seed)?;
    save_histograms(&histograms(&collected), output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(seconds = start.elapsed().as_secs_f64(), "analysis finished");
    println!("Result histograms saved in file {}", output.display());
    Ok(())
}

fn cmd_validate(histos: &Path, reference: Option<&Path>, dump: bool) -> Result<()> {
    let produced = load_histograms(histos)?;
    if dump {
        println!("{}", dump_json(&produced)?);
        return Ok(());
    }
    let reference = reference.context("--reference is required unless --dump-json is given")?;
    let expected = load_histograms(reference)?;

    println!("Validating '{}' against reference '{}'...", histos.display(), reference.display());
    let report = validate(&produced, &expected);
    print!("{}", report.render());
    std::io::stdout().flush()?;
    if !report.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_worker() -> Result<()> {
    let registry = physics_registry();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    agc_frame::worker::serve(&registry, BufReader::new(stdin.lock()), stdout.lock())?;
    Ok(())
}
