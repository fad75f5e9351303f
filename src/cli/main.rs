//! CLI binary entry point for warehouse-etl

#[cfg(feature = "cli")]
use anyhow::{Context, Result, bail};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use tracing_subscriber::EnvFilter;
#[cfg(feature = "cli")]
use warehouse_etl::pipeline::{Pipeline, RunReport, builtin_jobs};
#[cfg(feature = "cli")]
use warehouse_etl::warehouse::config::{CONFIG_FILENAME, sample_config};
#[cfg(feature = "cli")]
use warehouse_etl::warehouse::{EtlConfig, connector_from_config};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "warehouse-etl")]
#[command(about = "Normalize downloaded datasets and load them into a warehouse")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILENAME)]
    config: PathBuf,

    /// Log filter, e.g. "info" or "warehouse_etl=debug"
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Load datasets into the warehouse
    Run {
        /// Only run the named dataset (repeatable)
        #[arg(short, long = "dataset")]
        datasets: Vec<String>,
        /// Override the data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the built-in datasets
    List,
    /// Write a sample configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Check that the configured warehouse is reachable
    Check,
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let result = tracing::subscriber::with_default(subscriber, || dispatch(cli));

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Run a command, returning whether it fully succeeded
#[cfg(feature = "cli")]
fn dispatch(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Run {
            datasets,
            data_dir,
            json,
        } => {
            let mut config = EtlConfig::load(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            if let Some(dir) = data_dir {
                config.data.dir = dir.display().to_string();
            }
            let report = handle_run(&config, &datasets)?;
            print_report(&report, json)?;
            Ok(report.is_success())
        }
        Commands::List => {
            for job in builtin_jobs() {
                let table = job
                    .target()
                    .map(|t| t.name.to_string())
                    .unwrap_or_else(|e| format!("<{}>", e));
                println!("{:<24} {:<36} {}", job.name(), job.source_file(), table);
            }
            Ok(true)
        }
        Commands::InitConfig { force } => {
            if cli.config.exists() && !force {
                bail!(
                    "{} already exists, use --force to overwrite",
                    cli.config.display()
                );
            }
            std::fs::write(&cli.config, sample_config())
                .with_context(|| format!("Failed to write {}", cli.config.display()))?;
            println!("Wrote {}", cli.config.display());
            Ok(true)
        }
        Commands::Check => {
            let config = EtlConfig::load(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            handle_check(&config)
        }
    }
}

#[cfg(feature = "cli")]
fn handle_run(config: &EtlConfig, datasets: &[String]) -> Result<RunReport> {
    let mut pipeline = Pipeline::from_config(config);
    if !datasets.is_empty() {
        pipeline = pipeline.retain_jobs(datasets)?;
    }

    let connector = connector_from_config(config)?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    Ok(rt.block_on(pipeline.run(connector.as_ref())))
}

#[cfg(feature = "cli")]
fn handle_check(config: &EtlConfig) -> Result<bool> {
    let connector = connector_from_config(config)?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;

    rt.block_on(async {
        let session = connector
            .open()
            .await
            .with_context(|| format!("Failed to connect to {}", connector.describe()))?;
        let healthy = session.health_check().await?;
        session.close().await?;
        println!(
            "{}: {}",
            connector.describe(),
            if healthy { "ok" } else { "unhealthy" }
        );
        Ok::<_, anyhow::Error>(healthy)
    })
}

#[cfg(feature = "cli")]
fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Run {}", report.run_id);
    for dataset in &report.datasets {
        match (&dataset.error, dataset.merge) {
            (Some(error), _) => println!("  {:<24} FAILED  {}", dataset.dataset, error),
            (None, Some(merge)) => println!(
                "  {:<24} ok      {} staged, {} inserted, {} skipped",
                dataset.dataset, merge.staged, merge.inserted, merge.skipped
            ),
            (None, None) => println!("  {:<24} ok", dataset.dataset),
        }
    }
    println!(
        "{} rows inserted in {}ms",
        report.rows_inserted(),
        report.duration_ms
    );
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
