//! Bank financial statements pipeline
//!
//! Pulls statements from Alpha Vantage (or reads spreadsheet exports), loads them into the
//! SQLite store and validates the result. Exit status: 0 clean, 1 violations
//! reported, 2 fatal failure.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bank_fundamentals::api::AlphaVantageClient;
use bank_fundamentals::models::{normalize_symbols, Config, ConfigError, ReportPeriod};
use bank_fundamentals::pipeline::{Pipeline, RunOutcome};

#[derive(Parser, Debug)]
#[command(
    name = "bank-fundamentals",
    version,
    about = "🏦 Bank financial statements pipeline",
    long_about = "Fetches balance sheets, cash flows, income statements and company overviews for bank \
                  symbols, normalizes them into fixed per-statement tables, loads them into SQLite and \
                  validates the result."
)]
struct Cli {
    /// SQLite database file (overrides DATABASE_PATH)
    #[arg(long, short, global = true)]
    database: Option<String>,

    /// Comma separated symbols (overrides BANK_SYMBOLS)
    #[arg(long, short, global = true, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Number of concurrent fetch workers (overrides FETCH_WORKERS)
    #[arg(long, short, global = true)]
    workers: Option<usize>,

    /// annual or quarterly reports (overrides REPORT_PERIOD)
    #[arg(long, global = true)]
    period: Option<ReportPeriod>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch from Alpha Vantage, then normalize, load and validate
    Run,
    /// Load CSV or Excel exports from a directory, then validate
    Import {
        /// Directory holding <statement_type>.<csv|xlsx> or <SYMBOL>_<statement_type>.<csv|xlsx> files
        #[arg(long, short)]
        input_dir: PathBuf,
    },
    /// Validate the store without loading anything
    Validate,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bank_fundamentals=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(symbols) = &cli.symbols {
        config.symbols = normalize_symbols(symbols).context("Invalid --symbols")?;
    }
    if let Some(workers) = cli.workers {
        config.fetch_workers = workers.max(1);
    }
    if let Some(period) = cli.period {
        config.report_period = period;
    }
    Ok(config)
}

/// Fail on a missing credential before the store file is created
fn check_credentials(command: &Command, config: &Config) -> Result<(), ConfigError> {
    match command {
        Command::Run => config.require_api_key().map(|_| ()),
        Command::Import { .. } | Command::Validate => Ok(()),
    }
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let config = load_config(&cli)?;
    info!("📋 Configuration: {:?}", config);
    check_credentials(&cli.command, &config).context("Cannot start a fetch run")?;

    let pipeline = Pipeline::open(config.clone())
        .await
        .context("Failed to open statement store")?;

    let summary = match &cli.command {
        Command::Run => {
            let client = AlphaVantageClient::new(&config).context("Failed to create Alpha Vantage client")?;
            pipeline.run_fetch(Arc::new(client)).await
        }
        Command::Import { input_dir } => pipeline.run_import(input_dir).await,
        Command::Validate => pipeline.run_validate().await,
    };
    pipeline.store().close().await;

    println!("{}", summary);
    Ok(summary.outcome())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let code = match run(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            RunOutcome::Fatal.exit_code()
        }
    };
    std::process::exit(code);
}
