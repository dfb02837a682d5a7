use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::*;
use config::Config;

#[derive(Parser)]
#[command(name = "qc")]
#[command(author, version, about = "Query Cache - LRU query-result and entity cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated data-access workload against the LRU cacher
    Simulate {
        /// Number of tables
        #[arg(short, long, default_value = "4")]
        tables: usize,

        /// Rows per table
        #[arg(short, long, default_value = "500")]
        rows: usize,

        /// Number of operations
        #[arg(short = 'n', long, default_value = "10000")]
        operations: usize,

        /// Fraction of operations that update a row
        #[arg(short, long, default_value = "0.1")]
        write_ratio: f64,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Sweep synchronously every N operations instead of running the background sweeper
        #[arg(long)]
        sweep_every: Option<usize>,
    },

    /// Inspect or create a configuration file
    Config {
        /// Write the default configuration to this path
        #[arg(long)]
        init: Option<PathBuf>,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },

    /// Round-trip a bean and an id-list through a Redis server
    #[cfg(feature = "redis")]
    RedisCheck {
        /// Redis URL, overriding the configuration file
        #[arg(short, long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    print_banner();

    match cli.command {
        Commands::Simulate {
            tables,
            rows,
            operations,
            write_ratio,
            seed,
            sweep_every,
        } => {
            let workload = Workload {
                tables,
                rows,
                operations,
                write_ratio,
                seed,
                sweep_every,
            };
            simulate(&config, &workload).await?;
        }
        Commands::Config { init, force } => match init {
            Some(path) => init_config(&path, force)?,
            None => show_config(&config)?,
        },
        #[cfg(feature = "redis")]
        Commands::RedisCheck { url } => {
            redis_check(&config, url)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "qc=debug,query_cache=debug,query_core=debug,remote_cacher=debug"
    } else {
        "qc=info,query_cache=info,remote_cacher=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
   ___                          ____           _
  / _ \ _   _  ___ _ __ _   _  / ___|__ _  ___| |__   ___
 | | | | | | |/ _ \ '__| | | || |   / _` |/ __| '_ \ / _ \
 | |_| | |_| |  __/ |  | |_| || |__| (_| | (__| | | |  __/
  \__\_\\__,_|\___|_|   \__, | \____\__,_|\___|_| |_|\___|
                        |___/
    "#
        .bright_cyan()
    );
    println!(
        "{}",
        "Query-Result and Entity Cache v0.1.0".bright_yellow()
    );
    println!();
}
