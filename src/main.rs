//! # Embedding Pipeline CLI (`embedpipe`)
//!
//! Runs the embedding pipeline as a one-shot batch job.
//!
//! ## Usage
//!
//! ```bash
//! embedpipe --config ./config/pipeline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `embedpipe run --start D --end D` | Process an inclusive date range |
//! | `embedpipe last-days N` | Process the N days ending yesterday |
//! | `embedpipe prefixes --start D --end D` | Print the partition prefixes a run would scan |
//!
//! Logs go to stderr (`RUST_LOG` controls verbosity); the run summary goes
//! to stdout. Ctrl-C cancels a run at the next I/O boundary.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use embedding_pipeline::cancel::RunControl;
use embedding_pipeline::config::{self, Config};
use embedding_pipeline::logging::{init_logging, LogFormat};
use embedding_pipeline::pipeline::{run_date_range, run_last_days, PipelineDeps};
use embedding_pipeline::report::print_stats;
use embedding_pipeline_core::partition::{partition_prefixes, DateRange};

/// Embedding pipeline: turn date-partitioned service logs into vector
/// embeddings.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pipeline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "embedpipe",
    about = "Batch job that turns date-partitioned service logs into vector embeddings",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pipeline.toml")]
    config: PathBuf,

    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an inclusive date range.
    Run {
        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,
        /// Last day (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: NaiveDate,
        /// Restrict to these services (repeatable). Defaults to `pipeline.services`.
        #[arg(long = "service")]
        services: Vec<String>,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Process the N complete days ending yesterday.
    LastDays {
        /// Number of days (at least 1).
        days: u32,
        #[arg(long = "service")]
        services: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Print the partition prefixes a run would scan, without any I/O.
    Prefixes {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long = "service")]
        services: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Commands::Prefixes {
        start,
        end,
        ref services,
    } = cli.command
    {
        let services = if services.is_empty() {
            config::load_config(&cli.config)?.pipeline.services
        } else {
            services.clone()
        };
        for service in &services {
            for prefix in partition_prefixes(service, start, end) {
                println!("{}", prefix);
            }
        }
        return Ok(());
    }

    let mut cfg = config::load_config(&cli.config)?;
    let control = run_control(&cfg);

    match cli.command {
        Commands::Run {
            start,
            end,
            services,
            json,
        } => {
            override_services(&mut cfg, services);
            let deps = PipelineDeps::from_config(&cfg)?;
            let stats = run_date_range(&cfg, deps, DateRange::new(start, end), control).await?;
            print_stats(&stats, json)?;
        }
        Commands::LastDays {
            days,
            services,
            json,
        } => {
            override_services(&mut cfg, services);
            let deps = PipelineDeps::from_config(&cfg)?;
            let today = chrono::Utc::now().date_naive();
            let stats = run_last_days(&cfg, deps, days, today, control).await?;
            print_stats(&stats, json)?;
        }
        Commands::Prefixes { .. } => {}
    }

    Ok(())
}

fn override_services(cfg: &mut Config, services: Vec<String>) {
    if !services.is_empty() {
        cfg.pipeline.services = services;
    }
}

/// Cancellation on Ctrl-C plus the configured run deadline.
fn run_control(cfg: &Config) -> RunControl {
    let mut control = RunControl::new();
    if let Some(secs) = cfg.pipeline.timeout_secs {
        control = control.with_timeout(Duration::from_secs(secs));
    }

    let on_signal = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; cancelling run");
            on_signal.cancel();
        }
    });
    control
}
