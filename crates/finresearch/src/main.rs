use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "finresearch", about = "Multi-agent financial research reports")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/finresearch.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research one ticker and write its report
    Analyze {
        ticker: String,

        /// Override the configured reports directory
        #[arg(long)]
        reports_dir: Option<String>,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// List recent runs from the ledger
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // API keys may live in a local .env
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr (respects RUST_LOG env var)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = finresearch::load_config(&cli.config)?;

    match cli.command {
        Command::Analyze {
            ticker,
            reports_dir,
            pretty,
        } => {
            if let Some(dir) = reports_dir {
                config.output.reports_dir = dir;
            }
            let orchestrator =
                finresearch::build_orchestrator(&config).context("Failed to build orchestrator")?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling run");
                    on_signal.cancel();
                }
            });

            let (run, code) = match finresearch::analyze(&orchestrator, &ticker, cancel).await {
                Ok(run) => (run, ExitCode::SUCCESS),
                Err(failure) => {
                    eprintln!("Research failed: {}", failure.error);
                    (*failure.aggregate, ExitCode::FAILURE)
                }
            };
            if let Some(paths) = &run.artifacts {
                info!(results = %paths.results_path, report = ?paths.report_path, "Artifacts written");
            }

            // Output run summary as JSON to stdout
            let summary = run.summary();
            let output = if pretty {
                serde_json::to_string_pretty(&summary)?
            } else {
                serde_json::to_string(&summary)?
            };
            println!("{output}");
            Ok(code)
        }
        Command::History { limit } => {
            for run in finresearch::history(&config, limit)? {
                println!("{}", serde_json::to_string(&run)?);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
