mod commands;
mod dice;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dicebet")]
#[command(about = "Dice over an off-chain wagering payment channel")]
#[command(version)]
struct Cli {
    /// Data directory for session reports
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a channel, play dice rounds against a local dealer, close
    Simulate {
        /// Number of rounds to play
        #[arg(long, default_value_t = 10)]
        rounds: u64,
        /// Player deposit locked into the channel
        #[arg(long, default_value_t = 10_000)]
        deposit: u64,
        /// Wager per round
        #[arg(long, default_value_t = 100)]
        bet: u64,
        /// Write a JSON session report to the data directory
        #[arg(long)]
        report: bool,
    },
    /// Recompute the random rolls from a commitment signature
    Audit {
        /// Commitment signature (hex)
        signature: String,
        /// Ranges as MIN-MAX pairs, comma separated (e.g. "1-100,1-6")
        ranges: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "dicebet={},paychan_protocol={},paychan_core={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("paychan")
    });

    let result = match cli.command {
        Commands::Simulate {
            rounds,
            deposit,
            bet,
            report,
        } => commands::simulate(rounds, deposit, bet, report, data_dir).await,
        Commands::Audit { signature, ranges } => commands::audit(&signature, &ranges),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
