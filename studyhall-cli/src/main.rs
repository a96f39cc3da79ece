//! Main entry point for the `StudyHall` chat CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::ChatConfig;
use std::path::PathBuf;

mod commands;
mod tracer;

/// `StudyHall` chat CLI
#[derive(Parser)]
#[command(name = "StudyHall CLI")]
#[command(about = "Developer harness for the StudyHall channel chat engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the `StudyHall` chat CLI
#[derive(Subcommand)]
enum Commands {
    /// Run the chat engine against an in-memory channel and print the result
    Simulate {
        /// Path to the configuration file (optional)
        #[arg(
            long,
            short,
            help = "Path to the configuration file (e.g., studyhall.yaml, .json or .toml). If not provided, defaults will be used."
        )]
        config: Option<PathBuf>,

        /// Channel to open
        #[arg(long, default_value = "general", help = "Name of the channel to simulate")]
        channel: String,

        /// Number of messages already in the channel
        #[arg(long, default_value_t = 45, help = "Number of messages seeded before the channel is opened")]
        seed: usize,

        /// Messages to send once history is loaded
        #[arg(long = "send", value_name = "TEXT", help = "Message to send after history is loaded (repeatable)")]
        sends: Vec<String>,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate
        #[arg(
            long,
            short,
            default_value = "yaml",
            help = "Format of the configuration file to generate (yaml, json or toml). Defaults to yaml."
        )]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            channel,
            seed,
            sends,
        } => {
            let config = ChatConfig::load_config(config.as_deref())?;
            tracer::initialize_tracing(&config);
            commands::simulate::run_simulation(config, &channel, seed, &sends).await?;
        }
        Commands::Config { format } => {
            commands::config::generate_config(&format)?;
        }
    }

    Ok(())
}
