//! droid: tool-calling agent for Android device automation
//!
//! Drives a local Ollama model that can run adb commands and install CI
//! build artifacts on a connected device.

mod agent;
mod commands;
mod conversation;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "droid")]
#[command(about = "Tool-calling agent for Android device automation", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a one-shot agent query
    Run {
        /// The query to send to the agent
        query: Vec<String>,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum model round-trips before giving up
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show Ollama and adb availability
    Status,

    /// List registered tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            query,
            model,
            max_iterations,
            json,
        } => {
            let query = query.join(" ");
            commands::run(&query, model, max_iterations, json, cli.verbose).await
        }
        Commands::Status => commands::status().await,
        Commands::Tools => commands::tools_list().await,
    }
}
