//! Chatbox CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the HTTP API server
//! - `init`   — Write a default configuration file
//! - `config` — Print the effective configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatbox",
    about = "Chatbox — local LLM chatbot backend",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the model alias or GGUF path
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Write a default configuration file
    Init,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port, model } => commands::serve::run(port, model).await?,
        Commands::Init => commands::init::run()?,
        Commands::Config => commands::config_cmd::run()?,
    }

    Ok(())
}
