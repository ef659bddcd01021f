//! HealthFlow CLI, the main entry point.
//!
//! Commands:
//! - `ask`: Run one flow and print the answer
//! - `flows`: List the flows and their output contracts
//! - `serve`: Start the HTTP gateway (and the follow-up worker)
//! - `worker`: Deliver due follow-up check-ins
//! - `config`: Create, show or locate the config file
//! - `doctor`: Diagnose configuration, backends and the job store

use clap::{Parser, Subcommand};
use healthflow_core::flow::{BackendChoice, FlowKind};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "healthflow", about = "HealthFlow, AI flows for a personal health app", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one flow and print the answer
    Ask {
        /// Flow to run: symptom, lifestyle, care, document, mental_health
        flow: FlowKind,

        /// The user's message
        #[arg(required_unless_present = "image", num_args = 1..)]
        query: Vec<String>,

        /// Response locale (e.g. en, es-MX)
        #[arg(short, long)]
        locale: Option<String>,

        /// Generation backend: primary or fallback
        #[arg(short, long)]
        backend: Option<BackendChoice>,

        /// User id for notifications and follow-ups
        #[arg(short, long)]
        user: Option<String>,

        /// Health profile snapshot (JSON file)
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Document image to attach (png, jpeg, webp)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the flows and their output contracts
    Flows,

    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not run the follow-up worker in this process
        #[arg(long)]
        no_worker: bool,
    },

    /// Deliver due follow-up check-ins
    Worker {
        /// Deliver what is due now and exit
        #[arg(long)]
        once: bool,
    },

    /// Diagnose configuration, backends and the job store
    Doctor,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration with secrets redacted
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `ask --json` output stays parseable.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Ask {
            flow,
            query,
            locale,
            backend,
            user,
            profile,
            image,
            json,
        } => {
            let args = commands::ask::AskArgs {
                flow,
                query: query.join(" "),
                locale,
                backend,
                user,
                profile,
                image,
                json,
            };
            commands::ask::run(args).await?
        }
        Commands::Flows => commands::flows::run()?,
        Commands::Serve { port, no_worker } => commands::serve::run(port, no_worker).await?,
        Commands::Worker { once } => commands::worker::run(once).await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}
