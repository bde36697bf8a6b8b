mod client;
mod commands;

use clap::{Parser, Subcommand};
use client::{Client, UNREACHABLE};
use commands::{EXIT_FAILURE, EXIT_UNREACHABLE};
use rigconf_schema::Strictness;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "rigconf",
    version,
    about = "Switch, stop and inspect robot-control configurations"
)]
struct Cli {
    /// Base URL of the rigconf daemon.
    #[arg(long, default_value = "http://127.0.0.1:8420", global = true)]
    url: String,

    /// Seconds to wait for the daemon to answer. Transitions can take a while.
    #[arg(long, default_value_t = 60, global = true)]
    timeout: u64,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Switch to a configuration.
    Start {
        /// Configuration name.
        name: String,
        /// Fail if any controller fails to start.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Stop the active configuration and unload its hardware interfaces.
    Stop {
        /// Accepted for compatibility; stopping starts no controllers, so
        /// strictness has no effect here.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// List the configurations and which one is running.
    List,
    /// Reload configuration definitions from the parameter store.
    Update,
    /// Show the daemon's current state.
    Status,
}

fn strictness(strict: bool) -> Strictness {
    if strict {
        Strictness::Strict
    } else {
        Strictness::BestEffort
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RIGCONF_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let client = Client::new(&cli.url, Duration::from_secs(cli.timeout));
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Start { name, strict } => {
            commands::start::run(&client, &name, strictness(strict), json_output)
        }
        Commands::Stop { strict } => commands::stop::run(&client, strictness(strict), json_output),
        Commands::List => commands::list::run(&client, json_output),
        Commands::Update => commands::update::run(&client, json_output),
        Commands::Status => commands::status::run(&client, json_output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with(UNREACHABLE) {
                EXIT_UNREACHABLE
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
