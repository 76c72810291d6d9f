//! fleetd — the fleetgrid daemon.
//!
//! Wires the state store, the cluster substrate and the environment scaler
//! together:
//! - `scale` runs the scaler once for one environment and prints the report
//! - `run` reconciles every environment periodically until Ctrl-C
//! - `env` / `job` manage the records the scaler reads
//!
//! The substrate is a JSON snapshot loaded into the in-memory substrate.
//!
//! # Usage
//!
//! ```text
//! fleetd --config fleetd.toml --substrate cluster.json env register --id env1 --instance-type m3.medium
//! fleetd --config fleetd.toml --substrate cluster.json scale --env env1
//! fleetd --config fleetd.toml --substrate cluster.json run --persist
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod daemon;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid environment scaler daemon", version)]
struct Cli {
    /// Path to fleetd.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// redb file holding environments and jobs.
    #[arg(long, global = true, default_value = "fleetd.redb")]
    state: PathBuf,

    /// JSON snapshot of the cluster substrate.
    #[arg(long, global = true, default_value = "substrate.json")]
    substrate: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scaler once for an environment and print the run report.
    Scale {
        #[arg(long = "env")]
        environment: String,

        /// Write the substrate snapshot back after the run.
        #[arg(long)]
        persist: bool,
    },
    /// Reconcile every environment periodically until interrupted.
    Run {
        /// Write the substrate snapshot back on shutdown.
        #[arg(long)]
        persist: bool,
    },
    /// Manage environment records.
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },
    /// Manage queued jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
enum EnvAction {
    /// Register (or update) an environment.
    Register {
        #[arg(long)]
        id: String,
        /// Display name; defaults to the id.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "m3.medium")]
        instance_type: String,
    },
    /// List registered environments.
    List,
}

#[derive(Subcommand)]
enum JobAction {
    /// Queue a create-task job.
    CreateTask {
        #[arg(long = "env")]
        environment: String,
        /// Task definition to run.
        #[arg(long)]
        deploy: String,
        #[arg(long, default_value = "1")]
        copies: u32,
    },
    /// List unfinished jobs.
    List,
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = commands::load_config(cli.config.as_deref())?;
    let paths = commands::Paths {
        state: cli.state,
        substrate: cli.substrate,
    };

    match cli.command {
        Command::Scale {
            environment,
            persist,
        } => commands::scale(&config, &paths, &environment, persist).await,
        Command::Run { persist } => daemon::run(&config, &paths, persist).await,
        Command::Env { action } => match action {
            EnvAction::Register {
                id,
                name,
                instance_type,
            } => commands::register_environment(&config, &paths, &id, name.as_deref(), &instance_type),
            EnvAction::List => commands::list_environments(&paths),
        },
        Command::Job { action } => match action {
            JobAction::CreateTask {
                environment,
                deploy,
                copies,
            } => commands::enqueue_create_task(&paths, &environment, &deploy, copies),
            JobAction::List => commands::list_jobs(&paths),
        },
    }
}
