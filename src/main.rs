//! homelab - declarative container deployment for a single Docker host
//!
//! This is the main CLI entry point for homelab.

use clap::{ArgGroup, Args, Parser, Subcommand};
use homelab::config::parser::CONFIGS_DIR_ENV;
use homelab::config::{validate, ConfigParser};
use homelab::deployment::{order, Deployment, RunCoordinator};
use homelab::error::Result;
use homelab::host::HostInfo;
use homelab::runtime::DockerRuntime;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// homelab - declarative container deployment
#[derive(Parser)]
#[command(name = "homelab")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Deploys and reconciles homelab containers on this host", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Directory holding the homelab config files
    #[arg(long, global = true, env = CONFIGS_DIR_ENV)]
    configs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the homelab config
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Start containers that belong on this host
    Start(StartArgs),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the merged and validated config
    Show {
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("selection").required(true).args(["all_groups", "group"])))]
struct StartArgs {
    /// Start every group
    #[arg(long)]
    all_groups: bool,

    /// Start a single group
    #[arg(long)]
    group: Option<String>,

    /// Start a single container of the group
    #[arg(long, requires = "group")]
    container: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let configs_dir = cli
        .configs_dir
        .unwrap_or_else(ConfigParser::default_configs_dir);

    match cli.command {
        Commands::Config {
            command: ConfigCommands::Show { json },
        } => {
            let config = ConfigParser::load_dir(&configs_dir)?;
            validate(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", serde_yaml::to_string(&config)?);
            }
        }

        Commands::Start(args) => {
            let host = HostInfo::discover()?;
            tracing::debug!(host = %host.host_name, ip = %host.ip, "Discovered host");

            let deployment = Deployment::load(&configs_dir, &host)?;
            let selected = if args.all_groups {
                deployment.query_all()
            } else if let Some(group) = &args.group {
                match &args.container {
                    Some(container) => vec![deployment.query_container(group, container)?],
                    None => deployment.query_group(group)?,
                }
            } else {
                Vec::new()
            };
            let containers = order(selected);

            let runtime = Arc::new(DockerRuntime::connect()?);
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, stopping");
                    interrupt.cancel();
                }
            });

            RunCoordinator::new(&deployment, runtime, cancel)
                .run(&containers)
                .await?;
        }
    }

    Ok(())
}
