use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use veilbond_node::{api, logging, NodeConfig, VeilbondNode};

#[derive(Parser)]
#[command(name = "veilbond")]
#[command(about = "Pseudonymous bonding and accountability engine", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine
    Start {
        /// Data directory for storage
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Port for the HTTP API
        #[arg(long, default_value = "8080")]
        api_port: u16,
    },

    /// Write a default configuration file
    Init {
        /// Output directory for the configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Start { data_dir, api_port } => {
            let mut config = match &cli.config {
                Some(path) => NodeConfig::from_file(path)?,
                None => NodeConfig::default(),
            };
            config.node.data_dir = data_dir;
            if cli.config.is_none() {
                config.api.port = api_port;
            }

            let node = VeilbondNode::new(config).await?;
            let tasks = node.start_background_tasks();

            let api_handle = if node.api_config().enabled {
                let api = node.api_config().clone();
                Some(api::start_api_server(node.clone(), &api.host, api.port))
            } else {
                None
            };

            info!("✨ veilbond running, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            info!("🛑 Shutting down");

            for task in tasks {
                task.abort();
            }
            if let Some(handle) = api_handle {
                handle.abort();
            }
        }

        Commands::Init { output } => {
            let path = output.join("veilbond.toml");
            NodeConfig::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}
