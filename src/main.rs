//! Playground CLI - experiment tracking API server

use clap::{Parser, Subcommand};
use playground::config::{self, PlaygroundConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "playground")]
#[command(version)]
#[command(about = "Playground API - datasets, experiments, runs and artifacts for ML experimentation")]
#[command(long_about = r#"
Playground tracks ML experimentation:
  • Dataset uploads (CSV, JSON, JSON Lines, Parquet) with schema inference
  • Experiments, runs, metrics and parameters
  • Run logs and artifacts

Example usage:
  playground init
  playground serve --port 8000
  curl -F file=@iris.csv -F name=iris http://localhost:8000/api/datasets/ingest
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Root directory for uploaded files, run logs and artifacts
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Path to the database file (defaults to <data-dir>/playground.db)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Allowed CORS origin
        #[arg(long)]
        cors_origin: Option<String>,
    },

    /// Write a config file with default values
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Serve { host, port, data_dir, database, cors_origin } => {
            let mut file_config = config::load_config(Some(&config_path))?.unwrap_or_default();
            if file_config != PlaygroundConfig::default() {
                tracing::info!("Loaded config from {}", config_path.display());
            }

            // CLI flags win over the config file
            if host.is_some() {
                file_config.host = host;
            }
            if port.is_some() {
                file_config.port = port;
            }
            if let Some(dir) = data_dir {
                file_config.data_dir = Some(dir.to_string_lossy().into_owned());
            }
            if let Some(db) = database {
                file_config.database = Some(db.to_string_lossy().into_owned());
            }
            if cors_origin.is_some() {
                file_config.cors_origin = cors_origin;
            }

            let settings = file_config.resolve()?;
            playground::server::start_server(settings).await?;
        }

        Commands::Init { force } => {
            config::write_config(&config_path, &PlaygroundConfig::with_defaults(), force)?;
            println!("✅ Wrote {}", config_path.display());
        }
    }

    Ok(())
}
