use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use formsmith::server::{ServerConfig, start_server};

#[derive(Parser)]
#[command(name = "formsmith")]
#[command(version, about = "Form builder backend with AI-assisted field generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        #[arg(long, env = "PORT", default_value_t = 3333)]
        port: u16,

        #[arg(long, env = "DATABASE_PATH", default_value = "formsmith.db")]
        db_path: PathBuf,

        /// Bind 0.0.0.0 and allow any CORS origin (local frontend development)
        #[arg(long)]
        dev: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port, db_path, dev } => {
            start_server(ServerConfig {
                port,
                db_path,
                dev_mode: dev,
            })
            .await
        }
    }
}
