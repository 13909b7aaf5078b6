//! AuthKit - token-based authentication API.

use anyhow::{Context, Result};
use authkit::db::DatabasePool;
use authkit::gateway::{self, AppState};
use authkit::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "authkit")]
#[command(about = "Access/refresh token authentication API")]
#[command(version)]
struct Cli {
    /// Config file. Defaults to the platform config dir when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Listen host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Delete expired and revoked refresh tokens, then exit
    Sweep,
    /// Validate the configuration and print warnings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("authkit=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            gateway::run_gateway(config).await
        }
        Commands::Sweep => {
            config.validate()?;
            let db_path = config.database_path();
            let pool = DatabasePool::open(&db_path, config.pool_config())
                .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
            let state = AppState::from_config(&config, pool.clone())?;
            let deleted = state.service.sweep().await?;
            println!("Removed {deleted} refresh token(s)");
            pool.close();
            Ok(())
        }
        Commands::CheckConfig => {
            config.validate()?;
            let lifetimes = config.lifetimes();
            println!("environment:      {}", config.environment.as_str());
            println!("listen:           {}:{}", config.server.host, config.server.port);
            println!("api prefix:       {}", config.server.api_prefix);
            println!("database:         {}", config.database_path().display());
            println!("access lifetime:  {}s", lifetimes.access_secs);
            println!("refresh lifetime: {}s", lifetimes.refresh_secs);
            println!("demo provider:    {}", config.demo_oauth_enabled());
            let warnings = config.warnings();
            if warnings.is_empty() {
                println!("Configuration OK");
            } else {
                for warning in warnings {
                    println!("warning: {warning}");
                }
            }
            Ok(())
        }
    }
}
