//! Docbus CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use docbus::server::{run_server, AppState};
use docbus::storage::SqliteBackend;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let secret = cli
        .secret
        .context("DOCBUS_SECRET or --secret required")?;

    let backend = Arc::new(
        SqliteBackend::open(&cli.db)
            .with_context(|| format!("Failed to open database: {}", cli.db))?,
    );
    let state = AppState::new(backend, secret.as_bytes());

    match cli.command {
        Commands::Serve { bind } => {
            let bind_addr = bind.parse().context("Invalid bind address")?;
            run_server(bind_addr, state).await
        }
        Commands::Register { user, auth } => {
            state.gate.register(&user, &auth)?;
            println!("registered {}", user);
            Ok(())
        }
        Commands::Token { user, auth } => {
            let token = state.gate.validate(&user, &auth)?;
            println!("{}", token);
            Ok(())
        }
    }
}
