//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "docbus")]
#[command(about = "Schema-less JSON document store over HTTP", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the SQLite database file
    #[arg(long, env = "DOCBUS_DB", default_value = "app.db", global = true)]
    pub db: String,

    /// Token signing secret
    #[arg(long, env = "DOCBUS_SECRET", global = true)]
    pub secret: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the docbus server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:7070")]
        bind: String,
    },

    /// Register a user credential from the shell
    Register {
        /// User name
        #[arg(long)]
        user: String,

        /// Opaque secret
        #[arg(long)]
        auth: String,
    },

    /// Mint a bearer token for a registered user
    Token {
        /// User name
        #[arg(long)]
        user: String,

        /// Opaque secret
        #[arg(long)]
        auth: String,
    },
}
