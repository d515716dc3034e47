//! Homestead CLI
//!
//! Operator tools for a Homestead data directory.
//!
//! # Commands
//!
//! - `outbox` - List, retry, clear and compact outbox items
//! - `conflicts` - List and resolve sync conflicts
//! - `sync` - Run one sync cycle against a replica
//! - `integrations` - Manage and sync third-party integrations
//! - `serve` - Run the reference replica over HTTP
//! - `token` - Issue an owner token for an authenticated replica

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use homestead_integrations::{IntegrationStatus, IntegrationType};
use homestead_sync_protocol::{QueueStatus, Resolution};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Homestead sync and integration tools.
#[derive(Parser)]
#[command(name = "homestead")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and repair the outbox
    #[command(subcommand)]
    Outbox(OutboxCommand),

    /// Inspect and resolve sync conflicts
    #[command(subcommand)]
    Conflicts(ConflictCommand),

    /// Run one push-then-pull sync cycle
    Sync {
        /// Replica base URL
        #[arg(long)]
        server: String,

        /// Owner identity
        #[arg(long)]
        owner: String,

        /// Device identifier
        #[arg(long, default_value = "homestead-cli")]
        device: String,

        /// Owner token (hex), for replicas that require auth
        #[arg(long)]
        token: Option<String>,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Manage and sync integrations
    #[command(subcommand)]
    Integrations(IntegrationCommand),

    /// Serve the reference replica over HTTP
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Require owner tokens signed with this secret
        #[arg(long)]
        secret: Option<String>,

        /// Upper bound on rows per pull page
        #[arg(long, default_value = "500")]
        max_pull_batch: u32,
    },

    /// Issue an owner token for a replica secret
    Token {
        /// Replica secret
        #[arg(long)]
        secret: String,

        /// Owner identity
        #[arg(long)]
        owner: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum OutboxCommand {
    /// List outbox items
    List {
        /// Only show items with this status
        #[arg(short, long)]
        status: Option<QueueStatus>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Move failed items back to pending
    RetryFailed,
    /// Drop one item by id
    Clear {
        /// Outbox item id
        item: String,
    },
    /// Drop acknowledged items
    Compact,
}

#[derive(Subcommand)]
enum ConflictCommand {
    /// List conflicts with both versions
    List {
        /// Include resolved conflicts
        #[arg(short, long)]
        all: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Resolve a conflict
    Resolve {
        /// Conflict id
        conflict: String,

        /// `local_wins` or `remote_wins`
        resolution: Resolution,
    },
}

#[derive(Subcommand)]
enum IntegrationCommand {
    /// List integrations
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Create an integration
    Create {
        /// Display name
        #[arg(long)]
        name: String,

        /// Provider id, e.g. `mqtt_gateway`
        #[arg(long)]
        provider: String,

        /// Integration type
        #[arg(long = "type")]
        kind: IntegrationType,

        /// Explicit id (default: random)
        #[arg(long)]
        id: Option<String>,

        /// Setting as `key=value`; repeatable
        #[arg(long = "setting", value_parser = commands::parse_setting)]
        settings: Vec<(String, String)>,
    },
    /// Switch an integration on or off
    SetStatus {
        /// Integration id
        id: String,

        /// `active` or `inactive`
        status: IntegrationStatus,
    },
    /// Replace an integration's settings
    UpdateSettings {
        /// Integration id
        id: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// Setting as `key=value`; repeatable
        #[arg(long = "setting", value_parser = commands::parse_setting)]
        settings: Vec<(String, String)>,
    },
    /// Sync one integration now
    Sync {
        /// Integration id
        id: String,

        /// Fetch timeout in seconds
        #[arg(long, default_value = "30")]
        fetch_timeout_secs: u64,
    },
    /// Sync every integration that is not inactive
    SyncAll {
        /// Fetch timeout in seconds
        #[arg(long, default_value = "30")]
        fetch_timeout_secs: u64,
    },
    /// Show an integration's history
    Logs {
        /// Integration id
        id: String,

        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Outbox(command) => {
            let path = cli.path.ok_or("Data directory required for outbox")?;
            let handle = commands::open_store(&path)?;
            match command {
                OutboxCommand::List { status, format } => {
                    commands::outbox::list(&handle, status, format)?
                }
                OutboxCommand::RetryFailed => commands::outbox::retry_failed(&handle)?,
                OutboxCommand::Clear { item } => commands::outbox::clear(&handle, &item)?,
                OutboxCommand::Compact => commands::outbox::compact(&handle)?,
            }
        }
        Commands::Conflicts(command) => {
            let path = cli.path.ok_or("Data directory required for conflicts")?;
            let handle = commands::open_store(&path)?;
            match command {
                ConflictCommand::List { all, format } => {
                    commands::conflicts::list(&handle, all, format)?
                }
                ConflictCommand::Resolve {
                    conflict,
                    resolution,
                } => commands::conflicts::resolve(&handle, &conflict, resolution)?,
            }
        }
        Commands::Sync {
            server,
            owner,
            device,
            token,
            timeout_secs,
        } => {
            let path = cli.path.ok_or("Data directory required for sync")?;
            let handle = commands::open_store(&path)?;
            let options = commands::sync::SyncOptions {
                server,
                owner,
                device,
                token,
                timeout_secs,
            };
            commands::sync::run(handle, options).await?;
        }
        Commands::Integrations(command) => {
            let path = cli.path.ok_or("Data directory required for integrations")?;
            let handle = commands::open_store(&path)?;
            commands::integrations::run(handle, command).await?;
        }
        Commands::Serve {
            bind,
            secret,
            max_pull_batch,
        } => commands::serve::run(bind, secret, max_pull_batch).await?,
        Commands::Token { secret, owner } => commands::serve::issue_token(&secret, &owner)?,
        Commands::Version => {
            println!("Homestead CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Sync protocol v{}", homestead_sync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
