mod cli;
mod server;
mod tools;

use anyhow::Result;
use cairn::config;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Semantic storage and retrieval engine with an MCP server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport unless --http or configured otherwise)
    Serve {
        /// Serve Streamable HTTP on the configured host and port
        #[arg(long)]
        http: bool,
    },
    /// Hybrid search over stored content
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Substring match only, no vector search
        #[arg(long)]
        keyword: bool,
    },
    /// Natural language query with tag and time cue inference
    Query {
        text: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show store statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete content older than the retention window
    Sweep {
        /// List what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Evict least-used content down to the configured capacity
    Evict,
    /// Show one record in full
    Inspect { id: String },
    /// Check database integrity and cross-store consistency
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::CairnConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http || config.server.transport == "http" {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Search { query, limit, keyword } => {
            cli::search::search(&config, &query, limit, keyword).await?;
        }
        Command::Query { text, limit } => {
            cli::search::query(&config, &text, limit).await?;
        }
        Command::Stats { json } => cli::stats::stats(&config, json).await?,
        Command::Sweep { dry_run } => cli::maintenance::sweep(&config, dry_run).await?,
        Command::Evict => cli::maintenance::evict(&config).await?,
        Command::Inspect { id } => cli::inspect::inspect(&config, &id).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
