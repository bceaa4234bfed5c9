use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "chatstash")]
#[command(about = "Search and bookmark your hosted chat history, locally.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the remote service and index new conversations
    Crawl {
        /// Ignore the recent-sync throttle
        #[arg(long)]
        full: bool,

        /// Page-state snapshot (JSON) exported from the browser session
        #[arg(long, value_name = "FILE")]
        page_snapshot: Option<PathBuf>,
    },

    /// Search indexed conversations
    Search {
        /// Query text; empty shows everything
        #[arg(default_value = "")]
        query: String,

        /// Search bookmarks instead of conversations
        #[arg(long)]
        bookmarks: bool,

        /// Maximum number of results
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show store counts and the last sync time
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List bookmarks and folders
    Bookmarks {
        /// Only show bookmarks in this folder
        #[arg(long, value_name = "FOLDER_ID")]
        folder: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logs (hidden by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            full,
            page_snapshot,
        } => commands::crawl::run(full, page_snapshot).await,
        Commands::Search {
            query,
            bookmarks,
            limit,
            json,
        } => commands::search::run(&query, bookmarks, limit, json).await,
        Commands::Status { json } => commands::status::run(json).await,
        Commands::Bookmarks { folder } => commands::bookmarks::run(folder.as_deref()).await,
    }
}
