//! # termgraph
//!
//! Load, check and query RF2 ontology snapshots.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 apps/termgraph (THE BINARY)              │
//! │                                                          │
//! │  ┌───────────┐   ┌────────────┐   ┌──────────────────┐  │
//! │  │   CLI     │   │  HTTP API  │   │  Remote client   │  │
//! │  │  (clap)   │   │  (axum)    │   │  (reqwest)       │  │
//! │  └─────┬─────┘   └─────┬──────┘   └────────┬─────────┘  │
//! │        └───────────────┼───────────────────┘            │
//! │                        ▼                                │
//! │                ┌────────────────┐                       │
//! │                │ termgraph-core │                       │
//! │                └────────────────┘                       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! termgraph load --archive SnomedCT_InternationalRF2.zip
//! termgraph descendants --archive snapshot.zip --delta delta.zip 404684003
//! termgraph ecl --project PROJ "<< 404684003 OR < 71388002"
//! termgraph serve --project PROJ --task PROJ-12 --port 8080
//! ```

use clap::Parser;
use termgraph::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // TERMGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TERMGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "termgraph=info,termgraph_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
