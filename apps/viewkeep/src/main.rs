//! # viewkeep
//!
//! Operator CLI for the viewkeep view-state engine.
//!
//! ## Usage
//!
//! ```bash
//! # List retained views in the persistent store
//! viewkeep --database views.redb views
//!
//! # Drop one session, or one view in it
//! viewkeep purge --session 3f2a --view /orders/edit.xhtml
//!
//! # Walk a template directory through the cache
//! viewkeep templates --dir ./pages --refresh 2
//!
//! # Show the effective configuration
//! viewkeep --config viewkeep.toml config
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use viewkeep::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // VIEWKEEP_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("VIEWKEEP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "viewkeep=info,viewkeep_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        println!("viewkeep v{}", env!("CARGO_PKG_VERSION"));
        println!();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
