//! # viewkeep CLI Module
//!
//! ## Available Commands
//!
//! - `views` - List views retained in the persistent store
//! - `purge` - Invalidate a session scope or one view in it
//! - `templates` - Walk a template directory through the template cache
//! - `config` - Show the effective configuration

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use viewkeep_core::ViewkeepError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// viewkeep - view-state persistence toolkit
///
/// Inspects the server-side view-state store and exercises the template
/// cache against a directory of template sources.
#[derive(Parser, Debug)]
#[command(name = "viewkeep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the view-state database
    #[arg(short = 'D', long, global = true, default_value = "viewkeep.redb")]
    pub database: PathBuf,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List retained views per session scope
    Views {
        /// Only this session scope
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Invalidate retained views
    Purge {
        /// Session scope to purge
        #[arg(short, long)]
        session: String,

        /// Only purge this view
        #[arg(short, long)]
        view: Option<String>,
    },

    /// Walk a template directory through the template cache
    Templates {
        /// Root directory of template sources
        #[arg(short, long)]
        dir: PathBuf,

        /// Refresh window in seconds (overrides configuration)
        #[arg(short, long, allow_hyphen_values = true)]
        refresh: Option<i64>,

        /// Number of passes over the directory
        #[arg(short, long, default_value = "2")]
        passes: usize,
    },

    /// Show the effective configuration
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), ViewkeepError> {
    let config = load_config(cli.config.as_deref())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Views { session }) => {
            cmd_views(&cli.database, session.as_deref(), json_mode)
        }
        Some(Commands::Purge { session, view }) => {
            cmd_purge(&cli.database, &session, view.as_deref(), json_mode)
        }
        Some(Commands::Templates {
            dir,
            refresh,
            passes,
        }) => cmd_templates(&config, &dir, refresh, passes, json_mode),
        Some(Commands::Config) => cmd_config(&config, json_mode),
        None => {
            // No subcommand - show configuration by default
            cmd_config(&config, json_mode)
        }
    }
}
