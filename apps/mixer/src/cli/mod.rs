//! # Mixer CLI
//!
//! ## Available Commands
//!
//! - `serve` - Start the HTTP server
//! - `status` - Show origin row counts
//! - `load` - Replace (or upsert into) a Base or Branch file from a record export
//! - `warm` - Build the warm cache and print its statistics
//! - `query` - Run one mixer operation locally and print the result
//! - `init-config` - Print an example configuration file

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use mixer_core::{MixerError, Origin};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Knowledge-graph mixer
///
/// Serves graph and statistics queries from layered caches with
/// deterministic precedence.
#[derive(Parser, Debug)]
#[command(name = "mixer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Cache file a `load` writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoadTarget {
    Base,
    Branch,
}

impl LoadTarget {
    #[must_use]
    pub fn origin(self) -> Origin {
        match self {
            Self::Base => Origin::Base,
            Self::Branch => Origin::Branch,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configured origins and their row counts
    Status,

    /// Write a JSON Lines record export into a cache file
    Load {
        #[arg(short, long, value_enum)]
        target: LoadTarget,

        /// Record export (JSON Lines)
        #[arg(short, long)]
        input: PathBuf,

        /// Revision stamped on every written row
        #[arg(short, long)]
        revision: u64,

        /// Cache file (defaults to the configured path for the target)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Keep rows the export does not mention instead of replacing the table
        #[arg(long)]
        upsert: bool,
    },

    /// Build the warm cache from Base and print statistics
    Warm,

    /// Run a mixer operation locally
    #[command(subcommand)]
    Query(QueryCommand),

    /// Print an example configuration file
    InitConfig,
}

#[derive(Subcommand, Debug)]
pub enum QueryCommand {
    /// Neighbors over one predicate
    PropertyValues {
        #[arg(long, value_delimiter = ',', required = true)]
        dcids: Vec<String>,

        #[arg(long)]
        property: String,

        /// "in" or "out"
        #[arg(long, default_value = "out")]
        direction: String,

        #[arg(long)]
        value_type: Option<String>,

        /// Per-group cap, 0 for unbounded
        #[arg(long, default_value = "0")]
        limit: usize,
    },

    /// All triples touching each entity
    Triples {
        #[arg(long, value_delimiter = ',', required = true)]
        dcids: Vec<String>,

        #[arg(long, default_value = "0")]
        limit: usize,
    },

    /// In/out predicate names
    Labels {
        #[arg(long, value_delimiter = ',', required = true)]
        dcids: Vec<String>,
    },

    /// Contained places of a type
    PlacesIn {
        #[arg(long, value_delimiter = ',', required = true)]
        dcids: Vec<String>,

        #[arg(long)]
        place_type: String,
    },

    /// Stat vars with data for each place
    StatVars {
        #[arg(long, value_delimiter = ',', required = true)]
        dcids: Vec<String>,
    },

    /// Observation series per place and stat var
    StatAll {
        #[arg(long, value_delimiter = ',', required = true)]
        places: Vec<String>,

        #[arg(long, value_delimiter = ',', required = true)]
        stat_vars: Vec<String>,

        #[arg(long)]
        measurement_method: Option<String>,
    },

    /// One observation value
    StatValue {
        #[arg(long)]
        place: String,

        #[arg(long)]
        stat_var: String,

        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        measurement_method: Option<String>,
    },

    /// Reconcile ids through the query engine
    ResolveIds {
        #[arg(long)]
        in_property: String,

        #[arg(long)]
        out_property: String,

        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), MixerError> {
    let json_mode = cli.json_mode;

    if let Some(Commands::InitConfig) = cli.command {
        return cmd_init_config();
    }

    let config = crate::config::MixerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve { host, port }) => cmd_serve(config, host, port).await,
        Some(Commands::Load {
            target,
            input,
            revision,
            db,
            upsert,
        }) => cmd_load(&config, json_mode, target, &input, revision, db, upsert),
        Some(Commands::Warm) => cmd_warm(&config, json_mode),
        Some(Commands::Query(query)) => cmd_query(&config, json_mode, query).await,
        Some(Commands::InitConfig) => cmd_init_config(),
        Some(Commands::Status) | None => cmd_status(&config, json_mode).await,
    }
}
