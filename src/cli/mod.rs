// src/cli/mod.rs — CLI definition (clap derive)

pub mod experiment;
pub mod graph;
pub mod ingest;
pub mod migrate;
pub mod mine;
pub mod status;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "habitus",
    about = "Behavioral pattern discovery for home automation",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (overrides [logging].level; RUST_LOG wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest raw events from a JSON-lines file ("-" for stdin)
    Ingest {
        file: PathBuf,
    },
    /// Run a mining pass and print the discovered patterns
    Mine {
        /// How far back to look (defaults to [scheduler].lookback_hours)
        #[arg(long)]
        lookback_hours: Option<u32>,
        /// Mine only this zone
        #[arg(long)]
        zone: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Mine, then list rules matching the filters
    Rules {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        min_score: Option<f64>,
        /// Substring of the antecedent key
        #[arg(long)]
        a: Option<String>,
        /// Substring of the consequent key
        #[arg(long)]
        b: Option<String>,
        /// Either side's domain
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Mine every configured zone and print the top suggestions
    Zones {
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show (or export) the brain graph
    Graph {
        /// Restrict to the neighborhood of this node
        #[arg(long)]
        center: Option<String>,
        #[arg(long, default_value = "1")]
        hops: u32,
        /// Node kinds to keep (entity, zone, concept)
        #[arg(long)]
        kind: Vec<String>,
        /// Domains to keep
        #[arg(long)]
        domain: Vec<String>,
        /// Write the state as JSON to this file
        #[arg(long)]
        export: Option<PathBuf>,
        /// Replace the graph with a state written by --export
        #[arg(long, conflicts_with = "export")]
        import: Option<PathBuf>,
        /// Physically drop entries below their thresholds first
        #[arg(long)]
        prune: bool,
    },
    /// A/B experiments over automation variants
    Experiment {
        #[command(subcommand)]
        action: ExperimentAction,
    },
    /// Show configuration, storage and mining status
    Status,
    /// Database migrations
    Migrate {
        #[arg(long)]
        status: bool,
        #[arg(long)]
        rollback: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ExperimentAction {
    /// Start an experiment with two JSON variants
    Start {
        id: String,
        variant_a: String,
        variant_b: String,
    },
    /// Record one exposure of a variant
    Record {
        id: String,
        /// a or b
        variant: String,
        /// The user overrode the automation
        #[arg(long)]
        overridden: bool,
    },
    /// Test for significance; promotes the winner once significant
    Check {
        id: String,
    },
    /// List experiments
    List,
}

/// Wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
