use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Ordlink - BFT block delivery
#[derive(Parser)]
#[command(name = "ordlink")]
#[command(about = "Ordlink delivery client and local ordering cluster")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigKind {
    Follow,
    Cluster,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow a channel and log every delivered block
    Follow {
        /// Path to configuration file
        #[arg(short, long, default_value = "follow.json")]
        config: PathBuf,
    },

    /// Run a local ordering cluster
    Cluster {
        /// Path to configuration file
        #[arg(short, long, default_value = "cluster.json")]
        config: PathBuf,
    },

    /// Write a sample configuration
    Init {
        /// Which configuration to generate
        #[arg(short, long, value_enum, default_value = "cluster")]
        kind: ConfigKind,

        /// Output path for configuration file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Cluster configuration a follow configuration should point at
        #[arg(long)]
        cluster: Option<PathBuf>,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show orderer status
    Status {
        /// Orderer endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:7050")]
        endpoint: String,
    },

    /// Make an orderer withhold (or serve again) full blocks
    Withhold {
        /// Orderer endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:7050")]
        endpoint: String,

        /// Serve blocks again instead of withholding them
        #[arg(long)]
        off: bool,
    },
}
