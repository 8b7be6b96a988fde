use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use ordlink_orderer::{StatusResponse, WithholdRequest};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod cluster;
mod config;
mod follow;

use cli::{Cli, Commands, ConfigKind};
use config::{generate_sample_cluster, ClusterConfig, FollowConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Follow { config } => {
            let config = load_or_explain(&config, FollowConfig::load)?;
            follow::run_follow(config).await?;
        }
        Commands::Cluster { config } => {
            let config = load_or_explain(&config, ClusterConfig::load)?;
            cluster::run_cluster(config).await?;
        }
        Commands::Init {
            kind,
            output,
            cluster,
        } => {
            init_config(kind, output, cluster)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
        Commands::Status { endpoint } => {
            show_status(&endpoint).await?;
        }
        Commands::Withhold { endpoint, off } => {
            set_withholding(&endpoint, !off).await?;
        }
    }

    Ok(())
}

fn load_or_explain<T>(path: &Path, load: fn(&Path) -> Result<T>) -> Result<T> {
    info!("Loading configuration from {:?}", path);

    if !path.exists() {
        error!(
            "Configuration file not found: {:?}. Run 'ordlink init' to create one.",
            path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    }
    load(path)
}

/// Write a sample configuration file
fn init_config(kind: ConfigKind, output: Option<PathBuf>, cluster: Option<PathBuf>) -> Result<()> {
    match kind {
        ConfigKind::Cluster => {
            let output = output.unwrap_or_else(|| PathBuf::from("cluster.json"));
            let config = generate_sample_cluster();
            config.save(&output)?;

            println!("\nCluster configuration created: {}", output.display());
            for endpoint in config.endpoints()? {
                println!("  node {}", endpoint);
            }
            println!("\nTo start the cluster, run:");
            println!("  ordlink cluster --config {}", output.display());
            println!("Then create a matching follower configuration:");
            println!("  ordlink init --kind follow --cluster {}", output.display());
        }
        ConfigKind::Follow => {
            let output = output.unwrap_or_else(|| PathBuf::from("follow.json"));
            let cluster = match cluster {
                Some(path) => ClusterConfig::load(&path)?,
                None => {
                    info!("No cluster configuration given, generating a fresh one");
                    generate_sample_cluster()
                }
            };
            cluster.follow_config()?.save(&output)?;

            println!("\nFollow configuration created: {}", output.display());
            println!("\nTo follow the channel, run:");
            println!("  ordlink follow --config {}", output.display());
        }
    }

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = ordlink_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    Ok(())
}

/// Show orderer status
async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/status", endpoint);
    let response = reqwest::get(&url).await?;

    if response.status().is_success() {
        let status: StatusResponse = response.json().await?;
        println!("Orderer Status:");
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to get status: {}", response.status());
    }

    Ok(())
}

/// Toggle full-block withholding on one orderer
async fn set_withholding(endpoint: &str, withholding: bool) -> Result<()> {
    let url = format!("{}/admin/withhold", endpoint);
    let response = reqwest::Client::new()
        .post(&url)
        .json(&WithholdRequest { withholding })
        .send()
        .await?;

    if response.status().is_success() {
        let status: StatusResponse = response.json().await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to change withholding: {}", response.status());
    }

    Ok(())
}
