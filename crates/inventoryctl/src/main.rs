//! Inventory Control - CLI for the image inventory
//!
//! Publishes images, drives their lifecycle and records what elements hold.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inventory_common::{ImageState, InventoryConfig, Version};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inventoryctl")]
#[command(about = "Image inventory - catalog and installed images", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: /etc/inventory/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overrides the configured path
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Output JSON only
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Elements are given by name, or by id with an `id:` prefix.
#[derive(Subcommand)]
pub enum Commands {
    /// Create or update an image from a JSON submission
    Store { file: PathBuf },

    /// Show one image with its binding counts
    Show { id: String },

    /// Change the lifecycle state of an image
    Promote { id: String, state: ImageState },

    /// Remove an image no element holds
    Remove { id: String },

    /// Search the catalog
    Find {
        /// Substring of name, role, element, vendor or model
        pattern: Option<String>,

        #[arg(long)]
        role: Option<String>,

        #[arg(long = "type")]
        image_type: Option<String>,

        #[arg(long)]
        name: Option<String>,

        /// May be repeated
        #[arg(long)]
        state: Vec<ImageState>,

        #[arg(long)]
        version: Option<Version>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// List (type, name) pairs published for a role
    Roles { role: String },

    /// List released role-wide images for a role and platform
    Releases {
        role: String,
        vendor: String,
        model: String,
    },

    /// List newer images an element could install
    Updates {
        element: String,
        image_type: String,
        name: String,
        version: Version,
    },

    /// Show the images installed on an element
    Installed {
        element: String,

        /// Only this image
        #[arg(long)]
        image: Option<String>,
    },

    /// Replace an element's installed images with a JSON report
    Report { element: String, file: PathBuf },

    /// Add cached images from a JSON list
    CacheAdd { element: String, file: PathBuf },

    /// Remove cached images listed in a JSON file
    CacheRemove { element: String, file: PathBuf },

    /// Remove one cached image from an element
    Uninstall {
        element: String,
        image_type: String,
        name: String,
        version: Version,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => InventoryConfig::load_from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => InventoryConfig::load(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let ctx = commands::Context::open(&config, cli.database.clone(), cli.json)?;
    if let Err(e) = commands::run(&ctx, cli.command) {
        output::display_error(&e);
        std::process::exit(1);
    }
    Ok(())
}
