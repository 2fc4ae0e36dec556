//! `muon`: command-line utilities for the Muon NPU stack.
//!
//! ```text
//! USAGE:
//!   muon model-info <model.tflite>   Print the feature-map sizes a model needs
//!   muon protocol                    Print protocol constants
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "muon", about = "Muon NPU host utilities", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the IFM/OFM byte sizes a TFLite model needs.
    ModelInfo {
        /// Path to the model file.
        model: PathBuf,
    },
    /// Print the mailbox protocol constants compiled into this build.
    Protocol,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::ModelInfo { model } => cmd_model_info(&model)?,
        Cmd::Protocol => cmd_protocol(),
    }

    Ok(())
}

fn cmd_model_info(path: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let dims = muon_models::model_dims(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    println!("Model        : {}", path.display());
    println!("File size    : {} bytes", bytes.len());

    println!("Inputs       : {}", dims.ifm.len());
    for (i, size) in dims.ifm.iter().enumerate() {
        println!("  ifm[{i}]     : {size} bytes");
    }

    println!("Outputs      : {}", dims.ofm.len());
    for (i, size) in dims.ofm.iter().enumerate() {
        println!("  ofm[{i}]     : {size} bytes");
    }

    Ok(())
}

fn cmd_protocol() {
    println!(
        "Protocol     : {}.{}.{}",
        muon_proto::VERSION_MAJOR,
        muon_proto::VERSION_MINOR,
        muon_proto::VERSION_PATCH
    );
    println!("Frame magic  : {:#010x}", muon_proto::MAGIC);
    println!("Max payload  : {} bytes", muon_proto::MAX_PAYLOAD);
    println!("Feature maps : up to {} per direction", muon_proto::MAX_FEATURE_MAPS);
    println!("PMU counters : {}", muon_proto::PMU_EVENTS);
}
