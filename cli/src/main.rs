//! `compcode`: train compositional code learners and use them to build embedding tables.

mod commands;
mod config;
mod telemetry;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "compcode", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit a learner to pretrained embeddings and write its checkpoint.
    Train {
        /// TOML settings; `train.toml` in the working directory when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Build an embedding table for a task vocabulary.
    Assemble {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write every word's discrete code to a parquet file.
    ExportCodes {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Report how well the codes reproduce the embeddings.
    Eval {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Train { config } => commands::run_train(config),
        Command::Assemble { config } => commands::run_assemble(config),
        Command::ExportCodes { config } => commands::run_export_codes(config),
        Command::Eval { config } => commands::run_eval(config),
    }
}
