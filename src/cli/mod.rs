//! CLI argument definitions and command dispatch

mod commands;

pub use commands::run_command;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Whole-slide-image deep learning toolkit
#[derive(Debug, Parser)]
#[command(name = "histoflow", version, about)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a hyperparameters file
    Validate(ValidateArgs),
    /// Describe a saved model directory
    Info(InfoArgs),
    /// Train a model on the built-in synthetic demo dataset
    Train(TrainArgs),
    /// Evaluate a saved model on the synthetic demo dataset
    Evaluate(EvaluateArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to hyperparameters.json
    pub hyperparameters: PathBuf,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Saved model directory
    pub model: PathBuf,
}

#[derive(Debug, Args)]
pub struct TrainArgs {
    /// Hyperparameters file; demo defaults are used when omitted
    #[arg(long)]
    pub hp: Option<PathBuf>,

    /// Output directory for checkpoints and logs
    #[arg(long, default_value = "histoflow_out")]
    pub outdir: PathBuf,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Saved model directory
    pub model: PathBuf,

    /// Output directory for the results log
    #[arg(long, default_value = "histoflow_out")]
    pub outdir: PathBuf,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,
}
