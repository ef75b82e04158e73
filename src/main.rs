//! Histoflow CLI
//!
//! # Usage
//!
//! ```bash
//! # Validate a hyperparameters file
//! histoflow validate hyperparameters.json
//!
//! # Train on the synthetic demo dataset
//! histoflow train --outdir out --seed 42
//!
//! # Evaluate a saved model
//! histoflow evaluate out/trained_model_epoch2 --outdir out
//!
//! # Describe a saved model
//! histoflow info out/trained_model_epoch2
//! ```

use std::process::ExitCode;

use clap::Parser;
use histoflow::cli::{run_command, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.quiet {
        log::LevelFilter::Error
    } else if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
