//! Whole-slide-image deep learning: training orchestration and evaluation
//!
//! This crate is the training/evaluation core of a digital-pathology ML
//! toolkit:
//! - Hyperparameter validation and serialization ([`hparams`])
//! - Interleaved, balanced tile streams over per-slide shards ([`data`])
//! - Multi-branch model assembly and the executor boundary ([`model`])
//! - The training controller with EMA early stopping, checkpointing, and
//!   resumable runs ([`train`])
//! - Tile/slide/patient metric rollups and a merge-append results log
//!   ([`metrics`])
//! - The stain-normalization contract ([`norm`]) and headless studio
//!   support ([`studio`])
//!
//! # Example
//!
//! ```no_run
//! use histoflow::data::{AnnotationSet, Shard};
//! use histoflow::hparams::HyperParameters;
//! use histoflow::model::ReferenceExecutor;
//! use histoflow::train::{TrainOptions, TrainingController};
//!
//! # fn main() -> histoflow::Result<()> {
//! # let (annotations, train_shards, val_shards): (AnnotationSet, Vec<Shard>, Vec<Shard>) = todo!();
//! let hp = HyperParameters::new().with_batch_size(16).checked()?;
//! let mut controller =
//!     TrainingController::build(hp, annotations, "out", ReferenceExecutor::new())?;
//! let results = controller.train(&train_shards, &val_shards, TrainOptions::default())?;
//! for (epoch, record) in &results.epochs {
//!     println!("{epoch}: val {:?}", record.val_metrics);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod data;
mod error;
pub mod hparams;
pub mod metrics;
pub mod model;
pub mod norm;
pub mod studio;
pub mod train;

pub use error::{Error, Result};
