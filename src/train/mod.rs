//! Training orchestration
//!
//! [`TrainingController`] drives the whole run: interleaved data streams,
//! optional top-layer warmup, the fine-tune epoch loop with mid-epoch
//! validation, EMA-based early stopping, checkpoint persistence, and
//! standalone evaluation. Build one with [`TrainingController::build`]
//! (the factory picks the strategy from the hyperparameters' model type).

mod checkpoint;
mod controller;
mod early_stop;
mod results;

pub use checkpoint::{load_model, load_weights, save_model, write_checkpoint};
pub use controller::{EvalOptions, TrainOptions, TrainingController};
pub use early_stop::{EarlyStopConfig, EarlyStopMonitor};
pub use results::{EpochRecord, EpochResults};
