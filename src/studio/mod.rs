//! Studio support layer (headless)
//!
//! Everything the interactive studio needs from the core without any GUI:
//! the model-info sidecar JSON consumed when a model directory is dropped
//! in, and background slide-level prediction. A prediction runs on a worker
//! thread while the caller stays responsive, consuming the result through a
//! channel-backed [`PredictionTask`] handle (non-blocking poll or bounded
//! wait). The shared [`ModelHandle`] sits behind a `Mutex` and only one
//! prediction may be in flight; once started, a prediction runs to
//! completion.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Batch, Executor, ModelHandle};

pub const MIL_PARAMS_FILE: &str = "mil_params.json";

/// Feature-extractor description in the encoder sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorInfo {
    pub class: String,
    #[serde(default)]
    pub kwargs: serde_json::Value,
}

/// Stain-normalizer reference in the encoder sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerInfo {
    pub method: String,
}

/// Encoder parameters consumed by the studio when loading a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderParams {
    pub extractor: ExtractorInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<NormalizerInfo>,
    pub num_features: usize,
    pub tile_px: u32,
    pub tile_um: u32,
}

/// MIL model sidecar, written next to the saved model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilParams {
    pub outcomes: Vec<String>,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub trainer: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub bags_encoder: EncoderParams,
}

impl MilParams {
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(MIL_PARAMS_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(dir.join(MIL_PARAMS_FILE)).map_err(|e| {
            Error::User(format!("no MIL parameters found at {}: {e}", dir.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl EncoderParams {
    /// Instantiate the stain normalizer named in this sidecar, if any
    pub fn build_normalizer(&self) -> Result<Option<Box<dyn crate::norm::Normalizer>>> {
        match &self.normalizer {
            None => Ok(None),
            Some(info) => crate::norm::normalizer_for(&info.method).map(Some).ok_or_else(|| {
                Error::User(format!("unknown stain normalization method '{}'", info.method))
            }),
        }
    }
}

/// Whether a directory holds a loadable MIL model
pub fn is_mil_model(path: &Path) -> bool {
    path.join(MIL_PARAMS_FILE).exists()
}

/// Completed whole-slide prediction
#[derive(Debug, Clone)]
pub struct SlidePrediction {
    /// Per-tile outputs, one array per outcome head
    pub tile_predictions: Vec<Array2<f32>>,
    /// Mean prediction across the slide's tiles, per outcome head
    pub slide_prediction: Vec<Vec<f32>>,
}

/// Channel-backed handle to an in-flight background prediction
pub struct PredictionTask {
    rx: Receiver<Result<SlidePrediction>>,
    handle: Option<JoinHandle<()>>,
}

impl PredictionTask {
    /// Non-blocking check for a finished prediction.
    ///
    /// Returns `None` while the worker is still running. The consumer polls
    /// at its own cadence and must tolerate render-interval-scale latency
    /// between completion and pickup.
    pub fn poll(&mut self) -> Option<Result<SlidePrediction>> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.join();
                Some(Err(Error::User("prediction worker exited without a result".into())))
            }
        }
    }

    /// Wait for the result with a bound on the blocking time
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<SlidePrediction>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.join();
                Some(Err(Error::User("prediction worker exited without a result".into())))
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Runs slide-level inference on a background worker thread
///
/// The model handle is guarded by a mutex for the duration of each
/// prediction; a second `predict_slide` while one is in flight is rejected
/// rather than queued. Predictions cannot be cancelled once started.
pub struct SlidePredictor<E: Executor> {
    model: Arc<Mutex<ModelHandle>>,
    executor: Arc<E>,
    generating: Arc<AtomicBool>,
}

impl<E: Executor + 'static> SlidePredictor<E> {
    pub fn new(model: ModelHandle, executor: E) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            executor: Arc::new(executor),
            generating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a prediction is currently in flight
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    /// Shared access to the model handle.
    ///
    /// The mutex is held by the worker for a whole prediction, so a swap
    /// (e.g. after loading a different model) waits for any in-flight
    /// prediction to finish.
    pub fn model(&self) -> Arc<Mutex<ModelHandle>> {
        Arc::clone(&self.model)
    }

    /// Start a whole-slide prediction over the given tile batch.
    ///
    /// Fails with a user error when a prediction is already in flight.
    pub fn predict_slide(&self, batch: Batch) -> Result<PredictionTask> {
        if self.generating.swap(true, Ordering::AcqRel) {
            return Err(Error::User(
                "a whole-slide prediction is already in progress".to_string(),
            ));
        }
        log::info!("generating whole-slide prediction ({} tiles)", batch.len());

        let model = Arc::clone(&self.model);
        let executor = Arc::clone(&self.executor);
        let generating = Arc::clone(&self.generating);
        let (tx, rx) = mpsc::channel();

        let handle = std::thread::spawn(move || {
            let result = (|| {
                let model = model.lock().map_err(|_| {
                    Error::User("model handle was poisoned by a previous failure".to_string())
                })?;
                let tile_predictions = executor.predict(&model, &batch)?;
                let slide_prediction = tile_predictions
                    .iter()
                    .map(|preds| {
                        preds
                            .mean_axis(ndarray::Axis(0))
                            .map(|m| m.to_vec())
                            .unwrap_or_default()
                    })
                    .collect();
                Ok(SlidePrediction { tile_predictions, slide_prediction })
            })();
            generating.store(false, Ordering::Release);
            let _ = tx.send(result);
        });

        Ok(PredictionTask { rx, handle: Some(handle) })
    }
}
