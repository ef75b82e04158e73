//! Model handles, batches, and the executor collaborator contract
//!
//! A [`ModelHandle`] owns the structural graph plus its named weight
//! tensors. Handles are replaced wholesale on load/resume and never mutated
//! partially while shared. Tensor computation lives behind the [`Executor`]
//! trait: the training controller only issues blocking calls into it.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hparams::ModelType;
use crate::model::graph::{LayerKind, NetworkGraph};

/// A named weight tensor in row-major order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl WeightTensor {
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self { shape, data: vec![0.0; len] }
    }
}

/// All weight tensors of a model, keyed `{layer}/{kernel|bias}`
pub type Weights = BTreeMap<String, WeightTensor>;

/// Opaque trained-network reference
///
/// Owned by the controller; replaced wholesale on `load`, `load_checkpoint`,
/// and resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub graph: NetworkGraph,
    pub weights: Weights,
    pub model_type: ModelType,
    pub outcome_names: Vec<String>,
}

impl ModelHandle {
    /// Create a handle with freshly initialized weights (Glorot-uniform
    /// kernels, zero biases).
    pub fn initialize(
        graph: NetworkGraph,
        model_type: ModelType,
        outcome_names: Vec<String>,
        seed: Option<u64>,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut weights = Weights::new();
        for layer in &graph.layers {
            let (in_width, out_width) = match layer.kind {
                LayerKind::Trunk { in_width, out_width, .. } => (in_width, out_width),
                LayerKind::Dense { units, in_width, .. } => (in_width, units),
                _ => continue,
            };
            let scale = (6.0 / (in_width + out_width) as f32).sqrt();
            let kernel: Vec<f32> =
                (0..in_width * out_width).map(|_| rng.random_range(-scale..scale)).collect();
            weights.insert(
                format!("{}/kernel", layer.name),
                WeightTensor { shape: vec![in_width, out_width], data: kernel },
            );
            weights.insert(format!("{}/bias", layer.name), WeightTensor::zeros(vec![out_width]));
        }
        Self { graph, weights, model_type, outcome_names }
    }

    /// Replace this handle's weights from a weights-only checkpoint,
    /// keeping the assembled graph.
    pub fn apply_weights(&mut self, weights: Weights) -> Result<()> {
        for (name, tensor) in &weights {
            if let Some(existing) = self.weights.get(name) {
                if existing.shape != tensor.shape {
                    return Err(crate::Error::Model(format!(
                        "checkpoint weight {name} has shape {:?}, expected {:?}",
                        tensor.shape, existing.shape
                    )));
                }
            }
        }
        self.weights = weights;
        Ok(())
    }
}

/// One batch of examples presented to the executor
#[derive(Debug, Clone)]
pub struct Batch {
    /// Tile images `(n, h, w, c)`; absent for feature-only models
    pub images: Option<Array4<f32>>,
    /// Slide-level features `(n, width)`, event excluded
    pub features: Option<Array2<f32>>,
    /// Survival event indicators `(n,)`
    pub events: Option<Array1<f32>>,
    /// Labels `(n, outcome_width)`
    pub labels: Array2<f32>,
    /// Originating slide per example
    pub slides: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scalar statistics from one executor call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    pub loss: f32,
    /// Categorical models only
    pub accuracy: Option<f32>,
}

/// Opaque parallel-execution collaborator
///
/// The controller is single-threaded-cooperative and only issues blocking
/// calls; the executor is free to schedule device work internally. It must
/// be shareable with the studio's background prediction thread.
pub trait Executor: Send + Sync {
    /// Run one optimization step over a batch
    fn train_batch(&self, model: &mut ModelHandle, batch: &Batch, lr: f32) -> Result<BatchStats>;

    /// Compute loss (and accuracy where defined) without updating weights
    fn evaluate_batch(&self, model: &ModelHandle, batch: &Batch) -> Result<BatchStats>;

    /// Per-example outputs, one array per outcome head
    fn predict(&self, model: &ModelHandle, batch: &Batch) -> Result<Vec<Array2<f32>>>;
}
