//! Dense CPU reference executor
//!
//! Implements the [`Executor`] contract with plain `ndarray` math so the
//! training pipeline runs end-to-end without an external device scheduler:
//! the trunk is a single pooled (or flattened) projection to the
//! architecture's feature width, followed by the assembled hidden stack and
//! output heads. Losses: softmax cross-entropy (categorical), mean squared
//! error (linear), and Cox partial likelihood over the batch (survival).
//!
//! Partial trunk freezing is approximated: the single trunk projection stays
//! frozen whenever a freeze depth is configured on the graph.

use std::sync::Mutex;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::hparams::{ModelType, Pooling};
use crate::model::exec::{Batch, BatchStats, Executor, ModelHandle, Weights};
use crate::model::graph::{LayerKind, NetworkGraph};

/// CPU executor over dense layers
#[derive(Debug)]
pub struct ReferenceExecutor {
    rng: Mutex<StdRng>,
}

impl ReferenceExecutor {
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_os_rng()) }
    }

    /// Executor with deterministic dropout masks
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl Default for ReferenceExecutor {
    fn default() -> Self {
        Self::new()
    }
}

struct TrunkRef {
    name: String,
    pooling: Pooling,
    trainable: bool,
}

struct DenseRef {
    name: String,
    l2: f32,
    trainable: bool,
}

/// Dense-path interpretation of an assembled graph
struct Plan {
    trunk: Option<TrunkRef>,
    dropout: Option<f32>,
    hidden: Vec<DenseRef>,
    heads: Vec<DenseRef>,
    uses_features: bool,
}

impl Plan {
    fn from_graph(graph: &NetworkGraph) -> Result<Self> {
        let trunk = graph.layers.iter().find_map(|l| match l.kind {
            LayerKind::Trunk { pooling, frozen_below, .. } => Some(TrunkRef {
                name: l.name.clone(),
                pooling,
                trainable: l.trainable && frozen_below == 0,
            }),
            _ => None,
        });
        let dropout = graph.layers.iter().find_map(|l| match l.kind {
            LayerKind::Dropout { rate } => Some(rate),
            _ => None,
        });
        let uses_features =
            graph.layers.iter().any(|l| matches!(l.kind, LayerKind::FeatureInput { .. }));
        let hidden: Vec<DenseRef> = graph
            .layers
            .iter()
            .filter(|l| l.name.starts_with("hidden_"))
            .map(|l| dense_ref(l.name.clone(), &l.kind, l.trainable))
            .collect::<Result<_>>()?;

        // One dense feeds each named output; walk back through
        // activation/concat layers to find it.
        let mut heads = Vec::new();
        for output in &graph.outputs {
            let mut name = output.as_str();
            let dense = loop {
                let layer = graph
                    .layer(name)
                    .ok_or_else(|| Error::Model(format!("output layer {name} not found")))?;
                if let LayerKind::Dense { .. } = layer.kind {
                    break layer;
                }
                name = layer
                    .inputs
                    .first()
                    .ok_or_else(|| Error::Model(format!("output layer {name} has no inputs")))?;
            };
            heads.push(dense_ref(dense.name.clone(), &dense.kind, dense.trainable)?);
        }
        Ok(Self { trunk, dropout, hidden, heads, uses_features })
    }
}

fn dense_ref(name: String, kind: &LayerKind, trainable: bool) -> Result<DenseRef> {
    match kind {
        LayerKind::Dense { l2_weight, .. } => {
            Ok(DenseRef { name, l2: *l2_weight, trainable })
        }
        _ => Err(Error::Model(format!("layer {name} is not a dense layer"))),
    }
}

struct Forward {
    trunk_in: Option<Array2<f32>>,
    trunk_z: Option<Array2<f32>>,
    trunk_width: usize,
    dropout_mask: Option<Array2<f32>>,
    /// Input to hidden layer `i`
    hidden_in: Vec<Array2<f32>>,
    hidden_z: Vec<Array2<f32>>,
    /// Input shared by every head
    head_in: Array2<f32>,
    /// Post-activation output per head
    head_out: Vec<Array2<f32>>,
}

impl ReferenceExecutor {
    fn forward(
        &self,
        model: &ModelHandle,
        plan: &Plan,
        batch: &Batch,
        training: bool,
    ) -> Result<Forward> {
        let n = batch.len();
        let mut trunk_in = None;
        let mut trunk_z = None;
        let mut trunk_width = 0;
        let mut dropout_mask = None;

        let mut parts: Vec<Array2<f32>> = Vec::new();
        if let Some(trunk) = &plan.trunk {
            let images = batch
                .images
                .as_ref()
                .ok_or_else(|| Error::Model("model expects tile images in each batch".into()))?;
            let pooled = pool_images(images, trunk.pooling);
            let (kernel, bias) = layer_weights(&model.weights, &trunk.name)?;
            let z = pooled.dot(&kernel) + &bias;
            let mut out = relu(&z);
            trunk_width = out.ncols();
            if let Some(rate) = plan.dropout {
                if training && rate > 0.0 {
                    let mut rng = self.rng.lock().expect("dropout rng poisoned");
                    let keep = 1.0 - rate;
                    let mask = Array2::from_shape_fn(out.dim(), |_| {
                        if rng.random_bool(keep as f64) {
                            1.0 / keep
                        } else {
                            0.0
                        }
                    });
                    out = &out * &mask;
                    dropout_mask = Some(mask);
                }
            }
            trunk_in = Some(pooled);
            trunk_z = Some(z);
            parts.push(out);
        }
        if plan.uses_features {
            let features = batch.features.as_ref().ok_or_else(|| {
                Error::Model("model expects slide-level features in each batch".into())
            })?;
            parts.push(features.clone());
        }
        if parts.is_empty() {
            return Err(Error::Model("batch provides no model inputs".into()));
        }
        let merged = hconcat(&parts);
        debug_assert_eq!(merged.nrows(), n);

        let mut hidden_in = Vec::new();
        let mut hidden_z = Vec::new();
        let mut current = merged;
        for layer in &plan.hidden {
            let (kernel, bias) = layer_weights(&model.weights, &layer.name)?;
            let z = current.dot(&kernel) + &bias;
            hidden_in.push(current);
            current = relu(&z);
            hidden_z.push(z);
        }

        let mut head_out = Vec::new();
        for head in &plan.heads {
            let (kernel, bias) = layer_weights(&model.weights, &head.name)?;
            let z = current.dot(&kernel) + &bias;
            let activated = match model.model_type {
                ModelType::Categorical => softmax(&z),
                ModelType::Linear | ModelType::Survival => z,
            };
            head_out.push(activated);
        }

        Ok(Forward {
            trunk_in,
            trunk_z,
            trunk_width,
            dropout_mask,
            hidden_in,
            hidden_z,
            head_in: current,
            head_out,
        })
    }

    /// Loss, accuracy, and the gradient at each head's pre-activation
    fn loss_and_grads(
        &self,
        model: &ModelHandle,
        batch: &Batch,
        forward: &Forward,
    ) -> Result<(BatchStats, Vec<Array2<f32>>)> {
        let n = batch.len() as f32;
        match model.model_type {
            ModelType::Categorical => {
                let mut total_loss = 0.0;
                let mut correct = 0usize;
                let mut grads = Vec::new();
                for (oi, probs) in forward.head_out.iter().enumerate() {
                    let mut grad = probs.clone();
                    for (row, mut grad_row) in grad.axis_iter_mut(Axis(0)).enumerate() {
                        let label = batch.labels[(row, oi)] as usize;
                        let p = probs[(row, label.min(probs.ncols() - 1))].max(1e-12);
                        total_loss += -p.ln();
                        let argmax = argmax_row(&probs.row(row));
                        if argmax == label {
                            correct += 1;
                        }
                        grad_row[label.min(probs.ncols() - 1)] -= 1.0;
                    }
                    grad.mapv_inplace(|g| g / n);
                    grads.push(grad);
                }
                let examples = n * forward.head_out.len() as f32;
                let stats = BatchStats {
                    loss: total_loss / examples,
                    accuracy: Some(correct as f32 / examples),
                };
                Ok((stats, grads))
            }
            ModelType::Linear => {
                let pred = &forward.head_out[0];
                let diff = pred - &batch.labels;
                let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);
                let scale = 2.0 / (n * pred.ncols() as f32);
                Ok((BatchStats { loss, accuracy: None }, vec![diff.mapv(|d| d * scale)]))
            }
            ModelType::Survival => {
                let risk: Array1<f32> =
                    forward.head_out[0].column(0).to_owned();
                let events = batch
                    .events
                    .as_ref()
                    .ok_or_else(|| Error::Model("survival batch is missing event inputs".into()))?;
                let times = batch.labels.column(0);
                let (loss, grad) = cox_partial_likelihood(&risk, &times, events);
                let grad = grad.insert_axis(Axis(1));
                Ok((BatchStats { loss, accuracy: None }, vec![grad]))
            }
        }
    }

    fn backward(
        &self,
        model: &mut ModelHandle,
        plan: &Plan,
        forward: &Forward,
        head_grads: Vec<Array2<f32>>,
        lr: f32,
    ) -> Result<()> {
        // Heads share their input; accumulate the upstream gradient.
        let mut grad_current: Array2<f32> = Array2::zeros(forward.head_in.dim());
        for (head, grad_z) in plan.heads.iter().zip(&head_grads) {
            let (kernel, _) = layer_weights(&model.weights, &head.name)?;
            grad_current = grad_current + grad_z.dot(&kernel.t());
            let d_kernel = forward.head_in.t().dot(grad_z);
            let d_bias = grad_z.sum_axis(Axis(0));
            if head.trainable {
                sgd_update(&mut model.weights, &head.name, &d_kernel, &d_bias, lr, head.l2)?;
            }
        }

        for (i, layer) in plan.hidden.iter().enumerate().rev() {
            let grad_z = &grad_current * &relu_grad(&forward.hidden_z[i]);
            let (kernel, _) = layer_weights(&model.weights, &layer.name)?;
            let upstream = grad_z.dot(&kernel.t());
            let d_kernel = forward.hidden_in[i].t().dot(&grad_z);
            let d_bias = grad_z.sum_axis(Axis(0));
            if layer.trainable {
                sgd_update(&mut model.weights, &layer.name, &d_kernel, &d_bias, lr, layer.l2)?;
            }
            grad_current = upstream;
        }

        if let Some(trunk) = &plan.trunk {
            if trunk.trainable {
                // The trunk part of the merged gradient is its leading block
                let mut grad_out =
                    grad_current.slice(ndarray::s![.., ..forward.trunk_width]).to_owned();
                if let Some(mask) = &forward.dropout_mask {
                    grad_out = &grad_out * mask;
                }
                let z = forward.trunk_z.as_ref().expect("trunk forward state");
                let input = forward.trunk_in.as_ref().expect("trunk forward state");
                let grad_z = &grad_out * &relu_grad(z);
                let d_kernel = input.t().dot(&grad_z);
                let d_bias = grad_z.sum_axis(Axis(0));
                sgd_update(&mut model.weights, &trunk.name, &d_kernel, &d_bias, lr, 0.0)?;
            }
        }
        Ok(())
    }
}

impl Executor for ReferenceExecutor {
    fn train_batch(&self, model: &mut ModelHandle, batch: &Batch, lr: f32) -> Result<BatchStats> {
        let plan = Plan::from_graph(&model.graph)?;
        let forward = self.forward(model, &plan, batch, true)?;
        let (stats, head_grads) = self.loss_and_grads(model, batch, &forward)?;
        self.backward(model, &plan, &forward, head_grads, lr)?;
        Ok(stats)
    }

    fn evaluate_batch(&self, model: &ModelHandle, batch: &Batch) -> Result<BatchStats> {
        let plan = Plan::from_graph(&model.graph)?;
        let forward = self.forward(model, &plan, batch, false)?;
        let (stats, _) = self.loss_and_grads(model, batch, &forward)?;
        Ok(stats)
    }

    fn predict(&self, model: &ModelHandle, batch: &Batch) -> Result<Vec<Array2<f32>>> {
        let plan = Plan::from_graph(&model.graph)?;
        let forward = self.forward(model, &plan, batch, false)?;
        Ok(forward.head_out)
    }
}

fn layer_weights<'a>(
    weights: &'a Weights,
    layer: &str,
) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
    let kernel = weights
        .get(&format!("{layer}/kernel"))
        .ok_or_else(|| Error::Model(format!("missing weight tensor {layer}/kernel")))?;
    let bias = weights
        .get(&format!("{layer}/bias"))
        .ok_or_else(|| Error::Model(format!("missing weight tensor {layer}/bias")))?;
    let kernel_view = ArrayView2::from_shape((kernel.shape[0], kernel.shape[1]), &kernel.data)
        .map_err(|e| Error::Model(format!("bad kernel shape for {layer}: {e}")))?;
    let bias_view = ArrayView1::from_shape(bias.shape[0], &bias.data)
        .map_err(|e| Error::Model(format!("bad bias shape for {layer}: {e}")))?;
    Ok((kernel_view, bias_view))
}

fn sgd_update(
    weights: &mut Weights,
    layer: &str,
    d_kernel: &Array2<f32>,
    d_bias: &Array1<f32>,
    lr: f32,
    l2: f32,
) -> Result<()> {
    let kernel = weights
        .get_mut(&format!("{layer}/kernel"))
        .ok_or_else(|| Error::Model(format!("missing weight tensor {layer}/kernel")))?;
    for (w, &g) in kernel.data.iter_mut().zip(d_kernel.iter()) {
        *w -= lr * (g + l2 * *w);
    }
    let bias = weights
        .get_mut(&format!("{layer}/bias"))
        .ok_or_else(|| Error::Model(format!("missing weight tensor {layer}/bias")))?;
    for (b, &g) in bias.data.iter_mut().zip(d_bias.iter()) {
        *b -= lr * g;
    }
    Ok(())
}

fn pool_images(images: &ndarray::Array4<f32>, pooling: Pooling) -> Array2<f32> {
    let (n, h, w, c) = images.dim();
    match pooling {
        Pooling::Max => Array2::from_shape_fn((n, c), |(i, ch)| {
            let mut best = f32::NEG_INFINITY;
            for y in 0..h {
                for x in 0..w {
                    best = best.max(images[(i, y, x, ch)]);
                }
            }
            best
        }),
        Pooling::Avg => Array2::from_shape_fn((n, c), |(i, ch)| {
            let mut sum = 0.0;
            for y in 0..h {
                for x in 0..w {
                    sum += images[(i, y, x, ch)];
                }
            }
            sum / (h * w) as f32
        }),
        Pooling::None => {
            let flat: Vec<f32> = images.iter().copied().collect();
            Array2::from_shape_vec((n, h * w * c), flat).expect("contiguous image batch")
        }
    }
}

fn hconcat(parts: &[Array2<f32>]) -> Array2<f32> {
    if parts.len() == 1 {
        return parts[0].clone();
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    ndarray::concatenate(Axis(1), &views).expect("mismatched batch sizes in input branches")
}

fn relu(z: &Array2<f32>) -> Array2<f32> {
    z.mapv(|v| v.max(0.0))
}

fn relu_grad(z: &Array2<f32>) -> Array2<f32> {
    z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

fn softmax(z: &Array2<f32>) -> Array2<f32> {
    let mut out = z.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum: f32 = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

fn argmax_row(row: &ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map_or(0, |(i, _)| i)
}

/// Breslow-approximation Cox partial likelihood and its gradient.
///
/// Batches without any observed event contribute zero loss and gradient.
fn cox_partial_likelihood(
    risk: &Array1<f32>,
    times: &ArrayView1<f32>,
    events: &Array1<f32>,
) -> (f32, Array1<f32>) {
    let n = risk.len();
    let num_events = events.iter().filter(|&&e| e > 0.0).count();
    if num_events == 0 {
        return (0.0, Array1::zeros(n));
    }
    let exp_risk: Array1<f32> = risk.mapv(|r| r.clamp(-30.0, 30.0).exp());
    let mut loss = 0.0;
    let mut grad = Array1::zeros(n);
    let m = num_events as f32;
    for i in 0..n {
        if events[i] <= 0.0 {
            continue;
        }
        let risk_set: f32 =
            (0..n).filter(|&j| times[j] >= times[i]).map(|j| exp_risk[j]).sum();
        loss -= (risk[i] - risk_set.ln()) / m;
        for j in 0..n {
            if times[j] >= times[i] {
                grad[j] += exp_risk[j] / risk_set / m;
            }
        }
        grad[i] -= 1.0 / m;
    }
    (loss, grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hparams::{Balance, HyperParameters, Loss};
    use crate::model::graph::{HeadLayout, ModelAssembler};
    use ndarray::{arr1, arr2, Array4};

    fn categorical_model(features: usize) -> ModelHandle {
        let hp = HyperParameters::new().with_tile_size(4, 302).with_hidden_layers(1, 8);
        let heads = HeadLayout::Categorical([(0usize, 2usize)].into_iter().collect());
        let graph = ModelAssembler::new(&hp, heads, features).assemble().unwrap();
        ModelHandle::initialize(graph, ModelType::Categorical, vec!["Outcome 0".into()], Some(5))
    }

    fn image_batch(labels: &[f32]) -> Batch {
        let n = labels.len();
        let images = Array4::from_shape_fn((n, 4, 4, 3), |(i, y, x, _)| {
            // Class-dependent intensity so the problem is learnable
            labels[i] * 0.5 + 0.05 * (y + x) as f32
        });
        Batch {
            images: Some(images),
            features: None,
            events: None,
            labels: Array2::from_shape_vec((n, 1), labels.to_vec()).unwrap(),
            slides: (0..n).map(|i| format!("s{i}")).collect(),
        }
    }

    #[test]
    fn test_predict_shapes_and_probabilities() {
        let model = categorical_model(0);
        let exec = ReferenceExecutor::with_seed(1);
        let batch = image_batch(&[0.0, 1.0, 1.0]);
        let outputs = exec.predict(&model, &batch).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].dim(), (3, 2));
        for row in outputs[0].axis_iter(Axis(0)) {
            let sum: f32 = row.sum();
            assert!((sum - 1.0).abs() < 1e-5, "softmax rows must sum to 1, got {sum}");
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut model = categorical_model(0);
        let exec = ReferenceExecutor::with_seed(2);
        let batch = image_batch(&[0.0, 0.0, 1.0, 1.0]);
        let first = exec.evaluate_batch(&model, &batch).unwrap().loss;
        for _ in 0..60 {
            exec.train_batch(&mut model, &batch, 0.05).unwrap();
        }
        let last = exec.evaluate_batch(&model, &batch).unwrap().loss;
        assert!(last < first, "loss should decrease: {first} -> {last}");
    }

    #[test]
    fn test_frozen_trunk_is_not_updated() {
        let mut model = categorical_model(0);
        model.graph.set_trunk_trainable(false);
        let trunk = model.graph.trunk().unwrap().name.clone();
        let exec = ReferenceExecutor::with_seed(3);
        let batch = image_batch(&[0.0, 1.0]);
        let trunk_before = model.weights[&format!("{trunk}/kernel")].clone();
        let head_before = model.weights["prelogits-0/kernel"].clone();
        exec.train_batch(&mut model, &batch, 0.1).unwrap();
        assert_eq!(model.weights[&format!("{trunk}/kernel")], trunk_before);
        // Head weights still move
        assert_ne!(model.weights["prelogits-0/kernel"], head_before);
    }

    #[test]
    fn test_linear_model_mse() {
        let hp = HyperParameters::new()
            .with_tile_size(4, 302)
            .with_loss(Loss::MeanSquaredError)
            .with_balanced_training(Balance::None)
            .with_hidden_layers(1, 8);
        let heads = HeadLayout::Linear { width: 1 };
        let graph = ModelAssembler::new(&hp, heads, 0).assemble().unwrap();
        let mut model =
            ModelHandle::initialize(graph, ModelType::Linear, vec!["Outcome 0".into()], Some(4));
        let exec = ReferenceExecutor::with_seed(4);
        let batch = image_batch(&[0.2, 0.8]);
        let first = exec.evaluate_batch(&model, &batch).unwrap();
        assert!(first.accuracy.is_none());
        for _ in 0..40 {
            exec.train_batch(&mut model, &batch, 0.05).unwrap();
        }
        let last = exec.evaluate_batch(&model, &batch).unwrap().loss;
        assert!(last < first.loss);
    }

    #[test]
    fn test_cox_loss_no_events_is_zero() {
        let risk = arr1(&[0.5, -0.5, 0.1]);
        let times = arr1(&[1.0, 2.0, 3.0]);
        let events = arr1(&[0.0, 0.0, 0.0]);
        let (loss, grad) = cox_partial_likelihood(&risk, &times.view(), &events);
        assert_eq!(loss, 0.0);
        assert!(grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_cox_loss_prefers_higher_risk_for_earlier_events() {
        // Earlier event with higher predicted risk scores a lower loss
        let times = arr1(&[1.0, 5.0]);
        let events = arr1(&[1.0, 0.0]);
        let good = cox_partial_likelihood(&arr1(&[2.0, -2.0]), &times.view(), &events).0;
        let bad = cox_partial_likelihood(&arr1(&[-2.0, 2.0]), &times.view(), &events).0;
        assert!(good < bad);
    }

    #[test]
    fn test_survival_model_trains() {
        let hp = HyperParameters::new()
            .with_tile_size(4, 302)
            .with_loss(Loss::NegativeLogLikelihood)
            .with_balanced_training(Balance::None)
            .with_hidden_layers(1, 8);
        let graph = ModelAssembler::new(&hp, HeadLayout::Survival, 1).assemble().unwrap();
        let mut model =
            ModelHandle::initialize(graph, ModelType::Survival, vec!["Outcome 0".into()], Some(6));
        let exec = ReferenceExecutor::with_seed(6);
        let batch = Batch {
            images: Some(Array4::from_shape_fn((4, 4, 4, 3), |(i, _, _, _)| i as f32 * 0.1)),
            features: None,
            events: Some(arr1(&[1.0, 0.0, 1.0, 0.0])),
            labels: arr2(&[[1.0], [4.0], [2.0], [8.0]]),
            slides: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        };
        let first = exec.evaluate_batch(&model, &batch).unwrap().loss;
        for _ in 0..30 {
            exec.train_batch(&mut model, &batch, 0.05).unwrap();
        }
        let last = exec.evaluate_batch(&model, &batch).unwrap().loss;
        assert!(last <= first, "survival loss should not increase: {first} -> {last}");
    }

    #[test]
    fn test_feature_only_model() {
        let hp = HyperParameters::new().with_drop_images(true).with_tile_size(0, 302);
        let heads = HeadLayout::Categorical([(0usize, 2usize)].into_iter().collect());
        let graph = ModelAssembler::new(&hp, heads, 3).assemble().unwrap();
        let mut model = ModelHandle::initialize(
            graph,
            ModelType::Categorical,
            vec!["Outcome 0".into()],
            Some(8),
        );
        let exec = ReferenceExecutor::with_seed(8);
        let batch = Batch {
            images: None,
            features: Some(arr2(&[[0.0, 0.1, 0.9], [1.0, 0.9, 0.1]])),
            events: None,
            labels: arr2(&[[0.0], [1.0]]),
            slides: vec!["a".into(), "b".into()],
        };
        let stats = exec.train_batch(&mut model, &batch, 0.1).unwrap();
        assert!(stats.loss.is_finite());
        assert!(stats.accuracy.is_some());
    }
}
