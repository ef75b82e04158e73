//! Training and evaluation controller
//!
//! Owns the run state machine: build, optional top-layer warmup, fine-tune
//! epochs with mid-epoch validation checks, checkpoint persistence at
//! configured epochs (and on early stop), and standalone evaluation with
//! tile/slide/patient rollups. The controller is single-threaded-cooperative
//! and delegates all tensor work to its [`Executor`] through blocking calls.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::{
    write_slide_manifest, AnnotationSet, InterleaveOptions, Manifest, Shard, TileStream,
};
use crate::error::{Error, Result};
use crate::hparams::{Balance, EarlyStopMethod, HyperParameters, ModelType};
use crate::metrics::{update_results_log, LevelMetrics, TilePredictions};
use crate::model::{
    Batch, Executor, HeadLayout, ModelAssembler, ModelHandle, OutcomeStrategy,
};
use crate::train::checkpoint::{self, write_checkpoint};
use crate::train::early_stop::{EarlyStopConfig, EarlyStopMonitor};
use crate::train::results::{EpochRecord, EpochResults};

/// Options for a training run
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Saved model whose trunk is transplanted into the new network
    pub pretrain: Option<PathBuf>,
    /// Saved model directory to resume from; replaces the handle wholesale
    pub resume_from: Option<PathBuf>,
    /// Weights-only checkpoint applied to the freshly assembled network
    pub checkpoint: Option<PathBuf>,
    /// Run a validation check every this many batches; 0 disables
    pub validate_on_batch: usize,
    pub validation_batch_size: usize,
    /// Batches per mid-epoch validation check; 0 uses the whole set
    pub validation_steps: usize,
    pub max_tiles_per_slide: usize,
    pub min_tiles_per_slide: usize,
    pub starting_epoch: usize,
    /// Observation window for early-stop smoothing
    pub ema_observations: usize,
    pub ema_smoothing: f32,
    pub steps_per_epoch_override: Option<usize>,
    /// Skip tile/slide/patient rollups at checkpoint evaluations
    pub skip_metrics: bool,
    /// Seed for streams and weight initialization
    pub seed: Option<u64>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            pretrain: None,
            resume_from: None,
            checkpoint: None,
            validate_on_batch: 512,
            validation_batch_size: 32,
            validation_steps: 200,
            max_tiles_per_slide: 0,
            min_tiles_per_slide: 0,
            starting_epoch: 0,
            ema_observations: 20,
            ema_smoothing: 2.0,
            steps_per_epoch_override: None,
            skip_metrics: false,
            seed: None,
        }
    }
}

/// Options for standalone evaluation
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Defaults to the training batch size
    pub batch_size: Option<usize>,
    pub max_tiles_per_slide: usize,
    pub min_tiles_per_slide: usize,
    /// Permutation importance over slide-level features
    pub permutation_importance: bool,
    pub seed: Option<u64>,
}

/// Orchestrates training and evaluation for one model
#[derive(Debug)]
pub struct TrainingController<E: Executor> {
    hp: HyperParameters,
    outdir: PathBuf,
    annotations: AnnotationSet,
    executor: E,
    name: String,
    manifest: Option<Manifest>,
    strategy: OutcomeStrategy,
    model_type: ModelType,
    outcome_names: Vec<String>,
    feature_names: Option<Vec<String>>,
    num_slide_features: usize,
    model: Option<ModelHandle>,
}

impl<E: Executor> TrainingController<E> {
    /// Build a controller from hyperparameters and annotations.
    ///
    /// The model type is fixed here from the loss id; structural problems
    /// (outcome-name count, slide feature widths, a survival model without
    /// an event input) fail fast with a model error.
    pub fn build(
        hp: HyperParameters,
        annotations: AnnotationSet,
        outdir: impl Into<PathBuf>,
        executor: E,
    ) -> Result<Self> {
        hp.validate()?;
        let outdir = outdir.into();
        std::fs::create_dir_all(&outdir)?;
        let model_type = hp.model_type();
        let outcome_width = annotations.outcome_width()?;
        let outcome_names =
            (0..outcome_width).map(|i| format!("Outcome {i}")).collect::<Vec<_>>();
        Ok(Self {
            hp,
            outdir,
            annotations,
            executor,
            name: "trained_model".to_string(),
            manifest: None,
            strategy: OutcomeStrategy::for_type(model_type),
            model_type,
            outcome_names,
            feature_names: None,
            num_slide_features: 0,
            model: None,
        })
    }

    /// Model name used for checkpoint directories
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Name each outcome; the count must match the label dimensionality
    pub fn with_outcome_names(mut self, names: Vec<String>) -> Result<Self> {
        let width = self.annotations.outcome_width()?;
        if names.len() != width {
            return Err(Error::Model(format!(
                "size of outcome_names ({}) does not match number of outcomes ({width})",
                names.len()
            )));
        }
        self.outcome_names = names;
        Ok(self)
    }

    /// Configure slide-level input features.
    ///
    /// Every annotated slide must supply exactly `sum(feature_sizes)`
    /// values; survival models interpret the first value as the event
    /// indicator.
    pub fn with_slide_features(
        mut self,
        feature_sizes: &[usize],
        feature_names: Option<Vec<String>>,
    ) -> Result<Self> {
        let total: usize = feature_sizes.iter().sum();
        for (slide, ann) in self.annotations.iter() {
            let got = ann.features.as_ref().map_or(0, Vec::len);
            if got != total {
                return Err(Error::Model(format!(
                    "length of input for slide {slide} does not match feature_sizes; \
                     expected {total}, got {got}"
                )));
            }
        }
        self.num_slide_features = total;
        self.feature_names = feature_names;
        if self.model_type == ModelType::Survival {
            log::info!("interpreting the first slide-level feature as the event indicator");
        }
        Ok(self)
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    /// Tile-count manifest attached to this run, if any
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    /// Replace the model wholesale from a saved model directory
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.model = Some(checkpoint::load_model(path)?);
        Ok(())
    }

    /// Assemble a fresh network and apply a weights-only checkpoint
    pub fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let mut model = self.assemble_model(None)?;
        model.apply_weights(checkpoint::load_weights(path)?)?;
        self.model = Some(model);
        Ok(())
    }

    fn head_layout(&self) -> Result<HeadLayout> {
        Ok(match self.model_type {
            ModelType::Categorical => {
                HeadLayout::Categorical(self.annotations.classes_per_outcome()?)
            }
            ModelType::Linear => {
                HeadLayout::Linear { width: self.annotations.outcome_width()? }
            }
            ModelType::Survival => HeadLayout::Survival,
        })
    }

    fn assemble_model(&self, seed: Option<u64>) -> Result<ModelHandle> {
        let assembler =
            ModelAssembler::new(&self.hp, self.head_layout()?, self.num_slide_features);
        let graph = assembler.assemble()?;
        Ok(ModelHandle::initialize(
            graph,
            self.model_type,
            self.outcome_names.clone(),
            seed,
        ))
    }

    fn stream_options(
        &self,
        balance: Balance,
        finite: bool,
        augment: bool,
        opts_max: usize,
        opts_min: usize,
        seed: Option<u64>,
    ) -> InterleaveOptions {
        InterleaveOptions {
            balance,
            finite,
            max_tiles: opts_max,
            min_tiles: opts_min,
            augment,
            seed,
        }
    }

    /// Builds and trains a model from the hyperparameters.
    ///
    /// Returns the nested per-epoch results for every evaluated epoch.
    pub fn train(
        &mut self,
        train_shards: &[Shard],
        val_shards: &[Shard],
        opts: TrainOptions,
    ) -> Result<EpochResults> {
        if self.hp.model_type() != self.model_type {
            return Err(Error::Model(format!(
                "incompatible model types: {:?} (hp) and {:?} (model)",
                self.hp.model_type(),
                self.model_type
            )));
        }
        let max_epoch = *self.hp.finetune_epochs.iter().max().expect("validated non-empty");
        if max_epoch <= opts.starting_epoch {
            return Err(Error::User(format!(
                "starting epoch ({}) cannot be greater than the max target epoch ({max_epoch})",
                opts.starting_epoch
            )));
        }
        if self.hp.early_stop
            && self.hp.early_stop_method == EarlyStopMethod::Accuracy
            && self.model_type != ModelType::Categorical
        {
            log::warn!(
                "'accuracy' early stopping is undefined for model type {:?}; monitoring only",
                self.model_type
            );
        }
        if opts.starting_epoch != 0 {
            log::info!("starting training at epoch {}", opts.starting_epoch);
        }

        self.hp.save(&self.outdir.join(checkpoint::HP_FILE))?;
        write_slide_manifest(
            &self.outdir.join(checkpoint::SLIDE_MANIFEST_FILE),
            &self.annotations,
            train_shards,
            val_shards,
        )?;

        let mut train_stream = TileStream::new(
            train_shards,
            &self.annotations,
            self.stream_options(
                self.hp.balanced_training,
                false,
                self.hp.augment,
                opts.max_tiles_per_slide,
                opts.min_tiles_per_slide,
                opts.seed,
            ),
        )?;
        if train_stream.total_tiles() == 0 {
            return Err(Error::User("no training tiles are available after filtering".into()));
        }
        let mut val_stream = if val_shards.is_empty() {
            None
        } else {
            Some(TileStream::new(
                val_shards,
                &self.annotations,
                self.stream_options(
                    self.hp.balanced_validation,
                    true,
                    false,
                    opts.max_tiles_per_slide,
                    opts.min_tiles_per_slide,
                    opts.seed.map(|s| s.wrapping_add(1)),
                ),
            )?)
        };

        let steps_per_epoch = opts
            .steps_per_epoch_override
            .unwrap_or_else(|| {
                ((train_stream.total_tiles() as f64 / self.hp.batch_size as f64).round() as usize)
                    .max(1)
            });

        // Build or load the model
        let mut model = match &opts.resume_from {
            Some(path) => {
                log::info!("resuming training from {}", path.display());
                checkpoint::load_model(path)?
            }
            None => {
                let mut model = self.assemble_model(opts.seed)?;
                if let Some(pretrain) = &opts.pretrain {
                    log::info!("using pretraining from {}", pretrain.display());
                    let donor = checkpoint::load_model(pretrain)?;
                    let assembler = ModelAssembler::new(
                        &self.hp,
                        self.head_layout()?,
                        self.num_slide_features,
                    );
                    assembler.transplant_trunk(&model.graph, &mut model.weights, &donor)?;
                }
                if let Some(ckpt) = &opts.checkpoint {
                    log::info!("loading checkpoint weights from {}", ckpt.display());
                    model.apply_weights(checkpoint::load_weights(ckpt)?)?;
                }
                model
            }
        };

        let schedule = self.hp.lr_schedule();
        let mut global_batch = 0usize;

        // Top-layer warmup: train only the head with the trunk frozen
        if self.hp.toplayer_epochs > 0 && opts.resume_from.is_none() {
            log::info!("retraining top layer for {} epochs", self.hp.toplayer_epochs);
            model.graph.set_trunk_trainable(false);
            for _ in 0..self.hp.toplayer_epochs {
                for _ in 0..steps_per_epoch {
                    let batch = self.next_batch(&mut train_stream, self.hp.batch_size)?;
                    let Some(batch) = batch else { break };
                    self.executor.train_batch(&mut model, &batch, schedule.lr_at(global_batch))?;
                    global_batch += 1;
                }
            }
            model.graph.set_trunk_trainable(true);
        }

        let mut monitor = EarlyStopMonitor::new(EarlyStopConfig::from_hp(
            &self.hp,
            self.model_type,
            opts.ema_observations,
            opts.ema_smoothing,
        ));
        let mut results = EpochResults::new();
        log::info!("beginning training ({steps_per_epoch} steps per epoch)");

        for epoch in opts.starting_epoch..max_epoch {
            let mut epoch_loss = 0.0f64;
            let mut epoch_acc = 0.0f64;
            let mut acc_steps = 0usize;
            let mut steps_done = 0usize;

            for step in 0..steps_per_epoch {
                let batch = self.next_batch(&mut train_stream, self.hp.batch_size)?;
                let Some(batch) = batch else { break };
                let stats =
                    self.executor.train_batch(&mut model, &batch, schedule.lr_at(global_batch))?;
                global_batch += 1;
                steps_done += 1;
                epoch_loss += stats.loss as f64;
                if let Some(acc) = stats.accuracy {
                    epoch_acc += acc as f64;
                    acc_steps += 1;
                }

                if let Some(stream) = val_stream.as_mut() {
                    if opts.validate_on_batch > 0
                        && step > 0
                        && step % opts.validate_on_batch == 0
                    {
                        let val = self.validation_pass(
                            &model,
                            stream,
                            opts.validation_batch_size,
                            opts.validation_steps,
                        )?;
                        if let Some((val_loss, val_acc)) = val {
                            let monitored = match (self.hp.early_stop_method, val_acc) {
                                (EarlyStopMethod::Accuracy, Some(acc))
                                    if self.model_type == ModelType::Categorical =>
                                {
                                    acc
                                }
                                _ => val_loss,
                            };
                            let fractional_epoch =
                                epoch as f32 + step as f32 / steps_per_epoch as f32;
                            if monitor.observe(monitored, fractional_epoch) {
                                log::info!(
                                    "early stop triggered: epoch {}, batch {step}",
                                    epoch + 1
                                );
                                break;
                            }
                        }
                    }
                }
            }

            let epoch_number = epoch + 1;
            let stopped = monitor.triggered();
            if self.hp.finetune_epochs.contains(&epoch_number) || stopped {
                write_checkpoint(&model, &self.outdir, &self.name, epoch_number)?;

                if let Some(stream) = val_stream.as_mut() {
                    let mut record = EpochRecord::default();
                    if steps_done > 0 {
                        record
                            .train_metrics
                            .insert("loss".into(), epoch_loss / steps_done as f64);
                    }
                    if acc_steps > 0 {
                        record
                            .train_metrics
                            .insert("accuracy".into(), epoch_acc / acc_steps as f64);
                    }
                    let (val_metrics, preds) =
                        self.full_pass(&model, stream, opts.validation_batch_size)?;
                    record.val_metrics = val_metrics;
                    if !opts.skip_metrics && !preds.is_empty() {
                        let rollups = LevelMetrics::compute(
                            &preds,
                            &self.annotations,
                            &self.outcome_names,
                            self.strategy.metric_kind(),
                        )?;
                        record = record.with_rollups(rollups);
                    }
                    for (metric, value) in &record.val_metrics {
                        log::info!("val {metric}: {value:.4}");
                    }
                    update_results_log(
                        &self.outdir.join("results_log.csv"),
                        "trained_model",
                        &serde_json::json!({ (EpochResults::label(epoch_number)): &record }),
                    )?;
                    results.insert(epoch_number, record);
                }
            }
            if stopped {
                break;
            }
        }

        self.model = Some(model);
        Ok(results)
    }

    /// Evaluate the loaded model over the given shards.
    ///
    /// Requires a model from a prior `train`, `load`, or `load_checkpoint`;
    /// appends a row to the persistent results log under `eval_model`.
    pub fn evaluate(
        &self,
        shards: &[Shard],
        opts: EvalOptions,
    ) -> Result<BTreeMap<String, f64>> {
        let model = self.model.as_ref().ok_or_else(|| {
            Error::User(
                "model has not been loaded, unable to evaluate; call load() or \
                 load_checkpoint() first"
                    .to_string(),
            )
        })?;
        write_slide_manifest(
            &self.outdir.join(checkpoint::SLIDE_MANIFEST_FILE),
            &self.annotations,
            &[],
            shards,
        )?;

        let batch_size = opts.batch_size.unwrap_or(self.hp.batch_size);
        let mut stream = TileStream::new(
            shards,
            &self.annotations,
            self.stream_options(
                Balance::None,
                true,
                false,
                opts.max_tiles_per_slide,
                opts.min_tiles_per_slide,
                opts.seed,
            ),
        )?;

        log::info!("calculating performance metrics over {} tiles", stream.total_tiles());
        let (mut metrics, preds) = self.full_pass(model, &mut stream, batch_size)?;
        if !preds.is_empty() {
            let rollups = LevelMetrics::compute(
                &preds,
                &self.annotations,
                &self.outcome_names,
                self.strategy.metric_kind(),
            )?;
            for (level, values) in
                [("tile", &rollups.tile), ("slide", &rollups.slide), ("patient", &rollups.patient)]
            {
                for (outcome, value) in values {
                    metrics.insert(format!("{level}_{outcome}"), *value);
                }
            }
        }
        if opts.permutation_importance {
            let width = self.strategy.input_feature_width(self.num_slide_features);
            for (key, value) in
                self.permutation_importance(model, &mut stream, batch_size, width, opts.seed)?
            {
                metrics.insert(key, value);
            }
        }

        for (metric, value) in &metrics {
            log::info!("eval {metric}: {value:.4}");
        }
        update_results_log(
            &self.outdir.join("results_log.csv"),
            "eval_model",
            &serde_json::json!({ "eval": &metrics }),
        )?;
        Ok(metrics)
    }

    /// Drop in predictions with one feature column shuffled; report the
    /// metric drop per feature.
    fn permutation_importance(
        &self,
        model: &ModelHandle,
        stream: &mut TileStream<'_>,
        batch_size: usize,
        feature_width: usize,
        seed: Option<u64>,
    ) -> Result<BTreeMap<String, f64>> {
        let mut importances = BTreeMap::new();
        if feature_width == 0 {
            return Ok(importances);
        }
        let base_seed = seed.unwrap_or_else(rand::random);
        let baseline = self.pass_metric(model, stream, batch_size, None)?;
        for fi in 0..feature_width {
            let shuffle = Some((fi, base_seed.wrapping_add(fi as u64)));
            let permuted = self.pass_metric(model, stream, batch_size, shuffle)?;
            let name = self
                .feature_names
                .as_ref()
                .and_then(|names| names.get(fi).cloned())
                .unwrap_or_else(|| format!("feature_{fi}"));
            if let (Some(base), Some(perm)) = (baseline, permuted) {
                importances.insert(format!("importance_{name}"), base - perm);
            }
        }
        Ok(importances)
    }

    /// Tile-level metric for one pass, optionally shuffling a feature column
    fn pass_metric(
        &self,
        model: &ModelHandle,
        stream: &mut TileStream<'_>,
        batch_size: usize,
        shuffle: Option<(usize, u64)>,
    ) -> Result<Option<f64>> {
        stream.reset();
        let mut preds = TilePredictions::default();
        let mut rng = shuffle.map(|(_, seed)| StdRng::seed_from_u64(seed));
        loop {
            let Some(mut batch) = self.next_batch(stream, batch_size)? else { break };
            if let (Some((fi, _)), Some(rng)) = (shuffle, rng.as_mut()) {
                if let Some(features) = batch.features.as_mut() {
                    let mut column: Vec<f32> = features.column(fi).to_vec();
                    column.shuffle(rng);
                    for (row, value) in column.into_iter().enumerate() {
                        features[(row, fi)] = value;
                    }
                }
            }
            let outputs = self.executor.predict(model, &batch)?;
            preds.push(
                &batch.slides,
                &outputs,
                &batch.labels,
                batch.events.as_ref().map(|e| e.as_slice().unwrap_or(&[])),
            );
        }
        if preds.is_empty() {
            return Ok(None);
        }
        let rollups = LevelMetrics::compute(
            &preds,
            &self.annotations,
            &self.outcome_names,
            self.strategy.metric_kind(),
        )?;
        Ok(rollups.tile.values().next().copied())
    }

    /// Bounded validation pass: mean loss and accuracy over up to
    /// `max_batches` batches
    fn validation_pass(
        &self,
        model: &ModelHandle,
        stream: &mut TileStream<'_>,
        batch_size: usize,
        max_batches: usize,
    ) -> Result<Option<(f32, Option<f32>)>> {
        stream.reset();
        let mut loss = 0.0f32;
        let mut acc = 0.0f32;
        let mut batches = 0usize;
        let mut acc_batches = 0usize;
        while max_batches == 0 || batches < max_batches {
            let Some(batch) = self.next_batch(stream, batch_size)? else { break };
            let stats = self.executor.evaluate_batch(model, &batch)?;
            loss += stats.loss;
            batches += 1;
            if let Some(a) = stats.accuracy {
                acc += a;
                acc_batches += 1;
            }
        }
        if batches == 0 {
            return Ok(None);
        }
        let accuracy = (acc_batches > 0).then(|| acc / acc_batches as f32);
        Ok(Some((loss / batches as f32, accuracy)))
    }

    /// Full evaluation pass: dataset-level metrics plus accumulated
    /// per-tile predictions for rollups
    fn full_pass(
        &self,
        model: &ModelHandle,
        stream: &mut TileStream<'_>,
        batch_size: usize,
    ) -> Result<(BTreeMap<String, f64>, TilePredictions)> {
        stream.reset();
        let mut metrics = BTreeMap::new();
        let mut preds = TilePredictions::default();
        let mut loss = 0.0f64;
        let mut acc = 0.0f64;
        let mut batches = 0usize;
        let mut acc_batches = 0usize;
        loop {
            let Some(batch) = self.next_batch(stream, batch_size)? else { break };
            let stats = self.executor.evaluate_batch(model, &batch)?;
            loss += stats.loss as f64;
            batches += 1;
            if let Some(a) = stats.accuracy {
                acc += a as f64;
                acc_batches += 1;
            }
            let outputs = self.executor.predict(model, &batch)?;
            preds.push(
                &batch.slides,
                &outputs,
                &batch.labels,
                batch.events.as_ref().map(|e| e.as_slice().unwrap_or(&[])),
            );
        }
        if batches > 0 {
            metrics.insert("loss".into(), loss / batches as f64);
            if acc_batches > 0 {
                metrics.insert("accuracy".into(), acc / acc_batches as f64);
            }
        }
        Ok((metrics, preds))
    }

    /// Assemble the next batch from the stream, resolving labels, features,
    /// and survival events through the annotations.
    fn next_batch(
        &self,
        stream: &mut TileStream<'_>,
        batch_size: usize,
    ) -> Result<Option<Batch>> {
        let use_images = self.hp.tile_px > 0 && !self.hp.drop_images;
        let feature_width = self.strategy.input_feature_width(self.num_slide_features);

        let mut slides = Vec::new();
        let mut images = Vec::new();
        let mut labels = Vec::new();
        let mut features = Vec::new();
        let mut events = Vec::new();
        for _ in 0..batch_size {
            let Some((slide, image)) = stream.next_draw() else { break };
            let ann = self
                .annotations
                .get(&slide)
                .ok_or_else(|| Error::Model(format!("no annotation entry for slide {slide}")))?;
            let encoded = self.strategy.encode_label(&slide, ann)?;
            labels.extend(encoded.values);
            if let Some(event) = encoded.event {
                events.push(event);
            }
            if feature_width > 0 {
                let all = ann.features.as_ref().ok_or_else(|| {
                    Error::Model(format!("slide {slide} is missing slide-level features"))
                })?;
                let offset = self.num_slide_features - feature_width;
                features.extend_from_slice(&all[offset..]);
            }
            if use_images {
                images.push(image);
            }
            slides.push(slide);
        }
        if slides.is_empty() {
            return Ok(None);
        }

        let n = slides.len();
        let outcome_width = labels.len() / n;
        let batch = Batch {
            images: if use_images {
                let views: Vec<_> = images.iter().map(|i| i.view()).collect();
                Some(
                    ndarray::stack(Axis(0), &views)
                        .map_err(|e| Error::Model(format!("inconsistent tile shapes: {e}")))?,
                )
            } else {
                None
            },
            features: (feature_width > 0).then(|| {
                Array2::from_shape_vec((n, feature_width), features)
                    .expect("feature width checked at construction")
            }),
            events: (!events.is_empty()).then(|| Array1::from_vec(events)),
            labels: Array2::from_shape_vec((n, outcome_width), labels)
                .map_err(|e| Error::Model(format!("inconsistent label widths: {e}")))?,
            slides,
        };
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testutil::{annotations, shard};
    use crate::data::SlideAnnotation;
    use crate::hparams::Loss;
    use crate::model::ReferenceExecutor;

    fn small_hp() -> HyperParameters {
        HyperParameters::new()
            .with_tile_size(4, 302)
            .with_batch_size(8)
            .with_finetune_epochs(vec![1])
            .with_hidden_layers(1, 8)
            .with_augment(false)
    }

    #[test]
    fn test_evaluate_before_load_is_user_error() {
        let dir = tempfile::tempdir().unwrap();
        let ann = annotations(&[("a", "p1", 0.0), ("b", "p2", 1.0)]);
        let controller = TrainingController::build(
            small_hp(),
            ann,
            dir.path().join("out"),
            ReferenceExecutor::with_seed(1),
        )
        .unwrap();
        let shards = vec![shard("a", 4, 0.1), shard("b", 4, 0.9)];
        let err = controller.evaluate(&shards, EvalOptions::default()).unwrap_err();
        assert!(matches!(err, Error::User(_)));
    }

    #[test]
    fn test_outcome_name_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let ann = annotations(&[("a", "p1", 0.0), ("b", "p2", 1.0)]);
        let controller = TrainingController::build(
            small_hp(),
            ann,
            dir.path().join("out"),
            ReferenceExecutor::with_seed(1),
        )
        .unwrap();
        let err = controller
            .with_outcome_names(vec!["one".into(), "two".into()])
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }

    #[test]
    fn test_slide_feature_width_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut ann = AnnotationSet::new();
        ann.insert("a", SlideAnnotation::new("p1", vec![0.0]).with_features(vec![0.5, 0.5]));
        ann.insert("b", SlideAnnotation::new("p2", vec![1.0]).with_features(vec![0.5]));
        let controller = TrainingController::build(
            small_hp(),
            ann,
            dir.path().join("out"),
            ReferenceExecutor::with_seed(1),
        )
        .unwrap();
        let err = controller.with_slide_features(&[2], None).unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(format!("{err}").contains("slide b"));
    }

    #[test]
    fn test_survival_without_event_input_fails_at_train() {
        let dir = tempfile::tempdir().unwrap();
        let hp = small_hp()
            .with_loss(Loss::NegativeLogLikelihood)
            .with_balanced_training(Balance::None);
        let ann = annotations(&[("a", "p1", 4.0), ("b", "p2", 9.0)]);
        let mut controller = TrainingController::build(
            hp,
            ann,
            dir.path().join("out"),
            ReferenceExecutor::with_seed(1),
        )
        .unwrap();
        let shards = vec![shard("a", 8, 0.1), shard("b", 8, 0.9)];
        let err = controller
            .train(&shards, &[], TrainOptions { seed: Some(1), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(format!("{err}").contains("event input"));
    }

    #[test]
    fn test_starting_epoch_beyond_schedule_is_user_error() {
        let dir = tempfile::tempdir().unwrap();
        let ann = annotations(&[("a", "p1", 0.0), ("b", "p2", 1.0)]);
        let mut controller = TrainingController::build(
            small_hp(),
            ann,
            dir.path().join("out"),
            ReferenceExecutor::with_seed(1),
        )
        .unwrap();
        let shards = vec![shard("a", 8, 0.1), shard("b", 8, 0.9)];
        let err = controller
            .train(&shards, &[], TrainOptions { starting_epoch: 1, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, Error::User(_)));
    }
}
