//! Hyperparameter set: validation, serialization, and derived policies
//!
//! A [`HyperParameters`] value collects every knob for model building and
//! training. Values are checked as a whole with [`HyperParameters::checked`]
//! (or [`validate`](HyperParameters::validate)); invalid values or
//! combinations fail fast with [`Error::Configuration`] before any compute
//! starts. The architecture, optimizer, and loss registries are static enum
//! tables rather than runtime reflection.

mod schedule;

pub use schedule::LrSchedule;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported convolutional trunk architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Xception,
    Vgg16,
    Vgg19,
    ResNet50,
    ResNet101,
    ResNet152,
    ResNet50V2,
    ResNet101V2,
    ResNet152V2,
    InceptionV3,
    InceptionResNetV2,
    NasNetLarge,
    MobileNet,
    MobileNetV2,
}

impl Architecture {
    /// Nominal layer count of the trunk, used for freeze-depth computation
    pub fn layer_count(self) -> usize {
        match self {
            Architecture::Xception => 132,
            Architecture::Vgg16 => 19,
            Architecture::Vgg19 => 22,
            Architecture::ResNet50 => 175,
            Architecture::ResNet101 => 345,
            Architecture::ResNet152 => 515,
            Architecture::ResNet50V2 => 190,
            Architecture::ResNet101V2 => 377,
            Architecture::ResNet152V2 => 564,
            Architecture::InceptionV3 => 311,
            Architecture::InceptionResNetV2 => 780,
            Architecture::NasNetLarge => 1039,
            Architecture::MobileNet => 86,
            Architecture::MobileNetV2 => 154,
        }
    }

    /// Width of the post-convolution feature vector under global pooling
    pub fn num_features(self) -> usize {
        match self {
            Architecture::Xception => 2048,
            Architecture::Vgg16 | Architecture::Vgg19 => 512,
            Architecture::ResNet50
            | Architecture::ResNet101
            | Architecture::ResNet152
            | Architecture::ResNet50V2
            | Architecture::ResNet101V2
            | Architecture::ResNet152V2 => 2048,
            Architecture::InceptionV3 => 2048,
            Architecture::InceptionResNetV2 => 1536,
            Architecture::NasNetLarge => 4032,
            Architecture::MobileNet => 1024,
            Architecture::MobileNetV2 => 1280,
        }
    }
}

/// Supported optimizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
    RmsProp,
    Adagrad,
    Adadelta,
    Adamax,
    Nadam,
}

/// Supported loss functions
///
/// The loss id determines the model type: `negative_log_likelihood` is the
/// survival loss, the linear set maps to linear outcomes, and everything
/// else is categorical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    MeanSquaredError,
    MeanAbsoluteError,
    MeanAbsolutePercentageError,
    MeanSquaredLogarithmicError,
    SquaredHinge,
    Hinge,
    CategoricalHinge,
    LogCosh,
    HuberLoss,
    CategoricalCrossentropy,
    SparseCategoricalCrossentropy,
    BinaryCrossentropy,
    KullbackLeiblerDivergence,
    Poisson,
    NegativeLogLikelihood,
}

impl Loss {
    /// Whether this loss belongs to the fixed linear-loss set
    pub fn is_linear(self) -> bool {
        matches!(
            self,
            Loss::MeanSquaredError
                | Loss::MeanAbsoluteError
                | Loss::MeanAbsolutePercentageError
                | Loss::MeanSquaredLogarithmicError
                | Loss::SquaredHinge
                | Loss::Hinge
                | Loss::LogCosh
                | Loss::NegativeLogLikelihood
        )
    }
}

/// Post-convolution pooling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    Max,
    Avg,
    /// No pooling; the trunk output is flattened instead
    None,
}

/// Batch-level balancing policy for dataset interleaving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Balance {
    /// Sampling proportional to shard tile counts
    None,
    /// Each outcome category equally likely per draw
    Category,
    /// Each distinct patient equally likely per draw
    Patient,
}

/// Metric monitored for early stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyStopMethod {
    Loss,
    Accuracy,
}

/// Outcome type of a model, derived from the loss id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Categorical,
    Linear,
    Survival,
}

/// Optimizer selection with its learning-rate policy, handed to the
/// executing backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub schedule: LrSchedule,
}

/// Collection of hyperparameters used for model building and training
///
/// # Example
///
/// ```
/// use histoflow::hparams::{Balance, HyperParameters, Loss, ModelType};
///
/// let hp = HyperParameters::new()
///     .with_loss(Loss::MeanSquaredError)
///     .with_balanced_training(Balance::None)
///     .checked()
///     .unwrap();
/// assert_eq!(hp.model_type(), ModelType::Linear);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameters {
    /// Tile width in pixels
    pub tile_px: u32,
    /// Tile width in microns
    pub tile_um: u32,
    /// Epochs after which the full model is checkpointed and evaluated
    pub finetune_epochs: Vec<usize>,
    /// Warmup epochs training only the fully-connected head
    pub toplayer_epochs: usize,
    /// Trunk architecture
    pub architecture: Architecture,
    /// Post-convolution pooling
    pub pooling: Pooling,
    /// Loss function; determines the model type
    pub loss: Loss,
    pub learning_rate: f32,
    /// Decay rate; 0 or 1 disables the decay schedule
    pub learning_rate_decay: f32,
    pub learning_rate_decay_steps: usize,
    pub batch_size: usize,
    /// Number of post-convolution fully-connected hidden layers
    pub hidden_layers: usize,
    pub hidden_layer_width: usize,
    pub optimizer: OptimizerKind,
    pub early_stop: bool,
    /// Patience for early stopping, in (fractional) epochs
    pub early_stop_patience: usize,
    pub early_stop_method: EarlyStopMethod,
    pub balanced_training: Balance,
    pub balanced_validation: Balance,
    /// Number of trainable trunk layers; 0 trains all layers
    pub trainable_layers: usize,
    pub l2_weight: f32,
    /// Post-convolution dropout rate
    pub dropout: f32,
    /// Random x/y flip augmentation on training streams
    pub augment: bool,
    /// Drop images and train on slide-level features alone
    pub drop_images: bool,
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self {
            tile_px: 299,
            tile_um: 302,
            finetune_epochs: vec![10],
            toplayer_epochs: 0,
            architecture: Architecture::Xception,
            pooling: Pooling::Max,
            loss: Loss::SparseCategoricalCrossentropy,
            learning_rate: 1e-4,
            learning_rate_decay: 0.0,
            learning_rate_decay_steps: 100_000,
            batch_size: 16,
            hidden_layers: 1,
            hidden_layer_width: 500,
            optimizer: OptimizerKind::Adam,
            early_stop: false,
            early_stop_patience: 0,
            early_stop_method: EarlyStopMethod::Loss,
            balanced_training: Balance::Category,
            balanced_validation: Balance::None,
            trainable_layers: 0,
            l2_weight: 0.0,
            dropout: 0.0,
            augment: true,
            drop_images: false,
        }
    }
}

impl HyperParameters {
    /// Create a hyperparameter set with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile_size(mut self, tile_px: u32, tile_um: u32) -> Self {
        self.tile_px = tile_px;
        self.tile_um = tile_um;
        self
    }

    pub fn with_finetune_epochs(mut self, epochs: Vec<usize>) -> Self {
        self.finetune_epochs = epochs;
        self
    }

    pub fn with_toplayer_epochs(mut self, epochs: usize) -> Self {
        self.toplayer_epochs = epochs;
        self
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_learning_rate_decay(mut self, rate: f32, steps: usize) -> Self {
        self.learning_rate_decay = rate;
        self.learning_rate_decay_steps = steps;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_hidden_layers(mut self, count: usize, width: usize) -> Self {
        self.hidden_layers = count;
        self.hidden_layer_width = width;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_early_stop(mut self, method: EarlyStopMethod, patience: usize) -> Self {
        self.early_stop = true;
        self.early_stop_method = method;
        self.early_stop_patience = patience;
        self
    }

    pub fn with_balanced_training(mut self, balance: Balance) -> Self {
        self.balanced_training = balance;
        self
    }

    pub fn with_balanced_validation(mut self, balance: Balance) -> Self {
        self.balanced_validation = balance;
        self
    }

    pub fn with_trainable_layers(mut self, layers: usize) -> Self {
        self.trainable_layers = layers;
        self
    }

    pub fn with_l2_weight(mut self, weight: f32) -> Self {
        self.l2_weight = weight;
        self
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    pub fn with_augment(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    pub fn with_drop_images(mut self, drop: bool) -> Self {
        self.drop_images = drop;
        self
    }

    /// Validate and return the set, consuming the builder chain
    pub fn checked(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Check that hyperparameter values and combinations are valid
    pub fn validate(&self) -> Result<()> {
        if self.tile_px == 0 && !self.drop_images {
            return Err(Error::Configuration(
                "tile_px must be a positive integer unless drop_images is set".into(),
            ));
        }
        if self.tile_um == 0 {
            return Err(Error::Configuration("tile_um must be a positive integer".into()));
        }
        if self.finetune_epochs.is_empty() || self.finetune_epochs.contains(&0) {
            return Err(Error::Configuration(
                "finetune_epochs must contain at least one epoch >= 1".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Configuration(format!(
                "learning_rate must be a positive float, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.learning_rate_decay) {
            return Err(Error::Configuration(format!(
                "learning_rate_decay must be within [0, 1], got {}",
                self.learning_rate_decay
            )));
        }
        if self.learning_rate_decay_steps == 0 {
            return Err(Error::Configuration("learning_rate_decay_steps must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be >= 1".into()));
        }
        if self.hidden_layers > 0 && self.hidden_layer_width == 0 {
            return Err(Error::Configuration("hidden_layer_width must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.l2_weight) {
            return Err(Error::Configuration(format!(
                "L2 weight must be within [0, 1], got {}",
                self.l2_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(Error::Configuration(format!(
                "dropout must be within [0, 1], got {}",
                self.dropout
            )));
        }
        if self.model_type() != ModelType::Categorical
            && (self.balanced_training == Balance::Category
                || self.balanced_validation == Balance::Category)
        {
            return Err(Error::Configuration(format!(
                "cannot combine category-level balancing with model type {:?}",
                self.model_type()
            )));
        }
        Ok(())
    }

    /// Outcome type derived from the loss id
    ///
    /// Survival for the negative-log-likelihood loss, linear for losses in
    /// the linear set, categorical otherwise. Pure and deterministic.
    pub fn model_type(&self) -> ModelType {
        if self.loss == Loss::NegativeLogLikelihood {
            ModelType::Survival
        } else if self.loss.is_linear() {
            ModelType::Linear
        } else {
            ModelType::Categorical
        }
    }

    /// Learning-rate policy derived from the decay settings
    ///
    /// Staircase exponential decay when `learning_rate_decay` is neither 0
    /// nor 1, constant otherwise.
    pub fn lr_schedule(&self) -> LrSchedule {
        if self.learning_rate_decay != 0.0 && self.learning_rate_decay != 1.0 {
            LrSchedule::ExponentialDecay {
                initial: self.learning_rate,
                decay_rate: self.learning_rate_decay,
                decay_steps: self.learning_rate_decay_steps,
            }
        } else {
            LrSchedule::Constant { lr: self.learning_rate }
        }
    }

    /// Optimizer factory: the configured optimizer with its rate policy
    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig { kind: self.optimizer, schedule: self.lr_schedule() }
    }

    /// Serialize every field to a JSON object
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild from a JSON object, re-validating the combination
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let hp: HyperParameters = serde_json::from_value(value.clone())?;
        hp.checked()
    }

    /// Load from a `hyperparameters.json` file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&serde_json::from_str(&raw)?)
    }

    /// Write to a `hyperparameters.json` file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_loss() -> impl Strategy<Value = Loss> {
        prop_oneof![
            Just(Loss::MeanSquaredError),
            Just(Loss::MeanAbsoluteError),
            Just(Loss::LogCosh),
            Just(Loss::CategoricalCrossentropy),
            Just(Loss::SparseCategoricalCrossentropy),
            Just(Loss::BinaryCrossentropy),
            Just(Loss::NegativeLogLikelihood),
        ]
    }

    proptest! {
        /// Valid hyperparameter sets survive a JSON round trip unchanged
        #[test]
        fn json_round_trip_law(
            loss in arb_loss(),
            batch_size in 1usize..256,
            hidden_layers in 0usize..4,
            dropout in 0.0f32..=1.0,
            patience in 0usize..10,
        ) {
            let hp = HyperParameters::new()
                .with_loss(loss)
                .with_balanced_training(Balance::None)
                .with_balanced_validation(Balance::None)
                .with_batch_size(batch_size)
                .with_hidden_layers(hidden_layers, 64)
                .with_dropout(dropout)
                .with_early_stop(EarlyStopMethod::Loss, patience);
            prop_assume!(hp.validate().is_ok());
            let restored = HyperParameters::from_json(&hp.to_json().unwrap()).unwrap();
            prop_assert_eq!(hp, restored);
        }

        /// Category balancing plus a non-categorical loss never validates
        #[test]
        fn category_balance_incompatibility(loss in arb_loss()) {
            let hp = HyperParameters::new()
                .with_loss(loss)
                .with_balanced_training(Balance::Category);
            if hp.model_type() == ModelType::Categorical {
                prop_assert!(hp.validate().is_ok());
            } else {
                prop_assert!(matches!(hp.validate(), Err(crate::Error::Configuration(_))));
            }
        }
    }
}
