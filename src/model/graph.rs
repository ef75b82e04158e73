//! Structural network description and multi-branch assembly
//!
//! A [`NetworkGraph`] is an ordered list of named layer specifications:
//! image branch (trunk, optional flatten, the `post_convolution` identity
//! tap, optional dropout), optional slide-feature branch, optional survival
//! event input, hidden dense stack, and one dense+activation head per
//! outcome. Survival heads are concatenated with the raw event input so the
//! loss can read both predicted risk and event indicator per example.
//!
//! The named input layer and tap are the transplant contract: trunk weights
//! from a previously trained checkpoint are located by name, with a
//! positional fallback for legacy checkpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hparams::{Architecture, HyperParameters, ModelType, Pooling};
use crate::model::exec::{ModelHandle, Weights};
use crate::model::strategy::{Activation, OutcomeStrategy};

/// Name of the tile-image input layer
pub const INPUT_LAYER: &str = "tile_image";
/// Name of the identity tap after the convolutional trunk
pub const POST_CONV_LAYER: &str = "post_convolution";

/// Layer role within the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LayerKind {
    ImageInput { shape: [usize; 3] },
    FeatureInput { width: usize },
    EventInput,
    Trunk {
        architecture: Architecture,
        pooling: Pooling,
        /// Trunk layers below this nominal index stay frozen
        frozen_below: usize,
        in_width: usize,
        out_width: usize,
    },
    Flatten,
    /// Identity pass-through; used for the feature-extraction tap
    Identity,
    Dropout { rate: f32 },
    Dense { units: usize, l2_weight: f32, in_width: usize },
    Concat,
    Activation { activation: Activation },
}

/// One named layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
    /// Names of the layers feeding this one
    pub inputs: Vec<String>,
    pub trainable: bool,
}

impl LayerSpec {
    fn new(name: impl Into<String>, kind: LayerKind, inputs: Vec<String>) -> Self {
        Self { name: name.into(), kind, inputs, trainable: true }
    }

    /// Whether this layer owns weight tensors
    pub fn has_weights(&self) -> bool {
        matches!(self.kind, LayerKind::Trunk { .. } | LayerKind::Dense { .. })
    }
}

/// Ordered network description with named outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub layers: Vec<LayerSpec>,
    /// Output layer names, one per outcome head
    pub outputs: Vec<String>,
}

impl NetworkGraph {
    pub fn layer(&self, name: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut LayerSpec> {
        self.layers.iter_mut().find(|l| l.name == name)
    }

    /// First trunk layer, if the graph has an image branch
    pub fn trunk(&self) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| matches!(l.kind, LayerKind::Trunk { .. }))
    }

    /// Freeze or unfreeze the trunk (top-layer warmup)
    pub fn set_trunk_trainable(&mut self, trainable: bool) {
        if let Some(layer) =
            self.layers.iter_mut().find(|l| matches!(l.kind, LayerKind::Trunk { .. }))
        {
            layer.trainable = trainable;
        }
    }
}

/// Output-head layout derived from the annotations
#[derive(Debug, Clone, PartialEq)]
pub enum HeadLayout {
    /// One softmax head per outcome, mapping outcome index to class count
    Categorical(BTreeMap<usize, usize>),
    /// A single linear head covering every outcome value
    Linear { width: usize },
    /// A single linear risk output, concatenated with the event input
    Survival,
}

/// Builds a trainable network description from hyperparameters
pub struct ModelAssembler<'a> {
    hp: &'a HyperParameters,
    heads: HeadLayout,
    /// Total slide-level feature width, event input included
    num_slide_features: usize,
}

impl<'a> ModelAssembler<'a> {
    pub fn new(hp: &'a HyperParameters, heads: HeadLayout, num_slide_features: usize) -> Self {
        Self { hp, heads, num_slide_features }
    }

    fn model_type(&self) -> ModelType {
        match self.heads {
            HeadLayout::Categorical(_) => ModelType::Categorical,
            HeadLayout::Linear { .. } => ModelType::Linear,
            HeadLayout::Survival => ModelType::Survival,
        }
    }

    /// Assemble the layer graph
    pub fn assemble(&self) -> Result<NetworkGraph> {
        let hp = self.hp;
        let model_type = self.model_type();
        let strategy = OutcomeStrategy::for_type(model_type);
        let use_images = hp.tile_px > 0 && !hp.drop_images;
        let feature_width = strategy.input_feature_width(self.num_slide_features);

        if model_type == ModelType::Survival && self.num_slide_features == 0 {
            return Err(Error::Model(
                "survival models must include an event input as the first slide-level feature"
                    .into(),
            ));
        }
        if !use_images && feature_width == 0 {
            return Err(Error::Model(
                "model has no inputs: images are dropped and no slide-level features are \
                 configured"
                    .into(),
            ));
        }

        let mut layers = Vec::new();
        let mut merged_width = 0usize;
        let mut merge_inputs: Vec<String> = Vec::new();

        if use_images {
            let px = hp.tile_px as usize;
            layers.push(LayerSpec::new(
                INPUT_LAYER,
                LayerKind::ImageInput { shape: [px, px, 3] },
                vec![],
            ));
            let in_width = match hp.pooling {
                Pooling::Max | Pooling::Avg => 3,
                Pooling::None => px * px * 3,
            };
            let out_width = hp.architecture.num_features();
            let frozen_below = if hp.trainable_layers != 0 {
                trunk_freeze_index(hp.architecture.layer_count(), hp.trainable_layers)
            } else {
                0
            };
            let trunk_name = trunk_layer_name(hp.architecture);
            layers.push(LayerSpec::new(
                trunk_name.clone(),
                LayerKind::Trunk {
                    architecture: hp.architecture,
                    pooling: hp.pooling,
                    frozen_below,
                    in_width,
                    out_width,
                },
                vec![INPUT_LAYER.to_string()],
            ));
            let mut prev = trunk_name;
            if hp.pooling == Pooling::None {
                layers.push(LayerSpec::new("flatten", LayerKind::Flatten, vec![prev]));
                prev = "flatten".to_string();
            }
            layers.push(LayerSpec::new(POST_CONV_LAYER, LayerKind::Identity, vec![prev]));
            let mut branch_out = POST_CONV_LAYER.to_string();
            if hp.dropout > 0.0 {
                layers.push(LayerSpec::new(
                    "dropout",
                    LayerKind::Dropout { rate: hp.dropout },
                    vec![branch_out],
                ));
                branch_out = "dropout".to_string();
            }
            merge_inputs.push(branch_out);
            merged_width += out_width;
        }

        if feature_width > 0 {
            layers.push(LayerSpec::new(
                "slide_feature_input",
                LayerKind::FeatureInput { width: feature_width },
                vec![],
            ));
            merge_inputs.push("slide_feature_input".to_string());
            merged_width += feature_width;
        }
        if model_type == ModelType::Survival {
            layers.push(LayerSpec::new("event_input", LayerKind::EventInput, vec![]));
        }

        let mut prev = if merge_inputs.len() > 1 {
            layers.push(LayerSpec::new("input_merge", LayerKind::Concat, merge_inputs));
            "input_merge".to_string()
        } else {
            merge_inputs.remove(0)
        };

        let mut width = merged_width;
        for i in 0..hp.hidden_layers {
            let name = format!("hidden_{i}");
            layers.push(LayerSpec::new(
                name.clone(),
                LayerKind::Dense {
                    units: hp.hidden_layer_width,
                    l2_weight: hp.l2_weight,
                    in_width: width,
                },
                vec![prev],
            ));
            width = hp.hidden_layer_width;
            prev = name;
        }

        let activation = strategy.activation();
        let mut outputs = Vec::new();
        match &self.heads {
            HeadLayout::Categorical(classes) => {
                for (&oi, &n_classes) in classes {
                    let dense = format!("prelogits-{oi}");
                    let out = format!("out-{oi}");
                    layers.push(LayerSpec::new(
                        dense.clone(),
                        LayerKind::Dense {
                            units: n_classes,
                            l2_weight: hp.l2_weight,
                            in_width: width,
                        },
                        vec![prev.clone()],
                    ));
                    layers.push(LayerSpec::new(
                        out.clone(),
                        LayerKind::Activation { activation },
                        vec![dense],
                    ));
                    outputs.push(out);
                }
            }
            HeadLayout::Linear { width: out_width } => {
                layers.push(LayerSpec::new(
                    "prelogits",
                    LayerKind::Dense {
                        units: *out_width,
                        l2_weight: hp.l2_weight,
                        in_width: width,
                    },
                    vec![prev],
                ));
                layers.push(LayerSpec::new(
                    "output",
                    LayerKind::Activation { activation },
                    vec!["prelogits".to_string()],
                ));
                outputs.push("output".to_string());
            }
            HeadLayout::Survival => {
                layers.push(LayerSpec::new(
                    "prelogits",
                    LayerKind::Dense { units: 1, l2_weight: hp.l2_weight, in_width: width },
                    vec![prev],
                ));
                layers.push(LayerSpec::new(
                    "output",
                    LayerKind::Activation { activation },
                    vec!["prelogits".to_string()],
                ));
                // The loss reads risk and event side by side
                layers.push(LayerSpec::new(
                    "output_merge_survival",
                    LayerKind::Concat,
                    vec!["output".to_string(), "event_input".to_string()],
                ));
                outputs.push("output_merge_survival".to_string());
            }
        }

        Ok(NetworkGraph { layers, outputs })
    }

    /// Copy trunk weights from a previously trained model into `weights`.
    ///
    /// The donor is located through its named `tile_image` input and
    /// `post_convolution` tap; legacy checkpoints without those names fall
    /// back to positional lookup (the first weighted layer).
    pub fn transplant_trunk(
        &self,
        graph: &NetworkGraph,
        weights: &mut Weights,
        donor: &ModelHandle,
    ) -> Result<()> {
        let target = graph.trunk().ok_or_else(|| {
            Error::Model("cannot transplant a trunk into a model without an image branch".into())
        })?;

        let donor_trunk = if donor.graph.layer(INPUT_LAYER).is_some()
            && donor.graph.layer(POST_CONV_LAYER).is_some()
        {
            donor.graph.trunk()
        } else {
            log::warn!("pretrained model is missing named layers; trying legacy positional lookup");
            donor.graph.layers.iter().find(|l| l.has_weights())
        };
        let donor_trunk = donor_trunk.ok_or_else(|| {
            Error::Model(format!(
                "pretrained model does not expose the expected layers \
                 ('{INPUT_LAYER}' input and '{POST_CONV_LAYER}' tap) and has no weighted \
                 layer to fall back on"
            ))
        })?;

        for suffix in ["kernel", "bias"] {
            let src = format!("{}/{suffix}", donor_trunk.name);
            let dst = format!("{}/{suffix}", target.name);
            let tensor = donor.weights.get(&src).ok_or_else(|| {
                Error::Model(format!("pretrained model is missing weight tensor {src}"))
            })?;
            let expected = weights.get(&dst).map(|t| t.shape.clone());
            if expected.as_deref() != Some(&tensor.shape[..]) {
                return Err(Error::Model(format!(
                    "trunk weight shape mismatch for {dst}: expected {:?}, got {:?}",
                    expected, tensor.shape
                )));
            }
            weights.insert(dst, tensor.clone());
        }
        Ok(())
    }
}

/// Trunk layer name for an architecture ("xception", "resnet50", ...)
pub fn trunk_layer_name(architecture: Architecture) -> String {
    serde_json::to_value(architecture)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "trunk".to_string())
}

/// Index below which trunk layers are frozen: `total_layers - (K - 1)`
fn trunk_freeze_index(total_layers: usize, trainable_layers: usize) -> usize {
    total_layers.saturating_sub(trainable_layers.saturating_sub(1))
}
