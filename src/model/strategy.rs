//! Per-model-type strategies
//!
//! The three outcome types vary in exactly three places: output activation
//! and loss wiring, label encoding, and the evaluation metric. A single
//! [`OutcomeStrategy`] value driven by [`ModelType`] supplies all three.

use serde::{Deserialize, Serialize};

use crate::data::SlideAnnotation;
use crate::error::{Error, Result};
use crate::hparams::ModelType;

/// Output-head activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Softmax,
    Linear,
}

/// Evaluation metric family per model type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Auroc,
    RSquared,
    ConcordanceIndex,
}

/// Encoded labels for one example
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedLabel {
    /// Label values, one per outcome (class index, regression target, or
    /// time-to-event)
    pub values: Vec<f32>,
    /// Event indicator, survival models only
    pub event: Option<f32>,
}

/// Strategy object for one model type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeStrategy {
    model_type: ModelType,
}

impl OutcomeStrategy {
    pub fn for_type(model_type: ModelType) -> Self {
        Self { model_type }
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    /// Activation applied by every output head
    pub fn activation(&self) -> Activation {
        match self.model_type {
            ModelType::Categorical => Activation::Softmax,
            ModelType::Linear | ModelType::Survival => Activation::Linear,
        }
    }

    /// Metric family used for tile/slide/patient rollups
    pub fn metric_kind(&self) -> MetricKind {
        match self.model_type {
            ModelType::Categorical => MetricKind::Auroc,
            ModelType::Linear => MetricKind::RSquared,
            ModelType::Survival => MetricKind::ConcordanceIndex,
        }
    }

    /// Encode a slide's annotation into per-example labels.
    ///
    /// Survival models read the event indicator from the first slide-level
    /// feature; the remaining features stay model inputs.
    pub fn encode_label(&self, slide: &str, ann: &SlideAnnotation) -> Result<EncodedLabel> {
        match self.model_type {
            ModelType::Categorical | ModelType::Linear => {
                Ok(EncodedLabel { values: ann.outcome.clone(), event: None })
            }
            ModelType::Survival => {
                let features = ann.features.as_ref().ok_or_else(|| {
                    Error::Model(format!(
                        "survival models require an event input; slide {slide} has no \
                         slide-level features"
                    ))
                })?;
                let event = *features.first().ok_or_else(|| {
                    Error::Model(format!(
                        "survival models require an event input; slide {slide} has an empty \
                         feature vector"
                    ))
                })?;
                Ok(EncodedLabel { values: ann.outcome.clone(), event: Some(event) })
            }
        }
    }

    /// Non-event slide-feature width available as model input
    pub fn input_feature_width(&self, num_slide_features: usize) -> usize {
        match self.model_type {
            ModelType::Survival => num_slide_features.saturating_sub(1),
            _ => num_slide_features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_wiring() {
        let s = OutcomeStrategy::for_type(ModelType::Categorical);
        assert_eq!(s.activation(), Activation::Softmax);
        assert_eq!(s.metric_kind(), MetricKind::Auroc);

        let s = OutcomeStrategy::for_type(ModelType::Linear);
        assert_eq!(s.activation(), Activation::Linear);
        assert_eq!(s.metric_kind(), MetricKind::RSquared);

        let s = OutcomeStrategy::for_type(ModelType::Survival);
        assert_eq!(s.activation(), Activation::Linear);
        assert_eq!(s.metric_kind(), MetricKind::ConcordanceIndex);
    }

    #[test]
    fn test_survival_label_reads_event_from_features() {
        let s = OutcomeStrategy::for_type(ModelType::Survival);
        let ann = SlideAnnotation::new("p1", vec![24.5]).with_features(vec![1.0, 0.3]);
        let label = s.encode_label("s1", &ann).unwrap();
        assert_eq!(label.values, vec![24.5]);
        assert_eq!(label.event, Some(1.0));
        assert_eq!(s.input_feature_width(2), 1);
    }

    #[test]
    fn test_survival_label_without_features_fails() {
        let s = OutcomeStrategy::for_type(ModelType::Survival);
        let ann = SlideAnnotation::new("p1", vec![24.5]);
        let err = s.encode_label("s1", &ann).unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(format!("{err}").contains("event input"));
    }

    #[test]
    fn test_categorical_label_is_raw_outcome() {
        let s = OutcomeStrategy::for_type(ModelType::Categorical);
        let ann = SlideAnnotation::new("p1", vec![2.0]);
        let label = s.encode_label("s1", &ann).unwrap();
        assert_eq!(label.values, vec![2.0]);
        assert_eq!(label.event, None);
    }
}
