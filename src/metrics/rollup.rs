//! Tile, slide, and patient-level metric rollups

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::AnnotationSet;
use crate::error::{Error, Result};
use crate::metrics::{concordance_index, macro_auroc, r_squared};
use crate::model::MetricKind;

/// Accumulated per-tile predictions for one evaluation pass
#[derive(Debug, Clone, Default)]
pub struct TilePredictions {
    /// Originating slide per tile
    pub slides: Vec<String>,
    /// One prediction array per outcome head, `(n_tiles, head_width)`
    pub outputs: Vec<Array2<f32>>,
    /// Labels, `(n_tiles, outcome_width)`
    pub labels: Option<Array2<f32>>,
    /// Survival event indicators per tile
    pub events: Vec<f32>,
}

impl TilePredictions {
    /// Append one batch of predictions
    pub fn push(
        &mut self,
        slides: &[String],
        outputs: &[Array2<f32>],
        labels: &Array2<f32>,
        events: Option<&[f32]>,
    ) {
        self.slides.extend_from_slice(slides);
        if self.outputs.is_empty() {
            self.outputs = outputs.to_vec();
        } else {
            for (acc, out) in self.outputs.iter_mut().zip(outputs) {
                *acc = ndarray::concatenate(ndarray::Axis(0), &[acc.view(), out.view()])
                    .expect("prediction widths must agree across batches");
            }
        }
        self.labels = Some(match self.labels.take() {
            None => labels.clone(),
            Some(acc) => {
                ndarray::concatenate(ndarray::Axis(0), &[acc.view(), labels.view()])
                    .expect("label widths must agree across batches")
            }
        });
        if let Some(events) = events {
            self.events.extend_from_slice(events);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }
}

/// Metric values per aggregation level, keyed by outcome name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelMetrics {
    pub tile: BTreeMap<String, f64>,
    pub slide: BTreeMap<String, f64>,
    pub patient: BTreeMap<String, f64>,
}

/// Group rows by key, averaging predictions and carrying the first label
struct Grouped {
    keys: Vec<String>,
    outputs: Vec<Array2<f32>>,
    labels: Array2<f32>,
    events: Vec<f32>,
}

fn group_rows(
    keys: &[String],
    outputs: &[Array2<f32>],
    labels: &Array2<f32>,
    events: &[f32],
) -> Grouped {
    let mut order: Vec<String> = Vec::new();
    let mut index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row, key) in keys.iter().enumerate() {
        if !index.contains_key(key) {
            order.push(key.clone());
        }
        index.entry(key.clone()).or_default().push(row);
    }

    let mut grouped_outputs = Vec::new();
    for output in outputs {
        let mut acc = Array2::zeros((order.len(), output.ncols()));
        for (gi, key) in order.iter().enumerate() {
            let rows = &index[key];
            for &row in rows {
                acc.row_mut(gi).scaled_add(1.0 / rows.len() as f32, &output.row(row));
            }
        }
        grouped_outputs.push(acc);
    }
    let mut grouped_labels = Array2::zeros((order.len(), labels.ncols()));
    let mut grouped_events = Vec::with_capacity(order.len());
    for (gi, key) in order.iter().enumerate() {
        let first = index[key][0];
        grouped_labels.row_mut(gi).assign(&labels.row(first));
        grouped_events.push(events.get(first).copied().unwrap_or(0.0));
    }
    Grouped { keys: order, outputs: grouped_outputs, labels: grouped_labels, events: grouped_events }
}

fn level_values(
    kind: MetricKind,
    outcome_names: &[String],
    outputs: &[Array2<f32>],
    labels: &Array2<f32>,
    events: &[f32],
) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();
    match kind {
        MetricKind::Auroc => {
            for (oi, name) in outcome_names.iter().enumerate() {
                if let Some(probs) = outputs.get(oi) {
                    let classes: Vec<usize> =
                        labels.column(oi).iter().map(|&l| l as usize).collect();
                    if let Some(value) = macro_auroc(probs, &classes) {
                        values.insert(name.clone(), value);
                    }
                }
            }
        }
        MetricKind::RSquared => {
            // Linear models expose a single head with one column per outcome
            if let Some(preds) = outputs.first() {
                for (oi, name) in outcome_names.iter().enumerate() {
                    if oi < preds.ncols() {
                        let p: Vec<f32> = preds.column(oi).to_vec();
                        let t: Vec<f32> = labels.column(oi).to_vec();
                        if let Some(value) = r_squared(&p, &t) {
                            values.insert(name.clone(), value);
                        }
                    }
                }
            }
        }
        MetricKind::ConcordanceIndex => {
            if let Some(risk) = outputs.first() {
                if risk.nrows() == events.len() {
                    let r: Vec<f32> = risk.column(0).to_vec();
                    let t: Vec<f32> = labels.column(0).to_vec();
                    if let Some(value) = concordance_index(&r, &t, events) {
                        let name =
                            outcome_names.first().cloned().unwrap_or_else(|| "Outcome 0".into());
                        values.insert(name, value);
                    }
                }
            }
        }
    }
    values
}

impl LevelMetrics {
    /// Compute tile, slide (mean of a slide's tiles), and patient (mean of a
    /// patient's slides) level metrics from accumulated predictions.
    pub fn compute(
        preds: &TilePredictions,
        annotations: &AnnotationSet,
        outcome_names: &[String],
        kind: MetricKind,
    ) -> Result<Self> {
        let labels = preds
            .labels
            .as_ref()
            .ok_or_else(|| Error::Model("no predictions were accumulated".into()))?;

        let tile = level_values(kind, outcome_names, &preds.outputs, labels, &preds.events);

        let by_slide = group_rows(&preds.slides, &preds.outputs, labels, &preds.events);
        let slide =
            level_values(kind, outcome_names, &by_slide.outputs, &by_slide.labels, &by_slide.events);

        let patients: Vec<String> = by_slide
            .keys
            .iter()
            .map(|slide| {
                annotations
                    .get(slide)
                    .map(|a| a.patient.clone())
                    .unwrap_or_else(|| slide.clone())
            })
            .collect();
        let by_patient =
            group_rows(&patients, &by_slide.outputs, &by_slide.labels, &by_slide.events);
        let patient = level_values(
            kind,
            outcome_names,
            &by_patient.outputs,
            &by_patient.labels,
            &by_patient.events,
        );

        Ok(Self { tile, slide, patient })
    }
}
