//! Per-epoch training results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::LevelMetrics;

/// Metrics recorded for one evaluated epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub train_metrics: BTreeMap<String, f64>,
    pub val_metrics: BTreeMap<String, f64>,
    /// Tile/slide/patient rollups, present unless metrics were skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<BTreeMap<String, f64>>,
}

impl EpochRecord {
    /// Attach tile/slide/patient rollups
    pub fn with_rollups(mut self, rollups: LevelMetrics) -> Self {
        self.tile = Some(rollups.tile);
        self.slide = Some(rollups.slide);
        self.patient = Some(rollups.patient);
        self
    }
}

/// Nested results mapping `epoch{N}` labels to their metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochResults {
    pub epochs: BTreeMap<String, EpochRecord>,
}

impl EpochResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label for an epoch number
    pub fn label(epoch: usize) -> String {
        format!("epoch{epoch}")
    }

    pub fn insert(&mut self, epoch: usize, record: EpochRecord) {
        self.epochs.insert(Self::label(epoch), record);
    }

    pub fn get(&self, label: &str) -> Option<&EpochRecord> {
        self.epochs.get(label)
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}
