//! Slide annotations, tile shards, and manifests
//!
//! Annotations map slide ids to patient, outcome label(s), and optional
//! slide-level input features. Shards are in-memory tile containers, one per
//! slide; the [`Manifest`] records per-shard tile counts for step-count
//! computation and balanced sampling. File-format parsing (CSV/JSON dataset
//! ingest) is a collaborator concern and lives outside this crate.

mod interleave;

pub use interleave::{InterleaveOptions, TileStream};

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-slide annotation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideAnnotation {
    /// Patient this slide belongs to
    pub patient: String,
    /// Outcome label(s); scalar outcomes are single-element vectors
    pub outcome: Vec<f32>,
    /// Optional slide-level input features (for survival models the first
    /// feature is the event indicator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<f32>>,
}

impl SlideAnnotation {
    pub fn new(patient: impl Into<String>, outcome: Vec<f32>) -> Self {
        Self { patient: patient.into(), outcome, features: None }
    }

    pub fn with_features(mut self, features: Vec<f32>) -> Self {
        self.features = Some(features);
        self
    }
}

/// Annotation collection keyed by slide id
///
/// Insertion order is irrelevant; iteration is in slide-id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSet {
    slides: BTreeMap<String, SlideAnnotation>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slide: impl Into<String>, annotation: SlideAnnotation) {
        self.slides.insert(slide.into(), annotation);
    }

    pub fn get(&self, slide: &str) -> Option<&SlideAnnotation> {
        self.slides.get(slide)
    }

    pub fn contains(&self, slide: &str) -> bool {
        self.slides.contains_key(slide)
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SlideAnnotation)> {
        self.slides.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Label dimensionality, checked for consistency across all slides
    pub fn outcome_width(&self) -> Result<usize> {
        let mut width = None;
        for (slide, ann) in self.iter() {
            match width {
                None => width = Some(ann.outcome.len()),
                Some(w) if w != ann.outcome.len() => {
                    return Err(Error::Model(format!(
                        "outcome label for slide {slide} has {} values, expected {w}",
                        ann.outcome.len()
                    )))
                }
                _ => {}
            }
        }
        width.ok_or_else(|| Error::Model("annotation set is empty".into()))
    }

    /// Distinct class count for each outcome index
    pub fn classes_per_outcome(&self) -> Result<BTreeMap<usize, usize>> {
        let width = self.outcome_width()?;
        let mut classes = BTreeMap::new();
        for oi in 0..width {
            let mut distinct: Vec<i64> =
                self.iter().map(|(_, ann)| ann.outcome[oi] as i64).collect();
            distinct.sort_unstable();
            distinct.dedup();
            classes.insert(oi, distinct.len());
        }
        Ok(classes)
    }

    /// Category key of a slide (first outcome label), for balanced sampling
    pub fn category_of(&self, slide: &str) -> Option<String> {
        self.get(slide).map(|ann| format_label(ann.outcome.first().copied().unwrap_or(0.0)))
    }
}

/// One tile image, `(height, width, channels)`
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub image: Array3<f32>,
}

impl Tile {
    pub fn new(image: Array3<f32>) -> Self {
        Self { image }
    }
}

/// A container of tiles for one slide
#[derive(Debug, Clone)]
pub struct Shard {
    pub slide: String,
    pub tiles: Vec<Tile>,
}

impl Shard {
    pub fn new(slide: impl Into<String>, tiles: Vec<Tile>) -> Self {
        Self { slide: slide.into(), tiles }
    }

    /// Shard id; shards are keyed by the slide they hold
    pub fn id(&self) -> &str {
        &self.slide
    }
}

/// Mapping shard id -> tile count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    counts: BTreeMap<String, usize>,
}

impl Manifest {
    pub fn from_shards(shards: &[Shard]) -> Self {
        let counts = shards.iter().map(|s| (s.slide.clone(), s.tiles.len())).collect();
        Self { counts }
    }

    pub fn tiles(&self, shard: &str) -> usize {
        self.counts.get(shard).copied().unwrap_or(0)
    }

    pub fn total_tiles(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

/// Format an outcome label the way the manifest and category keys expect:
/// integral values print without a fraction.
pub fn format_label(value: f32) -> String {
    if value.fract() == 0.0 && value.abs() < 1e9 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Write `slide_manifest.log`: one row per slide assigned to training or
/// validation, with its outcome label. Slides without an annotation entry are
/// skipped.
pub fn write_slide_manifest(
    path: &Path,
    annotations: &AnnotationSet,
    train_shards: &[Shard],
    val_shards: &[Shard],
) -> Result<()> {
    let mut out = std::fs::File::create(path)?;
    writeln!(out, "slide,dataset,outcome_label")?;
    for (shards, dataset) in [(train_shards, "training"), (val_shards, "validation")] {
        for shard in shards {
            if let Some(ann) = annotations.get(&shard.slide) {
                let label: Vec<String> = ann.outcome.iter().map(|&v| format_label(v)).collect();
                writeln!(out, "{},{},{}", shard.slide, dataset, label.join(";"))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use ndarray::Array3;

    /// Build a shard of `n` constant-valued 4x4x3 tiles
    pub fn shard(slide: &str, n: usize, fill: f32) -> Shard {
        let tiles = (0..n).map(|_| Tile::new(Array3::from_elem((4, 4, 3), fill))).collect();
        Shard::new(slide, tiles)
    }

    /// Annotations for slides with a single categorical outcome
    pub fn annotations(entries: &[(&str, &str, f32)]) -> AnnotationSet {
        let mut set = AnnotationSet::new();
        for &(slide, patient, label) in entries {
            set.insert(slide, SlideAnnotation::new(patient, vec![label]));
        }
        set
    }
}
