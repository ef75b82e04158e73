//! Interleaved, balanced tile streams over sharded records
//!
//! A [`TileStream`] draws `(slide id, image)` pairs from a set of shards.
//! Infinite streams sample per draw according to the balancing policy;
//! finite streams visit every eligible tile exactly once in shuffled order
//! and can be restarted with [`TileStream::reset`]. Every draw carries its
//! originating slide id so downstream metric aggregation needs no parallel
//! stream.

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::data::{AnnotationSet, Shard};
use crate::error::{Error, Result};
use crate::hparams::Balance;

/// Options controlling stream construction
#[derive(Debug, Clone)]
pub struct InterleaveOptions {
    pub balance: Balance,
    /// Finite streams visit each eligible tile once per pass
    pub finite: bool,
    /// Truncate each slide at this many tiles; 0 disables the cap
    pub max_tiles: usize,
    /// Exclude slides holding fewer tiles than this
    pub min_tiles: usize,
    /// Apply random x/y flips per draw
    pub augment: bool,
    /// Seed for reproducible draws; random otherwise
    pub seed: Option<u64>,
}

impl Default for InterleaveOptions {
    fn default() -> Self {
        Self {
            balance: Balance::None,
            finite: false,
            max_tiles: 0,
            min_tiles: 0,
            augment: false,
            seed: None,
        }
    }
}

#[derive(Debug)]
struct Entry<'a> {
    shard: &'a Shard,
    /// Eligible tile count after min/max filtering
    count: usize,
    category: String,
    patient: String,
}

/// Restartable stream of `(slide id, tile image)` draws
#[derive(Debug)]
pub struct TileStream<'a> {
    entries: Vec<Entry<'a>>,
    /// Entry indices grouped per category, populated for category balancing
    categories: Vec<Vec<usize>>,
    /// Entry indices grouped per patient, populated for patient balancing
    patients: Vec<Vec<usize>>,
    /// Shuffled (entry, tile) pass order for finite streams
    pass: Vec<(usize, usize)>,
    cursor: usize,
    total: usize,
    opts: InterleaveOptions,
    rng: StdRng,
}

impl<'a> TileStream<'a> {
    /// Build a stream over `shards`.
    ///
    /// Every slide referenced by a shard must have an annotation entry;
    /// a missing entry fails the run with a model error.
    pub fn new(
        shards: &'a [Shard],
        annotations: &AnnotationSet,
        opts: InterleaveOptions,
    ) -> Result<Self> {
        let mut entries = Vec::new();
        for shard in shards {
            let ann = annotations.get(&shard.slide).ok_or_else(|| {
                Error::Model(format!("no annotation entry for slide {}", shard.slide))
            })?;
            if shard.tiles.len() < opts.min_tiles {
                log::debug!(
                    "excluding slide {} ({} tiles < minimum {})",
                    shard.slide,
                    shard.tiles.len(),
                    opts.min_tiles
                );
                continue;
            }
            let count = if opts.max_tiles > 0 {
                shard.tiles.len().min(opts.max_tiles)
            } else {
                shard.tiles.len()
            };
            if count == 0 {
                continue;
            }
            let category = annotations.category_of(&shard.slide).unwrap_or_default();
            entries.push(Entry { shard, count, category, patient: ann.patient.clone() });
        }

        let rng = match opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let total = entries.iter().map(|e| e.count).sum();

        let mut stream = Self {
            categories: group_by(&entries, |e| e.category.clone()),
            patients: group_by(&entries, |e| e.patient.clone()),
            entries,
            pass: Vec::new(),
            cursor: 0,
            total,
            opts,
            rng,
        };
        if stream.opts.finite {
            stream.shuffle_pass();
        }
        Ok(stream)
    }

    /// Total eligible tile count, for step-count computation
    pub fn total_tiles(&self) -> usize {
        self.total
    }

    /// Restart the stream; finite passes are reshuffled
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.opts.finite {
            self.shuffle_pass();
        }
    }

    fn shuffle_pass(&mut self) {
        self.pass.clear();
        for (ei, entry) in self.entries.iter().enumerate() {
            self.pass.extend((0..entry.count).map(|ti| (ei, ti)));
        }
        self.pass.shuffle(&mut self.rng);
    }

    fn draw_indices(&mut self) -> Option<(usize, usize)> {
        if self.total == 0 {
            return None;
        }
        if self.opts.finite {
            let pair = self.pass.get(self.cursor).copied();
            self.cursor += 1;
            return pair;
        }
        let ei = match self.opts.balance {
            Balance::None => {
                // Uniform over tiles: entry weighted by its tile count
                let mut r = self.rng.random_range(0..self.total);
                let mut pick = 0;
                for (i, entry) in self.entries.iter().enumerate() {
                    if r < entry.count {
                        pick = i;
                        break;
                    }
                    r -= entry.count;
                }
                pick
            }
            Balance::Category => {
                let group = &self.categories[self.rng.random_range(0..self.categories.len())];
                weighted_pick(&self.entries, group, &mut self.rng)
            }
            Balance::Patient => {
                let group = &self.patients[self.rng.random_range(0..self.patients.len())];
                weighted_pick(&self.entries, group, &mut self.rng)
            }
        };
        let ti = self.rng.random_range(0..self.entries[ei].count);
        Some((ei, ti))
    }

    /// Draw the next `(slide id, image)` pair; `None` once a finite pass is
    /// exhausted or when no tiles are eligible.
    pub fn next_draw(&mut self) -> Option<(String, Array3<f32>)> {
        let (ei, ti) = self.draw_indices()?;
        let entry = &self.entries[ei];
        let mut image = entry.shard.tiles[ti].image.clone();
        if self.opts.augment {
            if self.rng.random_bool(0.5) {
                image.invert_axis(ndarray::Axis(1));
            }
            if self.rng.random_bool(0.5) {
                image.invert_axis(ndarray::Axis(0));
            }
        }
        Some((entry.shard.slide.clone(), image))
    }
}

fn group_by<'a, F>(entries: &[Entry<'a>], key: F) -> Vec<Vec<usize>>
where
    F: Fn(&Entry<'a>) -> String,
{
    let mut groups: std::collections::BTreeMap<String, Vec<usize>> = Default::default();
    for (i, entry) in entries.iter().enumerate() {
        groups.entry(key(entry)).or_default().push(i);
    }
    groups.into_values().collect()
}

/// Pick an entry from `group`, weighted by eligible tile count
fn weighted_pick(entries: &[Entry<'_>], group: &[usize], rng: &mut StdRng) -> usize {
    let total: usize = group.iter().map(|&i| entries[i].count).sum();
    let mut r = rng.random_range(0..total);
    for &i in group {
        if r < entries[i].count {
            return i;
        }
        r -= entries[i].count;
    }
    group[group.len() - 1]
}
