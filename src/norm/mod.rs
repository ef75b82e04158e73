//! Stain normalization contract
//!
//! Color transfer is consumed through the pluggable [`Normalizer`] trait:
//! `fit` derives channel statistics from a target image once, `transform`
//! maps any tile onto those statistics. The built-in Reinhard-style
//! implementation does per-channel mean/std transfer; the exact color-space
//! math of any particular method is a collaborator concern, only the
//! contract is fixed here.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Per-channel statistics captured from a normalization target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StainStats {
    pub means: [f32; 3],
    pub stds: [f32; 3],
}

/// A stain-normalization method
pub trait Normalizer: Send + Sync {
    /// Method id recorded in model sidecars
    fn method(&self) -> &'static str;

    /// Derive target statistics from a reference image
    fn fit(&self, target: &Array3<f32>) -> StainStats;

    /// Map an image onto previously fitted statistics
    fn transform(&self, image: &Array3<f32>, stats: &StainStats) -> Array3<f32>;
}

/// Reinhard-style channel mean/std transfer
#[derive(Debug, Clone, Copy, Default)]
pub struct ReinhardNormalizer;

impl ReinhardNormalizer {
    fn channel_stats(image: &Array3<f32>) -> StainStats {
        let mut means = [0.0f32; 3];
        let mut stds = [0.0f32; 3];
        let (h, w, c) = image.dim();
        let n = (h * w) as f32;
        for ch in 0..c.min(3) {
            let mut sum = 0.0;
            for y in 0..h {
                for x in 0..w {
                    sum += image[(y, x, ch)];
                }
            }
            let mean = sum / n;
            let mut var = 0.0;
            for y in 0..h {
                for x in 0..w {
                    var += (image[(y, x, ch)] - mean).powi(2);
                }
            }
            means[ch] = mean;
            stds[ch] = (var / n).sqrt();
        }
        StainStats { means, stds }
    }
}

impl Normalizer for ReinhardNormalizer {
    fn method(&self) -> &'static str {
        "reinhard"
    }

    fn fit(&self, target: &Array3<f32>) -> StainStats {
        Self::channel_stats(target)
    }

    fn transform(&self, image: &Array3<f32>, stats: &StainStats) -> Array3<f32> {
        let source = Self::channel_stats(image);
        let mut out = image.clone();
        let (h, w, c) = out.dim();
        for ch in 0..c.min(3) {
            let scale = if source.stds[ch] > 0.0 {
                stats.stds[ch] / source.stds[ch]
            } else {
                0.0
            };
            for y in 0..h {
                for x in 0..w {
                    let v = out[(y, x, ch)];
                    out[(y, x, ch)] = (v - source.means[ch]) * scale + stats.means[ch];
                }
            }
        }
        out
    }
}

/// Method-name registry for sidecar-driven construction
pub fn normalizer_for(method: &str) -> Option<Box<dyn Normalizer>> {
    match method {
        "reinhard" => Some(Box::new(ReinhardNormalizer)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn test_transform_matches_target_statistics() {
        let normalizer = ReinhardNormalizer;
        let target = Array3::from_shape_fn((8, 8, 3), |(y, x, c)| {
            100.0 + 10.0 * c as f32 + (y * x) as f32 * 0.5
        });
        let stats = normalizer.fit(&target);

        let image =
            Array3::from_shape_fn((8, 8, 3), |(y, x, c)| 30.0 * c as f32 + (y + x) as f32);
        let transformed = normalizer.transform(&image, &stats);
        let out_stats = ReinhardNormalizer::channel_stats(&transformed);
        for ch in 0..3 {
            assert_relative_eq!(out_stats.means[ch], stats.means[ch], epsilon = 1e-3);
            assert_relative_eq!(out_stats.stds[ch], stats.stds[ch], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_constant_channel_is_shifted_to_target_mean() {
        let normalizer = ReinhardNormalizer;
        let target = Array3::from_shape_fn((4, 4, 3), |(y, _, _)| 50.0 + y as f32);
        let stats = normalizer.fit(&target);
        let flat = Array3::from_elem((4, 4, 3), 10.0);
        let transformed = normalizer.transform(&flat, &stats);
        // Zero source variance: every pixel lands on the target mean
        assert_relative_eq!(transformed[(0, 0, 0)], stats.means[0]);
    }

    #[test]
    fn test_registry() {
        assert_eq!(normalizer_for("reinhard").unwrap().method(), "reinhard");
        assert!(normalizer_for("macenko").is_none());
    }
}
