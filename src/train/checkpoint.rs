//! Model persistence and checkpoint directories
//!
//! A saved model directory holds the serialized network (`model.json`), a
//! SHA-256 digest of that file, and a small metadata record. Checkpoint
//! directories created during training (`{name}_epoch{N}/`) additionally
//! receive copies of the run's `hyperparameters.json` and
//! `slide_manifest.log`; a failed sidecar copy is logged and does not abort
//! the run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::{ModelHandle, Weights};

pub const MODEL_FILE: &str = "model.json";
pub const DIGEST_FILE: &str = "model.sha256";
pub const META_FILE: &str = "checkpoint.json";
pub const HP_FILE: &str = "hyperparameters.json";
pub const SLIDE_MANIFEST_FILE: &str = "slide_manifest.log";

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointMeta {
    epoch: Option<usize>,
    saved_at: chrono::DateTime<chrono::Utc>,
}

/// Write a model (graph + weights) into `dir`
pub fn save_model(model: &ModelHandle, dir: &Path) -> Result<()> {
    save_model_at_epoch(model, dir, None)
}

fn save_model_at_epoch(model: &ModelHandle, dir: &Path, epoch: Option<usize>) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let serialized = serde_json::to_string(model)?;
    std::fs::write(dir.join(MODEL_FILE), &serialized)?;

    let digest = Sha256::digest(serialized.as_bytes());
    std::fs::write(dir.join(DIGEST_FILE), format!("{digest:x}"))?;

    let meta = CheckpointMeta { epoch, saved_at: chrono::Utc::now() };
    std::fs::write(dir.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;
    Ok(())
}

/// Load a model saved with [`save_model`], verifying its digest
pub fn load_model(dir: &Path) -> Result<ModelHandle> {
    let path = dir.join(MODEL_FILE);
    let serialized = std::fs::read_to_string(&path)
        .map_err(|e| Error::User(format!("cannot read saved model at {}: {e}", path.display())))?;
    if let Ok(expected) = std::fs::read_to_string(dir.join(DIGEST_FILE)) {
        let digest = format!("{:x}", Sha256::digest(serialized.as_bytes()));
        if digest != expected.trim() {
            return Err(Error::Model(format!(
                "saved model at {} failed its integrity check",
                dir.display()
            )));
        }
    }
    Ok(serde_json::from_str(&serialized)?)
}

/// Load a weights-only checkpoint file
pub fn load_weights(path: &Path) -> Result<Weights> {
    let serialized = std::fs::read_to_string(path)
        .map_err(|e| Error::User(format!("cannot read checkpoint at {}: {e}", path.display())))?;
    Ok(serde_json::from_str(&serialized)?)
}

/// Persist a training checkpoint: full model plus sidecar copies.
///
/// The directory is `{outdir}/{name}_epoch{epoch}`. Sidecar copy failures
/// (missing `hyperparameters.json` or `slide_manifest.log` in `outdir`) are
/// logged as warnings; the run continues.
pub fn write_checkpoint(
    model: &ModelHandle,
    outdir: &Path,
    name: &str,
    epoch: usize,
) -> Result<PathBuf> {
    let dir = outdir.join(format!("{name}_epoch{epoch}"));
    save_model_at_epoch(model, &dir, Some(epoch))?;

    for sidecar in [HP_FILE, SLIDE_MANIFEST_FILE] {
        let src = outdir.join(sidecar);
        let dst = dir.join(sidecar);
        if let Err(e) = std::fs::copy(&src, &dst) {
            log::warn!("unable to copy {sidecar} into {}: {e}", dir.display());
        }
    }
    log::info!("trained model saved to {}", dir.display());
    Ok(dir)
}
