// Checkpoint naming and handoff between stages
//
// The trainer owns the checkpoint format; this side only knows where files land.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Checkpoint file prefix written by the trainer
pub const CHECKPOINT_PREFIX: &str = "checkpoint_epoch_";

/// Checkpoint file extension
pub const CHECKPOINT_EXTENSION: &str = "pt";

/// Final model written after the last epoch of a run
pub const FINAL_MODEL_FILENAME: &str = "symbolic_model.pt";

/// Log directory the trainer keeps under its output directory
pub const LOGS_DIRNAME: &str = "logs";

/// `checkpoint_epoch_<N>.pt`
pub fn checkpoint_filename(epoch: u32) -> String {
    format!("{}{}.{}", CHECKPOINT_PREFIX, epoch, CHECKPOINT_EXTENSION)
}

/// Path of the checkpoint for `epoch` completed epochs under `output_dir`
pub fn checkpoint_path(output_dir: &Path, epoch: u32) -> PathBuf {
    output_dir.join(checkpoint_filename(epoch))
}

/// Epoch number encoded in a checkpoint file name, if it follows the convention
pub fn parse_checkpoint_epoch(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_EXTENSION)?
        .strip_suffix('.')?;
    stem.parse().ok()
}

/// Checkpoint a finished stage hands to the next one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointHandoff {
    /// Path passed verbatim to `--resume_from_checkpoint`
    pub path: PathBuf,
    /// Number of epochs completed when the checkpoint was written
    pub epoch: u32,
}

impl CheckpointHandoff {
    /// Handoff for the checkpoint written after `epoch` epochs
    pub fn for_epoch(output_dir: &Path, epoch: u32) -> Self {
        Self {
            path: checkpoint_path(output_dir, epoch),
            epoch,
        }
    }

    /// Handoff for an existing checkpoint path, epoch taken from its name
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let epoch = parse_checkpoint_epoch(&path)?;
        Some(Self { path, epoch })
    }
}

/// Files the trainer leaves in its output directory besides checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainerArtifacts {
    pub output_dir: PathBuf,
    /// Model saved after the last epoch
    pub final_model: PathBuf,
    /// Training and output logs
    pub logs_dir: PathBuf,
}

impl TrainerArtifacts {
    pub fn for_output_dir(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            final_model: output_dir.join(FINAL_MODEL_FILENAME),
            logs_dir: output_dir.join(LOGS_DIRNAME),
        }
    }
}

/// List checkpoints in `output_dir` (sorted by epoch, newest first)
///
/// Returns an empty list when the directory does not exist.
pub fn list_checkpoints(output_dir: &Path) -> Result<Vec<CheckpointHandoff>> {
    let mut checkpoints = Vec::new();

    if !output_dir.is_dir() {
        return Ok(checkpoints);
    }

    for entry in fs::read_dir(output_dir)
        .with_context(|| format!("Failed to read output directory: {}", output_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(handoff) = CheckpointHandoff::from_path(path) {
            checkpoints.push(handoff);
        }
    }

    checkpoints.sort_by(|a, b| b.epoch.cmp(&a.epoch));

    Ok(checkpoints)
}

/// Most advanced checkpoint in `output_dir`
pub fn latest_checkpoint(output_dir: &Path) -> Result<Option<CheckpointHandoff>> {
    Ok(list_checkpoints(output_dir)?.into_iter().next())
}
