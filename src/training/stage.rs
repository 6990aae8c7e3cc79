// Stages and the fixed training schedule

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::args::TrainArgs;
use super::checkpoint::{CheckpointHandoff, TrainerArtifacts};
use crate::errors::StageError;

/// Output directory shared by all stages of the default schedule
pub const DEFAULT_OUTPUT_DIR: &str = "./outputs/symbolic_test";

/// Mini-batch size used by every default stage
pub const DEFAULT_BATCH_SIZE: u32 = 8;

/// Sample cap used by every default stage
pub const DEFAULT_MAX_SAMPLES: u64 = 100_000;

/// (effective batch size, epoch target) per default stage
const DEFAULT_STAGES: [(u32, u32); 3] = [(8, 1), (32, 3), (64, 8)];

/// One invocation of the trainer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    /// 1-based position in the schedule
    pub number: usize,
    /// Literal arguments; the runner threads the resume path in
    pub args: TrainArgs,
}

impl Stage {
    /// Arguments for this stage, resuming from the previous stage's handoff
    ///
    /// Without a handoff the stage keeps whatever resume path it was built with.
    pub fn train_args(&self, resume: Option<&CheckpointHandoff>) -> TrainArgs {
        match resume {
            Some(handoff) => self.args.clone().with_resume(handoff.path.clone()),
            None => self.args.clone(),
        }
    }

    /// Checkpoint this stage is expected to leave behind
    pub fn produces(&self) -> CheckpointHandoff {
        CheckpointHandoff::for_epoch(&self.args.output_dir, self.args.num_epochs)
    }

    /// Final model and logs the trainer writes next to the checkpoints
    pub fn artifacts(&self) -> TrainerArtifacts {
        TrainerArtifacts::for_output_dir(&self.args.output_dir)
    }

    pub fn output_dir(&self) -> &Path {
        &self.args.output_dir
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {}", self.number)
    }
}

/// Ordered list of stages run back to back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    stages: Vec<Stage>,
}

impl Schedule {
    /// Build a schedule, numbering stages from 1
    pub fn new(args: Vec<TrainArgs>) -> Self {
        let stages = args
            .into_iter()
            .enumerate()
            .map(|(i, args)| Stage { number: i + 1, args })
            .collect();
        Self { stages }
    }

    /// Three-stage symbolic transformer run: effective batch 8 → 32 → 64,
    /// epoch target 1 → 3 → 8, each stage resuming from the last
    pub fn symbolic_default() -> Self {
        let output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        Self::new(
            DEFAULT_STAGES
                .iter()
                .map(|&(effective_batch_size, num_epochs)| TrainArgs {
                    use_proj: true,
                    use_v: true,
                    batch_size: DEFAULT_BATCH_SIZE,
                    effective_batch_size: Some(effective_batch_size),
                    num_epochs,
                    max_samples: DEFAULT_MAX_SAMPLES,
                    output_dir: output_dir.clone(),
                    resume_from_checkpoint: None,
                })
                .collect(),
        )
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Reject schedules the trainer cannot make progress on
    pub fn validate(&self) -> Result<(), StageError> {
        if self.stages.is_empty() {
            return Err(StageError::InvalidSchedule("no stages".to_string()));
        }

        for stage in &self.stages {
            if stage.args.batch_size == 0 {
                return Err(StageError::InvalidSchedule(format!(
                    "{} has a zero batch size",
                    stage
                )));
            }
            if stage.args.num_epochs == 0 {
                return Err(StageError::InvalidSchedule(format!(
                    "{} has a zero epoch target",
                    stage
                )));
            }
        }

        // The trainer treats --num_epochs as absolute: a resumed stage whose
        // target does not exceed its checkpoint trains nothing.
        for pair in self.stages.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.args.num_epochs <= prev.args.num_epochs {
                return Err(StageError::InvalidSchedule(format!(
                    "{} targets {} epochs but resumes after {}",
                    next, next.args.num_epochs, prev.args.num_epochs
                )));
            }
        }

        Ok(())
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::symbolic_default()
    }
}
