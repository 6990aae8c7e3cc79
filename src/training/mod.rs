// Training module - staged runs of the external trainer

pub mod args;
pub mod checkpoint;
pub mod launcher;
pub mod runner;
pub mod stage;

pub use args::{Accumulation, TrainArgs};
pub use checkpoint::{latest_checkpoint, list_checkpoints, CheckpointHandoff, TrainerArtifacts};
pub use launcher::{LaunchStatus, PythonLauncher, StderrTail, TrainerLauncher};
pub use runner::{
    FailurePolicy, LaunchFailure, PlannedStage, RunReport, StageOutcome, StageRunner,
};
pub use stage::{Schedule, Stage};
