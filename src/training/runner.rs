// Stage runner - executes a schedule one stage at a time
//
// Stage N+1 is launched only after stage N's process has exited. The
// checkpoint stage N is expected to write is threaded into stage N+1's
// --resume_from_checkpoint argument.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{error, info, warn};

use super::args::{Accumulation, TrainArgs};
use super::checkpoint::{CheckpointHandoff, TrainerArtifacts};
use super::launcher::TrainerLauncher;
use super::stage::Schedule;
use crate::errors::{StageError, StageExit};

/// What to do when a stage fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Abort the remaining stages on the first failure
    #[default]
    Strict,
    /// Launch every stage regardless of earlier failures
    Literal,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Strict => write!(f, "strict"),
            FailurePolicy::Literal => write!(f, "literal"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(FailurePolicy::Strict),
            "literal" => Ok(FailurePolicy::Literal),
            other => Err(format!("unknown failure mode '{}' (expected strict or literal)", other)),
        }
    }
}

/// A stage as it will be launched, for dry runs
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStage {
    pub stage: usize,
    pub args: TrainArgs,
    pub accumulation: Accumulation,
    pub command: String,
    pub produces: CheckpointHandoff,
}

/// Why a stage ended without an exit status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchFailure {
    pub message: String,
    /// Status reported for the stage (127 when it never started)
    pub exit_code: i32,
}

impl From<&StageError> for LaunchFailure {
    fn from(error: &StageError) -> Self {
        Self {
            message: error.to_string(),
            exit_code: error.exit_code(),
        }
    }
}

/// Outcome of one launched stage
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: usize,
    pub args: TrainArgs,
    /// `None` when the trainer could not be run or supervised
    pub exit: Option<StageExit>,
    pub launch_error: Option<LaunchFailure>,
    pub stderr_tail: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.exit.is_some_and(|exit| exit.success())
    }

    /// Status a shell would report for this stage
    pub fn status(&self) -> i32 {
        match (&self.exit, &self.launch_error) {
            (Some(exit), _) => exit.as_status(),
            (None, Some(failure)) => failure.exit_code,
            (None, None) => 1,
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub policy: FailurePolicy,
    pub outcomes: Vec<StageOutcome>,
    /// Checkpoint the last stage was expected to write
    pub final_checkpoint: Option<CheckpointHandoff>,
    /// Final model and logs the trainer leaves in the last stage's output dir
    pub artifacts: Option<TrainerArtifacts>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(StageOutcome::success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageOutcome> {
        self.outcomes.iter().filter(|o| !o.success())
    }

    /// Exit status of the run: the last stage's status, as a sequential
    /// shell script would return
    pub fn exit_code(&self) -> i32 {
        self.outcomes.last().map(StageOutcome::status).unwrap_or(0)
    }
}

/// Runs a schedule through a launcher
pub struct StageRunner<L: TrainerLauncher> {
    schedule: Schedule,
    launcher: L,
    policy: FailurePolicy,
}

impl<L: TrainerLauncher> StageRunner<L> {
    pub fn new(schedule: Schedule, launcher: L, policy: FailurePolicy) -> Self {
        Self {
            schedule,
            launcher,
            policy,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Every stage's command line with expected handoffs threaded in
    pub fn plan(&self) -> Vec<PlannedStage> {
        let mut handoff: Option<CheckpointHandoff> = None;
        let mut planned = Vec::with_capacity(self.schedule.len());

        for stage in self.schedule.stages() {
            let args = stage.train_args(handoff.as_ref());
            let produces = stage.produces();
            planned.push(PlannedStage {
                stage: stage.number,
                accumulation: args.accumulation(),
                command: self.launcher.command_line(&args.to_args()),
                args,
                produces: produces.clone(),
            });
            handoff = Some(produces);
        }

        planned
    }

    /// Run every stage in order
    ///
    /// Strict mode returns the first failure as an error. Literal mode runs
    /// all stages and records failures in the report.
    pub async fn run(&self) -> Result<RunReport, StageError> {
        self.schedule.validate()?;

        info!(
            stages = self.schedule.len(),
            policy = %self.policy,
            "Starting staged training"
        );

        let mut handoff: Option<CheckpointHandoff> = None;
        let mut outcomes = Vec::with_capacity(self.schedule.len());

        for stage in self.schedule.stages() {
            let args = stage.train_args(handoff.as_ref());

            if let Some(resume) = &args.resume_from_checkpoint {
                let resolved = self.launcher.resolve_path(resume);
                if !resolved.exists() {
                    warn!(
                        stage = stage.number,
                        checkpoint = %resume.display(),
                        "Resume checkpoint not found; the trainer will decide how to proceed"
                    );
                }
            }

            let accumulation = args.accumulation();
            info!(
                stage = stage.number,
                batch_size = accumulation.mini_batch,
                accumulation_steps = accumulation.steps,
                effective_batch_size = accumulation.effective,
                num_epochs = args.num_epochs,
                resume = ?args.resume_from_checkpoint,
                "Launching {}",
                stage
            );
            if accumulation.is_adjusted() {
                warn!(
                    stage = stage.number,
                    requested = ?accumulation.requested,
                    effective = accumulation.effective,
                    "Effective batch size will be rounded down by the trainer"
                );
            }

            let argv = args.to_args();
            let started_at = Utc::now();
            let clock = Instant::now();
            let launched = self.launcher.launch(stage, &argv).await;
            let duration_ms = clock.elapsed().as_millis() as u64;

            let outcome = match launched {
                Ok(status) => StageOutcome {
                    stage: stage.number,
                    args,
                    exit: Some(status.exit),
                    launch_error: None,
                    stderr_tail: status.stderr_tail,
                    started_at,
                    duration_ms,
                },
                Err(e @ (StageError::Spawn { .. } | StageError::Io { .. }))
                    if self.policy == FailurePolicy::Literal =>
                {
                    error!(stage = stage.number, error = %e, "Stage could not be run");
                    StageOutcome {
                        stage: stage.number,
                        args,
                        exit: None,
                        launch_error: Some(LaunchFailure::from(&e)),
                        stderr_tail: Vec::new(),
                        started_at,
                        duration_ms,
                    }
                }
                Err(e) => {
                    error!(stage = stage.number, error = %e, "Stage could not be run");
                    return Err(e);
                }
            };

            if outcome.success() {
                info!(stage = stage.number, duration_ms, "Stage completed");
            } else if self.policy == FailurePolicy::Strict {
                let exit = outcome.exit.unwrap_or_else(StageExit::signaled);
                error!(stage = stage.number, exit = %exit, "Stage failed, aborting remaining stages");
                return Err(StageError::Failed {
                    stage: stage.number,
                    exit,
                    stderr_tail: outcome.stderr_tail,
                });
            } else {
                warn!(
                    stage = stage.number,
                    status = outcome.status(),
                    "Stage failed, continuing (literal mode)"
                );
            }

            outcomes.push(outcome);
            handoff = Some(stage.produces());
        }

        info!(
            stages = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.success()).count(),
            "Staged training finished"
        );

        Ok(RunReport {
            policy: self.policy,
            outcomes,
            final_checkpoint: handoff,
            artifacts: self.schedule.stages().last().map(|stage| stage.artifacts()),
        })
    }
}
