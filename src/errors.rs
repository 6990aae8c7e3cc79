// Stage failures and user-friendly error messages
//
// StageError is the typed failure taxonomy of a run. The formatting helpers
// turn errors into actionable terminal output.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Exit code when the trainer could not be started
pub const EXIT_SPAWN_FAILED: i32 = 127;

/// Exit code for a bad configuration or schedule
pub const EXIT_CONFIG: i32 = 2;

/// How a trainer process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageExit {
    /// Process exit code, `None` when terminated by a signal
    pub code: Option<i32>,
}

impl StageExit {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn signaled() -> Self {
        Self { code: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Shell-style status: the exit code, or 1 if the process was killed
    pub fn as_status(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

impl From<std::process::ExitStatus> for StageExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for StageExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Errors raised while running the stage schedule
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage {stage} could not be started ({program}): {source}")]
    Spawn {
        stage: usize,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage {stage} failed: {exit}")]
    Failed {
        stage: usize,
        exit: StageExit,
        stderr_tail: Vec<String>,
    },

    #[error("I/O error while supervising stage {stage}: {source}")]
    Io {
        stage: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl StageError {
    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            StageError::Spawn { .. } => EXIT_SPAWN_FAILED,
            StageError::Failed { exit, .. } => match exit.as_status() {
                0 => 1,
                code => code,
            },
            StageError::Io { .. } => 1,
            StageError::InvalidSchedule(_) => EXIT_CONFIG,
        }
    }

    /// Stage number the error belongs to
    pub fn stage(&self) -> Option<usize> {
        match self {
            StageError::Spawn { stage, .. }
            | StageError::Failed { stage, .. }
            | StageError::Io { stage, .. } => Some(*stage),
            StageError::InvalidSchedule(_) => None,
        }
    }
}

/// Wrap an error with user-friendly context
pub trait UserFriendlyError {
    /// Add user-friendly context with a suggestion
    fn user_context_with_suggestion(self, problem: &str, suggestion: &str) -> Self;
}

impl<T> UserFriendlyError for Result<T> {
    fn user_context_with_suggestion(self, problem: &str, suggestion: &str) -> Self {
        self.with_context(|| {
            format!(
                "{}\n\n\x1b[1;33mSuggestion:\x1b[0m {}",
                problem, suggestion
            )
        })
    }
}

/// Format a stage error with its stderr tail and next steps
///
/// `logs_dir` is the failed stage's trainer log directory, when known.
pub fn stage_failed_error(error: &StageError, logs_dir: Option<&Path>) -> String {
    match error {
        StageError::Spawn { program, .. } => interpreter_not_found_error(program, error),
        StageError::Failed { stderr_tail, .. } => {
            let mut msg = format!("Staged training aborted: {}\n", error);
            if !stderr_tail.is_empty() {
                msg.push_str("\n\x1b[1;33mLast trainer output:\x1b[0m\n");
                for line in stderr_tail {
                    msg.push_str("  ");
                    msg.push_str(line);
                    msg.push('\n');
                }
            }
            msg.push_str("\n\x1b[1;32mTry:\x1b[0m\n");
            let mut step = 1;
            if let Some(logs_dir) = logs_dir {
                msg.push_str(&format!(
                    "{}. Inspect the trainer logs:\n   \x1b[36mls {}\x1b[0m\n\n",
                    step,
                    logs_dir.display()
                ));
                step += 1;
            }
            msg.push_str(&format!(
                "{}. Check the Python environment:\n   \x1b[36mstagetrain check\x1b[0m\n\n",
                step
            ));
            msg.push_str(&format!(
                "{}. Re-run every stage regardless of failures:\n   \x1b[36mstagetrain run --mode literal\x1b[0m",
                step + 1
            ));
            msg
        }
        StageError::Io { .. } => wrap_error_with_suggestion(
            error,
            "The trainer may still be running. Check for a leftover python process.",
        ),
        StageError::InvalidSchedule(_) => wrap_error_with_suggestion(
            error,
            "Each stage must use a non-zero batch size and a larger epoch target than the stage before it.",
        ),
    }
}

/// Format a missing interpreter error with helpful suggestions
pub fn interpreter_not_found_error(program: &str, error: impl fmt::Display) -> String {
    format!(
        "Could not start the trainer with '{}'\n\n\
        \x1b[1;33mError:\x1b[0m {}\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • Python 3 is not installed\n\
        • The interpreter is not on PATH\n\
        • A virtual environment was not activated\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Point at an interpreter explicitly:\n\
           \x1b[36mstagetrain run --python ~/.venv/bin/python\x1b[0m\n\n\
        2. Or set it once in the config file:\n\
           \x1b[36mecho 'python = \"/usr/bin/python3\"' >> ~/.stagetrain/config.toml\x1b[0m",
        program, error
    )
}

/// Format a missing training script error with helpful suggestions
pub fn script_not_found_error(path: &str) -> String {
    format!(
        "Training script not found: {}\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • Not running from the project root\n\
        • Wrong --script or --workdir\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Run from the directory containing examples/:\n\
           \x1b[36mls examples/train_symbolic_example.py\x1b[0m\n\n\
        2. Pass the script path explicitly:\n\
           \x1b[36mstagetrain run --script /path/to/train_symbolic_example.py\x1b[0m",
        path
    )
}

/// Format a config parse error with helpful suggestions
pub fn config_parse_error(path: &str, error: &str) -> String {
    format!(
        "Failed to parse config file {}\n\n\
        \x1b[1;33mError:\x1b[0m {}\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Check config file syntax:\n\
           \x1b[36mcat {}\x1b[0m\n\n\
        2. Known keys: python, script, workdir, mode, stderr_tail_lines, debug_logging\n\n\
        3. mode must be \"strict\" or \"literal\"",
        path, error, path
    )
}

/// Wrap a generic error with suggestions
pub fn wrap_error_with_suggestion(error: impl fmt::Display, suggestion: &str) -> String {
    format!(
        "{}\n\n\
        \x1b[1;33mSuggestion:\x1b[0m {}",
        error, suggestion
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let failed = StageError::Failed {
            stage: 2,
            exit: StageExit::code(3),
            stderr_tail: vec![],
        };
        assert_eq!(failed.exit_code(), 3);
        assert_eq!(failed.stage(), Some(2));

        let killed = StageError::Failed {
            stage: 1,
            exit: StageExit::signaled(),
            stderr_tail: vec![],
        };
        assert_eq!(killed.exit_code(), 1);

        let spawn = StageError::Spawn {
            stage: 1,
            program: "python3".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(spawn.exit_code(), EXIT_SPAWN_FAILED);

        let schedule = StageError::InvalidSchedule("empty".to_string());
        assert_eq!(schedule.exit_code(), EXIT_CONFIG);
        assert_eq!(schedule.stage(), None);
    }

    #[test]
    fn test_failed_stage_message_includes_stderr_tail() {
        let err = StageError::Failed {
            stage: 1,
            exit: StageExit::code(1),
            stderr_tail: vec!["CUDA out of memory".to_string()],
        };
        let msg = stage_failed_error(&err, None);
        assert!(msg.contains("stage 1 failed: exit code 1"));
        assert!(msg.contains("CUDA out of memory"));
        assert!(msg.contains("--mode literal"));
        assert!(!msg.contains("Inspect the trainer logs"));
    }

    #[test]
    fn test_failed_stage_message_points_at_resolved_logs() {
        let err = StageError::Failed {
            stage: 2,
            exit: StageExit::code(1),
            stderr_tail: vec![],
        };
        let msg = stage_failed_error(&err, Some(Path::new("/srv/train/outputs/logs")));
        assert!(msg.contains("ls /srv/train/outputs/logs"));
        assert!(!msg.contains("./outputs/symbolic_test/logs"));
        assert!(msg.contains("3. Re-run every stage"));
    }

    #[test]
    fn test_spawn_message_suggests_python_flag() {
        let err = StageError::Spawn {
            stage: 1,
            program: "python9".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        let msg = stage_failed_error(&err, None);
        assert!(msg.contains("python9"));
        assert!(msg.contains("--python"));
    }

    #[test]
    fn test_stage_exit_display() {
        assert_eq!(StageExit::code(0).to_string(), "exit code 0");
        assert_eq!(StageExit::signaled().to_string(), "terminated by signal");
        assert!(StageExit::code(0).success());
        assert!(!StageExit::signaled().success());
    }
}
