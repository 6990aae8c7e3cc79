// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::training::launcher::DEFAULT_STDERR_TAIL_LINES;
use crate::training::FailurePolicy;

/// Runner settings; the stage flags themselves are not configurable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Python interpreter used to run the trainer
    #[serde(default = "default_python")]
    pub python: PathBuf,

    /// Training entry point
    #[serde(default = "default_script")]
    pub script: PathBuf,

    /// Working directory for the trainer (default: current directory)
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Failure policy between stages
    #[serde(default)]
    pub mode: FailurePolicy,

    /// Number of trainer stderr lines kept for failure reports
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,

    /// Force debug-level logging
    #[serde(default)]
    pub debug_logging: bool,
}

fn default_python() -> PathBuf {
    PathBuf::from("python3")
}

fn default_script() -> PathBuf {
    PathBuf::from("./examples/train_symbolic_example.py")
}

fn default_stderr_tail_lines() -> usize {
    DEFAULT_STDERR_TAIL_LINES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: default_python(),
            script: default_script(),
            workdir: None,
            mode: FailurePolicy::default(),
            stderr_tail_lines: default_stderr_tail_lines(),
            debug_logging: false,
        }
    }
}

/// Command-line overrides, applied last
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub python: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub workdir: Option<PathBuf>,
    pub mode: Option<FailurePolicy>,
}

impl Config {
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(python) = overrides.python {
            self.python = python;
        }
        if let Some(script) = overrides.script {
            self.script = script;
        }
        if let Some(workdir) = overrides.workdir {
            self.workdir = Some(workdir);
        }
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
    }
}
