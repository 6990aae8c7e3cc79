// Training arguments - flag contract of the symbolic training example
//
// Renders typed stage settings into the argv the Python trainer parses.

use serde::Serialize;
use std::ffi::OsString;
use std::path::PathBuf;

/// Arguments for one invocation of the external trainer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainArgs {
    /// Use output projection in attention (`--use_proj`)
    pub use_proj: bool,

    /// Use value projection in attention (`--use_v`)
    pub use_v: bool,

    /// Mini-batch size per optimizer step
    pub batch_size: u32,

    /// Target batch size after gradient accumulation
    pub effective_batch_size: Option<u32>,

    /// Absolute epoch target (not the number of remaining epochs)
    pub num_epochs: u32,

    /// Cap on samples drawn from the dataset
    pub max_samples: u64,

    /// Output directory shared by every stage
    pub output_dir: PathBuf,

    /// Checkpoint the trainer resumes from
    pub resume_from_checkpoint: Option<PathBuf>,
}

/// Gradient accumulation the trainer will derive from a batch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Accumulation {
    pub mini_batch: u32,
    pub steps: u32,
    pub effective: u32,
    pub requested: Option<u32>,
}

impl Accumulation {
    /// True when integer division moved the effective size away from the request
    pub fn is_adjusted(&self) -> bool {
        self.requested.is_some_and(|requested| requested != self.effective)
    }
}

impl TrainArgs {
    /// Same arguments, resuming from `checkpoint`
    pub fn with_resume(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.resume_from_checkpoint = Some(checkpoint.into());
        self
    }

    /// Accumulation steps as computed by the trainer: `max(1, effective / batch)`
    pub fn accumulation(&self) -> Accumulation {
        let mini_batch = self.batch_size;
        let steps = match self.effective_batch_size {
            Some(requested) if mini_batch > 0 => (requested / mini_batch).max(1),
            _ => 1,
        };

        Accumulation {
            mini_batch,
            steps,
            effective: steps * mini_batch,
            requested: self.effective_batch_size,
        }
    }

    /// Render to argv, flags first, resume path last
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(16);

        if self.use_proj {
            args.push("--use_proj".into());
        }
        if self.use_v {
            args.push("--use_v".into());
        }

        args.push("--batch_size".into());
        args.push(self.batch_size.to_string().into());

        if let Some(effective) = self.effective_batch_size {
            args.push("--effective_batch_size".into());
            args.push(effective.to_string().into());
        }

        args.push("--num_epochs".into());
        args.push(self.num_epochs.to_string().into());
        args.push("--max_samples".into());
        args.push(self.max_samples.to_string().into());
        args.push("--output_dir".into());
        args.push(self.output_dir.clone().into_os_string());

        if let Some(checkpoint) = &self.resume_from_checkpoint {
            args.push("--resume_from_checkpoint".into());
            args.push(checkpoint.clone().into_os_string());
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TrainArgs {
        TrainArgs {
            use_proj: true,
            use_v: true,
            batch_size: 8,
            effective_batch_size: Some(32),
            num_epochs: 3,
            max_samples: 100_000,
            output_dir: PathBuf::from("./outputs/symbolic_test"),
            resume_from_checkpoint: None,
        }
    }

    fn strings(args: &TrainArgs) -> Vec<String> {
        args.to_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_argv_order_without_resume() {
        assert_eq!(
            strings(&sample()),
            vec![
                "--use_proj",
                "--use_v",
                "--batch_size",
                "8",
                "--effective_batch_size",
                "32",
                "--num_epochs",
                "3",
                "--max_samples",
                "100000",
                "--output_dir",
                "./outputs/symbolic_test",
            ]
        );
    }

    #[test]
    fn test_resume_flag_is_last() {
        let args = sample().with_resume("./outputs/symbolic_test/checkpoint_epoch_1.pt");
        let argv = strings(&args);
        assert_eq!(argv[argv.len() - 2], "--resume_from_checkpoint");
        assert_eq!(argv[argv.len() - 1], "./outputs/symbolic_test/checkpoint_epoch_1.pt");
    }

    #[test]
    fn test_boolean_flags_omitted_when_unset() {
        let mut args = sample();
        args.use_proj = false;
        args.use_v = false;
        args.effective_batch_size = None;
        let argv = strings(&args);
        assert!(!argv.contains(&"--use_proj".to_string()));
        assert!(!argv.contains(&"--use_v".to_string()));
        assert!(!argv.contains(&"--effective_batch_size".to_string()));
        assert_eq!(argv[0], "--batch_size");
    }

    #[test]
    fn test_accumulation_matches_trainer() {
        let acc = sample().accumulation();
        assert_eq!(acc.steps, 4);
        assert_eq!(acc.effective, 32);
        assert!(!acc.is_adjusted());

        let mut uneven = sample();
        uneven.effective_batch_size = Some(30);
        let acc = uneven.accumulation();
        assert_eq!(acc.steps, 3);
        assert_eq!(acc.effective, 24);
        assert!(acc.is_adjusted());

        // Requests below the mini-batch still take one step
        let mut small = sample();
        small.effective_batch_size = Some(4);
        assert_eq!(small.accumulation().steps, 1);
    }
}
