// Stagetrain - staged training launcher
// Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use stagetrain::config::{load_config, Config, ConfigOverrides};
use stagetrain::errors;
use stagetrain::training::{
    latest_checkpoint, FailurePolicy, PythonLauncher, RunReport, Schedule, StageRunner,
    TrainerArtifacts, TrainerLauncher,
};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "stagetrain")]
#[command(
    about = "Run the symbolic transformer trainer in three resumable stages",
    long_about = "Runs the external trainer three times (effective batch 8 → 32 → 64, \
                  epochs 1 → 3 → 8), each stage resuming from the checkpoint of the \
                  one before it.\n\n\
                  By default a failed stage aborts the rest (strict mode). \
                  Use --mode literal to run every stage regardless, as a plain \
                  sequential script would.",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (default: ~/.stagetrain/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all stages (default)
    Run(RunArgs),
    /// Print the command line of every stage without running anything
    Plan {
        #[command(flatten)]
        launcher: LauncherArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check the training script and Python dependencies
    Check {
        #[command(flatten)]
        launcher: LauncherArgs,
    },
}

#[derive(clap::Args, Debug, Default)]
struct LauncherArgs {
    /// Python interpreter
    #[arg(long)]
    python: Option<PathBuf>,

    /// Training script
    #[arg(long)]
    script: Option<PathBuf>,

    /// Working directory for the trainer
    #[arg(long)]
    workdir: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    #[command(flatten)]
    launcher: LauncherArgs,

    /// Failure policy between stages
    #[arg(long, value_enum)]
    mode: Option<FailurePolicy>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl LauncherArgs {
    fn into_overrides(self, mode: Option<FailurePolicy>) -> ConfigOverrides {
        ConfigOverrides {
            python: self.python,
            script: self.script,
            workdir: self.workdir,
            mode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration before tracing so debug_logging can raise the level
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(errors::EXIT_CONFIG);
        }
    };

    init_tracing(config.debug_logging);

    match args.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(run) => run_stages(config, run).await,
        Command::Plan { launcher, json } => run_plan(config, launcher, json),
        Command::Check { launcher } => run_check(config, launcher).await,
    }
}

fn init_tracing(debug_logging: bool) {
    // RUST_LOG wins; otherwise info, or debug when requested via config/env
    let default_level = if debug_logging { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout belongs to the trainer and the final summary
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    // Bridge log crate → tracing
    tracing_log::LogTracer::init().ok();
}

async fn run_stages(mut config: Config, run: RunArgs) -> Result<()> {
    config.apply_overrides(run.launcher.into_overrides(run.mode));

    let launcher = PythonLauncher::from_config(&config);
    let script = launcher.resolved_script();
    if !script.exists() {
        // The trainer will report this itself; keep the stage semantics intact
        tracing::warn!("{}", errors::script_not_found_error(&script.display().to_string()));
    }

    let runner = StageRunner::new(Schedule::symbolic_default(), launcher, config.mode);

    match runner.policy() {
        FailurePolicy::Strict => {
            tracing::info!("Strict mode: a failed stage aborts the remaining stages")
        }
        FailurePolicy::Literal => {
            tracing::info!("Literal mode: every stage runs even if an earlier one failed")
        }
    }

    match runner.run().await {
        Ok(report) => {
            if run.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, runner.launcher());
            }

            let code = report.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Err(e) => {
            // Point at the failed stage's own logs, resolved like the trainer sees them
            let logs_dir = e
                .stage()
                .and_then(|number| runner.schedule().stages().get(number.saturating_sub(1)))
                .map(|stage| runner.launcher().resolve_path(&stage.artifacts().logs_dir));
            eprintln!("\n{}", errors::stage_failed_error(&e, logs_dir.as_deref()));
            std::process::exit(e.exit_code());
        }
    }
}

fn print_report(report: &RunReport, launcher: &PythonLauncher) {
    println!("\n\x1b[1;36mStaged training summary ({} mode)\x1b[0m", report.policy);

    for outcome in &report.outcomes {
        let marker = if outcome.success() { "\x1b[32m✓\x1b[0m" } else { "\x1b[31m✗\x1b[0m" };
        let status = match (&outcome.exit, &outcome.launch_error) {
            (Some(exit), _) => exit.to_string(),
            (None, Some(failure)) => format!("no exit status: {}", failure.message),
            (None, None) => "not started".to_string(),
        };
        println!(
            "  {} stage {}  effective batch {:>3}  epochs {:>2}  {:>8.1}s  {}",
            marker,
            outcome.stage,
            outcome.args.accumulation().effective,
            outcome.args.num_epochs,
            outcome.duration_ms as f64 / 1000.0,
            status
        );
    }

    if let Some(checkpoint) = &report.final_checkpoint {
        println!("\nFinal checkpoint: {}", checkpoint.path.display());
    }
    if let Some(artifacts) = &report.artifacts {
        print_artifacts(artifacts, launcher, "");
    }
}

/// Final model and logs, marked by whether they exist yet
fn print_artifacts(artifacts: &TrainerArtifacts, launcher: &PythonLauncher, bullet: &str) {
    for (label, path) in [
        ("Final model", &artifacts.final_model),
        ("Trainer logs", &artifacts.logs_dir),
    ] {
        let resolved = launcher.resolve_path(path);
        println!("{}{}: {}{}", bullet, label, resolved.display(), presence(&resolved));
    }
}

fn presence(path: &Path) -> &'static str {
    if path.exists() {
        ""
    } else {
        " (not found)"
    }
}

fn run_plan(mut config: Config, launcher: LauncherArgs, json: bool) -> Result<()> {
    config.apply_overrides(launcher.into_overrides(None));

    let runner = StageRunner::new(
        Schedule::symbolic_default(),
        PythonLauncher::from_config(&config),
        config.mode,
    );
    runner.schedule().validate()?;
    let plan = runner.plan();

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for stage in &plan {
        let acc = &stage.accumulation;
        println!(
            "# stage {}: batch {} × {} accumulation steps = effective {}{}",
            stage.stage,
            acc.mini_batch,
            acc.steps,
            acc.effective,
            if acc.is_adjusted() { " (adjusted)" } else { "" }
        );
        println!("{}", stage.command);
        println!("#   writes {}\n", stage.produces.path.display());
    }

    Ok(())
}

/// Check that the trainer can be started
async fn run_check(mut config: Config, launcher: LauncherArgs) -> Result<()> {
    config.apply_overrides(launcher.into_overrides(None));
    let launcher = PythonLauncher::from_config(&config);
    let mut ok = true;

    let script = launcher.resolved_script();
    if script.exists() {
        println!("✓ Training script: {}", script.display());
    } else {
        ok = false;
        println!("✗ {}", errors::script_not_found_error(&script.display().to_string()));
    }

    match launcher.check_dependencies().await {
        Ok(true) => println!("✓ Python packages importable with {}", launcher.python().display()),
        Ok(false) => {
            ok = false;
            println!(
                "✗ {} cannot import torch/datasets\n  Install them with: {} -m pip install torch datasets",
                launcher.python().display(),
                launcher.python().display()
            );
        }
        Err(e) => {
            ok = false;
            println!(
                "✗ {}",
                errors::interpreter_not_found_error(&launcher.python().display().to_string(), e)
            );
        }
    }

    // Existing outputs are informational only
    let schedule = Schedule::symbolic_default();
    if let Some(last) = schedule.stages().last() {
        let output_dir = launcher.resolve_path(last.output_dir());
        match latest_checkpoint(&output_dir)? {
            Some(latest) => println!(
                "• Latest checkpoint: {} (epoch {})",
                latest.path.display(),
                latest.epoch
            ),
            None => println!("• No checkpoints in {} yet", output_dir.display()),
        }

        print_artifacts(&last.artifacts(), &launcher, "• ");
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
