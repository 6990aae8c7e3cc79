// Configuration loader
// Defaults < ~/.stagetrain/config.toml (or --config) < STAGETRAIN_* environment

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;
use crate::errors::{self, UserFriendlyError};
use crate::training::FailurePolicy;

pub const ENV_PYTHON: &str = "STAGETRAIN_PYTHON";
pub const ENV_SCRIPT: &str = "STAGETRAIN_SCRIPT";
pub const ENV_WORKDIR: &str = "STAGETRAIN_WORKDIR";
pub const ENV_MODE: &str = "STAGETRAIN_MODE";
pub const ENV_DEBUG: &str = "STAGETRAIN_DEBUG";

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".stagetrain/config.toml"))
}

/// Load configuration from file and environment
///
/// An explicit `path` must exist; the default location is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                bail!(errors::wrap_error_with_suggestion(
                    format!("Config file not found: {}", path.display()),
                    "Check the --config path or omit it to use ~/.stagetrain/config.toml",
                ));
            }
            load_from_file(path)?
        }
        None => match default_config_path() {
            Some(default) if default.exists() => load_from_file(&default)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

/// Parse a TOML config file
pub fn load_from_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!(errors::config_parse_error(&path.display().to_string(), &e.to_string())))?;

    tracing::debug!(path = %path.display(), "Loaded config file");

    Ok(config)
}

/// Apply `STAGETRAIN_*` variables via `lookup`
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(python) = non_empty(ENV_PYTHON) {
        config.python = PathBuf::from(python);
    }
    if let Some(script) = non_empty(ENV_SCRIPT) {
        config.script = PathBuf::from(script);
    }
    if let Some(workdir) = non_empty(ENV_WORKDIR) {
        config.workdir = Some(PathBuf::from(workdir));
    }
    if let Some(mode) = non_empty(ENV_MODE) {
        config.mode = mode
            .parse::<FailurePolicy>()
            .map_err(anyhow::Error::msg)
            .user_context_with_suggestion(
                &format!("Invalid {}", ENV_MODE),
                "Set it to 'strict' or 'literal'",
            )?;
    }
    if let Some(debug) = non_empty(ENV_DEBUG) {
        config.debug_logging = debug == "1" || debug.eq_ignore_ascii_case("true");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.python, PathBuf::from("python3"));
        assert_eq!(config.script, PathBuf::from("./examples/train_symbolic_example.py"));
        assert_eq!(config.mode, FailurePolicy::Strict);
        assert_eq!(config.workdir, None);
        assert_eq!(config.stderr_tail_lines, 20);
    }

    #[test]
    fn test_load_from_file_fills_missing_keys() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "python = \"/opt/venv/bin/python\"\nmode = \"literal\"\n").unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.python, PathBuf::from("/opt/venv/bin/python"));
        assert_eq!(config.mode, FailurePolicy::Literal);
        assert_eq!(config.script, Config::default().script);
    }

    #[test]
    fn test_bad_mode_in_file_is_rejected() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "mode = \"lenient\"\n").unwrap();

        let err = load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_PYTHON, "/usr/bin/python3.11"),
                (ENV_MODE, "LITERAL"),
                (ENV_WORKDIR, "/srv/train"),
                (ENV_DEBUG, "1"),
                (ENV_SCRIPT, "  "),
            ]),
        )
        .unwrap();

        assert_eq!(config.python, PathBuf::from("/usr/bin/python3.11"));
        assert_eq!(config.mode, FailurePolicy::Literal);
        assert_eq!(config.workdir, Some(PathBuf::from("/srv/train")));
        assert!(config.debug_logging);
        // Blank values are ignored
        assert_eq!(config.script, Config::default().script);
    }

    #[test]
    fn test_invalid_env_mode() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, env(&[(ENV_MODE, "sometimes")])).unwrap_err();
        assert!(format!("{:#}", err).contains("strict"));
    }

    #[test]
    fn test_precedence_file_env_cli() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "python = \"from-file\"\nscript = \"file.py\"\nmode = \"literal\"\n").unwrap();

        let mut config = load_from_file(&path).unwrap();
        apply_env_overrides(&mut config, env(&[(ENV_PYTHON, "from-env")])).unwrap();
        config.apply_overrides(ConfigOverrides {
            mode: Some(FailurePolicy::Strict),
            ..Default::default()
        });

        assert_eq!(config.python, PathBuf::from("from-env"));
        assert_eq!(config.script, PathBuf::from("file.py"));
        assert_eq!(config.mode, FailurePolicy::Strict);
    }
}
