//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → `DW_CONFIG` environment variable →
//! `/etc/dump-warden/config.toml` → built-in defaults.

use crate::validate::{ValidationError, ValidationResult};
use crate::Config;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file.
const ENV_CONFIG_PATH: &str = "DW_CONFIG";

/// System configuration path.
const SYSTEM_CONFIG_PATH: &str = "/etc/dump-warden/config.toml";

/// Where the effective configuration came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument(PathBuf),
    /// Set via the `DW_CONFIG` environment variable.
    Environment(PathBuf),
    /// Found at the system config path.
    SystemConfig(PathBuf),
    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument(p) => write!(f, "CLI argument ({})", p.display()),
            ConfigSource::Environment(p) => write!(f, "environment variable ({})", p.display()),
            ConfigSource::SystemConfig(p) => write!(f, "system config ({})", p.display()),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Load and validate the configuration using the standard resolution order.
///
/// A CLI-supplied path that does not exist is an error; the env and system
/// paths fall through to the next source when absent.
pub fn load(cli_path: Option<&Path>) -> ValidationResult<(Config, ConfigSource)> {
    let (config, source) = match resolve_path(cli_path)? {
        Some((path, source)) => {
            info!(path = %path.display(), source = %source, "loading configuration");
            (read_file(&path)?, source)
        }
        None => {
            debug!("no configuration file found, using builtin defaults");
            (Config::default(), ConfigSource::BuiltinDefault)
        }
    };

    crate::validate(&config)?;
    Ok((config, source))
}

fn resolve_path(cli_path: Option<&Path>) -> ValidationResult<Option<(PathBuf, ConfigSource)>> {
    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(ValidationError::IoError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let path = path.to_path_buf();
        return Ok(Some((path.clone(), ConfigSource::CliArgument(path))));
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if !path.exists() {
            return Err(ValidationError::IoError(format!(
                "{} points at a missing file: {}",
                ENV_CONFIG_PATH,
                path.display()
            )));
        }
        return Ok(Some((path.clone(), ConfigSource::Environment(path))));
    }

    let system = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system.exists() {
        return Ok(Some((system.clone(), ConfigSource::SystemConfig(system))));
    }

    Ok(None)
}

fn read_file(path: &Path) -> ValidationResult<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ValidationError::IoError(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&text)
        .map_err(|e| ValidationError::ParseError(format!("{}: {}", path.display(), e)))
}
