use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::session::DriveOptions;

/// Default config file name (relative to the current directory).
pub const DEFAULT_CONFIG_FILE: &str = "gemchat.yaml";
/// Default workspace directory (relative to the config file).
pub const DEFAULT_WORKSPACE: &str = ".gemchat";
/// Default conversation cache directory (relative to the workspace).
pub const DEFAULT_CONVERSATIONS_DIR: &str = "conversations";

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the GEM service.
    pub server_url: String,
    /// Workspace directory holding the local conversation cache.
    pub workspace: Option<PathBuf>,
    /// Seconds to wait for the next stream frame before giving up.
    pub stall_timeout_seconds: u64,
    /// Milliseconds between busy-indicator updates.
    pub busy_tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            workspace: None,
            stall_timeout_seconds: 120,
            busy_tick_ms: 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load a config file, falling back to defaults when it does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Where cached conversations live, resolved against the config file.
    pub fn conversations_dir(&self, config_path: &Path) -> PathBuf {
        let workspace = self
            .workspace
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE));
        resolve_path(config_path, &workspace).join(DEFAULT_CONVERSATIONS_DIR)
    }

    /// Stream timing derived from the config.
    pub fn drive_options(&self) -> DriveOptions {
        DriveOptions {
            stall_timeout: Duration::from_secs(self.stall_timeout_seconds),
            busy_tick: Duration::from_millis(self.busy_tick_ms),
        }
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned as-is, so behavior does not depend on the
/// current working directory.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Shell-compatible syntax:
/// - `${VAR}` - required variable, errors if not set
/// - `${VAR:-default}` - optional variable with default value
/// - `$$` - escaped `$` (only needed before `{`)
///
/// Nested expansion (`${VAR:-${OTHER}}`) is not supported, and an unclosed
/// `${` is an error.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    result.push_str(&parse_var_reference(&mut chars)?);
                }
                // Plain $ stays literal
                _ => result.push('$'),
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value = String::new();
    let mut has_default = false;
    let mut closed = false;

    while let Some(&c) = chars.peek() {
        match c {
            '}' => {
                chars.next();
                closed = true;
                break;
            }
            ':' if !has_default => {
                chars.next();
                if chars.peek() == Some(&'-') {
                    chars.next();
                    has_default = true;
                } else {
                    // ':' without '-' is part of the name
                    var_name.push(':');
                }
            }
            _ => {
                chars.next();
                if has_default {
                    default_value.push(c);
                } else {
                    var_name.push(c);
                }
            }
        }
    }

    if !closed {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) if has_default => Ok(default_value),
        Err(_) => Err(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// Tests
// ============================================================================
