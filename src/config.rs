use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pty::SpawnCommand;
use crate::session::SessionOptions;

/// Server settings as read from the TOML settings file. Every key is
/// optional; absent keys fall back to the command line or built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub bind: Option<SocketAddr>,
    /// `user:pass` required via HTTP Basic auth.
    pub credential: Option<String>,
    /// argv of the command each session runs.
    pub command: Option<Vec<String>>,
    pub command_log: Option<bool>,
    pub max_clients_per_session: Option<usize>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid credential: expected `user:pass`")]
    InvalidCredential,
}

impl FileSettings {
    /// Load settings from a TOML file. Returns `None` if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&contents).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?;

        if settings.credential.is_some() {
            check_config_permissions(path);
        }
        Ok(Some(settings))
    }
}

/// `$XDG_CONFIG_HOME/ttyshare/config.toml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ttyshare").join("config.toml"))
}

/// Values supplied on the command line. `None`/`false` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<SocketAddr>,
    pub credential: Option<String>,
    pub command: Vec<String>,
    pub command_log: bool,
    pub max_clients_per_session: Option<usize>,
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind: SocketAddr,
    pub credential: Option<String>,
    pub command: SpawnCommand,
    pub command_log: bool,
    pub session: SessionOptions,
}

impl Settings {
    /// Merge command-line values over file values over defaults.
    pub fn resolve(file: FileSettings, cli: CliOverrides) -> Result<Self, ConfigError> {
        let defaults = SessionOptions::default();

        let credential = cli.credential.or(file.credential).filter(|c| !c.is_empty());
        if let Some(ref credential) = credential {
            validate_credential(credential)?;
        }

        let argv = if cli.command.is_empty() {
            file.command.unwrap_or_default()
        } else {
            cli.command
        };

        Ok(Self {
            bind: cli.bind.or(file.bind).unwrap_or_else(default_bind),
            credential,
            command: SpawnCommand::from_argv(argv),
            command_log: cli.command_log || file.command_log.unwrap_or(false),
            session: SessionOptions {
                rows: file.rows.filter(|r| *r > 0).unwrap_or(defaults.rows),
                cols: file.cols.filter(|c| *c > 0).unwrap_or(defaults.cols),
                max_clients: cli
                    .max_clients_per_session
                    .or(file.max_clients_per_session)
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.max_clients),
            },
        })
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn validate_credential(credential: &str) -> Result<(), ConfigError> {
    match credential.split_once(':') {
        Some((user, _)) if !user.is_empty() => Ok(()),
        _ => Err(ConfigError::InvalidCredential),
    }
}

/// Warn if a settings file holding a credential is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "config file {} is world-readable (mode {:o}) and contains a credential; \
             consider restricting permissions to 600",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
