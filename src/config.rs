//! Configuration management for yochat.
//!
//! The API key lives in `<config dir>/yochat/config.json`. Everything else the
//! ask pipeline needs (model, system instruction, deadline, media allow-list)
//! is fixed at startup in [`AskSettings`] and passed down explicitly.

use crate::error::{Error, Result};
use crate::request::MediaTypes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const APP_NAME: &str = "yochat";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Environment variable consulted when the config file holds no key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

/// Deadline for a whole request, from opening the stream to the last fragment.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const SYSTEM_INSTRUCTION: &str = "You are an assistant living in the user's terminal. \
Answer the question directly, without filler or follow-up offers, in fewer than 100 words. \
The output is shown in a terminal, so do not use markdown or any other formatting. \
When no other context is given, assume the question is about the command line. \
Wrap every terminal command in <command></command>. \
The user cannot reply, so this is your only answer. \
When a file is attached, stay concise but make sure the reply is still useful. \
If the user asks for a specific output format, follow it exactly. \
When the user is just chatting and not asking anything serious, feel free to be a little savage.";

/// Persisted configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(Error::ConfigDir)
    }

    /// Get the config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration, using defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(Error::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default location and return the file path.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to `path`. The parent directory is restricted to
    /// the owner (0700) and the file to owner read/write (0600).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let write_err = |source| Error::ConfigWrite {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            create_private_dir(parent).map_err(write_err)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(Error::ConfigSerialize)?;
        write_private_file(path, contents.as_bytes()).map_err(write_err)?;
        debug!("Config written to {}", path.display());
        Ok(())
    }

    /// The API key from the config file, falling back to `GEMINI_API_KEY`.
    pub fn api_key(&self) -> Result<String> {
        self.resolve_api_key(std::env::var(API_KEY_ENV).ok())
    }

    fn resolve_api_key(&self, env_key: Option<String>) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env_key.filter(|k| !k.trim().is_empty()))
            .ok_or(Error::MissingApiKey)
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Immutable settings for one ask invocation.
#[derive(Debug, Clone)]
pub struct AskSettings {
    pub model: String,
    pub system_instruction: String,
    pub timeout: Duration,
    pub media_types: MediaTypes,
}

impl Default for AskSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            timeout: REQUEST_TIMEOUT,
            media_types: MediaTypes::default(),
        }
    }
}

impl AskSettings {
    /// Replace the model when an override is given.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model {
            self.model = model;
        }
        self
    }
}
