//! Layered settings: built-in defaults, then `config.toml`, then
//! `USERDESK__SECTION__KEY` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;

pub const APP_NAME: &str = "userdesk";
pub const ENV_PREFIX: &str = "USERDESK";

const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "userdesk.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `error`, `warn`, `info`, `debug` or `trace`. `-v` flags win over it.
    pub level: String,
    /// Append log lines to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `userdesk.db` in the data directory.
    pub path: Option<PathBuf>,
}

/// Where settings and data live on this machine.
#[derive(Debug, Clone)]
pub struct Locations {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
}

impl Locations {
    /// `--config` may name a file or a directory holding `config.toml`.
    pub fn resolve(config_override: Option<&Path>) -> Result<Self> {
        let config_file = match config_override {
            Some(path) => {
                let path = expand(path)?;
                if path.is_dir() {
                    path.join(CONFIG_FILE)
                } else {
                    path
                }
            }
            None => app_dir("XDG_CONFIG_HOME", dirs::config_dir, &[".config"])?.join(CONFIG_FILE),
        };

        Ok(Self {
            config_file,
            data_dir: app_dir("XDG_DATA_HOME", dirs::data_dir, &[".local", "share"])?,
        })
    }

    pub fn database(&self, settings: &Settings) -> PathBuf {
        settings
            .database
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DATABASE_FILE))
    }
}

impl Settings {
    /// Load settings from `path` plus the environment. A missing file is
    /// not an error; the defaults apply.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings: Settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("reading settings from {}", path.display()))?
            .try_deserialize()
            .context("invalid settings")?;

        if let Some(file) = settings.logging.file.take() {
            settings.logging.file = Some(expand(&file)?);
        }
        if let Some(db) = settings.database.path.take() {
            settings.database.path = Some(expand(&db)?);
        }

        Ok(settings)
    }

    /// The default settings as a commented TOML document.
    pub fn default_document(path: &Path) -> Result<String> {
        let body = toml::to_string_pretty(&Settings::default())
            .context("serializing default settings")?;

        Ok(format!(
            "# {APP_NAME} settings ({})\n\
             # Any key can be overridden from the environment, e.g. {ENV_PREFIX}__SERVER__PORT=9000\n\n\
             {body}",
            path.display()
        ))
    }

    /// Write the default document to `path`, creating parent directories.
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        fs::write(path, Self::default_document(path)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}

/// Expand `~` and `$VARS` in a path.
fn expand(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => Ok(PathBuf::from(
            shellexpand::full(text)
                .with_context(|| format!("expanding {text}"))?
                .into_owned(),
        )),
        None => Ok(path.to_path_buf()),
    }
}

/// `$XDG_*/userdesk`, then the platform directory, then a path under home.
fn app_dir(
    xdg_var: &str,
    platform: fn() -> Option<PathBuf>,
    home_fallback: &[&str],
) -> Result<PathBuf> {
    let base = env::var_os(xdg_var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(platform)
        .or_else(|| {
            dirs::home_dir().map(|home| home_fallback.iter().fold(home, |p, part| p.join(part)))
        })
        .ok_or_else(|| anyhow!("cannot determine a directory for {xdg_var}"))?;

    Ok(base.join(APP_NAME))
}
