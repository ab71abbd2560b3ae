use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::orchestration::scheduler::SchedulerConfig;
use crate::{alog_debug, Error, Result};

fn default_max_concurrent() -> usize {
    4
}

/// Configuration for the orchestration engine.
///
/// Loaded from `~/.arbor/arbor.toml` when present; every field has a
/// default so an absent or partial file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of executor invocations running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            debug: false,
        }
    }
}

impl Config {
    pub fn arbor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".arbor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::arbor_dir()?.join("arbor.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        alog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            alog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        alog_debug!(
            "Config loaded: max_concurrent={}, debug={}",
            config.max_concurrent,
            config.debug
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        Self::ensure_dirs()?;
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        alog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let arbor_dir = Self::arbor_dir()?;
        if !arbor_dir.exists() {
            alog_debug!("Creating arbor directory: {}", arbor_dir.display());
            fs::create_dir_all(&arbor_dir)?;
        }
        Ok(())
    }

    /// Derive the scheduler tunables from this configuration.
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent,
        }
    }
}
