//! Daemon configuration.
//!
//! ```toml
//! [control]
//! tick_interval_ms = 16
//!
//! [scenery]
//! scene_dir = "scenes"
//! default_scene_id = "sterngarten"
//!
//! [[telescopes]]
//! slot = 0
//! url = "Meade:TCP:localhost:10001:500000"
//! oculars = [0.5, 1.2]
//! ```

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telescope::MAX_SLOT;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "ORRERY_CONFIG";

/// Files tried, in order, when neither a path nor the env var is given.
pub const DEFAULT_CANDIDATES: [&str; 2] = ["orrery.toml", "config/orrery.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("telescope slot {0} is out of range 0..={max}", max = MAX_SLOT)]
    SlotOutOfRange(u8),
    #[error("telescope slot {0} is configured twice")]
    DuplicateSlot(u8),
    #[error("control.tick_interval_ms must be at least 1")]
    ZeroTickInterval,
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    Explicit(PathBuf),
    EnvPath(PathBuf),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OrreryConfig {
    pub control: ControlConfig,
    pub scenery: SceneryConfig,
    pub telescopes: Vec<TelescopeConfig>,
}

/// Cadence of the control thread.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Sleep between two iterations of the control loop.
    pub tick_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
        }
    }
}

impl ControlConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SceneryConfig {
    /// Directory holding one sub-directory per scene.
    pub scene_dir: PathBuf,
    /// Scene loaded when scenery is enabled with nothing loaded.
    pub default_scene_id: Option<String>,
}

impl Default for SceneryConfig {
    fn default() -> Self {
        Self {
            scene_dir: PathBuf::from("scenes"),
            default_scene_id: None,
        }
    }
}

/// One `[[telescopes]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TelescopeConfig {
    pub slot: u8,
    /// `name:TCP:host:port:delay_us`
    pub url: String,
    #[serde(default)]
    pub oculars: Vec<f64>,
}

impl OrreryConfig {
    /// Resolves the configuration.
    ///
    /// Evaluation order:
    /// 1) `explicit` path,
    /// 2) `$ORRERY_CONFIG`,
    /// 3) the first existing file of [`DEFAULT_CANDIDATES`],
    /// 4) defaults.
    ///
    /// # Errors
    ///
    /// Unreadable or invalid files. A missing default candidate is not an
    /// error, a missing explicit or env path is.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            return Ok((config, ConfigSource::Explicit(path.to_path_buf())));
        }

        if let Ok(raw) = env::var(CONFIG_ENV)
            && !raw.trim().is_empty()
        {
            let path = PathBuf::from(raw);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(path) = DEFAULT_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
        {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    /// # Errors
    ///
    /// Unreadable file, bad TOML or failed validation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// # Errors
    ///
    /// Bad TOML or failed validation. `origin` only labels the error.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Slots outside `0..=8`, duplicate slots, zero tick interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        let mut seen = BTreeSet::new();
        for telescope in &self.telescopes {
            if telescope.slot > MAX_SLOT {
                return Err(ConfigError::SlotOutOfRange(telescope.slot));
            }
            if !seen.insert(telescope.slot) {
                return Err(ConfigError::DuplicateSlot(telescope.slot));
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Serialization failure.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
