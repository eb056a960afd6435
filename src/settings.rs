use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pdf::{
    DEFAULT_BATCH_YIELD, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_CONCURRENT_RENDERS,
    DEFAULT_QUEUE_BOUND, DEFAULT_RENDER_TIMEOUT, MIN_SCALE, SchedulerConfig,
};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "flipbook";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Rendering resolution
    #[serde(default = "default_scale")]
    pub scale: f32,

    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent_renders: usize,

    /// Pages rendered ahead of and behind the current page
    #[serde(default = "default_prefetch_radius")]
    pub prefetch_radius: usize,

    #[serde(default = "default_render_queue_bound")]
    pub render_queue_bound: usize,

    /// Rendered pages kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    #[serde(default = "default_batch_yield_ms")]
    pub batch_yield_ms: u64,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_scale() -> f32 {
    1.5
}

fn default_max_concurrent_renders() -> usize {
    DEFAULT_MAX_CONCURRENT_RENDERS
}

fn default_prefetch_radius() -> usize {
    2
}

fn default_render_queue_bound() -> usize {
    DEFAULT_QUEUE_BOUND
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_render_timeout_ms() -> u64 {
    DEFAULT_RENDER_TIMEOUT.as_millis() as u64
}

fn default_batch_yield_ms() -> u64 {
    DEFAULT_BATCH_YIELD.as_millis() as u64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            scale: default_scale(),
            max_concurrent_renders: default_max_concurrent_renders(),
            prefetch_radius: default_prefetch_radius(),
            render_queue_bound: default_render_queue_bound(),
            cache_capacity: default_cache_capacity(),
            render_timeout_ms: default_render_timeout_ms(),
            batch_yield_ms: default_batch_yield_ms(),
        }
    }
}

impl Settings {
    /// Clamp values into their valid ranges.
    ///
    /// The cache always holds at least the current page and its full
    /// prefetch window, so the window never evicts itself.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !self.scale.is_finite() {
            self.scale = default_scale();
        }
        self.scale = self.scale.max(MIN_SCALE);
        self.max_concurrent_renders = self.max_concurrent_renders.max(1);
        self.render_timeout_ms = self.render_timeout_ms.max(1);
        self.cache_capacity = self
            .cache_capacity
            .max(self.prefetch_radius.saturating_mul(2).saturating_add(1));
        self
    }

    #[must_use]
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    #[must_use]
    pub fn batch_yield(&self) -> Duration {
        Duration::from_millis(self.batch_yield_ms)
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let settings = self.clone().normalized();
        SchedulerConfig {
            scale: settings.scale,
            max_concurrent_renders: settings.max_concurrent_renders,
            queue_bound: settings.render_queue_bound,
            cache_capacity: settings.cache_capacity,
            render_timeout: settings.render_timeout(),
            batch_yield: settings.batch_yield(),
        }
    }
}

/// `config.yaml` in the platform config directory
pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `path`, or from the default location.
///
/// Never fails: a missing default file is created with defaults, and an
/// unreadable or malformed file falls back to defaults with an error logged.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match preferred_config_path() {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using default settings");
                return Settings::default();
            }
        },
    };

    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        if let Err(e) = save_settings_to_file(&settings, &path) {
            error!("{e}");
        }
        return settings;
    }

    match load_settings_from_path(&path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            Settings::default()
        }
    }
}

pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let settings =
        serde_yaml::from_str::<Settings>(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Loaded settings from {path:?} (v{})", settings.version);

    Ok(settings.normalized())
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    fs::write(path, generate_settings_yaml(settings)).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str("\n# Rendering resolution (1.0 = 72 dpi)\n");
    content.push_str(&format!("scale: {}\n", settings.scale));
    content.push_str("\n# Pages rasterized at once\n");
    content.push_str(&format!(
        "max_concurrent_renders: {}\n",
        settings.max_concurrent_renders
    ));
    content.push_str("\n# Pages kept ready on each side of the current page\n");
    content.push_str(&format!("prefetch_radius: {}\n", settings.prefetch_radius));
    content.push_str("\n# Background renders waiting beyond this are dropped\n");
    content.push_str(&format!(
        "render_queue_bound: {}\n",
        settings.render_queue_bound
    ));
    content.push_str("\n# Rendered pages kept in memory\n");
    content.push_str(&format!("cache_capacity: {}\n", settings.cache_capacity));
    content.push_str("\n# Milliseconds before a page render is given up\n");
    content.push_str(&format!(
        "render_timeout_ms: {}\n",
        settings.render_timeout_ms
    ));
    content.push_str("\n# Milliseconds to pause between render batches\n");
    content.push_str(&format!("batch_yield_ms: {}\n", settings.batch_yield_ms));

    content
}
