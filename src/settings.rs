use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::Compression;
use crate::compositor::{DEFAULT_TILES_PER_PAGE, MAX_JPEG_QUALITY};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "speedbinb-export";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationSettings {
    /// How often to re-check the page container while waiting.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait budget for one page to finish rendering.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub navigation: NavigationSettings,

    #[serde(default = "default_tiles_per_page")]
    pub tiles_per_page: usize,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default)]
    pub compression: Compression,

    /// Where archives are saved; the working directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_tiles_per_page() -> usize {
    DEFAULT_TILES_PER_PAGE
}

fn default_jpeg_quality() -> u8 {
    MAX_JPEG_QUALITY
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            navigation: NavigationSettings::default(),
            tiles_per_page: default_tiles_per_page(),
            jpeg_quality: default_jpeg_quality(),
            compression: Compression::default(),
            output_dir: None,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.navigation.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.navigation.timeout_ms)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Replaces values the pipeline cannot work with by their defaults.
    fn sanitize(&mut self) {
        if self.tiles_per_page == 0 {
            warn!("tiles_per_page must be at least 1, using {DEFAULT_TILES_PER_PAGE}");
            self.tiles_per_page = DEFAULT_TILES_PER_PAGE;
        }
        if !(1..=MAX_JPEG_QUALITY).contains(&self.jpeg_quality) {
            warn!(
                "jpeg_quality {} is outside 1-{MAX_JPEG_QUALITY}, clamping",
                self.jpeg_quality
            );
            self.jpeg_quality = self.jpeg_quality.clamp(1, MAX_JPEG_QUALITY);
        }
        if self.navigation.poll_interval_ms == 0 {
            warn!("poll_interval_ms must be positive, using the default");
            self.navigation.poll_interval_ms = default_poll_interval_ms();
        }
        if self.navigation.timeout_ms == 0 {
            warn!("timeout_ms must be positive, using the default");
            self.navigation.timeout_ms = default_timeout_ms();
        }
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Loads settings from `explicit`, or from the per-user config file.
///
/// A missing per-user file is created with defaults. A file that cannot be
/// read or parsed is logged and defaults are used.
pub fn load_settings(explicit: Option<&Path>) -> Settings {
    if let Some(path) = explicit {
        return load_settings_from_path(path).unwrap_or_default();
    }

    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Settings::default();
    };

    if path.exists() {
        load_settings_from_path(&path).unwrap_or_default()
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        save_settings_to_file(&settings, &path);
        settings
    }
}

fn load_settings_from_path(path: &Path) -> Option<Settings> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                settings.sanitize();
                Some(settings)
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                None
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            None
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Every field has a serde default, so older files only need the new version.
    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    match fs::write(path, generate_settings_yaml(settings)) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n\n", settings.version));
    content.push_str("# Waiting for the reader to render a page\n");
    content.push_str("navigation:\n");
    content.push_str(&format!(
        "  poll_interval_ms: {}\n",
        settings.navigation.poll_interval_ms
    ));
    content.push_str(&format!("  timeout_ms: {}\n\n", settings.navigation.timeout_ms));
    content.push_str("# Horizontal bands the reader splits every page into\n");
    content.push_str(&format!("tiles_per_page: {}\n", settings.tiles_per_page));
    content.push_str("# 1-100, 100 keeps the most detail\n");
    content.push_str(&format!("jpeg_quality: {}\n", settings.jpeg_quality));
    content.push_str("# stored | deflated\n");
    content.push_str(&format!("compression: {}\n", settings.compression.as_str()));
    if let Some(dir) = &settings.output_dir {
        content.push_str(&format!("output_dir: {:?}\n", dir.display().to_string()));
    } else {
        content.push_str("# output_dir: \"/path/to/comics\"\n");
    }

    content
}
