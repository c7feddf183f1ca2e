//! Overlay configuration persistence with atomic writes.
//!
//! Stores overlay tuning in a JSON file with:
//! - Atomic writes (write temp, rename)
//! - Corruption fallback (regenerate defaults if parse fails)
//! - Schema versioning
//! - Value clamping to keep the lifecycle manager within sane bounds

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current schema version.
const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "Desktally";

/// Config file name.
const CONFIG_FILE_NAME: &str = "overlay.json";

static DEFAULT_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| config_dir().join(CONFIG_FILE_NAME));

/// Errors returned by config persistence.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("config serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Root overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Schema version for migrations.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Visibility watchdog tuning.
    #[serde(default)]
    pub watchdog: WatchdogSettings,

    /// Event debounce tuning.
    #[serde(default)]
    pub debounce: DebounceSettings,

    /// Shared theme handed to every content provider.
    #[serde(default)]
    pub theme: ThemeConfig,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            watchdog: WatchdogSettings::default(),
            debounce: DebounceSettings::default(),
            theme: ThemeConfig::default(),
        }
    }
}

impl OverlayConfig {
    /// Clamp values to valid ranges, resetting nonsense with a log entry.
    pub fn validate_and_clamp(&mut self) {
        self.watchdog.check_delay_ms = self.watchdog.check_delay_ms.clamp(50, 5_000);
        self.watchdog.max_retries = self.watchdog.max_retries.clamp(1, 10);

        self.debounce.topology_cooldown_ms = self.debounce.topology_cooldown_ms.clamp(100, 10_000);
        self.debounce.topology_delay_ms = self.debounce.topology_delay_ms.clamp(50, 5_000);
        self.debounce.wake_cooldown_ms = self.debounce.wake_cooldown_ms.clamp(100, 10_000);
        self.debounce.wake_delay_ms = self.debounce.wake_delay_ms.clamp(50, 5_000);

        if !is_hex_color(&self.theme.accent_color) {
            log::info!(
                "Invalid theme.accent_color value '{}', resetting to '{}'",
                self.theme.accent_color,
                default_accent_color()
            );
            self.theme.accent_color = default_accent_color();
        }
    }
}

/// Visibility watchdog tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    /// Delay before each visibility check (ms). Clamped to 50-5000.
    pub check_delay_ms: u64,
    /// Failed checks before giving up on a surface. Clamped to 1-10.
    pub max_retries: u32,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            check_delay_ms: 500,
            max_retries: 3,
        }
    }
}

impl WatchdogSettings {
    pub fn check_delay(&self) -> Duration {
        Duration::from_millis(self.check_delay_ms)
    }
}

/// Event debounce tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceSettings {
    /// Minimum gap between accepted topology events (ms).
    pub topology_cooldown_ms: u64,
    /// Delay before the debounced topology handler fires (ms).
    pub topology_delay_ms: u64,
    /// Minimum gap between accepted wake events (ms).
    pub wake_cooldown_ms: u64,
    /// Delay before the debounced wake handler fires (ms).
    pub wake_delay_ms: u64,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            topology_cooldown_ms: 1_000,
            topology_delay_ms: 500,
            wake_cooldown_ms: 500,
            wake_delay_ms: 300,
        }
    }
}

impl DebounceSettings {
    pub fn topology_cooldown(&self) -> Duration {
        Duration::from_millis(self.topology_cooldown_ms)
    }

    pub fn topology_delay(&self) -> Duration {
        Duration::from_millis(self.topology_delay_ms)
    }

    pub fn wake_cooldown(&self) -> Duration {
        Duration::from_millis(self.wake_cooldown_ms)
    }

    pub fn wake_delay(&self) -> Duration {
        Duration::from_millis(self.wake_delay_ms)
    }
}

/// Theme values shared read-only with every content provider. Pixel
/// layout and animation curves belong to the rendering layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Accent color as "#rrggbb".
    pub accent_color: String,
    /// Corner radius of the counter card in logical pixels.
    pub corner_radius: u32,
    /// Whether milestone celebrations (particles) are enabled.
    pub celebrations_enabled: bool,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            accent_color: default_accent_color(),
            corner_radius: 12,
            celebrations_enabled: true,
        }
    }
}

fn default_accent_color() -> String {
    "#4f8cff".to_string()
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7 && value.starts_with('#') && value[1..].chars().all(|ch| ch.is_ascii_hexdigit())
}

/// Get the platform-specific config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        })
        .join(CONFIG_DIR_NAME)
}

/// Get the full config file path.
pub fn config_path() -> PathBuf {
    DEFAULT_CONFIG_PATH.clone()
}

/// Load configuration from disk.
///
/// If the config file doesn't exist or is corrupted, returns defaults.
/// Corrupted files are backed up for debugging.
pub fn load_config() -> OverlayConfig {
    load_config_from_path(&config_path())
}

/// Load configuration from a specific path (for testing).
pub fn load_config_from_path(path: &Path) -> OverlayConfig {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<OverlayConfig>(&content) {
            Ok(mut config) => {
                config.validate_and_clamp();
                config
            }
            Err(error) => {
                log::error!("Config parse error, using defaults: {error}");
                let backup = path.with_extension("json.corrupt");
                if let Err(backup_error) = fs::rename(path, &backup) {
                    log::warn!("Failed to backup corrupt config: {backup_error}");
                }
                OverlayConfig::default()
            }
        },
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            log::info!("No config file found, using defaults");
            OverlayConfig::default()
        }
        Err(error) => {
            log::error!("Config read error, using defaults: {error}");
            OverlayConfig::default()
        }
    }
}

/// Save configuration to disk atomically.
///
/// Writes to a temp file first, then renames to the final path.
pub fn save_config(config: &OverlayConfig) -> Result<(), ConfigError> {
    save_config_to_path(config, &config_path())
}

/// Save configuration to a specific path (for testing).
pub fn save_config_to_path(config: &OverlayConfig, path: &Path) -> Result<(), ConfigError> {
    let temp = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(&temp, &json)?;
    fs::rename(&temp, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_recommended_timings() {
        let config = OverlayConfig::default();
        assert_eq!(config.watchdog.check_delay(), Duration::from_millis(500));
        assert_eq!(config.watchdog.max_retries, 3);
        assert_eq!(config.debounce.topology_cooldown(), Duration::from_secs(1));
        assert_eq!(config.debounce.topology_delay(), Duration::from_millis(500));
        assert_eq!(config.debounce.wake_cooldown(), Duration::from_millis(500));
        assert_eq!(config.debounce.wake_delay(), Duration::from_millis(300));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("overlay.json");

        let mut config = OverlayConfig::default();
        config.watchdog.max_retries = 5;
        config.theme.accent_color = "#ff8800".to_string();
        save_config_to_path(&config, &path).expect("save");

        let loaded = load_config_from_path(&path);
        assert_eq!(loaded.watchdog.max_retries, 5);
        assert_eq!(loaded.theme.accent_color, "#ff8800");
    }

    #[test]
    fn corrupt_config_falls_back_to_defaults_and_is_set_aside() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("overlay.json");
        fs::write(&path, "{broken").expect("write corrupt");

        let loaded = load_config_from_path(&path);
        assert_eq!(loaded.watchdog.max_retries, 3);
        assert!(dir.path().join("overlay.json.corrupt").exists());
    }

    #[test]
    fn missing_config_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let loaded = load_config_from_path(&dir.path().join("absent.json"));
        assert_eq!(loaded.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn clamping_repairs_out_of_range_values() {
        let mut config = OverlayConfig {
            watchdog: WatchdogSettings {
                check_delay_ms: 0,
                max_retries: 99,
            },
            ..Default::default()
        };
        config.theme.accent_color = "blue".to_string();
        config.debounce.topology_cooldown_ms = 999_999;

        config.validate_and_clamp();

        assert_eq!(config.watchdog.check_delay_ms, 50);
        assert_eq!(config.watchdog.max_retries, 10);
        assert_eq!(config.debounce.topology_cooldown_ms, 10_000);
        assert_eq!(config.theme.accent_color, default_accent_color());
    }

    #[test]
    fn unknown_fields_are_tolerated_on_load() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("overlay.json");
        fs::write(
            &path,
            r#"{"schema_version":1,"watchdog":{"max_retries":2},"future_field":true}"#,
        )
        .expect("write");

        let loaded = load_config_from_path(&path);
        assert_eq!(loaded.watchdog.max_retries, 2);
        // Unspecified fields take serde defaults.
        assert_eq!(loaded.watchdog.check_delay_ms, 500);
    }
}
