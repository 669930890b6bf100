//! Configuration file support for scanflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SCANFLASH_*)
//! 3. Local config file (./scanflash.toml)
//! 4. Global config file (~/.config/scanflash/config.toml)
//!
//! `--config PATH` replaces 3 and 4.

use directories::ProjectDirs;
use log::{debug, warn};
use scanflash::DeviceInfo;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port of the keyboard (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
}

/// Upgrade session defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeSettings {
    /// Side to upgrade ("left" or "right").
    pub side: Option<String>,
    /// Acknowledgment timeout in milliseconds.
    pub ack_timeout_ms: Option<u64>,
    /// Button window in seconds; the polling deadline with `wait_ready`.
    pub button_window_secs: Option<f64>,
    /// Poll `upgrade.isReady` instead of waiting a fixed window.
    #[serde(default)]
    pub wait_ready: bool,
    /// Pause between `isReady` polls in milliseconds.
    pub ready_interval_ms: Option<u64>,
    /// Chunk write retries.
    pub retries: Option<usize>,
    /// Fail on `false` acknowledgments.
    #[serde(default)]
    pub strict_acks: bool,
    /// Take the device layout from the `getInfo` reply.
    #[serde(default)]
    pub query_info: bool,
    /// Skip images the device already runs.
    #[serde(default)]
    pub skip_if_current: bool,
}

/// Device layout overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Hardware revision.
    pub hardware_version: Option<u32>,
    /// Program area base address.
    pub flash_start: Option<u32>,
    /// Flashed program version.
    pub program_version: Option<u32>,
    /// Flashed program CRC.
    pub program_crc: Option<u32>,
}

impl DeviceSettings {
    /// Apply the overrides on top of the stock layout.
    pub fn device_info(&self) -> DeviceInfo {
        let stock = DeviceInfo::default();
        DeviceInfo {
            hardware_version: self
                .hardware_version
                .unwrap_or(stock.hardware_version),
            flash_start: self
                .flash_start
                .unwrap_or(stock.flash_start),
            program_version: self
                .program_version
                .unwrap_or(stock.program_version),
            program_crc: self
                .program_crc
                .unwrap_or(stock.program_crc),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upgrade settings.
    #[serde(default)]
    pub upgrade: UpgradeSettings,
    /// Device layout.
    #[serde(default)]
    pub device: DeviceSettings,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("scanflash.toml")) {
            debug!("Loaded local config from scanflash.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scanflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.connection.serial, other.connection.serial);
        take(&mut self.connection.baud, other.connection.baud);

        let upgrade = other.upgrade;
        take(&mut self.upgrade.side, upgrade.side);
        take(&mut self.upgrade.ack_timeout_ms, upgrade.ack_timeout_ms);
        take(&mut self.upgrade.button_window_secs, upgrade.button_window_secs);
        take(&mut self.upgrade.retries, upgrade.retries);
        take(&mut self.upgrade.ready_interval_ms, upgrade.ready_interval_ms);
        self.upgrade.wait_ready |= upgrade.wait_ready;
        self.upgrade.strict_acks |= upgrade.strict_acks;
        self.upgrade.query_info |= upgrade.query_info;
        self.upgrade.skip_if_current |= upgrade.skip_if_current;

        let device = other.device;
        take(&mut self.device.hardware_version, device.hardware_version);
        take(&mut self.device.flash_start, device.flash_start);
        take(&mut self.device.program_version, device.program_version);
        take(&mut self.device.program_crc, device.program_crc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.upgrade.side.is_none());
        assert!(!config.upgrade.strict_acks);
        assert!(!config.upgrade.query_info);
        assert_eq!(config.device.device_info(), DeviceInfo::default());
    }

    #[test]
    fn test_device_settings_override_single_field() {
        let device = DeviceSettings {
            flash_start: Some(0x6000),
            ..DeviceSettings::default()
        };
        let info = device.device_info();
        assert_eq!(info.flash_start, 0x6000);
        assert_eq!(
            info.program_crc,
            DeviceInfo::default().program_crc
        );
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_connection() {
        let mut base = Config::default();
        base.connection.baud = Some(9600);

        let mut other = Config::default();
        other.connection.serial = Some("/dev/ttyACM0".to_string());
        other.connection.baud = Some(115200);

        base.merge(other);
        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.connection.baud, Some(115200));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.serial = Some("/dev/ttyACM0".to_string());
        base.upgrade.retries = Some(2);
        base.device.flash_start = Some(0x6000);
        base.upgrade.strict_acks = true;

        base.merge(Config::default());

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.upgrade.retries, Some(2));
        assert_eq!(base.device.flash_start, Some(0x6000));
        assert!(base.upgrade.strict_acks);
    }

    #[test]
    fn test_config_merge_upgrade_flags() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.upgrade.side = Some("right".to_string());
        other.upgrade.query_info = true;
        other.upgrade.skip_if_current = true;

        base.merge(other);
        assert_eq!(base.upgrade.side.as_deref(), Some("right"));
        assert!(base.upgrade.query_info);
        assert!(base.upgrade.skip_if_current);
        assert!(!base.upgrade.strict_acks);
    }

    // ---- TOML serialization/deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyACM0"
baud = 115200

[upgrade]
side = "right"
ack_timeout_ms = 2000
button_window_secs = 6.5
retries = 3
strict_acks = true
wait_ready = true
ready_interval_ms = 250

[device]
flash_start = 24576
program_crc = 1234
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.upgrade.side.as_deref(), Some("right"));
        assert_eq!(config.upgrade.ack_timeout_ms, Some(2000));
        assert_eq!(config.upgrade.button_window_secs, Some(6.5));
        assert_eq!(config.upgrade.retries, Some(3));
        assert!(config.upgrade.strict_acks);
        assert!(!config.upgrade.query_info);
        assert!(config.upgrade.wait_ready);
        assert_eq!(config.upgrade.ready_interval_ms, Some(250));

        let info = config.device.device_info();
        assert_eq!(info.flash_start, 0x6000);
        assert_eq!(info.program_crc, 1234);
        assert_eq!(info.hardware_version, 1);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.upgrade.retries.is_none());
        assert!(config.device.flash_start.is_none());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.serial = Some("COM3".to_string());
        config.upgrade.retries = Some(1);
        config.upgrade.skip_if_current = true;
        config.device.program_version = Some(7);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(deserialized.upgrade.retries, Some(1));
        assert!(deserialized.upgrade.skip_if_current);
        assert_eq!(deserialized.device.program_version, Some(7));
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        fs::write(
            &path,
            r#"
[connection]
serial = "/dev/ttyACM1"
[upgrade]
query_info = true
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM1"));
        assert!(config.upgrade.query_info);
    }

    #[test]
    fn test_load_from_path_invalid_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[connection\nserial = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.serial.is_none());
    }

    // ---- global_config_path ----

    #[test]
    fn test_global_config_path_is_some() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("scanflash"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
