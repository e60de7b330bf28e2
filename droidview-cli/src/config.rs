//! Configuration for the droidview CLI.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Device connection settings.
    pub device: DeviceConfig,
    /// Key storage settings.
    pub keys: KeysConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Device connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Default `host:port` of the device's adbd.
    pub endpoint: String,
}

/// Key storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Directory holding `adbkey` / `adbkey.pub`. Empty means
    /// `~/.droidview` (or the current directory when HOME is unset).
    pub dir: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            keys: KeysConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            endpoint: "192.168.1.10:5555".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self { dir: String::new() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// The effective key directory.
    pub fn key_dir(&self) -> PathBuf {
        if !self.keys.dir.is_empty() {
            return PathBuf::from(&self.keys.dir);
        }
        match std::env::var_os("HOME") {
            Some(home) => Path::new(&home).join(".droidview"),
            None => PathBuf::from("."),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = CliConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("endpoint"));
        assert!(text.contains("level"));
    }

    #[test]
    fn roundtrip_config() {
        let config = CliConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.device.endpoint, config.device.endpoint);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn explicit_key_dir_wins() {
        let mut config = CliConfig::default();
        config.keys.dir = "/opt/keys".into();
        assert_eq!(config.key_dir(), PathBuf::from("/opt/keys"));
    }
}
