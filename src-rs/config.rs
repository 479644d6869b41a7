//! Audit configuration: heuristic thresholds, adb settings, device-side
//! paths and log tags. Every field has a default, so a config file only
//! needs the keys it changes.

use crate::controller::DeviceConfig;
use crate::explore::Thresholds;
use crate::logcat::LogTags;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const OUT_DIR_ENV: &str = "NAV_AUDIT_OUT_DIR";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub thresholds: Thresholds,
    pub adb: AdbConfig,
    pub device: DeviceConfig,
    pub tags: LogTags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    pub program: String,
    pub serial: Option<String>,
    pub command_timeout_ms: u64,
    /// Time logcat keeps reading after a command returns.
    pub log_settle_ms: u64,
    /// Pause before each screenshot.
    pub capture_delay_ms: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            program: "adb".to_string(),
            serial: None,
            command_timeout_ms: 6000,
            log_settle_ms: 1000,
            capture_delay_ms: 500,
        }
    }
}

impl AdbConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn log_settle(&self) -> Duration {
        Duration::from_millis(self.log_settle_ms)
    }

    pub fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.capture_delay_ms)
    }
}

impl AuditConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON: {}", path.display()))
    }
}

/// Root for screen directories given as relative names.
pub fn out_root() -> PathBuf {
    env::var(OUT_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".nav-audit"))
}

/// Absolute screen paths are used as given; relative ones live under
/// [`out_root`].
pub fn resolve_screen_dir(dir: &Path) -> PathBuf {
    if dir.is_absolute() || dir.exists() {
        dir.to_path_buf()
    } else {
        out_root().join(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::FAR_OFF_STEPS;
    use tempfile::tempdir;

    #[test]
    fn missing_path_gives_defaults() {
        let config = AuditConfig::load(None).unwrap();
        assert_eq!(config, AuditConfig::default());
        assert_eq!(config.thresholds.far_off_steps, FAR_OFF_STEPS);
        assert_eq!(config.tags.events, "LATTE_A11Y_EVENT_TAG");
    }

    #[test]
    fn partial_file_overrides_only_its_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.json");
        fs::write(
            &path,
            r#"{"thresholds": {"step_budget": 40}, "adb": {"serial": "emulator-5554"}}"#,
        )
        .unwrap();

        let config = AuditConfig::load(Some(&path)).unwrap();
        assert_eq!(config.thresholds.step_budget, 40);
        assert_eq!(config.thresholds.revisit_limit, 2);
        assert_eq!(config.adb.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.adb.program, "adb");
        assert_eq!(config.device.execute_timeout_ms, 6000);
    }

    #[test]
    fn bad_json_names_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let err = AuditConfig::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }

    #[test]
    fn absolute_screen_dir_is_kept() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve_screen_dir(dir.path()), dir.path());
    }
}
