// ============================================
// settings.rs - User settings + portable paths
// ============================================
//
// WinPrep is portable: everything it keeps lives NEXT TO the EXE.
//
//   USB Drive/
//   ├── winprep.exe
//   ├── winprep_settings.json   # optional, created by the user
//   ├── catalog/                # optional catalog overrides
//   └── error_log.txt           # only written after a crash
//
// Every settings field has a default, so an empty `{}` file (or no file
// at all) behaves exactly like a fresh install.
// ============================================

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Settings filename (stored next to the EXE)
const SETTINGS_FILE_NAME: &str = "winprep_settings.json";

// ============================================
// PATH HELPERS
// ============================================

/// Get the directory where winprep.exe is located.
///
/// Uses std::env::current_exe() so files always live next to the EXE,
/// even when started from a shortcut with a different working directory.
pub fn app_directory() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        // Canonicalize to resolve any symlinks/junctions, then get parent
        let resolved = exe_path.canonicalize().unwrap_or(exe_path);
        if let Some(parent) = resolved.parent() {
            // Strip \\?\ prefix that canonicalize adds on Windows
            let parent_str = parent.to_string_lossy();
            if let Some(stripped) = parent_str.strip_prefix(r"\\?\") {
                return PathBuf::from(stripped);
            }
            return parent.to_path_buf();
        }
    }
    warn!("Could not determine EXE directory, using current directory");
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

// ============================================
// SETTINGS
// ============================================

/// Tunables read from winprep_settings.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Minimum time the splash stays up, even if preload finishes sooner
    pub min_splash_seconds: f64,

    /// Hard limit for each external command (winget list, wmic, ...)
    pub command_timeout_secs: u64,

    /// Log filter used when RUST_LOG is not set (e.g. "info", "winprep=debug")
    pub log_level: String,

    /// [min, max] seconds the simulated driver installer waits per driver
    pub driver_delay_secs: [u64; 2],
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            min_splash_seconds: 4.0,
            command_timeout_secs: 25,
            log_level: "info".to_string(),
            driver_delay_secs: [2, 5],
        }
    }
}

impl AppSettings {
    /// Load settings from next to the EXE.
    pub fn load() -> Self {
        Self::load_from(&app_directory().join(SETTINGS_FILE_NAME))
    }

    /// Load settings from a specific file. Missing or invalid files give defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Invalid settings file {}: {} (using defaults)", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn min_splash(&self) -> Duration {
        // Negative or NaN values from a hand-edited file collapse to zero
        Duration::try_from_secs_f64(self.min_splash_seconds).unwrap_or(Duration::ZERO)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Driver delay range with min <= max guaranteed.
    pub fn driver_delay(&self) -> (Duration, Duration) {
        let [a, b] = self.driver_delay_secs;
        (Duration::from_secs(a.min(b)), Duration::from_secs(a.max(b)))
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load_from(&dir.path().join("nope.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, r#"{ "min_splash_seconds": 1.5 }"#).unwrap();

        let settings = AppSettings::load_from(&path);
        assert_eq!(settings.min_splash(), Duration::from_millis(1500));
        assert_eq!(settings.command_timeout_secs, 25);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn test_negative_splash_is_zero() {
        let settings = AppSettings { min_splash_seconds: -3.0, ..Default::default() };
        assert_eq!(settings.min_splash(), Duration::ZERO);
    }

    #[test]
    fn test_driver_delay_is_ordered() {
        let settings = AppSettings { driver_delay_secs: [5, 1], ..Default::default() };
        assert_eq!(settings.driver_delay(), (Duration::from_secs(1), Duration::from_secs(5)));
    }
}
