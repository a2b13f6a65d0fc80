// ============================================
// inventory.rs - What is this machine, and what's already on it?
// ============================================
//
// Two questions, answered once per run by the preload thread:
//   1. Hardware/OS facts (SystemSnapshot) - shown in the System tab
//   2. Which catalog entries are already installed (InstalledSet) -
//      those checkboxes start greyed out
//
// RULE: no single fact may sink the whole snapshot. Each field is
// collected on its own and falls back to a default if anything goes
// wrong (missing wmic, weird sysinfo data, a panic in a helper).
// ============================================

use crate::catalog::Catalogs;
use crate::process;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use sysinfo::{Disks, System};
use tracing::{debug, info, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Lowercase display names of catalog entries found on the machine.
pub type InstalledSet = BTreeSet<String>;

// ============================================
// DATA STRUCTURES
// ============================================

/// One mounted volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub device: String,
    pub mount: String,
    pub total_gb: f64,
    pub used_gb: f64,
}

/// Hardware/OS facts, captured once at startup.
/// Field names on disk ("os", "cpu") match the boot cache format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSnapshot {
    /// Local time, ISO-8601 to the second
    pub timestamp: String,
    #[serde(rename = "os")]
    pub os_description: String,
    #[serde(rename = "cpu")]
    pub cpu_name: String,
    pub ram_total_gb: f64,
    pub disks: Vec<DiskUsage>,
    /// Raw `wmic baseboard` output (key=value lines)
    pub baseboard_raw: String,
    /// Raw `wmic path win32_VideoController` output
    pub gpu_raw: String,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            timestamp: String::new(),
            os_description: "Unknown".to_string(),
            cpu_name: "Unknown CPU".to_string(),
            ram_total_gb: 0.0,
            disks: Vec::new(),
            baseboard_raw: String::new(),
            gpu_raw: String::new(),
        }
    }
}

impl SystemSnapshot {
    /// Text lines for the System tab / side panels.
    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("OS:  {}", self.os_description),
            format!("CPU: {}", self.cpu_name),
            format!("RAM: {} GB", self.ram_total_gb),
        ];
        for disk in &self.disks {
            lines.push(format!("Disk {} - {} GB", disk.device, disk.total_gb));
        }
        lines.push("Baseboard:".to_string());
        lines.push(or_dash(&self.baseboard_raw));
        lines.push("GPU:".to_string());
        lines.push(or_dash(&self.gpu_raw));
        lines
    }
}

fn or_dash(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() { "-".to_string() } else { trimmed.to_string() }
}

// ============================================
// COLLECTION
// ============================================

/// Collects facts using external tools with a fixed per-call timeout.
#[derive(Debug, Clone)]
pub struct Inventory {
    timeout: Duration,
}

impl Inventory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Gather every snapshot field independently.
    pub fn collect_snapshot(&self) -> SystemSnapshot {
        let defaults = SystemSnapshot::default();

        let mut sys = System::new();
        guarded("memory", (), || sys.refresh_memory());
        guarded("cpu", (), || sys.refresh_cpu_all());

        let snapshot = SystemSnapshot {
            timestamp: guarded("timestamp", defaults.timestamp, || {
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
            }),
            os_description: guarded("os", defaults.os_description, os_description),
            cpu_name: guarded("cpu", defaults.cpu_name, || self.cpu_name(&sys)),
            ram_total_gb: guarded("ram", defaults.ram_total_gb, || {
                round2(sys.total_memory() as f64 / BYTES_PER_GB)
            }),
            disks: guarded("disks", defaults.disks, list_disks),
            baseboard_raw: guarded("baseboard", defaults.baseboard_raw, || {
                self.wmic(&["baseboard", "get", "Product,Manufacturer,Version,SerialNumber", "/format:list"])
            }),
            gpu_raw: guarded("gpu", defaults.gpu_raw, || {
                self.wmic(&["path", "win32_VideoController", "get", "name", "/value"])
            }),
        };

        info!(
            os = %snapshot.os_description,
            cpu = %snapshot.cpu_name,
            ram_gb = snapshot.ram_total_gb,
            disks = snapshot.disks.len(),
            "Collected system snapshot"
        );
        snapshot
    }

    /// Ask winget what's installed and match it against both catalogs.
    pub fn collect_installed(&self, catalogs: &Catalogs) -> InstalledSet {
        let listing = process::capture_output(
            "winget",
            &["list", "--accept-source-agreements"],
            self.timeout,
        );
        if listing.is_empty() {
            warn!("Installed-package listing is empty (winget missing or timed out)");
        }

        let installed = match_installed(&listing, &catalogs.known_ids());
        info!("Detected {} catalog entries already installed", installed.len());
        installed
    }

    fn cpu_name(&self, sys: &System) -> String {
        let brand = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default();
        if !brand.is_empty() {
            return brand;
        }

        let raw = self.wmic(&["cpu", "get", "Name", "/value"]);
        let name = parse_wmic_value(&raw, "Name");
        if name.is_empty() { "Unknown CPU".to_string() } else { name }
    }

    fn wmic(&self, args: &[&str]) -> String {
        process::capture_output("wmic", args, self.timeout).trim().to_string()
    }
}

/// Match a free-text package listing against known catalog ids.
///
/// Each line is lowercased and checked for every known (lowercase) id as a
/// SUBSTRING - listings carry versions, sources and vendor prefixes around
/// the id. The first id that matches a line wins; the rest are skipped for
/// that line. The result holds lowercased display names.
pub fn match_installed(listing: &str, known_ids: &[(String, String)]) -> InstalledSet {
    let mut installed = InstalledSet::new();
    for line in listing.lines() {
        let line_lower = line.to_lowercase();
        if let Some((_, name)) = known_ids.iter().find(|(id, _)| line_lower.contains(id.as_str())) {
            installed.insert(name.to_lowercase());
        }
    }
    installed
}

fn os_description() -> String {
    let long = System::long_os_version().unwrap_or_default();
    let kernel = System::kernel_version().unwrap_or_default();
    match (long.is_empty(), kernel.is_empty()) {
        (true, true) => "Unknown".to_string(),
        (false, true) => long,
        (true, false) => kernel,
        (false, false) => format!("{} ({})", long, kernel),
    }
}

fn list_disks() -> Vec<DiskUsage> {
    Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| {
            let total = disk.total_space();
            let used = total.saturating_sub(disk.available_space());
            DiskUsage {
                device: disk.name().to_string_lossy().into_owned(),
                mount: disk.mount_point().to_string_lossy().into_owned(),
                total_gb: round2(total as f64 / BYTES_PER_GB),
                used_gb: round2(used as f64 / BYTES_PER_GB),
            }
        })
        .collect()
}

/// Pull `Key=Value` out of `wmic ... /value` output.
fn parse_wmic_value(raw: &str, key: &str) -> String {
    let prefix = format!("{}=", key);
    raw.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Run one collection step; a panic inside it becomes `default`.
fn guarded<T>(field: &str, default: T, collect: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(collect)) {
        Ok(value) => value,
        Err(_) => {
            debug!("Collecting '{}' failed, using default", field);
            default
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn known(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(id, name)| (id.to_string(), name.to_string())).collect()
    }

    #[test]
    fn test_match_is_case_insensitive_substring() {
        let ids = known(&[("vlc.vlc", "VLC")]);
        let set = match_installed("Name  Id  Version\nVLC media  VLC.VLC v3.0.18  winget\n", &ids);
        assert!(set.contains("vlc"));
    }

    #[test]
    fn test_match_returns_lowercase_display_names() {
        let ids = known(&[("git.git", "Git For Windows")]);
        let set = match_installed("Git  Git.Git  2.45.1", &ids);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["git for windows".to_string()]);
    }

    #[test]
    fn test_first_matching_id_wins_per_line() {
        // Both ids are substrings of the line; only the first one counts
        let ids = known(&[("7zip.7zip", "7-Zip"), ("7zip", "Seven")]);
        let set = match_installed("7-Zip 23.01 (x64)  7zip.7zip  23.01", &ids);
        assert!(set.contains("7-zip"));
        assert!(!set.contains("seven"));
    }

    #[test]
    fn test_no_match_on_unrelated_lines() {
        let ids = known(&[("mozilla.firefox", "Mozilla Firefox")]);
        let set = match_installed("Google Chrome  Google.Chrome  126.0\n", &ids);
        assert!(set.is_empty());
    }

    #[test]
    fn test_empty_listing_gives_empty_set() {
        let ids = known(&[("vlc.vlc", "VLC")]);
        assert!(match_installed("", &ids).is_empty());
    }

    #[test]
    fn test_parse_wmic_value() {
        let raw = "\r\n\r\nName=Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz\r\n\r\n";
        assert_eq!(parse_wmic_value(raw, "Name"), "Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz");
        assert_eq!(parse_wmic_value("garbage", "Name"), "");
    }

    #[test]
    fn test_guarded_panic_gives_default() {
        let value = guarded("boom", 42u32, || panic!("collector exploded"));
        assert_eq!(value, 42);
    }

    #[test]
    fn test_snapshot_never_fails() {
        let snapshot = Inventory::new(Duration::from_secs(2)).collect_snapshot();
        assert!(!snapshot.timestamp.is_empty());
        assert!(!snapshot.cpu_name.is_empty());
        assert!(snapshot.ram_total_gb >= 0.0);
    }

    #[test]
    fn test_snapshot_reads_old_cache_field_names() {
        let json = r#"{ "timestamp": "2024-01-01T10:00:00", "os": "Windows-10", "cpu": "Ryzen" }"#;
        let snapshot: SystemSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.os_description, "Windows-10");
        assert_eq!(snapshot.cpu_name, "Ryzen");
        assert!(snapshot.disks.is_empty());
    }

    #[test]
    fn test_display_lines_dash_for_missing_raw() {
        let lines = SystemSnapshot::default().display_lines();
        assert_eq!(lines[0], "OS:  Unknown");
        assert!(lines.contains(&"-".to_string()));
    }
}
