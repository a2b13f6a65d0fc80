// ============================================
// telemetry.rs - Live monitor bar (footer)
// ============================================
//
// Sampled once per second by a UI timer:
//   CPU %, RAM %, system drive %, network down/up in KB/s
//
// GPU load isn't available without vendor libraries, so it's shown as N/A.
// ============================================

use std::path::Path;
use std::time::Instant;
use sysinfo::{Disks, Networks, System};

/// Color band for a percentage reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadLevel {
    Normal,
    Warning,
    Critical,
}

impl LoadLevel {
    /// > 90 critical, > 75 warning, otherwise normal.
    pub fn from_percent(percent: f32) -> Self {
        if percent > 90.0 {
            LoadLevel::Critical
        } else if percent > 75.0 {
            LoadLevel::Warning
        } else {
            LoadLevel::Normal
        }
    }

    /// Index used by the Slint footer (0 normal, 1 warning, 2 critical).
    pub fn as_index(self) -> i32 {
        match self {
            LoadLevel::Normal => 0,
            LoadLevel::Warning => 1,
            LoadLevel::Critical => 2,
        }
    }
}

/// One reading of the monitor bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub disk_percent: f32,
    pub net_down_kbps: f64,
    pub net_up_kbps: f64,
}

impl TelemetrySample {
    /// "↓ 12.3 KB/s | ↑ 0.4 KB/s"
    pub fn network_text(&self) -> String {
        format!("↓ {:.1} KB/s | ↑ {:.1} KB/s", self.net_down_kbps, self.net_up_kbps)
    }
}

/// Keeps the previous readings needed for CPU usage and network rates.
pub struct Telemetry {
    sys: System,
    system_mount: String,
    prev_rx: u64,
    prev_tx: u64,
    prev_at: Instant,
}

impl Telemetry {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        let (rx, tx) = network_totals();
        Self {
            sys,
            system_mount: system_drive_mount(),
            prev_rx: rx,
            prev_tx: tx,
            prev_at: Instant::now(),
        }
    }

    pub fn sample(&mut self) -> TelemetrySample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let ram_percent = percent(self.sys.used_memory(), self.sys.total_memory());

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .iter()
            .find(|d| same_mount(d.mount_point(), &self.system_mount))
            .map(|d| percent(d.total_space().saturating_sub(d.available_space()), d.total_space()))
            .unwrap_or(0.0);

        let (rx, tx) = network_totals();
        let elapsed = self.prev_at.elapsed().as_secs_f64();
        let (down, up) = if elapsed > 0.0 {
            (
                rx.saturating_sub(self.prev_rx) as f64 / 1024.0 / elapsed,
                tx.saturating_sub(self.prev_tx) as f64 / 1024.0 / elapsed,
            )
        } else {
            (0.0, 0.0)
        };
        self.prev_rx = rx;
        self.prev_tx = tx;
        self.prev_at = Instant::now();

        TelemetrySample {
            cpu_percent: self.sys.global_cpu_usage(),
            ram_percent,
            disk_percent,
            net_down_kbps: down,
            net_up_kbps: up,
        }
    }
}

fn network_totals() -> (u64, u64) {
    Networks::new_with_refreshed_list()
        .iter()
        .fold((0, 0), |(rx, tx), (_, data)| {
            (rx + data.total_received(), tx + data.total_transmitted())
        })
}

/// Mount point of the system drive: `%SystemDrive%\` on Windows, `/` elsewhere.
fn system_drive_mount() -> String {
    if cfg!(windows) {
        let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
        format!("{}\\", drive.trim_end_matches('\\'))
    } else {
        "/".to_string()
    }
}

fn same_mount(mount: &Path, wanted: &str) -> bool {
    mount.to_string_lossy().eq_ignore_ascii_case(wanted)
}

fn percent(part: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 100.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_levels() {
        assert_eq!(LoadLevel::from_percent(10.0), LoadLevel::Normal);
        assert_eq!(LoadLevel::from_percent(75.0), LoadLevel::Normal);
        assert_eq!(LoadLevel::from_percent(75.5), LoadLevel::Warning);
        assert_eq!(LoadLevel::from_percent(90.0), LoadLevel::Warning);
        assert_eq!(LoadLevel::from_percent(99.0), LoadLevel::Critical);
    }

    #[test]
    fn test_percent_handles_zero_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn test_network_text() {
        let sample = TelemetrySample {
            cpu_percent: 0.0,
            ram_percent: 0.0,
            disk_percent: 0.0,
            net_down_kbps: 12.34,
            net_up_kbps: 0.0,
        };
        assert_eq!(sample.network_text(), "↓ 12.3 KB/s | ↑ 0.0 KB/s");
    }

    #[test]
    fn test_sample_is_in_range() {
        let mut telemetry = Telemetry::new();
        let sample = telemetry.sample();
        assert!((0.0..=100.0).contains(&sample.ram_percent));
        assert!((0.0..=100.0).contains(&sample.disk_percent));
        assert!(sample.net_down_kbps >= 0.0);
    }
}
