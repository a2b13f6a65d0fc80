// ============================================
// crash.rs - Last-resort failure report
// ============================================
//
// If the boot sequence returns an error or anything panics, we write
// error_log.txt next to the EXE and exit with code 1. No dialog box.
//
// The report looks like:
//
//   [2026-10-14 09:12:44] Panic
//   Message: index out of bounds
//   --- Detail ---
//   ...
// ============================================

use crate::settings;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;

pub const CRASH_LOG_NAME: &str = "error_log.txt";

/// What went wrong, in a form that can be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub timestamp: String,
    pub kind: String,
    pub message: String,
    pub detail: String,
}

impl CrashReport {
    /// Report for an error returned from the boot sequence.
    /// `{:#}` gives the one-line context chain, `{:?}` the full one.
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            timestamp: now(),
            kind: "StartupError".to_string(),
            message: format!("{:#}", err),
            detail: format!("{:?}", err),
        }
    }

    /// Report for a panic caught by the hook.
    pub fn from_panic(message: String, location: Option<String>, backtrace: String) -> Self {
        let mut detail = String::new();
        if let Some(location) = location {
            detail.push_str(&format!("Location: {}\n", location));
        }
        detail.push_str(&backtrace);
        Self {
            timestamp: now(),
            kind: "Panic".to_string(),
            message,
            detail,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("[{}] {}\n", self.timestamp, self.kind));
        out.push_str(&format!("Message: {}\n", self.message));
        out.push_str("--- Detail ---\n");
        out.push_str(self.detail.trim_end());
        out.push_str("\n\n");
        out
    }
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// error_log.txt next to the EXE
pub fn crash_log_path() -> PathBuf {
    settings::app_directory().join(CRASH_LOG_NAME)
}

/// Append a report to `path`. Earlier crashes are kept.
pub fn write_crash_log_to(path: &Path, report: &CrashReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open crash log {:?}", path))?;
    file.write_all(report.render().as_bytes())
        .with_context(|| format!("Failed to write crash log {:?}", path))?;
    Ok(())
}

/// Log the report and write it next to the EXE. Never fails.
pub fn record(report: &CrashReport) {
    error!("{}: {}", report.kind, report.message);
    let path = crash_log_path();
    if let Err(e) = write_crash_log_to(&path, report) {
        error!("{:#}", e);
    }
}

/// Turn a panic payload into text (`&str` and `String` payloads only).
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Stop Windows from showing its own crash/error dialogs.
#[cfg(windows)]
pub fn suppress_error_dialogs() {
    use winapi::um::errhandlingapi::SetErrorMode;
    use winapi::um::winbase::{SEM_FAILCRITICALERRORS, SEM_NOGPFAULTERRORBOX};
    unsafe {
        SetErrorMode(SEM_FAILCRITICALERRORS | SEM_NOGPFAULTERRORBOX);
    }
}

#[cfg(not(windows))]
pub fn suppress_error_dialogs() {}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_report_from_error_keeps_context_chain() {
        let err = anyhow!("disk unplugged").context("Failed to load catalog");
        let report = CrashReport::from_error(&err);

        assert_eq!(report.kind, "StartupError");
        assert_eq!(report.message, "Failed to load catalog: disk unplugged");
        assert!(report.detail.contains("disk unplugged"));
    }

    #[test]
    fn test_render_layout() {
        let report = CrashReport {
            timestamp: "2026-01-02 03:04:05".to_string(),
            kind: "Panic".to_string(),
            message: "boom".to_string(),
            detail: "Location: src/main.rs:10:5\n".to_string(),
        };
        let text = report.render();

        assert!(text.starts_with("[2026-01-02 03:04:05] Panic\n"));
        assert!(text.contains("Message: boom\n"));
        assert!(text.contains("--- Detail ---\nLocation: src/main.rs:10:5\n"));
    }

    #[test]
    fn test_write_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CRASH_LOG_NAME);
        let first = CrashReport::from_panic("one".to_string(), None, String::new());
        let second = CrashReport::from_panic("two".to_string(), Some("a.rs:1:1".to_string()), String::new());

        write_crash_log_to(&path, &first).unwrap();
        write_crash_log_to(&path, &second).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Message: one"));
        assert!(text.contains("Message: two"));
        assert!(text.contains("Location: a.rs:1:1"));
    }

    #[test]
    fn test_write_into_missing_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join(CRASH_LOG_NAME);
        let report = CrashReport::from_panic("x".to_string(), None, String::new());
        assert!(write_crash_log_to(&path, &report).is_err());
    }

    #[test]
    fn test_panic_message_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static text");

        let caught = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "formatted 42");
    }
}
