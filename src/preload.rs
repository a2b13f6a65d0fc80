// ============================================
// preload.rs - Background inventory at startup
// ============================================
//
// While the splash screen is up, one background thread:
//   1. Collects the SystemSnapshot
//   2. Scans winget for already-installed catalog entries
//   3. Writes both to the boot cache file (JSON, in the temp folder)
//   4. Signals "done"
//
// Step 4 is GUARANTEED. It runs from a drop guard, so it fires after
// success, after errors, and even if a collector panics. The splash
// screen waits on this signal - if it never fired, the app would hang
// on the splash forever.
//
// HAND-OFF:
// The result is stored in the handle's holder BEFORE the done flag is
// set. The UI thread only reads the holder after seeing the flag, so
// there is never a moment where both threads touch the result.
// ============================================

use crate::catalog::Catalogs;
use crate::inventory::{InstalledSet, Inventory, SystemSnapshot};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Boot cache filename (stored in the OS temp folder)
const CACHE_FILE_NAME: &str = "winprep_boot_cache.json";

// ============================================
// BOOT CACHE FORMAT
// ============================================

/// The `installed` section of the boot cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstalledSection {
    /// Sorted, lowercase display names
    #[serde(default)]
    pub installed_list_raw: Vec<String>,
}

/// Everything the preload thread produces (and the cache file holds).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootCache {
    #[serde(default)]
    pub specs: SystemSnapshot,
    #[serde(default)]
    pub installed: InstalledSection,
}

impl BootCache {
    pub fn new(specs: SystemSnapshot, installed: &InstalledSet) -> Self {
        Self {
            specs,
            installed: InstalledSection {
                installed_list_raw: installed.iter().cloned().collect(),
            },
        }
    }

    /// Installed names as a set (always lowercased, even if the file was hand-edited).
    pub fn installed_set(&self) -> InstalledSet {
        self.installed
            .installed_list_raw
            .iter()
            .map(|name| name.to_lowercase())
            .collect()
    }
}

/// Where the boot cache lives: `<temp>/winprep_boot_cache.json`.
pub fn cache_path() -> PathBuf {
    std::env::temp_dir().join(CACHE_FILE_NAME)
}

/// Read the boot cache. Missing or malformed files give empty defaults.
pub fn load_boot_cache(path: &Path) -> BootCache {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            info!("No boot cache at {}", path.display());
            return BootCache::default();
        }
    };

    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("Boot cache {} is malformed ({}), ignoring it", path.display(), e);
        BootCache::default()
    })
}

fn write_boot_cache(path: &Path, cache: &BootCache) -> Result<()> {
    let json = serde_json::to_string_pretty(cache).context("Failed to serialize boot cache")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// ============================================
// PIPELINE HANDLE
// ============================================

/// State shared between the preload thread and the UI thread.
#[derive(Debug, Default)]
struct Shared {
    done: AtomicBool,
    result: Mutex<Option<BootCache>>,
}

/// Sets `done` when dropped - on every exit path of the worker.
struct DoneGuard(Arc<Shared>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.done.store(true, Ordering::Release);
    }
}

/// Handle to the running (or finished) preload.
#[derive(Debug, Clone)]
pub struct PreloadHandle {
    shared: Arc<Shared>,
}

impl PreloadHandle {
    /// A handle that is already finished (used when the thread can't start).
    fn finished() -> Self {
        let shared = Arc::new(Shared::default());
        shared.done.store(true, Ordering::Release);
        Self { shared }
    }

    /// Has the pipeline signalled completion? Never blocks.
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// Opposite of `is_done()`.
    pub fn is_alive(&self) -> bool {
        !self.is_done()
    }

    /// Block until done or until `timeout` passes. Returns `is_done()`.
    #[allow(dead_code)]
    pub fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.is_done()
    }

    /// Take the collected result. `None` before completion, after a failed
    /// collection, or if it was already taken.
    pub fn take_result(&self) -> Option<BootCache> {
        if !self.is_done() {
            return None;
        }
        match self.shared.result.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// The startup preload. There is exactly one per process.
pub struct PreloadPipeline;

impl PreloadPipeline {
    /// Start the real inventory in the background.
    pub fn start(cache_path: Option<PathBuf>, catalogs: Catalogs, timeout: Duration) -> PreloadHandle {
        Self::start_with(cache_path, move || {
            let inventory = Inventory::new(timeout);
            let specs = inventory.collect_snapshot();
            let installed = inventory.collect_installed(&catalogs);
            BootCache::new(specs, &installed)
        })
    }

    /// Start the pipeline with a custom collector.
    ///
    /// The collector may panic; the handle still reports done.
    pub fn start_with<F>(cache_path: Option<PathBuf>, collect: F) -> PreloadHandle
    where
        F: FnOnce() -> BootCache + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);

        let spawned = thread::Builder::new()
            .name("preload".to_string())
            .spawn(move || {
                let _guard = DoneGuard(Arc::clone(&worker_shared));
                run_pipeline(&worker_shared, cache_path.as_deref(), collect);
            });

        match spawned {
            Ok(_) => PreloadHandle { shared },
            Err(e) => {
                error!("Could not start preload thread: {}", e);
                PreloadHandle::finished()
            }
        }
    }
}

fn run_pipeline<F>(shared: &Shared, cache_path: Option<&Path>, collect: F)
where
    F: FnOnce() -> BootCache,
{
    info!("Preload started");
    let started = Instant::now();

    let cache = match panic::catch_unwind(AssertUnwindSafe(collect)) {
        Ok(cache) => cache,
        Err(_) => {
            error!("Preload collection panicked; continuing without a snapshot");
            return;
        }
    };

    if let Some(path) = cache_path {
        match write_boot_cache(path, &cache) {
            Ok(()) => info!("Boot cache written to {}", path.display()),
            Err(e) => warn!("{:#}", e),
        }
    }

    match shared.result.lock() {
        Ok(mut slot) => *slot = Some(cache),
        Err(poisoned) => *poisoned.into_inner() = Some(cache),
    }
    info!("Preload finished in {:.1?}", started.elapsed());
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cache() -> BootCache {
        let mut installed = InstalledSet::new();
        installed.insert("vlc media player".to_string());
        let specs = SystemSnapshot { cpu_name: "Test CPU".to_string(), ..Default::default() };
        BootCache::new(specs, &installed)
    }

    #[test]
    fn test_pipeline_writes_cache_and_hands_off_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);

        let handle = PreloadPipeline::start_with(Some(path.clone()), sample_cache);
        assert!(handle.wait_done(Duration::from_secs(5)));

        let result = handle.take_result().expect("result should be handed off");
        assert_eq!(result, sample_cache());
        assert_eq!(load_boot_cache(&path), sample_cache());

        // One-shot: the second take gets nothing
        assert!(handle.take_result().is_none());
    }

    #[test]
    fn test_done_even_when_collection_panics_and_cache_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        // Parent folder doesn't exist, so the write would fail too
        let bad_path = dir.path().join("missing").join(CACHE_FILE_NAME);

        let handle = PreloadPipeline::start_with(Some(bad_path), || panic!("inventory exploded"));
        assert!(handle.wait_done(Duration::from_secs(5)));
        assert!(!handle.is_alive());
        assert!(handle.take_result().is_none());
    }

    #[test]
    fn test_done_when_only_cache_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bad_path = dir.path().join("missing").join(CACHE_FILE_NAME);

        let handle = PreloadPipeline::start_with(Some(bad_path.clone()), sample_cache);
        assert!(handle.wait_done(Duration::from_secs(5)));
        assert_eq!(handle.take_result(), Some(sample_cache()));
        assert!(!bad_path.exists());
    }

    #[test]
    fn test_no_cache_path_skips_writing() {
        let handle = PreloadPipeline::start_with(None, sample_cache);
        assert!(handle.wait_done(Duration::from_secs(5)));
        assert!(handle.take_result().is_some());
    }

    #[test]
    fn test_alive_while_collecting() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let handle = PreloadPipeline::start_with(None, move || {
            let _ = release_rx.recv();
            BootCache::default()
        });

        assert!(handle.is_alive());
        assert!(handle.take_result().is_none());

        release_tx.send(()).unwrap();
        assert!(handle.wait_done(Duration::from_secs(5)));
    }

    #[test]
    fn test_missing_cache_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_boot_cache(&dir.path().join("none.json")), BootCache::default());
    }

    #[test]
    fn test_malformed_cache_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);
        fs::write(&path, "{\"specs\": [1, 2").unwrap();
        assert_eq!(load_boot_cache(&path), BootCache::default());
    }

    #[test]
    fn test_installed_set_is_lowercased() {
        let cache: BootCache =
            serde_json::from_str(r#"{ "installed": { "installed_list_raw": ["VLC Media Player"] } }"#).unwrap();
        assert!(cache.installed_set().contains("vlc media player"));
    }
}
