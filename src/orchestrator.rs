// ============================================
// orchestrator.rs - Sequential, cancellable installs
// ============================================
//
// One InstallController per tab (Apps, Drivers). It owns the tab's
// selection and turns "Install" into a run on a worker thread:
//
//   Idle ──start──> Running ──┬──> Completed  (every item attempted)
//                             └──> Cancelled  (user pressed Cancel)
//
// Both end states allow a new start.
//
// RULES FOR A RUN:
//   - Items go to the installer ONE AT A TIME, in selection order.
//     winget is not safe to run twice in parallel.
//   - Cancel is checked BEFORE each item. A running winget call is
//     never interrupted; the run stops at the next item boundary.
//   - A failed item doesn't stop the run. Only Cancel does.
//   - A successful item becomes non-selectable for the rest of the session.
//
// THREADING:
// The worker never touches the UI. It sends InstallEvents through a sink
// (a channel in main.rs); the UI thread drains the channel and calls
// `InstallController::apply()` for each event. The only state the two
// threads share is the cancel flag.
// ============================================

use crate::catalog::{Catalog, CatalogKind};
use crate::install::Installer;
use crate::inventory::InstalledSet;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

// ============================================
// RUN EVENTS
// ============================================

/// Outcome for one attempted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub package_id: String,
    pub success: bool,
}

/// Everything a run reports, in the order it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Started { total: usize },
    ItemResult(InstallResult),
    Progress { completed: usize, total: usize },
    /// Run stopped by the user; `remaining` were never attempted
    Cancelled { remaining: Vec<String> },
    /// Every item was attempted
    AllDone,
}

impl InstallEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallEvent::Cancelled { .. } | InstallEvent::AllDone)
    }
}

/// Cooperative cancel flag. The UI sets it, the worker polls it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled { remaining: Vec<String> },
}

/// What a finished run returns (the same facts the events carried).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub results: Vec<InstallResult>,
    pub status: RunStatus,
}

impl RunOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn result_map(&self) -> HashMap<String, bool> {
        self.results
            .iter()
            .map(|r| (r.package_id.clone(), r.success))
            .collect()
    }
}

/// Progress as a 0.0..=1.0 fraction.
pub fn progress_fraction(completed: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        completed as f32 / total as f32
    }
}

/// Install `selection` one id at a time.
///
/// For each item: check `cancel`, call the installer with just that id,
/// then emit `ItemResult` followed by `Progress`. An id missing from the
/// installer's answer, or an installer panic, counts as a failure. Ends with exactly one of
/// `Cancelled` or `AllDone`.
pub fn run_installation(
    selection: &[String],
    installer: &dyn Installer,
    cancel: &CancelToken,
    mut on_event: impl FnMut(InstallEvent),
) -> RunOutcome {
    let total = selection.len();
    on_event(InstallEvent::Started { total });

    let mut results = Vec::with_capacity(total);
    for (index, package_id) in selection.iter().enumerate() {
        if cancel.is_cancelled() {
            let remaining = selection[index..].to_vec();
            info!("Run cancelled after {}/{} items", index, total);
            on_event(InstallEvent::Cancelled { remaining: remaining.clone() });
            return RunOutcome { results, status: RunStatus::Cancelled { remaining } };
        }

        // A panicking installer fails this item only; the run carries on
        let answer = panic::catch_unwind(AssertUnwindSafe(|| {
            installer.install(std::slice::from_ref(package_id))
        }));
        let success = match answer {
            Ok(answer) => answer.get(package_id).copied().unwrap_or(false),
            Err(_) => {
                warn!("Installer panicked on {}", package_id);
                false
            }
        };
        info!("[{}/{}] {} -> {}", index + 1, total, package_id, if success { "ok" } else { "failed" });

        let result = InstallResult { package_id: package_id.clone(), success };
        on_event(InstallEvent::ItemResult(result.clone()));
        results.push(result);
        on_event(InstallEvent::Progress { completed: index + 1, total });
    }

    on_event(InstallEvent::AllDone);
    RunOutcome { results, status: RunStatus::Completed }
}

// ============================================
// PER-TAB CONTROLLER
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Selection + run state for one install tab. Lives on the UI thread.
pub struct InstallController {
    kind: CatalogKind,
    catalog: Catalog,
    installer: Arc<dyn Installer>,
    installed: InstalledSet,
    /// Package ids that can't be ticked (already installed)
    locked: HashSet<String>,
    /// Ticked ids, in the order they were ticked
    selected: Vec<String>,
    state: RunState,
    cancel: CancelToken,
    progress: f32,
    log: Vec<String>,
    /// Set when the tab can't be used at all
    unavailable: Option<String>,
}

impl InstallController {
    /// Entries whose display name is already in `installed` start locked.
    pub fn new(
        kind: CatalogKind,
        catalog: Catalog,
        installer: Arc<dyn Installer>,
        installed: &InstalledSet,
    ) -> Self {
        let locked = catalog
            .entries()
            .filter(|e| installed.contains(&e.display_name.to_lowercase()))
            .map(|e| e.package_id.clone())
            .collect();

        Self {
            kind,
            catalog,
            installer,
            installed: installed.clone(),
            locked,
            selected: Vec::new(),
            state: RunState::Idle,
            cancel: CancelToken::new(),
            progress: 0.0,
            log: Vec::new(),
            unavailable: None,
        }
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Turn the whole tab off (e.g. winget missing). Logs `reason` once.
    pub fn set_unavailable(&mut self, reason: &str) {
        if self.unavailable.is_none() {
            self.log.push(reason.to_string());
        }
        self.unavailable = Some(reason.to_string());
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn installed(&self) -> &InstalledSet {
        &self.installed
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn is_selected(&self, package_id: &str) -> bool {
        self.selected.iter().any(|id| id == package_id)
    }

    pub fn is_locked(&self, package_id: &str) -> bool {
        self.locked.contains(package_id)
    }

    /// Can this id be ticked/unticked right now?
    pub fn is_selectable(&self, package_id: &str) -> bool {
        self.is_available()
            && !self.is_running()
            && !self.is_locked(package_id)
            && self.catalog.find(package_id).is_some()
    }

    pub fn can_start(&self) -> bool {
        self.is_available() && !self.is_running() && !self.selected.is_empty()
    }

    pub fn can_cancel(&self) -> bool {
        self.is_running() && !self.cancel.is_cancelled()
    }

    /// Tick or untick one entry. Returns false if the change was refused.
    pub fn toggle(&mut self, package_id: &str, checked: bool) -> bool {
        if !self.is_selectable(package_id) {
            return false;
        }
        if checked {
            if !self.is_selected(package_id) {
                self.selected.push(package_id.to_string());
            }
        } else {
            self.selected.retain(|id| id != package_id);
        }
        true
    }

    /// Tick every selectable entry, in catalog order.
    pub fn select_all(&mut self) {
        if self.is_running() {
            return;
        }
        let ids: Vec<String> = self
            .catalog
            .entries()
            .map(|e| e.package_id.clone())
            .filter(|id| self.is_selectable(id))
            .collect();
        self.selected = ids;
    }

    pub fn deselect_all(&mut self) {
        if self.is_running() {
            return;
        }
        self.selected.clear();
    }

    /// Start a run of the current selection on a worker thread.
    ///
    /// No-op (returns false) while a run is active, when nothing is
    /// selected, or when the tab is unavailable. Events go to `sink`.
    pub fn start<S>(&mut self, sink: S) -> bool
    where
        S: Fn(InstallEvent) + Send + 'static,
    {
        if self.is_running() {
            debug!("{}: run already active, ignoring start", self.kind);
            return false;
        }
        if !self.can_start() {
            return false;
        }

        self.cancel.reset();
        let selection = self.selected.clone();
        let installer = Arc::clone(&self.installer);
        let cancel = self.cancel.clone();

        let kind = self.kind;
        let spawned = thread::Builder::new()
            .name(format!("install-{}", kind.to_string().to_lowercase()))
            .spawn(move || {
                let outcome = run_installation(&selection, installer.as_ref(), &cancel, |event| sink(event));
                info!(
                    "{}: {}/{} succeeded ({:?})",
                    kind,
                    outcome.succeeded(),
                    outcome.result_map().len(),
                    outcome.status
                );
            });

        match spawned {
            Ok(_) => {
                self.state = RunState::Running;
                self.progress = 0.0;
                true
            }
            Err(e) => {
                error!("{}: could not start install worker: {}", self.kind, e);
                self.log.push(format!("Could not start installation: {}", e));
                false
            }
        }
    }

    /// Ask the running worker to stop before its next item.
    pub fn cancel(&mut self) -> bool {
        if !self.can_cancel() {
            return false;
        }
        self.cancel.cancel();
        self.log.push("Cancelling after the current item...".to_string());
        true
    }

    /// Fold one worker event into the tab state. UI thread only.
    pub fn apply(&mut self, event: &InstallEvent) {
        match event {
            InstallEvent::Started { total } => {
                self.log.push(format!("Starting installation of {} item(s)", total));
            }
            InstallEvent::ItemResult(result) => {
                let mark = if result.success { "[OK]" } else { "[FAILED]" };
                self.log.push(format!("{} {}", mark, result.package_id));
                if result.success {
                    self.locked.insert(result.package_id.clone());
                    if let Some(entry) = self.catalog.find(&result.package_id) {
                        self.installed.insert(entry.display_name.to_lowercase());
                    }
                }
            }
            InstallEvent::Progress { completed, total } => {
                self.progress = progress_fraction(*completed, *total);
            }
            InstallEvent::Cancelled { remaining } => {
                self.log.push(format!("Installation cancelled ({} item(s) skipped)", remaining.len()));
                self.finish(RunState::Cancelled);
            }
            InstallEvent::AllDone => {
                self.log.push("All done.".to_string());
                self.finish(RunState::Completed);
            }
        }
    }

    fn finish(&mut self, state: RunState) {
        self.state = state;
        self.selected.clear();
    }
}

// ============================================
// TESTS
// ============================================
