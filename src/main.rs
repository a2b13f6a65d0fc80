// ============================================
// WinPrep - main.rs
// ============================================
// This is the entry point of the application.
//
// The program flow is:
// 1. main() sets up logging + crash reporting
// 2. The preload pipeline starts collecting system info in the background
// 3. The splash window stays up until the pipeline is done AND the
//    minimum splash time has passed (see gate.rs)
// 4. The main window is filled from the boot cache and shown
// 5. The Slint event loop runs until the main window is closed
//
// Worker threads never touch the UI. They send UiMessage values over a
// channel, and a 50 ms timer on the UI thread applies them.
// ============================================

// Include the compiled Slint UI code
// This macro reads the generated code from build.rs
slint::include_modules!();

use anyhow::{Context, Result};
use slint::{ComponentHandle, ModelRc, SharedString, Timer, TimerMode, VecModel};
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

// Our modules
mod catalog;       // Program / driver catalogs (TOML)
mod crash;         // error_log.txt on fatal errors
mod gate;          // When the splash may close
mod install;       // winget + simulated driver installers
mod inventory;     // Hardware facts + installed detection
mod orchestrator;  // Sequential, cancellable install runs
mod preload;       // Background collection + boot cache
mod process;       // Hidden child processes with timeouts
mod settings;      // winprep_settings.json
mod telemetry;     // Footer monitor bar
mod usb;           // unattend.xml for USB setup media

use catalog::{CatalogKind, Catalogs};
use crash::CrashReport;
use gate::StartupGate;
use install::{DriverInstaller, PackageInstaller};
use inventory::SystemSnapshot;
use orchestrator::{InstallController, InstallEvent};
use preload::{BootCache, PreloadHandle, PreloadPipeline};
use settings::AppSettings;
use telemetry::{LoadLevel, Telemetry};
use usb::{RemovableDrive, UsbBuildParams};

/// How often worker messages are applied to the UI
const PUMP_INTERVAL: Duration = Duration::from_millis(50);
/// How often the footer is refreshed
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

const WINGET_MISSING: &str =
    "winget was not found. Install \"App Installer\" from the Microsoft Store to enable this tab.";

// ============================================
// MESSAGES FROM WORKER THREADS
// ============================================

enum UiMessage {
    /// Progress from an install worker
    Install(CatalogKind, InstallEvent),
    /// Result of the startup `winget --version` probe
    PackageManager(bool),
    /// The USB worker finished
    UsbDone(bool),
}

// ============================================
// UI-THREAD STATE
// ============================================

/// Everything the callbacks mutate. Created when the splash closes.
struct AppState {
    apps: InstallController,
    drivers: InstallController,
    usb: UsbPage,
}

#[derive(Default)]
struct UsbPage {
    iso: Option<PathBuf>,
    busy: bool,
    log: Vec<String>,
}

impl AppState {
    fn from_boot_cache(boot: &BootCache, catalogs: &Catalogs, settings: &AppSettings) -> Self {
        let installed = boot.installed_set();
        info!("{} catalog entries already installed", installed.len());

        let apps = InstallController::new(
            CatalogKind::Programs,
            catalogs.get(CatalogKind::Programs).clone(),
            Arc::new(PackageInstaller::default()),
            &installed,
        );
        let (min_delay, max_delay) = settings.driver_delay();
        let drivers = InstallController::new(
            CatalogKind::Drivers,
            catalogs.get(CatalogKind::Drivers).clone(),
            Arc::new(DriverInstaller::new(min_delay, max_delay)),
            &installed,
        );

        Self { apps, drivers, usb: UsbPage::default() }
    }

    /// Tab index from the UI: 0 = Apps, 1 = Drivers
    fn controller_mut(&mut self, tab: i32) -> Option<&mut InstallController> {
        match tab {
            0 => Some(&mut self.apps),
            1 => Some(&mut self.drivers),
            _ => None,
        }
    }

    fn controller_for(&mut self, kind: CatalogKind) -> &mut InstallController {
        match kind {
            CatalogKind::Programs => &mut self.apps,
            CatalogKind::Drivers => &mut self.drivers,
        }
    }
}

type SharedState = Rc<RefCell<Option<AppState>>>;

// ============================================
// MAIN FUNCTION
// ============================================

fn main() {
    crash::suppress_error_dialogs();

    let settings = AppSettings::load();
    init_logging(&settings.log_level);
    install_panic_hook();

    match std::panic::catch_unwind(AssertUnwindSafe(|| run(settings))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            crash::record(&CrashReport::from_error(&e));
            std::process::exit(1);
        }
        // The panic hook already wrote the report
        Err(_) => std::process::exit(1),
    }
}

/// RUST_LOG wins, then the settings file, then "info".
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Panics on the main thread are fatal and go to error_log.txt.
/// Worker panics are contained by their owners and only logged.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let message = crash::panic_message(info.payload());
        let location = info.location().map(|l| l.to_string());

        let thread = std::thread::current();
        if thread.name() == Some("main") {
            let backtrace = std::backtrace::Backtrace::force_capture().to_string();
            crash::record(&CrashReport::from_panic(message, location, backtrace));
        } else {
            error!(
                "thread '{}' panicked at {}: {}",
                thread.name().unwrap_or("<unnamed>"),
                location.as_deref().unwrap_or("?"),
                message
            );
        }
    }));
}

// ============================================
// BOOT SEQUENCE
// ============================================

fn run(settings: AppSettings) -> Result<()> {
    info!("============================================");
    info!("WinPrep v{}", env!("CARGO_PKG_VERSION"));
    info!("============================================");
    info!("App directory: {:?}", settings::app_directory());

    let catalogs = Catalogs::load();
    let cache_path = preload::cache_path();
    debug!("Boot cache: {:?}", cache_path);

    // Step 1: start collecting while the splash is up
    let handle = PreloadPipeline::start(Some(cache_path.clone()), catalogs.clone(), settings.command_timeout());

    let splash = SplashWindow::new().context("Failed to create splash window")?;
    splash.set_version(format!("v{}", env!("CARGO_PKG_VERSION")).into());
    splash.show().context("Failed to show splash window")?;
    let gate = StartupGate::enter(settings.min_splash());

    // Step 2: build (but don't show) the main window and wire callbacks
    let ui = MainWindow::new().context("Failed to create main window")?;
    ui.set_version(format!("v{}", env!("CARGO_PKG_VERSION")).into());

    let state: SharedState = Rc::new(RefCell::new(None));
    let (tx, rx) = mpsc::channel::<UiMessage>();

    wire_install_callbacks(&ui, &state, &tx);
    wire_usb_callbacks(&ui, &state, &tx);

    // winget probe runs off the UI thread; the answer arrives via the pump
    {
        let tx = tx.clone();
        let spawned = std::thread::Builder::new()
            .name("winget-probe".to_string())
            .spawn(move || {
                let _ = tx.send(UiMessage::PackageManager(install::check_package_manager()));
            });
        if let Err(e) = spawned {
            warn!("Could not start winget probe: {}", e);
        }
    }

    // Step 3: timers
    let failure: Rc<RefCell<Option<anyhow::Error>>> = Rc::new(RefCell::new(None));
    let gate_timer = Rc::new(Timer::default());
    start_gate_timer(
        &gate_timer,
        GateContext {
            gate,
            handle,
            cache_path,
            catalogs,
            settings,
            splash: splash.as_weak(),
            ui: ui.as_weak(),
            state: Rc::clone(&state),
            failure: Rc::clone(&failure),
        },
    );

    let pump_timer = Timer::default();
    pump_timer.start(TimerMode::Repeated, PUMP_INTERVAL, {
        let ui = ui.as_weak();
        let state = Rc::clone(&state);
        move || pump_messages(&rx, &ui, &state)
    });

    let telemetry_timer = Timer::default();
    let mut telemetry = Telemetry::new();
    telemetry_timer.start(TimerMode::Repeated, TELEMETRY_INTERVAL, {
        let ui = ui.as_weak();
        move || {
            if let Some(ui) = ui.upgrade() {
                update_footer(&ui, &mut telemetry);
            }
        }
    });

    info!("Starting UI...");
    slint::run_event_loop().context("UI event loop failed")?;

    let failed = failure.borrow_mut().take();
    if let Some(e) = failed {
        return Err(e);
    }
    info!("WinPrep closed");
    Ok(())
}

/// What the gate timer needs once the gate opens.
struct GateContext {
    gate: StartupGate,
    handle: PreloadHandle,
    cache_path: PathBuf,
    catalogs: Catalogs,
    settings: AppSettings,
    splash: slint::Weak<SplashWindow>,
    ui: slint::Weak<MainWindow>,
    state: SharedState,
    failure: Rc<RefCell<Option<anyhow::Error>>>,
}

/// Poll the startup gate every few ms. When it opens: load the boot
/// cache, fill the main window, show it, then hide the splash.
fn start_gate_timer(timer: &Rc<Timer>, ctx: GateContext) {
    let weak_timer = Rc::downgrade(timer);
    timer.start(TimerMode::Repeated, gate::POLL_INTERVAL, move || {
        if !ctx.gate.is_open(&ctx.handle) {
            if ctx.handle.is_done() {
                if let Some(splash) = ctx.splash.upgrade() {
                    splash.set_status("Ready".into());
                }
            }
            return;
        }
        if let Some(timer) = weak_timer.upgrade() {
            timer.stop();
        }

        // Prefer the in-memory result; fall back to the file on disk
        let boot = ctx
            .handle
            .take_result()
            .unwrap_or_else(|| preload::load_boot_cache(&ctx.cache_path));

        let Some(ui) = ctx.ui.upgrade() else { return };
        ui.set_system_lines(string_model(&boot.specs.display_lines()));
        log_snapshot(&boot.specs);

        let app = AppState::from_boot_cache(&boot, &ctx.catalogs, &ctx.settings);
        render_tab(&ui, &app.apps);
        render_tab(&ui, &app.drivers);
        render_usb(&ui, &app.usb);
        refresh_drives(&ui);
        *ctx.state.borrow_mut() = Some(app);

        // Main window first, so there's always one window open
        if let Err(e) = ui.show().context("Failed to show main window") {
            *ctx.failure.borrow_mut() = Some(e);
            let _ = slint::quit_event_loop();
            return;
        }
        if let Some(splash) = ctx.splash.upgrade() {
            let _ = splash.hide();
        }
        info!("Startup complete");
    });
}

fn log_snapshot(specs: &SystemSnapshot) {
    info!("OS: {}", specs.os_description);
    info!("CPU: {}", specs.cpu_name);
    info!("RAM: {} GB", specs.ram_total_gb);
}

// ============================================
// MESSAGE PUMP
// ============================================

/// Apply every queued worker message, then redraw what changed.
/// Messages wait in the channel until the main window exists.
fn pump_messages(rx: &Receiver<UiMessage>, ui: &slint::Weak<MainWindow>, state: &SharedState) {
    let mut guard = state.borrow_mut();
    let Some(app) = guard.as_mut() else { return };
    let Some(ui) = ui.upgrade() else { return };

    let mut dirty_apps = false;
    let mut dirty_drivers = false;
    let mut dirty_usb = false;

    while let Ok(message) = rx.try_recv() {
        match message {
            UiMessage::Install(kind, event) => {
                let controller = app.controller_for(kind);
                controller.apply(&event);
                if event.is_terminal() {
                    info!(
                        "{}: run ended ({:?}), {} entries installed",
                        kind,
                        controller.state(),
                        controller.installed().len()
                    );
                }
                match kind {
                    CatalogKind::Programs => dirty_apps = true,
                    CatalogKind::Drivers => dirty_drivers = true,
                }
            }
            UiMessage::PackageManager(available) => {
                if !available {
                    app.apps.set_unavailable(WINGET_MISSING);
                    dirty_apps = true;
                }
            }
            UiMessage::UsbDone(ok) => {
                app.usb.busy = false;
                app.usb.log.push(if ok {
                    "unattend.xml written to the Desktop".to_string()
                } else {
                    "USB build failed - see the log for details".to_string()
                });
                dirty_usb = true;
            }
        }
    }

    if dirty_apps {
        render_tab(&ui, &app.apps);
    }
    if dirty_drivers {
        render_tab(&ui, &app.drivers);
    }
    if dirty_usb {
        render_usb(&ui, &app.usb);
    }
}

// ============================================
// INSTALL TABS
// ============================================

fn wire_install_callbacks(ui: &MainWindow, state: &SharedState, tx: &Sender<UiMessage>) {
    let ui_handle = ui.as_weak();

    ui.on_toggle({
        let ui = ui_handle.clone();
        let state = Rc::clone(state);
        move |tab, id, checked| {
            // Refused toggles still redraw, which resets the checkbox
            with_tab(&ui, &state, tab, |c| {
                c.toggle(id.as_str(), checked);
            });
        }
    });

    ui.on_select_all({
        let ui = ui_handle.clone();
        let state = Rc::clone(state);
        move |tab| with_tab(&ui, &state, tab, InstallController::select_all)
    });

    ui.on_deselect_all({
        let ui = ui_handle.clone();
        let state = Rc::clone(state);
        move |tab| with_tab(&ui, &state, tab, InstallController::deselect_all)
    });

    ui.on_install({
        let ui = ui_handle.clone();
        let state = Rc::clone(state);
        let tx = tx.clone();
        move |tab| {
            with_tab(&ui, &state, tab, |c| {
                let kind = c.kind();
                let tx = tx.clone();
                let started = c.start(move |event| {
                    let _ = tx.send(UiMessage::Install(kind, event));
                });
                if started {
                    info!("{}: installing {} item(s)", kind, c.selected().len());
                }
            });
        }
    });

    ui.on_cancel({
        let ui = ui_handle.clone();
        let state = Rc::clone(state);
        move |tab| {
            with_tab(&ui, &state, tab, |c| {
                if c.cancel() {
                    info!("{}: cancel requested", c.kind());
                }
            });
        }
    });
}

/// Run `action` on one tab's controller, then redraw that tab.
fn with_tab(
    ui: &slint::Weak<MainWindow>,
    state: &SharedState,
    tab: i32,
    action: impl FnOnce(&mut InstallController),
) {
    let mut guard = state.borrow_mut();
    let Some(controller) = guard.as_mut().and_then(|app| app.controller_mut(tab)) else {
        return;
    };
    action(controller);
    if let Some(ui) = ui.upgrade() {
        render_tab(&ui, controller);
    }
}

/// Flatten a controller into the rows and flags the tab draws.
fn tab_state(controller: &InstallController) -> TabState {
    let mut rows = Vec::new();
    for category in &controller.catalog().categories {
        rows.push(CatalogRow {
            category: category.name.as_str().into(),
            header: true,
            ..Default::default()
        });
        for entry in &category.entries {
            rows.push(CatalogRow {
                category: category.name.as_str().into(),
                name: entry.display_name.as_str().into(),
                id: entry.package_id.as_str().into(),
                checked: controller.is_selected(&entry.package_id),
                enabled: controller.is_selectable(&entry.package_id),
                installed: controller.is_locked(&entry.package_id),
                header: false,
            });
        }
    }

    TabState {
        rows: ModelRc::from(Rc::new(VecModel::from(rows))),
        log: string_model(controller.log()),
        progress: controller.progress(),
        can_install: controller.can_start(),
        can_cancel: controller.can_cancel(),
        available: controller.is_available(),
        message: controller.unavailable_reason().unwrap_or_default().into(),
    }
}

fn render_tab(ui: &MainWindow, controller: &InstallController) {
    let tab = tab_state(controller);
    match controller.kind() {
        CatalogKind::Programs => ui.set_apps_state(tab),
        CatalogKind::Drivers => ui.set_drivers_state(tab),
    }
}

// ============================================
// USB PAGE
// ============================================

fn wire_usb_callbacks(ui: &MainWindow, state: &SharedState, tx: &Sender<UiMessage>) {
    let ui_handle = ui.as_weak();

    ui.on_choose_iso({
        let ui = ui_handle.clone();
        let state = Rc::clone(state);
        move || {
            let Some(path) = usb::pick_iso_file() else { return };
            info!("ISO selected: {:?}", path);
            let mut guard = state.borrow_mut();
            let Some(app) = guard.as_mut() else { return };
            if let Some(ui) = ui.upgrade() {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                ui.set_iso_name(name.into());
            }
            app.usb.iso = Some(path);
        }
    });

    ui.on_refresh_drives({
        let ui = ui_handle.clone();
        move || {
            if let Some(ui) = ui.upgrade() {
                refresh_drives(&ui);
            }
        }
    });

    ui.on_build_usb({
        let ui = ui_handle.clone();
        let state = Rc::clone(state);
        let tx = tx.clone();
        move || {
            let Some(ui) = ui.upgrade() else { return };
            let mut guard = state.borrow_mut();
            let Some(app) = guard.as_mut() else { return };

            start_usb_build(&ui, &mut app.usb, &tx);
            render_usb(&ui, &app.usb);
        }
    });
}

fn usb_params(ui: &MainWindow, page: &UsbPage) -> UsbBuildParams {
    UsbBuildParams {
        iso_path: page.iso.clone(),
        drive: RemovableDrive::mount_from_label(&ui.get_usb_drive()),
        product_key: Some(ui.get_usb_key().to_string()),
        pc_name: Some(ui.get_usb_pc_name().to_string()),
        lang: Some(ui.get_usb_lang().to_string()),
        partition_scheme: ui.get_usb_partition().to_string(),
        file_system: ui.get_usb_fs().to_string(),
    }
}

/// Check preconditions, then hand the build to a worker. One build at a time.
fn start_usb_build(ui: &MainWindow, page: &mut UsbPage, tx: &Sender<UiMessage>) {
    if page.busy {
        page.log.push("A USB build is already running".to_string());
        return;
    }

    let params = usb_params(ui, page);
    if let Some(problem) = usb_precondition_error(&params) {
        warn!("USB build refused: {}", problem);
        page.log.push(problem.to_string());
        return;
    }

    page.log.push(format!("Building: {}", params.summary()));
    let tx = tx.clone();
    let spawned = std::thread::Builder::new()
        .name("usb-build".to_string())
        .spawn(move || {
            let ok = usb::build_usb(&params);
            let _ = tx.send(UiMessage::UsbDone(ok));
        });

    match spawned {
        Ok(_) => page.busy = true,
        Err(e) => {
            error!("Could not start USB worker: {}", e);
            page.log.push(format!("Could not start the build: {}", e));
        }
    }
}

fn usb_precondition_error(params: &UsbBuildParams) -> Option<&'static str> {
    if params.iso_path.is_none() {
        Some("Select an ISO image first")
    } else if params.drive.is_none() {
        Some("Select a target drive first")
    } else {
        None
    }
}

fn render_usb(ui: &MainWindow, page: &UsbPage) {
    ui.set_usb_busy(page.busy);
    ui.set_usb_log(string_model(&page.log));
}

fn refresh_drives(ui: &MainWindow) {
    let labels: Vec<String> = usb::list_removable_drives()
        .iter()
        .map(RemovableDrive::display_string)
        .collect();
    debug!("{} removable drive(s)", labels.len());

    let current = ui.get_usb_drive();
    if !labels.iter().any(|l| l.as_str() == current.as_str()) {
        ui.set_usb_drive(labels.first().cloned().unwrap_or_default().into());
    }
    ui.set_drives(string_model(&labels));
}

// ============================================
// FOOTER
// ============================================

fn update_footer(ui: &MainWindow, telemetry: &mut Telemetry) {
    let sample = telemetry.sample();
    ui.set_cpu_text(format!("CPU {:.0}%", sample.cpu_percent).into());
    ui.set_ram_text(format!("RAM {:.0}%", sample.ram_percent).into());
    ui.set_disk_text(format!("Disk {:.0}%", sample.disk_percent).into());
    ui.set_cpu_level(LoadLevel::from_percent(sample.cpu_percent).as_index());
    ui.set_ram_level(LoadLevel::from_percent(sample.ram_percent).as_index());
    ui.set_disk_level(LoadLevel::from_percent(sample.disk_percent).as_index());
    ui.set_net_text(sample.network_text().into());
}

// ============================================
// HELPER FUNCTIONS
// ============================================

fn string_model(lines: &[String]) -> ModelRc<SharedString> {
    ModelRc::from(Rc::new(VecModel::from(
        lines.iter().map(|s| SharedString::from(s.as_str())).collect::<Vec<_>>(),
    )))
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::Catalog;
    use inventory::InstalledSet;
    use slint::Model;
    use std::collections::HashMap;

    fn controller(installed: &[&str]) -> InstallController {
        let catalog = Catalog::from_toml_str(
            r#"
[[category]]
name = "Media"
entries = [
    { name = "VLC media player", id = "VideoLAN.VLC" },
    { name = "Spotify", id = "Spotify.Spotify" },
]
"#,
        )
        .unwrap();
        let installer = |ids: &[String]| -> HashMap<String, bool> {
            ids.iter().map(|id| (id.clone(), true)).collect()
        };
        let installed: InstalledSet = installed.iter().map(|s| s.to_string()).collect();
        InstallController::new(CatalogKind::Programs, catalog, Arc::new(installer), &installed)
    }

    #[test]
    fn test_tab_state_rows() {
        let mut c = controller(&["vlc media player"]);
        c.toggle("Spotify.Spotify", true);
        let tab = tab_state(&c);

        assert_eq!(tab.rows.row_count(), 3);
        let header = tab.rows.row_data(0).unwrap();
        assert!(header.header);
        assert_eq!(header.category.as_str(), "Media");

        let vlc = tab.rows.row_data(1).unwrap();
        assert!(vlc.installed);
        assert!(!vlc.enabled);

        let spotify = tab.rows.row_data(2).unwrap();
        assert!(spotify.checked);
        assert!(spotify.enabled);
        assert!(tab.can_install);
        assert!(!tab.can_cancel);
    }

    #[test]
    fn test_tab_state_unavailable_banner() {
        let mut c = controller(&[]);
        c.set_unavailable(WINGET_MISSING);
        let tab = tab_state(&c);

        assert!(!tab.available);
        assert_eq!(tab.message.as_str(), WINGET_MISSING);
        assert!(!tab.can_install);
    }

    #[test]
    fn test_usb_preconditions() {
        let mut params = UsbBuildParams::default();
        assert_eq!(usb_precondition_error(&params), Some("Select an ISO image first"));

        params.iso_path = Some(PathBuf::from("win.iso"));
        assert_eq!(usb_precondition_error(&params), Some("Select a target drive first"));

        params.drive = Some("E:\\".to_string());
        assert_eq!(usb_precondition_error(&params), None);
    }
}
