// ============================================
// install.rs - The things that actually install stuff
// ============================================
//
// The orchestrator doesn't care HOW something gets installed. It hands
// a list of ids to an Installer and gets back id -> success.
//
//   PackageInstaller - real: runs `winget install` once per id
//   DriverInstaller  - SIMULATED: waits a bit and reports success
//
// Tests (and anything else) can pass a plain closure instead.
// ============================================

use crate::process;
use rand::Rng;
use std::collections::HashMap;
use std::process::Stdio;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that can install a batch of package ids.
pub trait Installer: Send + Sync {
    /// Install each id and report success per id.
    fn install(&self, ids: &[String]) -> HashMap<String, bool>;
}

impl<F> Installer for F
where
    F: Fn(&[String]) -> HashMap<String, bool> + Send + Sync,
{
    fn install(&self, ids: &[String]) -> HashMap<String, bool> {
        self(ids)
    }
}

// ============================================
// WINGET
// ============================================

/// Installs applications with winget: silent, exact id, agreements pre-accepted.
#[derive(Debug, Clone)]
pub struct PackageInstaller {
    program: String,
}

impl Default for PackageInstaller {
    fn default() -> Self {
        Self { program: "winget".to_string() }
    }
}

impl PackageInstaller {
    /// Arguments for one `winget install` call.
    pub fn install_args(package_id: &str) -> Vec<String> {
        [
            "install",
            "-e",
            "--silent",
            "--accept-package-agreements",
            "--accept-source-agreements",
            "--id",
            package_id,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn install_one(&self, package_id: &str) -> bool {
        info!("winget install {}", package_id);
        let status = process::hidden_command(&self.program)
            .args(Self::install_args(package_id))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!("winget install {} failed: {}", package_id, status);
                false
            }
            Err(e) => {
                warn!("Could not run {}: {}", self.program, e);
                false
            }
        }
    }
}

impl Installer for PackageInstaller {
    fn install(&self, ids: &[String]) -> HashMap<String, bool> {
        ids.iter()
            .map(|id| (id.clone(), self.install_one(id)))
            .collect()
    }
}

/// Is winget available on this machine?
pub fn check_package_manager() -> bool {
    let available = process::hidden_command("winget")
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if available {
        debug!("winget found");
    } else {
        warn!("winget is not available - the Apps tab will be disabled");
    }
    available
}

// ============================================
// DRIVERS (SIMULATION)
// ============================================

/// PLACEHOLDER: does NOT install drivers.
///
/// Sleeps a random time in `[min_delay, max_delay]` per id and reports
/// success. A real implementation would go through pnputil/DISM or a
/// vendor installer; there is no such logic here.
#[derive(Debug, Clone)]
pub struct DriverInstaller {
    min_delay: Duration,
    max_delay: Duration,
}

impl DriverInstaller {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay: min_delay.min(max_delay),
            max_delay: min_delay.max(max_delay),
        }
    }

    fn delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        let millis = rand::thread_rng()
            .gen_range(self.min_delay.as_millis()..=self.max_delay.as_millis());
        Duration::from_millis(millis as u64)
    }
}

impl Installer for DriverInstaller {
    fn install(&self, ids: &[String]) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for id in ids {
            warn!("Simulating driver installation of {} (nothing is installed)", id);
            thread::sleep(self.delay());
            results.insert(id.clone(), true);
        }
        results
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_winget_args() {
        let args = PackageInstaller::install_args("VideoLAN.VLC");
        assert_eq!(args[0], "install");
        assert!(args.contains(&"--silent".to_string()));
        assert!(args.contains(&"--accept-package-agreements".to_string()));
        assert!(args.contains(&"--accept-source-agreements".to_string()));
        assert!(args.contains(&"-e".to_string()));
        assert_eq!(&args[args.len() - 2..], &["--id".to_string(), "VideoLAN.VLC".to_string()]);
    }

    #[test]
    fn test_missing_package_manager_reports_failure() {
        let installer = PackageInstaller { program: "winprep-no-such-winget".to_string() };
        let ids = vec!["A.A".to_string(), "B.B".to_string()];
        let results = installer.install(&ids);

        assert_eq!(results.len(), 2);
        assert_eq!(results.get("A.A"), Some(&false));
        assert_eq!(results.get("B.B"), Some(&false));
    }

    #[test]
    fn test_driver_simulation_always_succeeds() {
        let installer = DriverInstaller::new(Duration::ZERO, Duration::from_millis(20));
        let ids = vec!["Nvidia.GeForceExperience".to_string(), "Logitech.GHUB".to_string()];
        let results = installer.install(&ids);

        assert_eq!(results.len(), 2);
        assert!(results.values().all(|ok| *ok));
    }

    #[test]
    fn test_driver_simulation_waits_per_id() {
        let installer = DriverInstaller::new(Duration::from_millis(50), Duration::from_millis(50));
        let started = Instant::now();
        installer.install(&["x".to_string(), "y".to_string()]);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_closure_is_an_installer() {
        let fake = |ids: &[String]| -> HashMap<String, bool> {
            ids.iter().map(|id| (id.clone(), id.starts_with('o'))).collect()
        };
        let results = Installer::install(&fake, &["ok".to_string(), "bad".to_string()]);
        assert_eq!(results.get("ok"), Some(&true));
        assert_eq!(results.get("bad"), Some(&false));
    }
}
