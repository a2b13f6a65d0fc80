// ============================================
// gate.rs - When may the splash screen close?
// ============================================
//
// The splash closes only when BOTH are true:
//   - the preload pipeline has signalled done
//   - the splash has been visible for at least `min_dwell`
//
// In loop form that's "keep going while the pipeline is alive OR the
// dwell hasn't elapsed" - the same condition, negated. It is NOT a race
// where whichever finishes first wins.
// ============================================

use crate::preload::PreloadHandle;
use std::thread;
use std::time::{Duration, Instant};

/// How often the gate re-checks its conditions
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Startup gate, started when the splash is shown.
#[derive(Debug, Clone, Copy)]
pub struct StartupGate {
    entered: Instant,
    min_dwell: Duration,
}

impl StartupGate {
    /// Start the dwell clock now.
    pub fn enter(min_dwell: Duration) -> Self {
        Self { entered: Instant::now(), min_dwell }
    }

    pub fn dwell_elapsed(&self) -> bool {
        self.entered.elapsed() >= self.min_dwell
    }

    /// Pipeline done AND dwell elapsed. Cheap enough to call from a UI timer.
    pub fn is_open(&self, handle: &PreloadHandle) -> bool {
        handle.is_done() && self.dwell_elapsed()
    }

    /// Block until the gate opens, calling `pump` every poll so the
    /// caller can keep its boot surface responsive.
    /// The UI polls `is_open` from a timer instead; this is for blocking callers.
    #[allow(dead_code)]
    pub fn wait(&self, handle: &PreloadHandle, mut pump: impl FnMut()) {
        while handle.is_alive() || !self.dwell_elapsed() {
            pump();
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Enter a gate and wait on it in one call.
#[allow(dead_code)]
pub fn wait(handle: &PreloadHandle, min_dwell: Duration, pump: impl FnMut()) {
    StartupGate::enter(min_dwell).wait(handle, pump);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preload::{BootCache, PreloadPipeline};

    fn finished_pipeline() -> PreloadHandle {
        let handle = PreloadPipeline::start_with(None, BootCache::default);
        assert!(handle.wait_done(Duration::from_secs(5)));
        handle
    }

    fn slow_pipeline(delay: Duration) -> PreloadHandle {
        PreloadPipeline::start_with(None, move || {
            thread::sleep(delay);
            BootCache::default()
        })
    }

    #[test]
    fn test_finished_pipeline_still_waits_for_dwell() {
        let handle = finished_pipeline();

        let started = Instant::now();
        wait(&handle, Duration::from_secs(2), || {});
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_dwell_elapsed_still_waits_for_pipeline() {
        let started = Instant::now();
        let handle = slow_pipeline(Duration::from_millis(1200));

        wait(&handle, Duration::from_millis(200), || {});
        assert!(handle.is_done());
        assert!(started.elapsed() >= Duration::from_millis(1200));
    }

    #[test]
    fn test_pump_is_called_while_waiting() {
        let handle = finished_pipeline();
        let mut pumps = 0;
        wait(&handle, Duration::from_millis(100), || pumps += 1);
        assert!(pumps > 0);
    }

    #[test]
    fn test_is_open_needs_both_conditions() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let handle = PreloadPipeline::start_with(None, move || {
            let _ = release_rx.recv();
            BootCache::default()
        });

        // Dwell met, pipeline still running
        let gate = StartupGate::enter(Duration::ZERO);
        assert!(!gate.is_open(&handle));

        release_tx.send(()).unwrap();
        assert!(handle.wait_done(Duration::from_secs(5)));
        assert!(gate.is_open(&handle));

        // Pipeline done, dwell not met
        let long_gate = StartupGate::enter(Duration::from_secs(60));
        assert!(!long_gate.is_open(&handle));
    }
}
