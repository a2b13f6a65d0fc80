// ============================================
// process.rs - Running external tools quietly
// ============================================
//
// Everything WinPrep does to the machine goes through external programs
// (winget, wmic). Two rules apply to all of them:
//   1. No console window may flash up (CREATE_NO_WINDOW on Windows)
//   2. Read-only queries have a hard timeout and fail to empty output
// ============================================

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows process creation flag: don't create a console window
#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

/// How often we check whether a child has exited
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Build a Command that never shows a console window.
pub fn hidden_command(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// Run a query command and return its stdout.
///
/// Returns an empty string when the program is missing, exits non-zero,
/// or runs longer than `timeout` (the child is killed in that case).
/// The timeout also covers reading stdout to the end.
/// stdout is drained on a helper thread so large listings can't fill the
/// pipe and stall the child.
pub fn capture_output(program: &str, args: &[&str], timeout: Duration) -> String {
    let mut child = match hidden_command(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!("Could not start '{}': {}", program, e);
            return String::new();
        }
    };

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return String::new();
    };
    // The reader may outlive the child if a grandchild keeps the pipe open,
    // so its buffer comes back over a channel with the same deadline.
    let (buf_tx, buf_rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = buf_tx.send(buf);
    });

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    debug!("'{} {}' exited with {}", program, args.join(" "), status);
                    return String::new();
                }
                break;
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!("'{} {}' timed out after {:?}", program, args.join(" "), timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return String::new();
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!("Failed waiting for '{}': {}", program, e);
                let _ = child.kill();
                let _ = child.wait();
                return String::new();
            }
        }
    }

    match buf_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => {
            warn!("'{} {}' output still open after {:?}", program, args.join(" "), timeout);
            String::new()
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_gives_empty_output() {
        let out = capture_output("winprep-this-does-not-exist", &[], Duration::from_secs(1));
        assert_eq!(out, "");
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout() {
        let out = capture_output("sh", &["-c", "echo hello"], Duration::from_secs(5));
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_gives_empty_output() {
        let out = capture_output("sh", &["-c", "echo partial; exit 3"], Duration::from_secs(5));
        assert_eq!(out, "");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_and_gives_empty_output() {
        let started = Instant::now();
        let out = capture_output("sh", &["-c", "sleep 5"], Duration::from_millis(200));
        assert_eq!(out, "");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_grandchild_holding_stdout_still_times_out() {
        let started = Instant::now();
        let out = capture_output("sh", &["-c", "sleep 4 & echo hi"], Duration::from_millis(300));
        assert_eq!(out, "");
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
