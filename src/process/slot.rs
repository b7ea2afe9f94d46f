use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::{LauncherError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Slot used by the panic hook; set once at startup
static CLEANUP_SLOT: OnceCell<ProcessSlot> = OnceCell::new();

struct SlotInner {
    child: Option<Child>,
    /// PID and exit code of the last child reaped through the slot
    last_exit: Option<(u32, Option<i32>)>,
}

impl SlotInner {
    /// PID of the held child if it has not exited yet
    fn live_pid(&mut self) -> Option<u32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => Some(child.id()),
            _ => None,
        }
    }
}

/// CRITICAL: a child still held when the last slot reference goes away is killed
impl Drop for SlotInner {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!("Killing server process (PID: {}) on drop", child.id());
            force_kill(&mut child);
            let _ = child.wait();
        }
    }
}

/// Owner of the one live child process. Cheap to clone; all clones share the
/// child and the shutdown flag. The worker thread never holds the lock while
/// blocked on a read, so terminate is always able to reach the child.
#[derive(Clone)]
pub struct ProcessSlot {
    inner: Arc<Mutex<SlotInner>>,
    shutdown: Arc<AtomicBool>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotInner {
                child: None,
                last_exit: None,
            })),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fails when a live child is already held or shutdown was requested
    pub fn ensure_vacant(&self) -> Result<()> {
        if self.shutdown_requested() {
            return Err(LauncherError::ShuttingDown);
        }
        match self.inner.lock().live_pid() {
            Some(pid) => Err(LauncherError::AlreadyRunning(pid)),
            None => Ok(()),
        }
    }

    /// Takes ownership of a freshly spawned child. A child that cannot be
    /// accepted is killed right away rather than left running unowned.
    pub(crate) fn register(&self, mut child: Child) -> Result<u32> {
        let mut inner = self.inner.lock();

        let rejection = if self.shutdown_requested() {
            Some(LauncherError::ShuttingDown)
        } else {
            inner.live_pid().map(LauncherError::AlreadyRunning)
        };

        if let Some(err) = rejection {
            warn!("Rejecting new child (PID: {}): {}", child.id(), err);
            force_kill(&mut child);
            let _ = child.wait();
            return Err(err);
        }

        let pid = child.id();
        inner.child = Some(child);
        Ok(pid)
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().child.as_ref().map(Child::id)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Waits for the child with `pid` to exit and removes it from the slot.
    /// Returns its exit code, or the one recorded by terminate if it got there first.
    pub(crate) fn reap(&self, pid: u32) -> Option<i32> {
        loop {
            {
                let mut inner = self.inner.lock();
                let held = inner.child.as_ref().map(Child::id) == Some(pid);
                if !held {
                    return match inner.last_exit {
                        Some((last_pid, code)) if last_pid == pid => code,
                        _ => None,
                    };
                }

                if let Some(child) = inner.child.as_mut() {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            inner.child = None;
                            inner.last_exit = Some((pid, status.code()));
                            return status.code();
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("Error checking process {} status: {}", pid, e);
                            inner.child = None;
                            inner.last_exit = Some((pid, None));
                            return None;
                        }
                    }
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Graceful signal, wait up to `grace`, then force kill and reap.
    /// Marks the slot as shutting down so nothing new is started afterwards.
    /// Returns the child's exit code when there was one to stop.
    pub fn terminate(&self, grace: Duration) -> Option<i32> {
        self.shutdown.store(true, Ordering::SeqCst);

        let Some(mut child) = self.inner.lock().child.take() else {
            info!("No server process to stop");
            return None;
        };
        let pid = child.id();
        info!("Attempting graceful shutdown of server process (PID: {})", pid);
        request_exit(&mut child);

        let deadline = Instant::now() + grace;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("Server process {} exited with status: {}", pid, status);
                    break Some(status);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error checking process status: {}", e);
                    break None;
                }
            }
            if Instant::now() >= deadline {
                warn!("Process {} didn't exit within {:?}, force killing", pid, grace);
                force_kill(&mut child);
                break child.wait().ok();
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        // Anything the shell started and left behind in the group
        sweep_group(pid);

        let code = status.and_then(|s| s.code());
        self.inner.lock().last_exit = Some((pid, code));
        code
    }

    /// Immediate force kill without waiting; safe to call from a panic hook
    pub fn kill_now(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(mut inner) = self.inner.try_lock() {
            if let Some(mut child) = inner.child.take() {
                info!("Force killing server process (PID: {})", child.id());
                force_kill(&mut child);
                let _ = child.try_wait();
            }
        } else {
            info!("Could not lock server process slot");
        }
    }
}

impl Default for ProcessSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembers the slot so a panic anywhere can still kill the server
pub fn register_for_cleanup(slot: &ProcessSlot) {
    if CLEANUP_SLOT.set(slot.clone()).is_err() {
        warn!("Cleanup slot already registered");
    }
}

/// Ensures the server child does not outlive a panicking launcher
pub fn cleanup_on_panic() {
    if let Some(slot) = CLEANUP_SLOT.get() {
        slot.kill_now();
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    // The child leads its own process group (see ShellCommand::to_command)
    let result = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    result == 0
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    let pid = child.id();
    if signal_group(pid, libc::SIGTERM) {
        info!("Sent SIGTERM to process group {}", pid);
    } else {
        warn!("SIGTERM to process group {} failed, killing directly", pid);
        let _ = child.kill();
    }
}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    if !signal_group(child.id(), libc::SIGKILL) {
        let _ = child.kill();
    }
}

#[cfg(unix)]
fn sweep_group(pid: u32) {
    signal_group(pid, libc::SIGKILL);
}

#[cfg(target_os = "windows")]
fn taskkill(pid: u32, force: bool) -> bool {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    let pid = pid.to_string();
    let mut args = vec!["/T", "/PID", pid.as_str()];
    if force {
        args.insert(0, "/F");
    }
    std::process::Command::new("taskkill")
        .args(&args)
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(target_os = "windows")]
fn request_exit(child: &mut Child) {
    if !taskkill(child.id(), false) {
        warn!("taskkill failed for PID {}, killing directly", child.id());
        let _ = child.kill();
    }
}

#[cfg(target_os = "windows")]
fn force_kill(child: &mut Child) {
    if !taskkill(child.id(), true) {
        let _ = child.kill();
    }
}

#[cfg(target_os = "windows")]
fn sweep_group(_pid: u32) {}
