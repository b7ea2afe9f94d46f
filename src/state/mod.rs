/// Application state shared by the Tauri command handlers
/// - the console history the webview renders
/// - the on-disk console mirror
/// - the server child slot and the supervisor's current state
///
/// None of it is touched by the webview directly; the console only grows
/// through the pump draining the supervisor's channel.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LauncherConfig;
use crate::console::{ChannelSink, ConsoleLine, ConsoleLog, DisplaySink, LogFile};
use crate::process::ProcessSlot;
use crate::supervisor::{SharedState, SupervisorState};

pub struct AppState {
    config: LauncherConfig,
    console: Arc<ConsoleLog>,
    log_file: Arc<LogFile>,
    sink: ChannelSink,
    process: ProcessSlot,
    supervisor_state: SharedState,
    shutting_down: AtomicBool,
}

impl AppState {
    pub fn new(
        config: LauncherConfig,
        log_file: LogFile,
        sink: ChannelSink,
        process: ProcessSlot,
        supervisor_state: SharedState,
    ) -> Self {
        Self {
            config,
            console: Arc::new(ConsoleLog::new()),
            log_file: Arc::new(log_file),
            sink,
            process,
            supervisor_state,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn console(&self) -> Arc<ConsoleLog> {
        self.console.clone()
    }

    pub fn log_file(&self) -> Arc<LogFile> {
        self.log_file.clone()
    }

    pub fn sink(&self) -> ChannelSink {
        self.sink.clone()
    }

    pub fn process(&self) -> ProcessSlot {
        self.process.clone()
    }

    pub fn console_history(&self) -> Vec<ConsoleLine> {
        self.console.snapshot()
    }

    pub fn supervisor_state(&self) -> SupervisorState {
        *self.supervisor_state.read()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.config.shutdown_grace_ms)
    }

    /// True for the first caller only; later quit clicks and close events are no-ops
    pub fn begin_shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sink.info(">>> Shutting down...");
        true
    }
}
