use tauri::{AppHandle, State};
use tracing::{info, warn};

use crate::console::ConsoleLine;
use crate::panel;
use crate::state::AppState;
use crate::supervisor::SupervisorState;

/// Everything logged so far; the webview calls this once after it subscribed
/// to `console-line`, and drops duplicates by `seq`
#[tauri::command]
pub async fn get_console_history(state: State<'_, AppState>) -> Result<Vec<ConsoleLine>, String> {
    Ok(state.console_history())
}

#[tauri::command]
pub async fn get_supervisor_state(state: State<'_, AppState>) -> Result<SupervisorState, String> {
    Ok(state.supervisor_state())
}

#[tauri::command]
pub async fn open_web_panel(state: State<'_, AppState>) -> Result<(), String> {
    let url = &state.config().panel_url;
    info!("Opening web panel at {}", url);
    panel::open_in_browser(url).map_err(|e| {
        warn!("Failed to open web panel: {}", e);
        e.to_string()
    })
}

#[tauri::command]
pub fn terminate_application(app: AppHandle) {
    crate::shutdown(&app);
}

#[tauri::command]
pub async fn get_log_path(state: State<'_, AppState>) -> Result<String, String> {
    Ok(state.log_file().path().display().to_string())
}
