pub mod app;
pub mod config;
pub mod console;
pub mod error;
pub mod panel;
pub mod process;
pub mod state;
pub mod supervisor;

#[cfg(feature = "desktop")]
mod commands;

pub use process::cleanup_on_panic;

#[cfg(feature = "desktop")]
pub use desktop::{run, shutdown};

#[cfg(feature = "desktop")]
mod desktop {
    use tauri::{AppHandle, Emitter, Manager, RunEvent, WindowEvent};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tracing::{error, info, warn};

    use crate::commands;
    use crate::config::{resolve_base_dir, LauncherConfig};
    use crate::console::{ChannelSink, ConsoleEvent, DisplaySink, LogFile};
    use crate::panel;
    use crate::process::register_for_cleanup;
    use crate::state::AppState;
    use crate::supervisor::{Supervisor, SupervisorState};

    pub const CONSOLE_LINE_EVENT: &str = "console-line";
    pub const SUPERVISOR_STATE_EVENT: &str = "supervisor-state";

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        let app = tauri::Builder::default()
            // Must be first: a second launcher would start a second server
            .plugin(tauri_plugin_single_instance::init(|app, _args, _cwd| {
                info!("Second instance blocked, focusing the existing console");
                if let Some(window) = app.get_webview_window("main") {
                    let _ = window.unminimize();
                    let _ = window.set_focus();
                }
            }))
            .setup(|app| {
                info!("Starting {} v{}", crate::app::APP_NAME, crate::app::APP_VERSION);

                let config = LauncherConfig::default();
                let base_dir = resolve_base_dir()?;
                info!("Base directory: {:?}", base_dir);

                let log_file = LogFile::create(LogFile::default_path());
                info!("Console log file: {:?}", log_file.path());

                let (sink, rx) = ChannelSink::new();
                let supervisor = Supervisor::new(config.clone(), &base_dir, sink.clone());
                let process = supervisor.process();
                register_for_cleanup(&process);

                let state = AppState::new(config, log_file, sink, process, supervisor.shared_state());
                spawn_console_pump(app.handle().clone(), rx, &state);
                app.manage(state);

                supervisor.spawn()?;

                let window = app
                    .get_webview_window("main")
                    .ok_or("main window not found")?;
                let handle = app.handle().clone();
                window.on_window_event(move |event| {
                    if let WindowEvent::CloseRequested { api, .. } = event {
                        // Stop the server first, shutdown() exits once it is gone
                        api.prevent_close();
                        shutdown(&handle);
                    }
                });

                Ok(())
            })
            .invoke_handler(tauri::generate_handler![
                commands::get_console_history,
                commands::get_supervisor_state,
                commands::open_web_panel,
                commands::terminate_application,
                commands::get_log_path,
            ])
            .build(tauri::generate_context!());

        let app = match app {
            Ok(app) => app,
            Err(e) => {
                error!("Failed to build application: {}", e);
                crate::cleanup_on_panic();
                std::process::exit(1);
            }
        };

        app.run(|app_handle, event| {
            if let RunEvent::Exit = event {
                // Backstop for exits that bypassed shutdown()
                if let Some(state) = app_handle.try_state::<AppState>() {
                    state.process().kill_now();
                }
            }
        });
    }

    /// Quit button and window close: log, stop the server off the UI thread, exit
    pub fn shutdown(app: &AppHandle) {
        let state = app.state::<AppState>();
        if !state.begin_shutdown() {
            return;
        }

        let process = state.process();
        let grace = state.shutdown_grace();
        let app = app.clone();
        let spawned = std::thread::Builder::new()
            .name("shutdown".to_string())
            .spawn(move || {
                process.terminate(grace);
                info!("Exiting application");
                app.exit(0);
            });

        if let Err(e) = spawned {
            error!("Failed to spawn shutdown thread: {}, killing server now", e);
            state.process().kill_now();
            std::process::exit(0);
        }
    }

    /// Drains the supervisor channel on the async runtime: history, log file, webview
    fn spawn_console_pump(app: AppHandle, mut rx: UnboundedReceiver<ConsoleEvent>, state: &AppState) {
        let console = state.console();
        let log_file = state.log_file();
        let sink = state.sink();
        let config = state.config().clone();

        tauri::async_runtime::spawn(async move {
            let mut probe_started = false;
            while let Some(event) = rx.recv().await {
                match event {
                    ConsoleEvent::Line(line) => {
                        log_file.write(&line);
                        // History first: a line is then either in a snapshot or emitted after it
                        console.append(line.clone());
                        if let Err(e) = app.emit(CONSOLE_LINE_EVENT, &line) {
                            warn!("Failed to emit console line: {}", e);
                        }
                    }
                    ConsoleEvent::State(next) => {
                        if let Err(e) = app.emit(SUPERVISOR_STATE_EVENT, next) {
                            warn!("Failed to emit supervisor state: {}", e);
                        }
                        if next == SupervisorState::Streaming && config.readiness.enabled && !probe_started {
                            probe_started = true;
                            spawn_readiness_probe(sink.clone(), &config);
                        }
                    }
                }
            }
        });
    }

    fn spawn_readiness_probe(sink: ChannelSink, config: &LauncherConfig) {
        let url = config.panel_url.clone();
        let readiness = config.readiness.clone();
        tauri::async_runtime::spawn(async move {
            if panel::wait_until_reachable(&url, &readiness).await {
                sink.info(format!(">>> Web panel reachable at {}", url));
            } else {
                sink.info(format!(">>> WARNING: web panel {} is not answering yet", url));
            }
        });
    }
}
