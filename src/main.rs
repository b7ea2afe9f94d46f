// Prevents additional console window on Windows in release builds
// DO NOT REMOVE - without this, Windows will show both the GUI and a console window
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

/// Entry point of the launcher executable; the application lives in the library crate
fn main() {
    // A panic must not leave the Node.js server running without its console
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {:?}", panic_info);
        tracker_console_lib::cleanup_on_panic();
        std::process::exit(1);
    }));

    tracker_console_lib::run();
}
