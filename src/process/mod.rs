/// Child process management for the launcher
/// - `ShellCommand`: a shell command line plus the directory it runs in
/// - `ProcessRunner`: starts a command with stdout/stderr merged and yields its lines
/// - `ProcessSlot`: the single owned child handle, with explicit terminate

pub mod command;
pub mod runner;
pub mod slot;

pub use command::ShellCommand;
pub use runner::{OutputLines, ProcessRunner};
pub use slot::{cleanup_on_panic, register_for_cleanup, ProcessSlot};
