use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::process::ShellCommand;

/// Fixed launcher settings. Nothing is read from disk, the environment or the
/// command line; `Default` is the only place these values come from.
#[derive(Debug, Clone, PartialEq)]
pub struct LauncherConfig {
    /// Directory whose presence means dependencies are installed
    pub dependency_marker: PathBuf,

    /// One-shot install command, run through the shell
    pub install_command: String,

    /// Server interpreter and the flags placed before the entry point
    pub interpreter: String,
    pub interpreter_args: Vec<String>,

    /// Server entry point, relative to the base directory
    pub entry_point: PathBuf,

    /// Address opened by the "open web panel" action
    pub panel_url: String,

    /// How long terminate waits after the graceful signal before force killing
    pub shutdown_grace_ms: u64,

    pub readiness: ReadinessConfig,
}

/// Polling of the web panel once the server is streaming
#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            dependency_marker: PathBuf::from("node_modules"),
            install_command: "npm install".to_string(),
            interpreter: "node".to_string(),
            interpreter_args: vec!["--loader".to_string(), "ts-node/esm".to_string()],
            entry_point: PathBuf::from("src").join("server.ts"),
            panel_url: "http://localhost:3001".to_string(),
            shutdown_grace_ms: 3000,
            readiness: ReadinessConfig::default(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 15,
            initial_delay_ms: 250,
            max_delay_ms: 4000,
            timeout_ms: 2000,
        }
    }
}

/// Directory of the running executable; the Node.js project sits next to it
pub fn resolve_base_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("Executable has no parent directory")
}

impl LauncherConfig {
    pub fn dependency_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.dependency_marker)
    }

    pub fn entry_point_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.entry_point)
    }

    pub fn install_command(&self, base_dir: &Path) -> ShellCommand {
        ShellCommand::new(self.install_command.clone(), base_dir)
    }

    /// `node --loader ts-node/esm "<base>/src/server.ts"` with the defaults
    pub fn server_command(&self, base_dir: &Path) -> ShellCommand {
        let mut line = self.interpreter.clone();
        for arg in &self.interpreter_args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push_str(&format!(" \"{}\"", self.entry_point_path(base_dir).display()));
        ShellCommand::new(line, base_dir)
    }
}
