use std::path::PathBuf;
use thiserror::Error;

/// Every failure the launcher can hit while bringing the server up.
/// Handled failures end up as error lines on the console; none are retried.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// The process could not be created at all (missing shell, interpreter or cwd)
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A one-shot command ran but did not succeed
    #[error("`{command}` exited with {}", describe_code(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output_tail: Vec<String>,
    },

    #[error("entry point {} not found", .0.display())]
    MissingEntryPoint(PathBuf),

    #[error("a server process is already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("shutdown in progress, not starting new processes")]
    ShuttingDown,

    #[error("refusing to open non-http url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LauncherError>;

/// Human readable exit code; `None` means the process was killed by a signal
pub fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
