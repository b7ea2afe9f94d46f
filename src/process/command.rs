use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A shell command line and the directory it runs in. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    line: String,
    cwd: PathBuf,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            line: line.into(),
            cwd: cwd.into(),
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Builds the platform shell invocation. Output redirection is left to the caller.
    pub(crate) fn to_command(&self) -> Command {
        #[cfg(target_os = "windows")]
        let mut cmd = {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").raw_arg(&self.line).creation_flags(CREATE_NO_WINDOW);
            cmd
        };

        #[cfg(not(target_os = "windows"))]
        let mut cmd = {
            use std::os::unix::process::CommandExt;
            let mut cmd = Command::new("sh");
            // Own process group, so terminate reaches everything the shell starts
            cmd.arg("-c").arg(&self.line).process_group(0);
            cmd
        };

        cmd.current_dir(&self.cwd).stdin(Stdio::null());
        cmd
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (in {})", self.line, self.cwd.display())
    }
}
