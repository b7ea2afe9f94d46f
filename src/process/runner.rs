use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, PipeReader};
use tracing::{debug, info, warn};

use super::{ProcessSlot, ShellCommand};
use crate::error::{LauncherError, Result};

/// Lines of install output kept for the failure report
const OUTPUT_TAIL_LINES: usize = 20;

/// Starts shell commands with stdout and stderr merged into one pipe.
/// Every call spawns a new child; the slot guarantees only one lives at a time.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawns `command` and returns its output as a blocking line iterator.
    /// A command that cannot be started is an error, never an empty stream.
    pub fn run(command: &ShellCommand, slot: &ProcessSlot) -> Result<OutputLines> {
        slot.ensure_vacant()?;

        let spawn_error = |source: io::Error| LauncherError::Spawn {
            command: command.line().to_string(),
            source,
        };

        // One pipe for both streams keeps stdout/stderr in delivery order
        let (reader, writer) = io::pipe().map_err(spawn_error)?;
        let stderr_writer = writer.try_clone().map_err(spawn_error)?;

        let mut cmd = command.to_command();
        cmd.stdout(writer).stderr(stderr_writer);
        let child = cmd.spawn().map_err(spawn_error)?;
        // Release our copies of the write end, otherwise EOF never arrives
        drop(cmd);

        let pid = slot.register(child)?;
        info!("Started `{}` with PID: {}", command, pid);

        Ok(OutputLines {
            reader: BufReader::new(reader),
            slot: slot.clone(),
            pid,
            buf: Vec::new(),
            finished: false,
            reaped: false,
            exit_code: None,
        })
    }

    /// Runs `command` to the end without streaming it anywhere but the trace log.
    /// Non-zero exit is `CommandFailed` carrying the last lines of output.
    pub fn run_to_completion(command: &ShellCommand, slot: &ProcessSlot) -> Result<()> {
        let mut lines = Self::run(command, slot)?;
        let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);

        for line in lines.by_ref() {
            match line {
                Ok(line) => {
                    debug!("[{}] {}", command.line(), line);
                    if tail.len() == OUTPUT_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Err(e) => {
                    warn!("Lost output of `{}`: {}", command.line(), e);
                    break;
                }
            }
        }

        match lines.wait() {
            Some(0) => Ok(()),
            code => Err(LauncherError::CommandFailed {
                command: command.line().to_string(),
                code,
                output_tail: tail.into_iter().collect(),
            }),
        }
    }
}

/// Output of one child, line by line. Reading blocks until a line is
/// available; the iterator ends when the child closes its output, at which
/// point the child is reaped.
pub struct OutputLines {
    reader: BufReader<PipeReader>,
    slot: ProcessSlot,
    pid: u32,
    buf: Vec<u8>,
    finished: bool,
    reaped: bool,
    exit_code: Option<i32>,
}

impl OutputLines {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code once the stream has ended; `None` while running or after a signal
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Stops reading and waits for the child to exit
    pub fn wait(mut self) -> Option<i32> {
        self.finished = true;
        if !self.reaped {
            self.reap();
        }
        self.exit_code
    }

    fn reap(&mut self) {
        self.reaped = true;
        self.exit_code = self.slot.reap(self.pid);
    }
}

impl Iterator for OutputLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.buf.clear();
            return match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.finished = true;
                    self.reap();
                    None
                }
                Ok(_) => {
                    while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                        self.buf.pop();
                    }
                    Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // The child may still be running; it stays in the slot for terminate
                Err(e) => {
                    self.finished = true;
                    Some(Err(e))
                }
            };
        }
    }
}
