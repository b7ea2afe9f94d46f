/// Display sink for the launcher console
/// The supervisor worker only ever talks to a `DisplaySink`; the desktop
/// shell drains a `ChannelSink` on its own runtime into a `ConsoleLog`,
/// mirrors every line to the log file and pushes it to the webview.
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::app::{APP_ID, APP_NAME, LOG_FILE_NAME};
use crate::supervisor::SupervisorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// A line printed by the child process
    Output,
    /// Launcher status
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: LineKind,
    pub text: String,
}

/// What crosses from the worker thread to the UI side
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    Line(ConsoleLine),
    State(SupervisorState),
}

/// Append-only destination of console output.
/// Implementations must be callable from the worker thread.
pub trait DisplaySink: Send + Sync {
    fn append(&self, kind: LineKind, text: String);

    fn state_changed(&self, _state: SupervisorState) {}

    fn output(&self, text: impl Into<String>)
    where
        Self: Sized,
    {
        self.append(LineKind::Output, text.into());
    }

    fn info(&self, text: impl Into<String>)
    where
        Self: Sized,
    {
        self.append(LineKind::Info, text.into());
    }

    fn error(&self, text: impl Into<String>)
    where
        Self: Sized,
    {
        self.append(LineKind::Error, text.into());
    }
}

/// Hands lines to another thread through an unbounded channel; never blocks
/// the sender. Lines sent after the receiver is gone are dropped.
/// Clones share the channel and the sequence counter.
#[derive(Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ConsoleEvent>,
    next_seq: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<ConsoleEvent>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx,
                next_seq: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }
}

impl DisplaySink for ChannelSink {
    fn append(&self, kind: LineKind, text: String) {
        let line = ConsoleLine {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            kind,
            text,
        };
        let _ = self.tx.send(ConsoleEvent::Line(line));
    }

    fn state_changed(&self, state: SupervisorState) {
        let _ = self.tx.send(ConsoleEvent::State(state));
    }
}

/// UI-side history of the console. Only grows.
#[derive(Default)]
pub struct ConsoleLog {
    lines: RwLock<Vec<ConsoleLine>>,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, line: ConsoleLine) {
        self.lines.write().push(line);
    }

    pub fn snapshot(&self) -> Vec<ConsoleLine> {
        self.lines.read().clone()
    }
}

/// Plain-text mirror of the console on disk, rewritten every run
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    /// Platform-specific location of the console log
    /// - macOS: ~/Library/Application Support/<app id>/logs/console.log
    /// - Windows: %LOCALAPPDATA%\<app id>\logs\console.log
    /// - Linux: ~/.local/share/<app id>/logs/console.log
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_ID)
            .join("logs")
            .join(LOG_FILE_NAME)
    }

    /// Clears the file and writes a header with the current timestamp
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(dir) = path.parent() {
            let _ = fs::create_dir_all(dir);
        }
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
        {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(file, "=== {} console log started at {} ===", APP_NAME, timestamp);
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, line: &ConsoleLine) {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let timestamp = line
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S%.3f");
            let tag = match line.kind {
                LineKind::Output => "OUT",
                LineKind::Info => "INF",
                LineKind::Error => "ERR",
            };
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, tag, line.text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut UnboundedReceiver<ConsoleEvent>) -> Vec<ConsoleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_channel_sink_orders_and_numbers_lines() {
        let (sink, mut rx) = ChannelSink::new();
        sink.output("A");
        sink.state_changed(SupervisorState::Streaming);
        sink.error("B");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        match (&events[0], &events[1], &events[2]) {
            (ConsoleEvent::Line(a), ConsoleEvent::State(state), ConsoleEvent::Line(b)) => {
                assert_eq!((a.seq, a.kind, a.text.as_str()), (0, LineKind::Output, "A"));
                assert_eq!(*state, SupervisorState::Streaming);
                assert_eq!((b.seq, b.kind, b.text.as_str()), (1, LineKind::Error, "B"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.info("nobody is listening");
    }

    #[tokio::test]
    async fn test_lines_cross_threads_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let worker = std::thread::spawn(move || {
            for i in 0..100 {
                sink.output(format!("line {}", i));
            }
        });

        let log = ConsoleLog::new();
        while let Some(event) = rx.recv().await {
            if let ConsoleEvent::Line(line) = event {
                log.append(line);
            }
        }
        worker.join().unwrap();

        let lines = log.snapshot();
        assert_eq!(lines.len(), 100);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line.seq, i as u64);
            assert_eq!(line.text, format!("line {}", i));
        }
    }

    #[test]
    fn test_history_then_live_lines_have_no_gaps() {
        use std::sync::atomic::AtomicBool;

        let log = Arc::new(ConsoleLog::new());
        let subscribed = Arc::new(AtomicBool::new(false));
        let live = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Same order as the UI pump: record in history, then emit to listeners
        let pump = {
            let (log, subscribed, live) = (log.clone(), subscribed.clone(), live.clone());
            std::thread::spawn(move || {
                for seq in 0..2000 {
                    let line = ConsoleLine {
                        seq,
                        timestamp: Utc::now(),
                        kind: LineKind::Output,
                        text: seq.to_string(),
                    };
                    log.append(line.clone());
                    if subscribed.load(Ordering::SeqCst) {
                        live.lock().push(line);
                    }
                }
            })
        };

        // A view that subscribes while early lines are already out
        while log.snapshot().len() < 500 {
            std::thread::yield_now();
        }
        subscribed.store(true, Ordering::SeqCst);
        let history = log.snapshot();
        pump.join().unwrap();

        let mut shown: Vec<u64> = Vec::new();
        for line in history.iter().chain(live.lock().iter()) {
            if shown.last().is_some_and(|last| line.seq <= *last) {
                continue;
            }
            shown.push(line.seq);
        }
        assert_eq!(shown, (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn test_log_file_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("console.log");

        let log_file = LogFile::create(&path);
        log_file.write(&ConsoleLine {
            seq: 0,
            timestamp: Utc::now(),
            kind: LineKind::Error,
            text: "entry point missing".to_string(),
        });

        let contents = std::fs::read_to_string(log_file.path()).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().contains("console log started"));
        let entry = lines.next().unwrap();
        assert!(entry.ends_with("[ERR] entry point missing"));

        // A new run starts from a clean file
        let log_file = LogFile::create(&path);
        let contents = std::fs::read_to_string(log_file.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_line_serializes_for_webview() {
        let line = ConsoleLine {
            seq: 4,
            timestamp: Utc::now(),
            kind: LineKind::Output,
            text: "listening".to_string(),
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["kind"], "output");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["text"], "listening");
    }
}
