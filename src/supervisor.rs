/// Startup state machine for the tracker server
///
/// CheckingDependencies -> InstallingDependencies (only without node_modules)
///   -> StartingServer -> Streaming -> Terminated
///
/// Everything runs sequentially on one background thread. Failures are
/// reported as console lines and end the sequence; nothing is retried.
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LauncherConfig;
use crate::console::DisplaySink;
use crate::error::{describe_code, LauncherError};
use crate::process::{OutputLines, ProcessRunner, ProcessSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    CheckingDependencies,
    InstallingDependencies,
    StartingServer,
    Streaming,
    Terminated,
}

/// Why the supervisor reached `Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Outcome {
    ServerExited { code: Option<i32> },
    InstallFailed,
    MissingEntryPoint,
    SpawnFailed,
    StreamFailed,
    ShutdownRequested,
}

pub type SharedState = Arc<RwLock<SupervisorState>>;

pub struct Supervisor<S> {
    config: LauncherConfig,
    base_dir: PathBuf,
    sink: S,
    process: ProcessSlot,
    state: SharedState,
}

impl<S: DisplaySink + 'static> Supervisor<S> {
    pub fn new(config: LauncherConfig, base_dir: impl Into<PathBuf>, sink: S) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
            sink,
            process: ProcessSlot::new(),
            state: Arc::new(RwLock::new(SupervisorState::CheckingDependencies)),
        }
    }

    /// Handle to the server child, for terminate and panic cleanup
    pub fn process(&self) -> ProcessSlot {
        self.process.clone()
    }

    pub fn shared_state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.read()
    }

    /// Runs the whole sequence on the dedicated worker thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<Outcome>> {
        std::thread::Builder::new()
            .name("supervisor".to_string())
            .spawn(move || self.run())
    }

    /// Runs the whole sequence on the calling thread; blocks until the server exits
    pub fn run(&self) -> Outcome {
        info!("Supervising server in {:?}", self.base_dir);
        let outcome = self.drive();
        self.transition(SupervisorState::Terminated);
        info!("Supervisor finished: {:?}", outcome);
        outcome
    }

    fn drive(&self) -> Outcome {
        self.transition(SupervisorState::CheckingDependencies);
        if !self.dependencies_present() {
            self.sink.info(format!(
                ">>> '{}' not found. Running '{}'...",
                self.config.dependency_marker.display(),
                self.config.install_command
            ));
            self.transition(SupervisorState::InstallingDependencies);
            if let Err(outcome) = self.install_dependencies() {
                return outcome;
            }
        }

        self.transition(SupervisorState::StartingServer);
        let lines = match self.start_server() {
            Ok(lines) => lines,
            Err(outcome) => return outcome,
        };

        self.transition(SupervisorState::Streaming);
        self.stream(lines)
    }

    fn transition(&self, next: SupervisorState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!("Supervisor state {:?} -> {:?}", previous, next);
        }
        self.sink.state_changed(next);
    }

    fn dependencies_present(&self) -> bool {
        let marker = self.config.dependency_dir(&self.base_dir);
        let present = marker.is_dir();
        info!("Dependency marker {:?} present: {}", marker, present);
        present
    }

    fn install_dependencies(&self) -> Result<(), Outcome> {
        let command = self.config.install_command(&self.base_dir);
        info!("Installing dependencies: {}", command);

        match ProcessRunner::run_to_completion(&command, &self.process) {
            Ok(()) => {
                self.sink.info(">>> Dependencies installed successfully.");
                Ok(())
            }
            Err(_) if self.process.shutdown_requested() => {
                info!("Install interrupted by shutdown");
                Err(Outcome::ShutdownRequested)
            }
            Err(err) => {
                error!("Dependency install failed: {}", err);
                self.sink
                    .error(format!(">>> ERROR running '{}': {}", command.line(), err));
                if let LauncherError::CommandFailed { output_tail, .. } = err {
                    for line in output_tail {
                        self.sink.error(format!("    {}", line));
                    }
                }
                Err(Outcome::InstallFailed)
            }
        }
    }

    fn start_server(&self) -> Result<OutputLines, Outcome> {
        let entry_point = self.config.entry_point_path(&self.base_dir);
        if !entry_point.is_file() {
            let err = LauncherError::MissingEntryPoint(entry_point);
            error!("{}", err);
            self.sink.error(format!("ERROR: {}.", err));
            return Err(Outcome::MissingEntryPoint);
        }

        if self.process.shutdown_requested() {
            info!("Shutdown requested before the server started");
            return Err(Outcome::ShutdownRequested);
        }

        if let Err(err) = self.resolve_interpreter() {
            error!("{}", err);
            self.sink.error(format!("ERROR: cannot start the server: {}", err));
            return Err(Outcome::SpawnFailed);
        }

        let command = self.config.server_command(&self.base_dir);
        self.sink.info(format!(">>> Starting server: {}", command.line()));

        match ProcessRunner::run(&command, &self.process) {
            Ok(lines) => Ok(lines),
            Err(LauncherError::ShuttingDown) => Err(Outcome::ShutdownRequested),
            Err(err) => {
                error!("Failed to start server: {}", err);
                self.sink.error(format!("ERROR: failed to start the server: {}", err));
                Err(Outcome::SpawnFailed)
            }
        }
    }

    /// The shell would only report a missing interpreter as "not found" on the
    /// output stream; checking up front makes it a spawn failure.
    fn resolve_interpreter(&self) -> Result<PathBuf, LauncherError> {
        let interpreter = &self.config.interpreter;
        let not_found = |detail: String| LauncherError::Spawn {
            command: interpreter.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, detail),
        };

        let path = Path::new(interpreter);
        if path.components().count() > 1 {
            let path = if path.is_relative() {
                self.base_dir.join(path)
            } else {
                path.to_path_buf()
            };
            return if path.is_file() {
                Ok(path)
            } else {
                Err(not_found(format!("{} does not exist", path.display())))
            };
        }

        which::which(interpreter).map_err(|e| not_found(format!("{} (is it installed and on PATH?)", e)))
    }

    fn stream(&self, mut lines: OutputLines) -> Outcome {
        info!("Streaming output of server PID {}", lines.pid());

        for line in lines.by_ref() {
            match line {
                Ok(line) => {
                    debug!("[SERVER] {}", line);
                    self.sink.output(line);
                }
                Err(_) if self.process.shutdown_requested() => break,
                Err(err) => {
                    warn!("Lost server output: {}", err);
                    self.sink.error(format!("ERROR: lost server output: {}", err));
                    return Outcome::StreamFailed;
                }
            }
        }

        if self.process.shutdown_requested() {
            self.sink.info(">>> Server stopped.");
            return Outcome::ShutdownRequested;
        }

        let code = lines.exit_code();
        info!("Server exited with {}", describe_code(&code));
        self.sink
            .info(format!(">>> Server process exited with {}.", describe_code(&code)));
        Outcome::ServerExited { code }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::console::{ChannelSink, ConsoleEvent, ConsoleLine, LineKind};
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Base directory with a shell "server" that records its start in calls.log
    struct Fixture {
        dir: tempfile::TempDir,
        config: LauncherConfig,
    }

    impl Fixture {
        fn new(server_script: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("src")).unwrap();
            std::fs::write(
                dir.path().join("src").join("server.ts"),
                format!("echo server >> calls.log\n{}\n", server_script),
            )
            .unwrap();

            let config = LauncherConfig {
                install_command: "echo install >> calls.log && mkdir node_modules".to_string(),
                interpreter: "sh".to_string(),
                interpreter_args: vec![],
                ..LauncherConfig::default()
            };
            Self { dir, config }
        }

        fn with_dependencies(self) -> Self {
            std::fs::create_dir_all(self.dir.path().join("node_modules")).unwrap();
            self
        }

        fn base(&self) -> &Path {
            self.dir.path()
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(self.base().join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn supervisor(&self) -> (Supervisor<ChannelSink>, UnboundedReceiver<ConsoleEvent>) {
            let (sink, rx) = ChannelSink::new();
            (Supervisor::new(self.config.clone(), self.base(), sink), rx)
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ConsoleEvent>) -> (Vec<ConsoleLine>, Vec<SupervisorState>) {
        let mut lines = Vec::new();
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ConsoleEvent::Line(line) => lines.push(line),
                ConsoleEvent::State(state) => states.push(state),
            }
        }
        (lines, states)
    }

    fn of_kind(lines: &[ConsoleLine], kind: LineKind) -> Vec<String> {
        lines
            .iter()
            .filter(|line| line.kind == kind)
            .map(|line| line.text.clone())
            .collect()
    }

    #[test]
    fn test_installs_before_starting_server() {
        let fixture = Fixture::new("echo up");
        let (supervisor, mut rx) = fixture.supervisor();

        let outcome = supervisor.run();
        assert_eq!(outcome, Outcome::ServerExited { code: Some(0) });
        // Both commands wrote into the base directory, install first
        assert_eq!(fixture.calls(), vec!["install", "server"]);
        assert!(fixture.base().join("node_modules").is_dir());

        let (lines, states) = drain(&mut rx);
        assert_eq!(
            states,
            vec![
                SupervisorState::CheckingDependencies,
                SupervisorState::InstallingDependencies,
                SupervisorState::StartingServer,
                SupervisorState::Streaming,
                SupervisorState::Terminated,
            ]
        );
        let info = of_kind(&lines, LineKind::Info);
        assert!(info[0].contains("'node_modules' not found"));
        assert!(info.iter().any(|l| l.contains("installed successfully")));
        assert_eq!(of_kind(&lines, LineKind::Output), vec!["up"]);
    }

    #[test]
    fn test_skips_install_when_dependencies_present() {
        let fixture = Fixture::new("echo up").with_dependencies();
        let (supervisor, mut rx) = fixture.supervisor();

        supervisor.run();
        assert_eq!(fixture.calls(), vec!["server"]);

        let (_, states) = drain(&mut rx);
        assert!(!states.contains(&SupervisorState::InstallingDependencies));
    }

    #[test]
    fn test_failed_install_never_starts_server() {
        let mut fixture = Fixture::new("echo up");
        fixture.config.install_command = "echo 'npm ERR! network down'; exit 1".to_string();
        let (supervisor, mut rx) = fixture.supervisor();

        assert_eq!(supervisor.run(), Outcome::InstallFailed);
        assert!(fixture.calls().is_empty());
        assert_eq!(supervisor.state(), SupervisorState::Terminated);

        let (lines, _) = drain(&mut rx);
        let errors = of_kind(&lines, LineKind::Error);
        assert!(errors[0].starts_with(">>> ERROR running"));
        assert!(errors.iter().any(|l| l.contains("npm ERR! network down")));
        assert!(of_kind(&lines, LineKind::Output).is_empty());
    }

    #[test]
    fn test_missing_entry_point() {
        let fixture = Fixture::new("echo up").with_dependencies();
        std::fs::remove_file(fixture.base().join("src").join("server.ts")).unwrap();
        let (supervisor, mut rx) = fixture.supervisor();

        assert_eq!(supervisor.run(), Outcome::MissingEntryPoint);
        assert!(fixture.calls().is_empty());

        let (lines, _) = drain(&mut rx);
        let errors = of_kind(&lines, LineKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("server.ts"));
        assert!(errors[0].contains("not found"));
    }

    #[test]
    fn test_output_forwarded_in_order() {
        let fixture = Fixture::new("echo A\necho B >&2\necho C").with_dependencies();
        let (supervisor, mut rx) = fixture.supervisor();

        supervisor.run();
        let (lines, _) = drain(&mut rx);
        assert_eq!(of_kind(&lines, LineKind::Output), vec!["A", "B", "C"]);

        let seqs: Vec<u64> = lines.iter().map(|line| line.seq).collect();
        assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_worker_ends_after_server_exit() {
        let fixture = Fixture::new("echo A\necho B\necho C\nexit 4").with_dependencies();
        let (supervisor, mut rx) = fixture.supervisor();
        let process = supervisor.process();

        let outcome = supervisor.spawn().unwrap().join().unwrap();
        assert_eq!(outcome, Outcome::ServerExited { code: Some(4) });
        assert_eq!(process.pid(), None);

        let (lines, states) = drain(&mut rx);
        assert_eq!(states.last(), Some(&SupervisorState::Terminated));
        // Nothing from the child after the stream ended
        let last_output = lines.iter().rposition(|l| l.kind == LineKind::Output).unwrap();
        assert_eq!(lines[last_output].text, "C");
        assert!(lines[last_output + 1..].iter().all(|l| l.kind == LineKind::Info));
        assert!(lines.last().unwrap().text.contains("exit code 4"));
    }

    #[test]
    fn test_terminate_does_not_hang_on_running_server() {
        let fixture = Fixture::new("echo up\nsleep 60\necho never").with_dependencies();
        let (supervisor, mut rx) = fixture.supervisor();
        let process = supervisor.process();
        let state = supervisor.shared_state();
        let worker = supervisor.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !(*state.read() == SupervisorState::Streaming && process.pid().is_some()) {
            assert!(Instant::now() < deadline, "server never started");
            std::thread::sleep(Duration::from_millis(20));
        }

        let started = Instant::now();
        process.terminate(Duration::from_millis(500));
        let outcome = worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome, Outcome::ShutdownRequested);

        let (lines, _) = drain(&mut rx);
        assert!(!of_kind(&lines, LineKind::Output).contains(&"never".to_string()));
    }

    #[test]
    fn test_shutdown_before_start_spawns_nothing() {
        let fixture = Fixture::new("echo up").with_dependencies();
        let (supervisor, _rx) = fixture.supervisor();
        supervisor.process().terminate(Duration::from_millis(10));

        assert_eq!(supervisor.run(), Outcome::ShutdownRequested);
        assert!(fixture.calls().is_empty());
    }

    #[test]
    fn test_missing_interpreter_is_reported() {
        let mut fixture = Fixture::new("echo up").with_dependencies();
        fixture.config.interpreter = "no-such-interpreter-7731".to_string();
        let (supervisor, mut rx) = fixture.supervisor();

        assert_eq!(supervisor.run(), Outcome::SpawnFailed);
        assert!(fixture.calls().is_empty());

        let (lines, _) = drain(&mut rx);
        let errors = of_kind(&lines, LineKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no-such-interpreter-7731"));
    }

    #[test]
    fn test_interpreter_given_as_path() {
        let mut fixture = Fixture::new("echo up").with_dependencies();
        fixture.config.interpreter = "bin/missing-node".to_string();
        let (supervisor, _rx) = fixture.supervisor();
        assert_eq!(supervisor.run(), Outcome::SpawnFailed);

        let sh = which::which("sh").unwrap();
        fixture.config.interpreter = sh.display().to_string();
        let (supervisor, _rx) = fixture.supervisor();
        assert_eq!(supervisor.run(), Outcome::ServerExited { code: Some(0) });
    }

    #[test]
    fn test_outcome_serializes_with_reason_tag() {
        let json = serde_json::to_value(Outcome::ServerExited { code: Some(1) }).unwrap();
        assert_eq!(json["reason"], "server_exited");
        assert_eq!(json["code"], 1);
        let json = serde_json::to_value(SupervisorState::InstallingDependencies).unwrap();
        assert_eq!(json, "installing_dependencies");
    }
}
