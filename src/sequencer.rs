use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::LaunchConfig;
use crate::diagnostics::{DiagEvent, DiagnosticsJournal};
use crate::error::{describe_code, LaunchError, Result};
use crate::port::{reclaim_port, ReclaimOutcome};
use crate::process::{
    run_to_completion, runtime_environment, CommandSpec, Launcher, RunningProcess,
};
use crate::provision::{ensure_runtime, Provisioned};
use crate::readiness::{ReadinessEvent, ReadinessResult, ReadinessScanner};
use crate::status::{SequenceStatus, Stage, StatusSink};

const POLL_INTERVAL: Duration = Duration::from_millis(150);
const EXIT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Fresh { target_dir: PathBuf },
    Existing { project_dir: PathBuf },
}

impl Flow {
    fn project_dir(&self) -> &Path {
        match self {
            Self::Fresh { target_dir } => target_dir,
            Self::Existing { project_dir } => project_dir,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh { .. } => "fresh",
            Self::Existing { .. } => "existing",
        }
    }
}

/// Shared flag that aborts the readiness wait (and any stage not yet begun).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The dev server a successful sequence leaves running. Dropping the handle
/// does not stop the server.
#[derive(Debug)]
pub struct DevServer {
    process: RunningProcess,
    scanner: Option<JoinHandle<()>>,
}

impl DevServer {
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Kills and reaps the server. The output reader winds down on its own
    /// once the pipe closes.
    pub fn stop(mut self) -> Result<()> {
        self.scanner.take();
        self.process.kill()
    }

    pub fn wait(mut self) -> Result<ExitStatus> {
        let status = self.process.wait_for_exit()?;
        if let Some(handle) = self.scanner.take() {
            let _ = handle.join();
        }
        Ok(status)
    }

    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        self.process.try_exit()
    }
}

#[derive(Debug)]
pub struct SequenceOutcome {
    pub readiness: ReadinessResult,
    pub server: DevServer,
}

impl SequenceOutcome {
    pub fn address(&self) -> &str {
        &self.readiness.matched_address
    }
}

/// Drives one launch at a time through the fixed stage pipeline and reports
/// every transition to a [`StatusSink`].
pub struct Sequencer {
    config: LaunchConfig,
    launcher: Arc<dyn Launcher>,
    inherited_env: Vec<(String, String)>,
    journal: Mutex<DiagnosticsJournal>,
    in_flight: Mutex<()>,
}

impl Sequencer {
    pub fn new(config: LaunchConfig, launcher: Arc<dyn Launcher>) -> Self {
        let journal = DiagnosticsJournal::open(config.diagnostics_path());
        let inherited_env = env::vars_os()
            .filter_map(|(key, value)| {
                Some((key.into_string().ok()?, value.into_string().ok()?))
            })
            .collect();
        Self {
            config,
            launcher,
            inherited_env,
            journal: Mutex::new(journal),
            in_flight: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn diagnostics(&self, limit: Option<usize>) -> Vec<DiagEvent> {
        self.journal().recent(limit).to_vec()
    }

    pub fn run_fresh(
        &self,
        target_dir: impl Into<PathBuf>,
        sink: &dyn StatusSink,
    ) -> Result<SequenceOutcome> {
        let flow = Flow::Fresh {
            target_dir: target_dir.into(),
        };
        self.run(&flow, sink, &CancelToken::new())
    }

    pub fn run_existing(
        &self,
        project_dir: impl Into<PathBuf>,
        sink: &dyn StatusSink,
    ) -> Result<SequenceOutcome> {
        let flow = Flow::Existing {
            project_dir: project_dir.into(),
        };
        self.run(&flow, sink, &CancelToken::new())
    }

    /// Runs `flow` to `Ready` or `Failed`. A second call while one is in
    /// progress is rejected with [`LaunchError::SequenceInFlight`] and
    /// publishes nothing.
    pub fn run(
        &self,
        flow: &Flow,
        sink: &dyn StatusSink,
        cancel: &CancelToken,
    ) -> Result<SequenceOutcome> {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                log::warn!("launch requested while another is in progress");
                self.record("warn", "sequencer", "Start requested while already running");
                return Err(LaunchError::SequenceInFlight);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        self.record(
            "info",
            "sequencer",
            format!(
                "Start requested: flow={} dir={} port={}",
                flow.as_str(),
                flow.project_dir().display(),
                self.config.port
            ),
        );

        let mut run = SequenceRun {
            sequencer: self,
            sink,
            cancel,
            stage: Stage::Provisioning,
        };
        match run.execute(flow) {
            Ok(outcome) => {
                self.record(
                    "info",
                    "sequencer",
                    format!("Dev server ready at {}", outcome.address()),
                );
                sink.publish(&SequenceStatus::Ready {
                    readiness: outcome.readiness.clone(),
                });
                Ok(outcome)
            }
            Err(err) => {
                let message = err.to_string();
                log::error!("{} failed: {message}", run.stage);
                self.record("error", run.stage.as_str(), message.clone());
                sink.publish(&SequenceStatus::failed(run.stage, message));
                Err(err)
            }
        }
    }

    fn journal(&self) -> MutexGuard<'_, DiagnosticsJournal> {
        match self.journal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, level: &str, source: &str, message: impl Into<String>) {
        self.journal().push(level, source, message);
    }
}

/// State of one in-progress sequence. `stage` is what a failure is blamed on.
struct SequenceRun<'a> {
    sequencer: &'a Sequencer,
    sink: &'a dyn StatusSink,
    cancel: &'a CancelToken,
    stage: Stage,
}

impl<'a> SequenceRun<'a> {
    fn config(&self) -> &'a LaunchConfig {
        &self.sequencer.config
    }

    fn launcher(&self) -> &'a dyn Launcher {
        self.sequencer.launcher.as_ref()
    }

    fn enter(&mut self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LaunchError::Cancelled);
        }
        self.stage = stage;
        log::info!("{}", stage.label());
        self.sequencer.record("info", stage.as_str(), stage.label());
        self.sink.publish(&SequenceStatus::running(stage));
        Ok(())
    }

    fn execute(&mut self, flow: &Flow) -> Result<SequenceOutcome> {
        self.enter(Stage::Provisioning)?;
        let package_manager = match flow {
            Flow::Fresh { .. } => Some(self.config().require_package_manager()?),
            Flow::Existing { .. } => None,
        };
        match ensure_runtime(&self.config().provision_target(), self.launcher())? {
            Provisioned::AlreadyPresent => {}
            Provisioned::Extracted => {
                self.sequencer
                    .record("info", "provisioning", "Node.js bundle extracted")
            }
        }

        let env = runtime_environment(
            &self.config().runtime_bin_dir(),
            self.sequencer.inherited_env.iter().cloned(),
            &self.config().passthrough_env,
        );
        let project_dir = flow.project_dir();

        if let Some(bun) = package_manager {
            self.enter(Stage::Scaffolding)?;
            let create = CommandSpec::new(bun)
                .arg("create")
                .arg(&self.config().framework)
                .args(["--yes", "--no-install"])
                .arg(project_dir.to_string_lossy())
                .envs(&env)
                .capture_output();
            self.run_one_shot(&create)?;

            self.enter(Stage::Installing)?;
            let install = CommandSpec::new(bun)
                .arg("install")
                .envs(&env)
                .current_dir(project_dir)
                .capture_output();
            self.run_one_shot(&install)?;
        }

        self.enter(Stage::PortReclaiming)?;
        let port = self.config().port;
        match reclaim_port(port, self.launcher(), &self.config().shell_program) {
            ReclaimOutcome::AlreadyFree => {}
            ReclaimOutcome::Reclaimed => self
                .sequencer
                .record("info", "port_reclaiming", format!("Freed port {port}")),
            ReclaimOutcome::StillBound => self
                .sequencer
                .record("warn", "port_reclaiming", format!("Port {port} is still in use")),
            ReclaimOutcome::Failed(message) => {
                self.sequencer.record("warn", "port_reclaiming", message)
            }
        }

        self.enter(Stage::Starting)?;
        let scanner = ReadinessScanner::new(&self.config().readiness_pattern)?;
        let start = CommandSpec::new(&self.config().env_program)
            .arg("npx")
            .arg(&self.config().framework)
            .args(["start", "--web", "--port"])
            .arg(port.to_string())
            .envs(&env)
            .env("CI", "1")
            .env("BROWSER", "none")
            .current_dir(project_dir)
            .capture_output();
        let mut process = self.launcher().launch(&start)?;
        let (events_tx, events_rx) = mpsc::channel();
        let scanner_handle = process
            .take_output()
            .map(|stream| scanner.subscribe(stream, events_tx));
        let mut server = DevServer {
            process,
            scanner: scanner_handle,
        };
        self.sequencer.record(
            "info",
            "starting",
            format!(
                "Dev server started with pid {}: {}",
                server.pid(),
                server.process.spec().display_line()
            ),
        );

        let readiness = self
            .enter(Stage::AwaitingReadiness)
            .and_then(|()| self.await_readiness(&mut server, &events_rx));
        match readiness {
            Ok(readiness) => Ok(SequenceOutcome { readiness, server }),
            Err(err) => {
                if let Err(stop_err) = server.stop() {
                    log::warn!("failed to stop dev server: {stop_err}");
                }
                Err(err)
            }
        }
    }

    fn run_one_shot(&self, spec: &CommandSpec) -> Result<()> {
        let (status, output) = run_to_completion(self.launcher(), spec)?;
        let text = String::from_utf8_lossy(&output);
        if !text.trim().is_empty() {
            log::info!("{}", text.trim_end());
        }
        if status.success() {
            return Ok(());
        }
        Err(LaunchError::NonZeroExit {
            stage: self.stage,
            code: status.code(),
        })
    }

    fn await_readiness(
        &self,
        server: &mut DevServer,
        events: &Receiver<ReadinessEvent>,
    ) -> Result<ReadinessResult> {
        let timeout = self.config().readiness_timeout;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.cancel.is_cancelled() {
                return Err(LaunchError::Cancelled);
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(LaunchError::ReadinessTimeout(timeout.as_secs()));
                }
            }
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(ReadinessEvent::Found(result)) => return Ok(result),
                Ok(ReadinessEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.output_closed(server));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if let Some(status) = server.try_exit()? {
                if !status.success() {
                    // Whatever it printed last may still be in flight.
                    if let Ok(ReadinessEvent::Found(result)) = events.recv_timeout(POLL_INTERVAL) {
                        return Ok(result);
                    }
                    return Err(LaunchError::NonZeroExit {
                        stage: self.stage,
                        code: status.code(),
                    });
                }
            }
        }
    }

    /// The server closed stdout without an address; blame its exit code if it
    /// died, otherwise the missing address.
    fn output_closed(&self, server: &mut DevServer) -> LaunchError {
        let deadline = Instant::now() + EXIT_GRACE;
        while Instant::now() < deadline {
            match server.try_exit() {
                Ok(Some(status)) if !status.success() => {
                    log::warn!("dev server exited with {}", describe_code(&status.code()));
                    return LaunchError::NonZeroExit {
                        stage: self.stage,
                        code: status.code(),
                    };
                }
                Ok(Some(_)) | Err(_) => break,
                Ok(None) => thread::sleep(Duration::from_millis(50)),
            }
        }
        log::warn!("URL not found before dev server output closed");
        LaunchError::PatternNotFound
    }
}
