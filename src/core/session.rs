//! Session management
//!
//! The execution session controller. It owns the run lifecycle, routes
//! program output through the compositor into the output log, parks the
//! running program on the input bridge, and hands the runtime a capability
//! table of substitutes for operations the sandbox cannot perform.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::OnceCell;

use super::bridge::{BridgeError, InputBridge};
use super::output::{LogEvent, OutputLog};
use super::resilience::{CapabilityTable, MockValue};
use super::term::{Compositor, LineKind, TerminalLine};
use crate::config::{Config, TerminalConfig};
use crate::runtime::{EvaluationFault, Runtime};

/// Run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    AwaitingInput,
    Faulted,
}

/// Session events for renderers and status displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Lifecycle transition
    StateChanged(SessionState),
    /// The running program is waiting for a line of input
    InputRequested(String),
    /// Output log changed
    Log(LogEvent),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is busy ({0:?})")]
    Busy(SessionState),

    #[error("Session is not awaiting input")]
    NotAwaitingInput,

    #[error("Runtime has not booted yet")]
    NotBooted,

    #[error("Runtime failed to boot: {0}")]
    BootFailed(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// How a run or evaluated command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(Option<String>),
    Faulted(String),
}

/// What a submitted terminal line did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Blank line while idle
    Ignored,
    /// Answered a pending input request
    InputSupplied,
    /// Package-install pseudo-command
    Install { package: String, installed: bool },
    /// Evaluated as a command
    Evaluated(RunOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BootStatus {
    Pending,
    Ready,
    Failed(String),
}

/// State guarded by the session lock
struct Shared {
    state: SessionState,
    boot: BootStatus,
    log: OutputLog,
    compositor: Compositor,
}

impl Shared {
    fn feed(&mut self, stream: LineKind, text: &str) {
        self.compositor.feed(stream, text, &mut self.log);
    }

    fn push_line(&mut self, kind: LineKind, text: &str) {
        self.compositor.push_line(kind, text, &mut self.log);
    }

    fn flush(&mut self) {
        self.compositor.flush(&mut self.log);
    }
}

struct Inner {
    shared: Mutex<Shared>,
    bridge: InputBridge,
    runtime: Arc<dyn Runtime>,
    capabilities: CapabilityTable,
    terminal: TerminalConfig,
    events: Option<UnboundedSender<SessionEvent>>,
    /// Outcome of the single runtime boot, shared by concurrent callers
    booted: OnceCell<Result<(), String>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn transition(&self, shared: &mut Shared, next: SessionState) {
        if shared.state != next {
            tracing::debug!("Session state {:?} -> {:?}", shared.state, next);
            shared.state = next;
            self.emit(SessionEvent::StateChanged(next));
        }
    }
}

/// Handle given to the runtime for the duration of one evaluation
#[derive(Clone)]
pub struct ExecContext {
    inner: Arc<Inner>,
}

impl ExecContext {
    /// Forward a chunk written to the program's standard output
    pub fn stdout(&self, text: &str) {
        self.inner.lock().feed(LineKind::Stdout, text);
    }

    /// Forward a chunk written to the program's standard error
    pub fn stderr(&self, text: &str) {
        self.inner.lock().feed(LineKind::Stderr, text);
    }

    /// Show `prompt` and suspend until the user supplies a line
    pub async fn read_line(&self, prompt: &str) -> Result<String, BridgeError> {
        let reply = {
            let mut shared = self.inner.lock();
            if !prompt.is_empty() {
                shared.feed(LineKind::Stdout, prompt);
            }
            shared.flush();
            let reply = self.inner.bridge.request_input(prompt)?;
            self.inner.transition(&mut shared, SessionState::AwaitingInput);
            reply
        };
        self.inner.emit(SessionEvent::InputRequested(prompt.to_string()));
        reply.await
    }

    /// Run the substitute for an operation the sandbox cannot perform.
    ///
    /// Returns `None` when the operation is not intercepted; the runtime is
    /// then expected to fail the way it natively would.
    pub fn intercept(&self, operation: &str, args: &str) -> Option<MockValue> {
        let hit = self.inner.capabilities.intercept(operation, args)?;
        self.inner.lock().push_line(LineKind::Stderr, &hit.advisory);
        Some(hit.value)
    }
}

/// The execution session controller
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a session around `runtime`
    pub fn new(runtime: Arc<dyn Runtime>, config: &Config) -> Self {
        Self::build(runtime, config, None)
    }

    /// Create a session that reports state and log changes on `events`
    pub fn with_events(
        runtime: Arc<dyn Runtime>,
        config: &Config,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self::build(runtime, config, Some(events))
    }

    fn build(
        runtime: Arc<dyn Runtime>,
        config: &Config,
        events: Option<UnboundedSender<SessionEvent>>,
    ) -> Self {
        let log = match &events {
            Some(tx) => OutputLog::with_events(tx.clone()),
            None => OutputLog::new(),
        };
        let mut compositor = Compositor::new();
        compositor.set_monospace_hint(config.terminal.monospace_hint);
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: SessionState::Idle,
                    boot: BootStatus::Pending,
                    log,
                    compositor,
                }),
                bridge: InputBridge::new(),
                runtime,
                capabilities: CapabilityTable::from_config(&config.resilience),
                terminal: config.terminal.clone(),
                events,
                booted: OnceCell::new(),
            }),
        }
    }

    /// Boot the runtime. A failure is reported once and is permanent.
    ///
    /// Concurrent callers share one boot attempt.
    pub async fn boot(&self) -> Result<(), SessionError> {
        self.inner
            .booted
            .get_or_init(|| self.boot_runtime())
            .await
            .clone()
            .map_err(SessionError::BootFailed)
    }

    async fn boot_runtime(&self) -> Result<(), String> {
        tracing::info!("Booting runtime {}", self.inner.runtime.name());
        let result = self.inner.runtime.boot().await;

        let mut shared = self.inner.lock();
        match result {
            Ok(()) => {
                shared.boot = BootStatus::Ready;
                let banner = self.inner.terminal.boot_banner.clone();
                if !banner.is_empty() {
                    shared.push_line(LineKind::System, &banner);
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!("Runtime boot failed: {}", e);
                shared.boot = BootStatus::Failed(e.message.clone());
                shared.push_line(LineKind::Stderr, &format!("Core Error: {}", e.message));
                Err(e.message)
            }
        }
    }

    /// Run editor source as a whole program
    pub async fn run_source(&self, source: &str) -> Result<RunOutcome, SessionError> {
        let markers = self.inner.terminal.session_markers;
        {
            let mut shared = self.begin()?;
            if markers {
                shared.push_line(LineKind::System, "--- Session Started ---");
            }
        }

        let guard = RunGuard::new(&self.inner);
        let ctx = self.context();
        let result = self.inner.runtime.evaluate(source, &ctx).await;
        guard.disarm();
        Ok(self.finish(result, false, markers))
    }

    /// Handle one line typed into the terminal
    pub async fn submit_line(&self, line: &str) -> Result<Submission, SessionError> {
        if self.state() == SessionState::AwaitingInput {
            self.supply_input(line.to_string())?;
            return Ok(Submission::InputSupplied);
        }

        let cmd = line.trim();
        if cmd.is_empty() {
            return Ok(Submission::Ignored);
        }

        {
            let mut shared = self.begin()?;
            let echo = format!("{}{}", self.inner.terminal.echo_prefix, cmd);
            shared.push_line(LineKind::Input, &echo);
        }

        let guard = RunGuard::new(&self.inner);
        if let Some(package) = pip_install_target(cmd) {
            let installed = self.install(package).await;
            guard.disarm();
            return Ok(Submission::Install {
                package: package.to_string(),
                installed,
            });
        }

        let ctx = self.context();
        let result = self.inner.runtime.evaluate(cmd, &ctx).await;
        guard.disarm();
        Ok(Submission::Evaluated(self.finish(result, true, false)))
    }

    /// Answer the pending input request
    pub fn supply_input(&self, value: String) -> Result<(), SessionError> {
        // The resumed program blocks on the session lock until the echo and
        // the transition are recorded.
        let mut shared = self.inner.lock();
        if shared.state != SessionState::AwaitingInput {
            return Err(SessionError::NotAwaitingInput);
        }
        let echo = format!("{}{}", self.inner.terminal.echo_prefix, value);
        if let Err(e) = self.inner.bridge.supply_input(value) {
            tracing::warn!("Input request vanished: {}", e);
            shared.flush();
            self.inner.transition(&mut shared, SessionState::Idle);
            return Err(e.into());
        }
        shared.push_line(LineKind::Input, &echo);
        self.inner.transition(&mut shared, SessionState::Running);
        Ok(())
    }

    /// Empty the output log
    pub fn clear(&self) {
        let mut shared = self.inner.lock();
        shared.compositor.reset();
        shared.log.clear();
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().boot == BootStatus::Ready
    }

    /// Prompt of the pending input request, if any
    pub fn pending_prompt(&self) -> Option<String> {
        self.inner.bridge.pending_prompt()
    }

    /// Snapshot of the output log
    pub fn lines(&self) -> Vec<TerminalLine> {
        self.inner.lock().log.lines().to_vec()
    }

    /// Snapshot of the last `n` lines
    pub fn tail(&self, n: usize) -> Vec<TerminalLine> {
        self.inner.lock().log.tail(n).to_vec()
    }

    /// Text of the most recent stderr line, for the assistant's context
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .lock()
            .log
            .last_of_kind(LineKind::Stderr)
            .map(|l| l.text())
    }

    /// Borrow the output log while holding the session lock
    pub fn with_log<R>(&self, f: impl FnOnce(&OutputLog) -> R) -> R {
        f(&self.inner.lock().log)
    }

    fn context(&self) -> ExecContext {
        ExecContext {
            inner: self.inner.clone(),
        }
    }

    /// Idle -> Running, or explain why not
    fn begin(&self) -> Result<MutexGuard<'_, Shared>, SessionError> {
        let mut shared = self.inner.lock();
        match &shared.boot {
            BootStatus::Pending => return Err(SessionError::NotBooted),
            BootStatus::Failed(msg) => return Err(SessionError::BootFailed(msg.clone())),
            BootStatus::Ready => {}
        }
        if shared.state != SessionState::Idle {
            tracing::debug!("Rejecting submission while {:?}", shared.state);
            return Err(SessionError::Busy(shared.state));
        }
        self.inner.transition(&mut shared, SessionState::Running);
        Ok(shared)
    }

    /// Running -> Idle, through Faulted on error
    fn finish(
        &self,
        result: Result<Option<String>, EvaluationFault>,
        print_result: bool,
        markers: bool,
    ) -> RunOutcome {
        if self.inner.bridge.cancel() {
            tracing::warn!("Evaluation ended with an input request still pending");
        }

        let mut shared = self.inner.lock();
        shared.flush();

        let outcome = match result {
            Ok(value) => {
                if let Some(v) = value.as_deref().filter(|v| print_result && !v.is_empty()) {
                    shared.feed(LineKind::Stdout, &format!("{}\n", v));
                    shared.flush();
                }
                RunOutcome::Completed(value)
            }
            Err(fault) => {
                tracing::info!("Evaluation fault: {}", fault);
                self.inner.transition(&mut shared, SessionState::Faulted);
                shared.push_line(LineKind::Stderr, &fault.message);
                RunOutcome::Faulted(fault.message)
            }
        };

        if markers {
            shared.push_line(LineKind::System, "--- Session Finished ---");
        }
        self.inner.transition(&mut shared, SessionState::Idle);
        outcome
    }

    async fn install(&self, package: &str) -> bool {
        self.inner.lock().push_line(
            LineKind::System,
            &format!("Fetching {} from PyPI via WASM...", package),
        );

        let result = self.inner.runtime.install_package(package).await;

        let mut shared = self.inner.lock();
        let installed = match result {
            Ok(()) => {
                shared.push_line(
                    LineKind::System,
                    &format!("Package {} is now available.", package),
                );
                true
            }
            Err(e) => {
                shared.push_line(LineKind::Stderr, &format!("Pip Error: {}", e.message));
                false
            }
        };
        self.inner.transition(&mut shared, SessionState::Idle);
        installed
    }
}

/// Returns the session to Idle if a run is dropped before it finishes
struct RunGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        Self { inner, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Run dropped before completion");
        self.inner.bridge.cancel();
        let mut shared = self.inner.lock();
        shared.flush();
        self.inner.transition(&mut shared, SessionState::Idle);
    }
}

/// Package name from a `pip install <name>` line (optionally `!`-prefixed)
pub fn pip_install_target(line: &str) -> Option<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(!)?pip3?\s+install\s+(.+)$").expect("pip pattern is valid")
    });
    pattern
        .captures(line)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_install_pattern() {
        assert_eq!(pip_install_target("pip install numpy"), Some("numpy"));
        assert_eq!(pip_install_target("!pip install requests "), Some("requests"));
        assert_eq!(pip_install_target("PIP3   INSTALL pandas==2.0"), Some("pandas==2.0"));
        assert_eq!(pip_install_target("pip uninstall numpy"), None);
        assert_eq!(pip_install_target("print('pip install x')"), None);
        assert_eq!(pip_install_target("pip install"), None);
    }
}
