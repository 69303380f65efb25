//! Model service lifecycle management.
//!
//! Spawns the comparison model as a child process (by default the same
//! binary with the `model-service` subcommand) with stdout and stderr merged
//! into one stream, waits for its handshake on a background thread,
//! serializes requests to it, and tears it down.

use std::io::{PipeReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use explainer_config::ModelServiceConfig;
use explainer_types::ServiceState;
use log::{debug, error, info, warn};

use super::ipc_types::{classify_handshake, parse_json_line, Handshake, JsonObject, ServiceRequest};
use super::line_channel::{spawn_line_reader, LineProtocolChannel, NoResponse};

/// Blocking bounds for the model service conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceTimeouts {
    /// Overall budget for the handshake line after spawn.
    pub handshake: Duration,
    /// Per-request reply budget.
    pub request: Duration,
    /// Wait after the terminate signal before force-killing.
    pub shutdown_grace: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(60),
            request: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl From<&ModelServiceConfig> for ServiceTimeouts {
    fn from(config: &ModelServiceConfig) -> Self {
        Self {
            handshake: config.handshake_timeout(),
            request: config.request_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Program, arguments and working directory of the model service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCommand {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ServiceCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The current executable running its built-in model service.
    pub fn self_hosted(catalog: &Path) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe)
            .arg("model-service")
            .arg("--catalog")
            .arg(catalog.to_string_lossy()))
    }

    /// Configured program, falling back to the built-in service.
    pub fn from_config(config: &ModelServiceConfig, catalog: &Path) -> std::io::Result<Self> {
        let command = match &config.program {
            Some(program) => Self::new(program).args(config.args.iter().cloned()),
            None => Self::self_hosted(catalog)?,
        };
        Ok(match &config.working_dir {
            Some(dir) => command.current_dir(dir),
            None => command,
        })
    }

    /// Spawn with stdout and stderr merged into one pipe, returned as the
    /// reader half.
    fn spawn(&self) -> std::io::Result<(Child, PipeReader)> {
        let (output, output_writer) = std::io::pipe()?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(output_writer.try_clone()?)
            .stderr(output_writer);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let child = command.spawn()?;
        // The parent's copies of the write end live in `command`; dropping it
        // lets the reader see EOF once the child exits.
        drop(command);
        Ok((child, output))
    }
}

impl std::fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

struct Lifecycle {
    state: ServiceState,
    artifact_count: u64,
    failure: Option<String>,
}

/// State shared with the handshake thread.
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    settled: Condvar,
    channel: Mutex<Option<LineProtocolChannel>>,
    child: Mutex<Option<Child>>,
    requests_sent: AtomicU64,
}

/// Owns the model service process and the only channel to it.
///
/// The state only moves forward (Starting→Ready|Failed, any→Terminated); a
/// failed service is never restarted by the supervisor. Dropping the
/// supervisor shuts the process down.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    timeouts: ServiceTimeouts,
}

impl ProcessSupervisor {
    fn starting(timeouts: ServiceTimeouts) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: ServiceState::Starting,
                    artifact_count: 0,
                    failure: None,
                }),
                settled: Condvar::new(),
                channel: Mutex::new(None),
                child: Mutex::new(None),
                requests_sent: AtomicU64::new(0),
            }),
            timeouts,
        }
    }

    /// Spawn the model service. Returns immediately in `Starting`; the
    /// handshake completes on a background thread.
    pub fn spawn(command: &ServiceCommand, timeouts: ServiceTimeouts) -> Self {
        let supervisor = Self::starting(timeouts);
        info!("[SUPERVISOR] Spawning model service: {command}");

        let (mut child, output) = match command.spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                supervisor
                    .shared
                    .mark_failed(format!("failed to spawn model service: {e}"));
                return supervisor;
            }
        };

        let stdin = child.stdin.take();
        *lock(&supervisor.shared.child) = Some(child);

        match stdin {
            Some(stdin) => {
                let lines = spawn_line_reader(output);
                supervisor.begin_handshake(stdin, lines);
            }
            None => {
                supervisor
                    .shared
                    .mark_failed("model service stdin was not captured".to_string());
                supervisor.shared.reap_child(timeouts.shutdown_grace);
            }
        }
        supervisor
    }

    /// Attach to an already-connected model service: `writer` receives
    /// request lines, `lines` yields its output. No process is owned.
    pub fn from_streams<W>(writer: W, lines: Receiver<String>, timeouts: ServiceTimeouts) -> Self
    where
        W: Write + Send + 'static,
    {
        let supervisor = Self::starting(timeouts);
        supervisor.begin_handshake(writer, lines);
        supervisor
    }

    fn begin_handshake<W>(&self, writer: W, lines: Receiver<String>)
    where
        W: Write + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let timeouts = self.timeouts;

        let spawned = thread::Builder::new()
            .name("model-service-handshake".to_string())
            .spawn(move || match await_handshake(&lines, timeouts.handshake) {
                Ok(artifacts) => {
                    let channel = LineProtocolChannel::new(writer, lines, timeouts.request);
                    shared.mark_ready(artifacts, channel);
                }
                Err(reason) => {
                    shared.mark_failed(reason);
                    shared.reap_child(timeouts.shutdown_grace);
                }
            });

        if let Err(e) = spawned {
            self.shared
                .mark_failed(format!("failed to start handshake thread: {e}"));
            self.shared.reap_child(timeouts.shutdown_grace);
        }
    }

    pub fn state(&self) -> ServiceState {
        lock(&self.shared.lifecycle).state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ServiceState::Ready
    }

    /// Artifact count announced in the handshake (0 until Ready).
    pub fn artifact_count(&self) -> u64 {
        lock(&self.shared.lifecycle).artifact_count
    }

    pub fn failure_reason(&self) -> Option<String> {
        lock(&self.shared.lifecycle).failure.clone()
    }

    /// Number of requests written to the service so far.
    pub fn requests_sent(&self) -> u64 {
        self.shared.requests_sent.load(Ordering::SeqCst)
    }

    /// Block until the handshake has resolved or `max` elapses, returning the
    /// state at that point.
    pub fn wait_until_settled(&self, max: Duration) -> ServiceState {
        let guard = lock(&self.shared.lifecycle);
        let (guard, _timeout) = self
            .shared
            .settled
            .wait_timeout_while(guard, max, |l| l.state == ServiceState::Starting)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.state
    }

    /// Send one request. The channel lock is held across the write and the
    /// read, so concurrent callers queue up instead of interleaving lines.
    pub fn send(&self, request: &ServiceRequest) -> Result<JsonObject, NoResponse> {
        if !self.is_ready() {
            return Err(NoResponse::NotReady);
        }
        let mut channel = lock(&self.shared.channel);
        let channel = channel.as_mut().ok_or(NoResponse::NotReady)?;

        self.shared.requests_sent.fetch_add(1, Ordering::SeqCst);
        let result = channel.send(request);
        if let Err(e) = &result {
            warn!("[SUPERVISOR] Request {request:?} got no response: {e}");
        }
        result
    }

    /// Stop the service: close its stdin, signal it to terminate, wait out
    /// the grace period, then force-kill. Safe to call in any state and more
    /// than once; never panics.
    pub fn shutdown(&self) {
        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if !lifecycle.state.can_transition_to(ServiceState::Terminated) {
                return;
            }
            info!("[SUPERVISOR] Shutting down model service (state: {:?})", lifecycle.state);
            lifecycle.state = ServiceState::Terminated;
            self.shared.settled.notify_all();
        }

        // Closing stdin lets a well-behaved service exit on EOF. A request in
        // flight keeps the channel locked; it is released once the process
        // dies and its output closes.
        if let Ok(mut channel) = self.shared.channel.try_lock() {
            channel.take();
        }
        self.shared.reap_child(self.timeouts.shutdown_grace);
        lock(&self.shared.channel).take();
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn mark_ready(&self, artifacts: u64, channel: LineProtocolChannel) {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.state.can_transition_to(ServiceState::Ready) {
            debug!("[SUPERVISOR] Ignoring late handshake (state: {:?})", lifecycle.state);
            return;
        }
        *lock(&self.channel) = Some(channel);
        lifecycle.state = ServiceState::Ready;
        lifecycle.artifact_count = artifacts;
        self.settled.notify_all();
        info!("[SUPERVISOR] Model service ready with {artifacts} artifacts");
    }

    fn mark_failed(&self, reason: String) {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.state.can_transition_to(ServiceState::Failed) {
            debug!("[SUPERVISOR] Ignoring failure after {:?}: {reason}", lifecycle.state);
            return;
        }
        error!("[SUPERVISOR] Model service failed to start: {reason}");
        lifecycle.state = ServiceState::Failed;
        lifecycle.failure = Some(reason);
        self.settled.notify_all();
    }

    fn reap_child(&self, grace: Duration) {
        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            terminate_child(&mut child, grace);
        }
    }
}

/// Read startup output until the handshake resolves or the budget runs out.
/// Returns the announced artifact count, or why startup failed.
fn await_handshake(lines: &Receiver<String>, timeout: Duration) -> Result<u64, String> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let line = match lines.recv_timeout(remaining) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                return Err(format!("no ready signal within {timeout:?}"));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err("model service exited before signalling ready".to_string());
            }
        };

        let Some(object) = parse_json_line(&line) else {
            debug!("[SUPERVISOR] startup: {line}");
            continue;
        };
        match classify_handshake(&object) {
            Some(Handshake::Ready { artifacts }) => return Ok(artifacts),
            Some(Handshake::Error(message)) => return Err(message),
            None => debug!("[SUPERVISOR] Ignoring startup object: {line}"),
        }
    }
}

fn terminate_child(child: &mut Child, grace: Duration) {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!("[SUPERVISOR] Model service (pid={pid}) already exited: {status}");
            return;
        }
        Ok(None) => {}
        Err(e) => warn!("[SUPERVISOR] Could not poll model service (pid={pid}): {e}"),
    }

    send_terminate(child);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                info!("[SUPERVISOR] Model service (pid={pid}) exited: {status}");
                return;
            }
            Ok(None) => thread::sleep(Duration::from_millis(25)),
            Err(e) => {
                warn!("[SUPERVISOR] Could not poll model service (pid={pid}): {e}");
                break;
            }
        }
    }

    warn!("[SUPERVISOR] Model service (pid={pid}) ignored terminate, killing");
    if let Err(e) = child.kill() {
        warn!("[SUPERVISOR] Failed to kill model service (pid={pid}): {e}");
    }
    if let Err(e) = child.wait() {
        warn!("[SUPERVISOR] Failed to reap model service (pid={pid}): {e}");
    }
}

#[cfg(not(windows))]
fn send_terminate(child: &Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            "[SUPERVISOR] SIGTERM to pid {pid} failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(windows)]
fn send_terminate(_child: &Child) {
    // No graceful signal on Windows; the closed stdin is the request to exit.
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
