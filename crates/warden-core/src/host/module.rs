use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::release::VersionTuple;

use super::error::{LoadError, RuntimeError};
use super::protocol::{
    ENTRY_COMMAND, ENTRY_NOTIFIER, ENTRY_RUN, ENTRY_STOP, HostMessage, IpcError, ModuleMessage,
    PROTOCOL_VERSION, read_message, write_message,
};

/// Callback raised when the module asks for an update check.
pub type UpdateHook = Arc<dyn Fn() + Send + Sync>;

type Event = Result<ModuleMessage, IpcError>;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Loads hosted modules as child processes.
#[derive(Debug, Clone)]
pub struct ModuleHost {
    handshake_timeout: Duration,
    grace_period: Duration,
    env: Vec<(String, String)>,
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(2),
            env: Vec::new(),
        }
    }
}

impl ModuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a started module has to send its `Hello`.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How long an unloading module has to exit before it is killed.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set an environment variable for every module process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Start the module at `path` and bind its entry points.
    ///
    /// `notifier` is called from the channel reader thread whenever the
    /// module raises its update notifier.
    pub fn load(&self, path: &Path, notifier: UpdateHook) -> Result<ModuleHandle, LoadError> {
        self.try_load(path, notifier)
            .inspect_err(|e| tracing::error!(path = %path.display(), "{}", e))
    }

    fn try_load(&self, path: &Path, notifier: UpdateHook) -> Result<ModuleHandle, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let spawn_err = |source| LoadError::Spawn {
            path: path.to_path_buf(),
            source,
        };

        let mut child = Command::new(path)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_err)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_err(std::io::Error::other("module stdio was not piped")));
        };

        let (tx, rx) = mpsc::channel();
        let reader = thread::Builder::new()
            .name("warden-module-reader".to_string())
            .spawn(move || read_events(BufReader::new(stdout), tx, notifier));
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_err(e));
        }

        let mut handle = ModuleHandle {
            path: path.to_path_buf(),
            version: None,
            pid: child.id(),
            writer: Mutex::new(BufWriter::new(stdin)),
            child: Mutex::new(child),
            events: Mutex::new(rx),
            grace_period: self.grace_period,
            unloaded: AtomicBool::new(false),
        };

        let not_a_module = |reason: String| LoadError::NotAModule {
            path: path.to_path_buf(),
            reason,
        };
        let received = handle.lock_events().recv_timeout(self.handshake_timeout);
        let hello = match received {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return Err(not_a_module(e.to_string())),
            Err(RecvTimeoutError::Timeout) => {
                return Err(not_a_module(format!(
                    "no handshake within {:?}",
                    self.handshake_timeout
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(not_a_module("exited without handshake".to_string()));
            }
        };

        let (protocol, version, entries) = match hello {
            ModuleMessage::Hello {
                protocol,
                version,
                entries,
            } => (protocol, version, entries),
            other => return Err(not_a_module(format!("unexpected {other:?} before handshake"))),
        };
        if protocol != PROTOCOL_VERSION {
            return Err(LoadError::ProtocolMismatch {
                expected: PROTOCOL_VERSION,
                found: protocol,
            });
        }
        check_entries(&entries)?;

        handle.version = version.parse().ok();
        tracing::info!(
            path = %path.display(),
            pid = handle.pid,
            version = %version,
            "module loaded"
        );
        Ok(handle)
    }
}

/// Check that every required entry point is declared.
pub fn check_entries(entries: &[String]) -> Result<(), LoadError> {
    let has = |name: &str| entries.iter().any(|e| e == name);
    if !has(ENTRY_NOTIFIER) {
        return Err(LoadError::MissingConstructor);
    }
    if !has(ENTRY_RUN) {
        return Err(LoadError::MissingMain);
    }
    if !has(ENTRY_COMMAND) {
        return Err(LoadError::MissingCommandHandler);
    }
    if !has(ENTRY_STOP) {
        return Err(LoadError::MissingStopHandler);
    }
    Ok(())
}

fn read_events(mut stdout: BufReader<ChildStdout>, tx: Sender<Event>, notifier: UpdateHook) {
    loop {
        match read_message::<_, ModuleMessage>(&mut stdout) {
            Ok(ModuleMessage::UpdateRequested) => {
                tracing::debug!("module requested an update");
                notifier();
            }
            Ok(message) => {
                if tx.send(Ok(message)).is_err() {
                    break;
                }
            }
            Err(IpcError::Closed) => break,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

/// A loaded module process.
///
/// All methods take `&self`; `notify` and `request_stop` may be called from
/// other threads while `invoke` blocks. Dropping the handle unloads it.
pub struct ModuleHandle {
    path: PathBuf,
    version: Option<VersionTuple>,
    pid: u32,
    writer: Mutex<BufWriter<ChildStdin>>,
    child: Mutex<Child>,
    events: Mutex<Receiver<Event>>,
    grace_period: Duration,
    unloaded: AtomicBool,
}

impl ModuleHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version the module reported in its handshake.
    pub fn version(&self) -> Option<VersionTuple> {
        self.version
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Run the module's main entry point and block until it returns.
    pub fn invoke(&self, args: &[String]) -> Result<i32, RuntimeError> {
        self.begin_run(args)?;
        self.wait_exit()
    }

    /// Send `Run` without waiting for the workload to return.
    ///
    /// Pair with [`ModuleHandle::wait_exit`].
    pub fn begin_run(&self, args: &[String]) -> Result<(), RuntimeError> {
        self.send(&HostMessage::Run {
            args: args.to_vec(),
        })
        .map_err(|e| match self.exit_status(Duration::ZERO) {
            Some(status) => RuntimeError::ProcessDied {
                status: status.to_string(),
            },
            None => e.into(),
        })
    }

    /// Block until the workload started by [`ModuleHandle::begin_run`] returns.
    pub fn wait_exit(&self) -> Result<i32, RuntimeError> {
        let events = self.lock_events();
        loop {
            match events.recv() {
                Ok(Ok(ModuleMessage::Exited { code })) => return Ok(code),
                Ok(Ok(ModuleMessage::Faulted { message })) => {
                    return Err(RuntimeError::Panicked(message));
                }
                Ok(Ok(other)) => tracing::debug!(?other, "ignoring unexpected module message"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    let status = self
                        .exit_status(self.grace_period)
                        .map_or_else(|| "still running".to_string(), |s| s.to_string());
                    return Err(RuntimeError::ProcessDied { status });
                }
            }
        }
    }

    /// Deliver an operator command to the module's command handler.
    pub fn notify(&self, line: &str) -> Result<(), RuntimeError> {
        self.send(&HostMessage::Command {
            line: line.to_string(),
        })
        .map_err(Into::into)
    }

    /// Ask the running workload to return from `run`.
    pub fn request_stop(&self) -> Result<(), RuntimeError> {
        self.send(&HostMessage::Stop).map_err(Into::into)
    }

    /// Whether the module process is still running.
    pub fn is_alive(&self) -> bool {
        matches!(self.lock_child().try_wait(), Ok(None))
    }

    /// Shut the module process down, killing it after the grace period.
    ///
    /// Returns once the process has exited. Later calls do nothing.
    pub fn unload(&self) {
        if self.unloaded.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.send(&HostMessage::Shutdown);
        if self.exit_status(self.grace_period).is_none() {
            tracing::warn!(pid = self.pid, "module did not exit in time, killing it");
            let mut child = self.lock_child();
            if let Err(e) = child.kill() {
                tracing::warn!("failed to kill module: {}", e);
            }
            let _ = child.wait();
        }
        tracing::info!(path = %self.path.display(), pid = self.pid, "module unloaded");
    }

    fn send(&self, message: &HostMessage) -> Result<(), IpcError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_message(&mut *writer, message)
    }

    /// Poll for the exit status for up to `timeout`.
    fn exit_status(&self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.lock_child().try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("failed to query module status: {}", e);
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, Receiver<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("path", &self.path)
            .field("pid", &self.pid)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
