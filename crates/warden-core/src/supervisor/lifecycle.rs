use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::host::{ModuleHandle, ModuleHost, UpdateHook};
use crate::http::Transport;
use crate::release::{InstallError, InstallOutcome, IntegrityError, ReleaseInstaller};

use super::state::{ModuleState, StateCell};
use super::trigger::UpdateTrigger;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("failed to start {name} thread: {source}")]
    Thread {
        name: &'static str,
        source: std::io::Error,
    },

    #[error("supervisor has been shut down")]
    ShutDown,
}

/// Keeps one hosted module running and swaps it for new releases.
///
/// Threads: a run thread that loads and invokes the module, restarting it
/// after crashes, and an update watcher that runs one update cycle per
/// trigger. An update cycle stops the module, waits for its process to exit,
/// installs, then relaunches.
pub struct Supervisor {
    inner: Arc<Inner>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: Config,
    installer: ReleaseInstaller,
    host: ModuleHost,
    trigger: UpdateTrigger,
    state: StateCell,
    args: Mutex<Vec<String>>,
    active: Mutex<Option<Arc<ModuleHandle>>>,
    run_thread: Mutex<Option<JoinHandle<()>>>,
    /// Serializes update cycles and shutdown.
    cycle: Mutex<()>,
    /// Set while a cycle or shutdown is stopping the module.
    stopping: AtomicBool,
    shut_down: AtomicBool,
    stop_timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Supervisor {
    /// Build a supervisor, loading the release verification key from `config`.
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        host: ModuleHost,
    ) -> Result<Self, IntegrityError> {
        let installer = ReleaseInstaller::from_config(transport, &config)?;
        Ok(Self::with_installer(config, installer, host))
    }

    pub fn with_installer(config: Config, installer: ReleaseInstaller, host: ModuleHost) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                installer,
                host,
                trigger: UpdateTrigger::new(),
                state: StateCell::default(),
                args: Mutex::new(Vec::new()),
                active: Mutex::new(None),
                run_thread: Mutex::new(None),
                cycle: Mutex::new(()),
                stopping: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                stop_timeout: Duration::from_secs(10),
            }),
            watcher: Mutex::new(None),
        }
    }

    /// How long a stop request may take before the module is killed.
    ///
    /// Only takes effect before [`Supervisor::start`].
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.stop_timeout = timeout;
        }
        self
    }

    /// Check for an update once, then start the update watcher and the module.
    ///
    /// `args` are passed to every invocation of the module.
    pub fn start(&self, args: Vec<String>) -> Result<InstallOutcome, SupervisorError> {
        let _cycle = lock(&self.inner.cycle);
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShutDown);
        }
        *lock(&self.inner.args) = args;

        let outcome = self.inner.installer.check_and_install()?;

        let inner = self.inner.clone();
        let watcher = thread::Builder::new()
            .name("warden-update-watcher".to_string())
            .spawn(move || inner.watch_updates())
            .map_err(|source| SupervisorError::Thread {
                name: "update watcher",
                source,
            })?;
        *lock(&self.watcher) = Some(watcher);

        Inner::launch(&self.inner)?;
        Ok(outcome)
    }

    /// Ask the update watcher for a cycle. Never blocks.
    pub fn request_update(&self) -> bool {
        self.inner.trigger.fire()
    }

    /// Run a full update cycle on the calling thread.
    ///
    /// Returns once the module is relaunched, or left down after a fatal
    /// install error.
    pub fn update_now(&self) -> Result<InstallOutcome, SupervisorError> {
        self.inner.run_cycle()
    }

    /// Pass an operator line to the running module.
    ///
    /// Returns `false` when no module is loaded or it could not be reached.
    pub fn forward_command(&self, line: &str) -> bool {
        let Some(handle) = lock(&self.inner.active).clone() else {
            return false;
        };
        match handle.notify(line) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("could not forward command to module: {}", e);
                false
            }
        }
    }

    pub fn state(&self) -> ModuleState {
        self.inner.state.get()
    }

    /// Version reported by the running module, if any.
    pub fn module_version(&self) -> Option<crate::release::VersionTuple> {
        lock(&self.inner.active).as_ref().and_then(|h| h.version())
    }

    /// Wait until no module is loaded or starting.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.state.wait_for(ModuleState::Idle, timeout)
    }

    /// Wait until the module is running.
    pub fn wait_running(&self, timeout: Duration) -> bool {
        self.inner.state.wait_for(ModuleState::Running, timeout)
    }

    /// Stop and unload the module and end all supervisor threads.
    pub fn shutdown(&self) {
        {
            let _cycle = lock(&self.inner.cycle);
            if self.inner.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
            tracing::info!("shutting down");
            self.inner.stop_module();
        }

        self.inner.trigger.fire();
        if let Some(watcher) = lock(&self.watcher).take()
            && watcher.join().is_err()
        {
            tracing::error!("update watcher panicked");
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn watch_updates(self: Arc<Self>) {
        loop {
            self.trigger.wait();
            if self.shut_down.load(Ordering::SeqCst) {
                break;
            }
            match self.run_cycle() {
                Ok(outcome) => tracing::info!(?outcome, "update cycle finished"),
                Err(SupervisorError::ShutDown) => break,
                Err(e) => tracing::error!("update cycle failed: {}", e),
            }
        }
        tracing::debug!("update watcher stopped");
    }

    fn run_cycle(self: &Arc<Self>) -> Result<InstallOutcome, SupervisorError> {
        let _cycle = lock(&self.cycle);
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShutDown);
        }

        tracing::info!("starting update cycle");
        self.stop_module();

        let outcome = self.installer.check_and_install();
        self.stopping.store(false, Ordering::SeqCst);
        match outcome {
            Ok(outcome) => {
                Self::launch(self)?;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    "update failed, the module stays down until the next update: {}",
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Stop the module and join the run thread. Caller holds the cycle lock.
    fn stop_module(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        let active = {
            let active = lock(&self.active);
            if active.is_some() {
                self.state.set(ModuleState::Stopping);
            }
            active.clone()
        };
        if let Some(handle) = &active {
            if let Err(e) = handle.request_stop() {
                tracing::warn!("could not ask module to stop: {}", e);
            }
            if !self.state.wait_for(ModuleState::Idle, self.stop_timeout) {
                tracing::warn!(
                    timeout = ?self.stop_timeout,
                    "module ignored the stop request, unloading it"
                );
                handle.unload();
            }
        }
        drop(active);

        if let Some(run_thread) = lock(&self.run_thread).take()
            && run_thread.join().is_err()
        {
            tracing::error!("run thread panicked");
        }
        self.state.set(ModuleState::Idle);
    }

    fn launch(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let args = lock(&self.args).clone();
        self.state.set(ModuleState::Loading);

        let inner = self.clone();
        let run_thread = thread::Builder::new()
            .name("warden-run".to_string())
            .spawn(move || inner.run_loop(args))
            .map_err(|source| {
                self.state.set(ModuleState::Idle);
                SupervisorError::Thread {
                    name: "run",
                    source,
                }
            })?;
        *lock(&self.run_thread) = Some(run_thread);
        Ok(())
    }

    fn run_loop(&self, args: Vec<String>) {
        let trigger = self.trigger.handle();
        let notifier: UpdateHook = Arc::new(move || {
            trigger.fire();
        });

        while !self.stopping.load(Ordering::SeqCst) {
            self.state.set(ModuleState::Loading);
            let handle = match self.host.load(&self.config.module_path, notifier.clone()) {
                Ok(handle) => Arc::new(handle),
                Err(e) => {
                    tracing::error!("module not started, waiting for the next update: {}", e);
                    break;
                }
            };

            // Publishing the handle and sending `Run` happen under the active
            // lock, so a stop cycle either sees no module or stops a started one.
            let started = {
                let mut active = lock(&self.active);
                if self.stopping.load(Ordering::SeqCst) {
                    break;
                }
                let started = handle.begin_run(&args);
                if started.is_ok() {
                    *active = Some(handle.clone());
                    self.state.set(ModuleState::Running);
                }
                started
            };

            let result = started.and_then(|()| handle.wait_exit());
            lock(&self.active).take();
            handle.unload();

            let stopping = self.stopping.load(Ordering::SeqCst);
            match result {
                Ok(0) => {
                    tracing::info!("module exited normally");
                    break;
                }
                Ok(code) if stopping => {
                    tracing::info!(code, "module stopped");
                }
                Ok(code) => {
                    tracing::warn!(code, "module crashed, restarting it");
                }
                Err(e) if stopping => {
                    tracing::info!("module stopped: {}", e);
                }
                Err(e) => {
                    tracing::error!("module failed, restarting it: {}", e);
                }
            }
        }

        self.state.set(ModuleState::Idle);
    }
}
