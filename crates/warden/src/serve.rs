//! Module side of the supervisor channel.

use std::any::Any;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use warden_core::host::protocol::{
    HostMessage, IpcError, ModuleMessage, PROTOCOL_VERSION, read_message, write_message,
};

use crate::HostedModule;

type Channel = Arc<Mutex<Box<dyn Write + Send>>>;

fn send(channel: &Channel, message: &ModuleMessage) -> Result<(), IpcError> {
    let mut out = channel.lock().unwrap_or_else(PoisonError::into_inner);
    write_message(&mut *out, message)
}

/// Lets a module ask the supervisor for an update check.
///
/// The supervisor stops the module before installing, so expect `stop` to
/// be called soon after a request.
#[derive(Clone)]
pub struct UpdateNotifier {
    channel: Channel,
}

impl UpdateNotifier {
    /// Returns `false` if the supervisor could not be reached.
    pub fn request_update(&self) -> bool {
        send(&self.channel, &ModuleMessage::UpdateRequested)
            .inspect_err(|e| tracing::error!("failed to request update: {}", e))
            .is_ok()
    }
}

impl std::fmt::Debug for UpdateNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateNotifier").finish_non_exhaustive()
    }
}

/// Serve the supervisor over this process's stdin and stdout.
///
/// Stdout is taken over for the channel. On Unix file descriptor 1 points at
/// stderr afterwards, so `println!` cannot reach the channel. Other platforms
/// keep sharing stdout with the channel and the module must not write to it.
/// Returns the process exit code.
pub fn serve<M, F>(version: &str, make: F) -> i32
where
    M: HostedModule,
    F: FnOnce(UpdateNotifier) -> M,
{
    let output = match take_stdout() {
        Ok(output) => output,
        Err(e) => {
            eprintln!("warden: cannot set up the supervisor channel: {e}");
            return 1;
        }
    };
    serve_io(version, io::stdin().lock(), output, make)
}

#[cfg(unix)]
fn take_stdout() -> io::Result<Box<dyn Write + Send>> {
    use std::os::fd::FromRawFd;

    io::stdout().flush()?;
    // SAFETY: dup/dup2 only operate on descriptors this process owns; the
    // duplicated descriptor is handed to exactly one `File`.
    unsafe {
        let channel = libc::dup(libc::STDOUT_FILENO);
        if channel < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) < 0 {
            let err = io::Error::last_os_error();
            libc::close(channel);
            return Err(err);
        }
        Ok(Box::new(io::BufWriter::new(std::fs::File::from_raw_fd(
            channel,
        ))))
    }
}

#[cfg(not(unix))]
fn take_stdout() -> io::Result<Box<dyn Write + Send>> {
    tracing::warn!("stdout is shared with the supervisor channel, do not print to it");
    Ok(Box::new(io::stdout()))
}

/// Serve the supervisor over arbitrary streams.
///
/// Sends the handshake, then runs `Run` on a worker thread and dispatches
/// `Command` and `Stop` on the calling thread. Returns on `Shutdown` or when
/// `input` closes, without waiting for a still running `run`.
pub fn serve_io<M, F, R, W>(version: &str, mut input: R, output: W, make: F) -> i32
where
    M: HostedModule,
    F: FnOnce(UpdateNotifier) -> M,
    R: Read,
    W: Write + Send + 'static,
{
    let channel: Channel = Arc::new(Mutex::new(Box::new(output)));
    let module = Arc::new(make(UpdateNotifier {
        channel: channel.clone(),
    }));

    let hello = ModuleMessage::Hello {
        protocol: PROTOCOL_VERSION,
        version: version.to_string(),
        entries: module.entries().into_iter().map(String::from).collect(),
    };
    if let Err(e) = send(&channel, &hello) {
        tracing::error!("handshake failed: {}", e);
        return 1;
    }

    let running = Arc::new(AtomicBool::new(false));
    loop {
        match read_message::<_, HostMessage>(&mut input) {
            Ok(HostMessage::Run { args }) => {
                if running.swap(true, Ordering::SeqCst) {
                    tracing::warn!("module is already running, ignoring run request");
                    continue;
                }
                spawn_run(module.clone(), channel.clone(), running.clone(), args);
            }
            Ok(HostMessage::Command { line }) => {
                guarded("command handler", || module.handle_command(&line));
            }
            Ok(HostMessage::Stop) => guarded("stop handler", || module.stop()),
            Ok(HostMessage::Shutdown) | Err(IpcError::Closed) => return 0,
            Err(e) => {
                tracing::error!("supervisor channel failed: {}", e);
                return 1;
            }
        }
    }
}

/// Run the module on its own thread. `running` is cleared before the exit is
/// reported, so the host may send the next `Run` as soon as it sees it.
fn spawn_run<M: HostedModule>(
    module: Arc<M>,
    channel: Channel,
    running: Arc<AtomicBool>,
    args: Vec<String>,
) {
    let report = channel.clone();
    let flag = running.clone();
    let spawned = thread::Builder::new()
        .name("warden-module-run".to_string())
        .spawn(move || {
            let message = match panic::catch_unwind(AssertUnwindSafe(|| module.run(args))) {
                Ok(code) => ModuleMessage::Exited { code },
                Err(payload) => ModuleMessage::Faulted {
                    message: panic_message(payload.as_ref()),
                },
            };
            flag.store(false, Ordering::SeqCst);
            if let Err(e) = send(&channel, &message) {
                tracing::error!("failed to report module exit: {}", e);
            }
        });

    if let Err(e) = spawned {
        running.store(false, Ordering::SeqCst);
        let message = ModuleMessage::Faulted {
            message: format!("failed to start run thread: {e}"),
        };
        if let Err(e) = send(&report, &message) {
            tracing::error!("failed to report run thread failure: {}", e);
        }
    }
}

fn guarded(what: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!("{} panicked: {}", what, panic_message(payload.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
