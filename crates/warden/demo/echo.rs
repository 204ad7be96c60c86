//! Demo module: records what the supervisor asks of it.
//!
//! Arguments (all optional):
//!   --exit-code N          value returned from `run` (default 0)
//!   --fail-times N         return 1 for the first N runs, counted in --counter
//!   --counter PATH         file holding the number of runs so far
//!   --record PATH          append `run`, `command <line>` and `stop` lines here
//!   --wait                 block in `run` until stopped
//!   --panic                panic in `run`
//!
//! The command `upgrade` asks the supervisor for an update check.
//! `WARDEN_ECHO_OMIT=<entry>` leaves that entry out of the handshake.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use warden::{HostedModule, UpdateNotifier};

#[derive(Debug, Default)]
struct Options {
    exit_code: i32,
    fail_times: u32,
    counter: Option<PathBuf>,
    record: Option<PathBuf>,
    wait: bool,
    panic: bool,
}

impl Options {
    fn parse(args: &[String]) -> Self {
        let mut options = Options::default();
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--exit-code" => {
                    options.exit_code = args.next().and_then(|v| v.parse().ok()).unwrap_or(0)
                }
                "--fail-times" => {
                    options.fail_times = args.next().and_then(|v| v.parse().ok()).unwrap_or(0)
                }
                "--counter" => options.counter = args.next().map(PathBuf::from),
                "--record" => options.record = args.next().map(PathBuf::from),
                "--wait" => options.wait = true,
                "--panic" => options.panic = true,
                other => eprintln!("warden-echo: ignoring argument {other}"),
            }
        }
        options
    }
}

struct Echo {
    notifier: UpdateNotifier,
    record: std::sync::Mutex<Option<PathBuf>>,
    stopped: AtomicBool,
}

impl Echo {
    fn new(notifier: UpdateNotifier) -> Self {
        Self {
            notifier,
            record: std::sync::Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    fn record(&self, line: &str) {
        let record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        let Some(path) = record.as_ref() else {
            return;
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = written {
            eprintln!("warden-echo: cannot record to {}: {e}", path.display());
        }
    }

    /// Bump the run counter, returning the number of earlier runs.
    fn count_run(path: &PathBuf) -> u32 {
        let runs = fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        if let Err(e) = fs::write(path, (runs + 1).to_string()) {
            eprintln!("warden-echo: cannot update {}: {e}", path.display());
        }
        runs
    }
}

impl HostedModule for Echo {
    fn run(&self, args: Vec<String>) -> i32 {
        let options = Options::parse(&args);
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = options.record.clone();
        self.record("run");
        println!("warden-echo {} running", env!("CARGO_PKG_VERSION"));

        if options.panic {
            panic!("asked to panic");
        }
        if let Some(counter) = &options.counter
            && Self::count_run(counter) < options.fail_times
        {
            return 1;
        }
        if options.wait {
            while !self.stopped.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(10));
            }
        }
        options.exit_code
    }

    fn handle_command(&self, command: &str) {
        self.record(&format!("command {command}"));
        if command == "upgrade" {
            self.notifier.request_update();
        }
    }

    fn stop(&self) {
        self.record("stop");
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn entries(&self) -> Vec<&'static str> {
        let omit = std::env::var("WARDEN_ECHO_OMIT").unwrap_or_default();
        warden::REQUIRED_ENTRIES
            .into_iter()
            .filter(|entry| *entry != omit)
            .collect()
    }
}

warden::hosted_main!(Echo::new);
