//! Supervise the configured module.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use warden_core::supervisor::console::{ConsoleExit, HELP_TEXT, run_console};
use warden_core::{Config, DeviceAuthFlow, Error, HttpClient, ModuleHost, Supervisor};

/// Authenticate if needed, start the supervisor and serve the console.
pub fn execute(config_path: &Path, module_args: Vec<String>) -> anyhow::Result<()> {
    let mut config = Config::load_or_init(config_path).map_err(Error::from)?;
    let transport = Arc::new(HttpClient::new(config.current_auth.as_ref()).map_err(Error::from)?);

    if config.current_auth.is_none() {
        let token = DeviceAuthFlow::from_config(transport.as_ref(), &config)
            .authenticate(&mut io::stdout())
            .map_err(Error::from)?;
        config.current_auth = Some(token);
        config.save(config_path).map_err(Error::from)?;
        tracing::info!(path = %config_path.display(), "saved access token");
    }

    config.validate(config_path).map_err(Error::from)?;

    let supervisor = Supervisor::new(config, transport, ModuleHost::new()).map_err(Error::from)?;
    let outcome = supervisor.start(module_args).map_err(Error::from)?;
    tracing::info!(?outcome, "startup update check finished");
    println!("{HELP_TEXT}");

    match run_console(&supervisor, io::stdin().lock(), &mut io::stdout()).map_err(Error::from)? {
        ConsoleExit::Quit => {
            supervisor.shutdown();
            Ok(())
        }
        ConsoleExit::EndOfInput => {
            tracing::info!("console input closed, supervising without it");
            loop {
                thread::park();
            }
        }
    }
}
