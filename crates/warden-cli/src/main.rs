//! Warden CLI - self-updating process supervisor.

mod run;
mod sign;

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Self-updating process supervisor")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (created with defaults if missing)
    #[arg(short, long, default_value = warden_core::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Sign a release instead of supervising
    #[arg(long)]
    sign: bool,

    /// Directory holding binaries.zip and version.txt to sign
    #[arg(long, default_value = "sign")]
    sign_dir: PathBuf,

    /// Private key used to sign
    #[arg(long, default_value = "secret.pem")]
    secret: PathBuf,

    /// Arguments passed to the module on every start
    #[arg(last = true)]
    module_args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Helper to format warden-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(warden_err) = err.downcast_ref::<warden_core::Error>() {
            anyhow::anyhow!("{}", warden_err.with_hint())
        } else {
            err
        }
    };

    if cli.sign {
        sign::execute(&cli.config, &cli.sign_dir, &cli.secret).map_err(format_error)?;
    } else {
        run::execute(&cli.config, cli.module_args).map_err(format_error)?;
    }

    Ok(())
}
