//! Sign a release for publishing.

use std::path::Path;

use warden_core::release::sign_release;
use warden_core::{Config, Error};

pub fn execute(config_path: &Path, sign_dir: &Path, secret: &Path) -> anyhow::Result<()> {
    let config = Config::load_or_init(config_path).map_err(Error::from)?;
    let signed = sign_release(
        sign_dir,
        secret,
        config.signature_hash,
        config.signature_padding,
    )
    .map_err(Error::from)?;

    println!(
        "Signed version {} with {}/{:?}: {}",
        signed.version,
        config.signature_hash,
        config.signature_padding,
        signed.signature_path.display()
    );
    Ok(())
}
