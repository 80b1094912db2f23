//! Key files: the master secret for hop MACs and the AS signing key.
//!
//! Both are stored as hex, created with mode 0600 on first run.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

use beacon_core::crypto::{generate_master_secret, HopKey, SigningIdentity};

pub fn load_or_create_hop_key(path: &Path) -> Result<HopKey> {
    let secret = match read_secret(path)? {
        Some(secret) => secret,
        None => {
            let secret = generate_master_secret();
            write_secret(path, &secret[..])?;
            tracing::info!(path = %path.display(), "generated master secret");
            Zeroizing::new(secret.to_vec())
        }
    };
    HopKey::derive(&secret).with_context(|| format!("master secret in {}", path.display()))
}

pub fn load_or_create_signing_identity(path: &Path) -> Result<SigningIdentity> {
    match read_secret(path)? {
        Some(secret) => {
            if secret.len() != 32 {
                bail!("signing key in {} has {} bytes, expected 32", path.display(), secret.len());
            }
            let mut bytes = Zeroizing::new([0u8; 32]);
            bytes.copy_from_slice(&secret);
            Ok(SigningIdentity::from_secret(*bytes))
        }
        None => {
            let identity = SigningIdentity::generate();
            write_secret(path, &identity.secret_bytes()[..])?;
            tracing::info!(path = %path.display(), "generated signing key");
            Ok(identity)
        }
    }
}

fn read_secret(path: &Path) -> Result<Option<Zeroizing<Vec<u8>>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = Zeroizing::new(
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?,
    );
    let bytes = hex::decode(text.trim()).with_context(|| format!("{} is not hex", path.display()))?;
    Ok(Some(Zeroizing::new(bytes)))
}

fn write_secret(path: &Path, secret: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = Zeroizing::new(hex::encode(secret));

    // The file is private from the moment it exists.
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
