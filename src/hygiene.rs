//! Secret key hygiene.
//!
//! After a run only the signing subkey stays usable on this machine. The
//! primary secret key is shown once for an offline backup, together with
//! a revocation certificate, and then removed from the keyring's private
//! key store.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use secrecy::ExposeSecret;

use crate::error::{Error, Result};
use crate::git::GitConfig;
use crate::gpg::GnuPg;
use crate::prompt::Console;
use crate::refine::RefinedKey;
use crate::types::{SigningKeyRef, SubkeyRecord};

const ZEROS: [u8; 4096] = [0; 4096];

/// Location of the private key file for `keygrip` in `home`.
pub fn private_key_path(home: &Path, keygrip: &str) -> PathBuf {
    home.join("private-keys-v1.d").join(format!("{}.key", keygrip))
}

/// Print the backup material and delete the primary secret key.
///
/// The secret key is printed if refinement changed it or the key is new;
/// a revocation certificate is printed whenever the primary secret key is
/// still available.
///
/// # Arguments
/// * `gpg` - The keyring tool
/// * `console` - Where backups are printed
/// * `refined` - The finalized key
/// * `is_new` - True if the key was generated in this run
pub fn backup_and_destroy(
    gpg: &dyn GnuPg,
    console: &mut Console,
    refined: &RefinedKey,
    is_new: bool,
) -> Result<()> {
    let key = &refined.key;
    if refined.secret_modified || is_new {
        let secret = gpg.export_secret_key(&key.fingerprint)?;
        console.print_block(
            "Save the secret primary key to a secure location. This is removed from keyring automatically.",
            secret.expose_secret(),
        )?;
    }

    if key.is_secret_key_available {
        let certificate = gpg.generate_revocation(&key.fingerprint)?;
        if certificate.trim().is_empty() {
            return Err(Error::Invariant(
                "Failed to generate revocation certificate".to_string(),
            ));
        }
        console.print_block(
            "Save the revocation certificate to a secure location.",
            &certificate,
        )?;
    }

    // primary key and subkeys have different keygrips
    let path = private_key_path(gpg.home_dir(), &key.keygrip);
    match secure_delete(&path) {
        Ok(true) => info!("Deleted private primary key for security."),
        Ok(false) => info!("Private primary key was already removed."),
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
    Ok(())
}

/// Overwrite a file with zeros, flush it to disk and remove it.
///
/// # Returns
/// False if the file did not exist.
pub fn secure_delete(path: &Path) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let mut remaining = file.metadata()?.len();
    while remaining > 0 {
        let chunk = remaining.min(ZEROS.len() as u64) as usize;
        file.write_all(&ZEROS[..chunk])?;
        remaining -= chunk as u64;
    }
    file.sync_all()?;
    drop(file);
    fs::remove_file(path)?;
    Ok(true)
}

/// Point git at `subkey`.
///
/// The trailing `!` makes gpg use exactly this subkey instead of resolving
/// the primary key, whose secret part is gone.
pub fn configure_signing_key(git: &dyn GitConfig, subkey: &SubkeyRecord) -> Result<String> {
    let value = SigningKeyRef::pinned(&subkey.fingerprint);
    git.set_signing_key(&value)?;
    info!("Configured git to sign with {}", value);
    Ok(value)
}
