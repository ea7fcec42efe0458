//! Key generation.
//!
//! This module creates a fresh primary key when no existing key is
//! accepted. The key is certify-only and never expires; the signing
//! subkey is added afterwards by refinement.

use log::info;

use crate::error::{Error, Result};
use crate::internal::policy::RECOMMENDED_CURVE;
use crate::keyring::Keyring;
use crate::types::KeyRecord;

/// Generate a new certify-only primary key.
///
/// # Arguments
/// * `keyring` - The real keyring
/// * `identity` - Name part of the user ID
/// * `email` - Email part of the user ID
///
/// # Returns
/// The new key as listed in the keyring. It has no subkeys yet.
///
/// # Errors
/// Returns [`Error::Invariant`] unless exactly one new key appeared in the
/// keyring.
///
/// # Example
/// ```ignore
/// let key = generate_key(&keyring, "alice", "alice@users.noreply.example.com")?;
/// assert!(key.subkeys.is_empty());
/// ```
pub fn generate_key(keyring: &Keyring<'_>, identity: &str, email: &str) -> Result<KeyRecord> {
    info!("Generating a new GPG key...");
    let known = keyring.key_ids()?;
    keyring
        .gpg()
        .generate_key(&format!("{} <{}>", identity, email), RECOMMENDED_CURVE)?;

    let mut new_keys: Vec<KeyRecord> = keyring
        .secret_keys()?
        .into_iter()
        .filter(|k| !known.contains(&k.key_id))
        .collect();
    match new_keys.len() {
        1 => Ok(new_keys.remove(0)),
        n => Err(Error::Invariant(format!(
            "expected exactly one generated key, found {}",
            n
        ))),
    }
}
