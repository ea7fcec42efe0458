//! Publishing the signing key and revoking superseded ones.
//!
//! The finalized public key replaces its remote registration when the two
//! differ. Other registered keys are then offered for revocation one by
//! one; the sweep stops at the first key the user keeps or cannot revoke.

use log::{info, warn};

use crate::error::Result;
use crate::import::{import_secret_key, require};
use crate::internal::trim_armor;
use crate::keyring::Keyring;
use crate::prompt::{Console, PastedBlock, PUBLIC_KEY_MARKERS};
use crate::remote::{active_keys, RemoteKeyStore};
use crate::types::{KeyRecord, RemoteKey};

/// Upload `key` unless the remote already holds the same public key.
///
/// # Arguments
/// * `keyring` - The real keyring
/// * `remote` - The remote key registry
/// * `key` - The finalized key
/// * `registered` - The remote registration matched during selection
/// * `title` - Title for the uploaded key
///
/// # Returns
/// True if the key was uploaded.
pub fn publish_key(
    keyring: &Keyring<'_>,
    remote: &dyn RemoteKeyStore,
    key: &KeyRecord,
    registered: Option<&RemoteKey>,
    title: &str,
) -> Result<bool> {
    let armored = keyring.gpg().export_public_key(&key.fingerprint)?;
    let armored = armored.trim();
    // the API appends a trailing blank line to the stored key
    let unchanged = registered
        .and_then(|r| r.raw_key.as_deref())
        .is_some_and(|raw| trim_armor(raw) == trim_armor(armored));
    if unchanged {
        info!("Key {} is already registered", key.key_id);
        return Ok(false);
    }

    // the remote refuses two keys with the same key id
    let mut stale: Vec<u64> = registered.map(|r| r.id).into_iter().collect();
    stale.extend(
        remote
            .list_keys()?
            .into_iter()
            .filter(|r| r.key_id.eq_ignore_ascii_case(&key.key_id))
            .map(|r| r.id),
    );
    stale.sort_unstable();
    stale.dedup();
    for id in stale {
        remote.delete_key(id)?;
    }
    remote.add_key(title, armored)?;
    info!("Registered key {} to the remote account", key.key_id);
    Ok(true)
}

/// How the secret needed to revoke a key was recovered.
enum Recovery {
    /// The primary secret key is available; the key still has to be revoked.
    Secret(String),
    /// The key is already revoked locally, e.g. by a revocation certificate.
    Revoked(String),
}

/// Offer to revoke every other active key registered to the remote.
///
/// Keys are visited in registry order. The sweep stops at the first key
/// the user declines, or whose secret key cannot be recovered.
///
/// # Returns
/// Key ids of the keys revoked, in order.
pub fn revoke_stale_keys(
    keyring: &Keyring<'_>,
    console: &mut Console,
    remote: &dyn RemoteKeyStore,
    active: &KeyRecord,
    title: &str,
) -> Result<Vec<String>> {
    let stale: Vec<RemoteKey> = active_keys(remote)?
        .into_iter()
        .filter(|r| !r.key_id.eq_ignore_ascii_case(&active.key_id))
        .collect();
    if stale.is_empty() {
        return Ok(Vec::new());
    }
    warn!("Unrevoked old GPG key registered to the remote account found.");

    let mut revoked = Vec::new();
    for registered in &stale {
        if !console.ask_yes_no(&format!(
            "Do you want to revoke the key {}?",
            registered.label()
        ))? {
            break;
        }
        let fingerprint = match recover(keyring, console, registered)? {
            Some(Recovery::Secret(fingerprint)) => {
                keyring.gpg().revoke_key(&fingerprint)?;
                fingerprint
            }
            Some(Recovery::Revoked(fingerprint)) => fingerprint,
            None => {
                info!("Could not recover key {}; stopping", registered.key_id);
                break;
            }
        };

        // there is no way to mark a registered key revoked: upload it again
        let armored = keyring.gpg().export_public_key(&fingerprint)?;
        remote.delete_key(registered.id)?;
        remote.add_key(title, armored.trim())?;
        info!("Revoked key {}", registered.key_id);
        revoked.push(registered.key_id.clone());
    }
    Ok(revoked)
}

/// Find a way to revoke `registered`: the local secret key, a pasted
/// revocation certificate, or a pasted secret key, in that order.
fn recover(
    keyring: &Keyring<'_>,
    console: &mut Console,
    registered: &RemoteKey,
) -> Result<Option<Recovery>> {
    let key_id = registered.key_id.as_str();
    if let Some(local) = keyring.find_by_key_id(key_id)? {
        if local.is_revoked {
            return Ok(Some(Recovery::Revoked(local.fingerprint)));
        }
        if local.is_secret_key_available {
            return Ok(Some(Recovery::Secret(local.fingerprint)));
        }
    }

    // a revocation certificate only applies to a public key in the keyring
    if let Some(public) = find_public(keyring, key_id)? {
        if public.is_revoked {
            return Ok(Some(Recovery::Revoked(public.fingerprint)));
        }
        if console.ask_yes_no("Do you have the revocation certificate?")? {
            match console.read_armored_block("revocation certificate", PUBLIC_KEY_MARKERS)? {
                PastedBlock::Armored(certificate) => {
                    keyring.gpg().import(None, &certificate)?;
                    if let Some(public) = find_public(keyring, key_id)? {
                        if public.is_revoked {
                            return Ok(Some(Recovery::Revoked(public.fingerprint)));
                        }
                    }
                    console.say("The certificate did not revoke the key.")?;
                }
                PastedBlock::Invalid => console.say("Invalid revocation certificate format.")?,
                PastedBlock::Cancelled => return Ok(None),
            }
        }
    }

    let imported = import_secret_key(
        keyring,
        console,
        &format!("Import the secret key for {}?", registered.label()),
        |key| {
            require(
                key.key_id.eq_ignore_ascii_case(key_id) && key.is_secret_key_available,
                || {
                    format!(
                        "Imported key ({}) mismatched or does not contain the secret key.",
                        key.key_id
                    )
                },
            )
        },
    )?;
    Ok(imported.map(|key| Recovery::Secret(key.fingerprint)))
}

fn find_public(keyring: &Keyring<'_>, key_id: &str) -> Result<Option<KeyRecord>> {
    Ok(keyring
        .public_keys()?
        .into_iter()
        .find(|k| k.key_id.eq_ignore_ascii_case(key_id)))
}
