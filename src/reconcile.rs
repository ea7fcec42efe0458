//! Candidate selection.
//!
//! Cross-references the git signing key, the local keyring and the keys
//! registered to the remote account to pick the key to refine. Keys that
//! are already registered are preferred; the first source that yields a
//! key wins. Selection depends only on its inputs and the user's answers.

use chrono::SecondsFormat;
use log::{info, warn};

use crate::error::Result;
use crate::import::{import_secret_key, require};
use crate::keyring::Keyring;
use crate::prompt::Console;
use crate::types::{KeyRecord, RemoteKey, SigningKeyRef, SubkeyRecord};

/// The key chosen for refinement.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: KeyRecord,
    /// Fingerprint of the subkey git currently signs with, if known.
    pub subkey: Option<String>,
    /// The remote registration of `key`, if any.
    pub remote: Option<RemoteKey>,
}

impl Candidate {
    fn local(key: KeyRecord) -> Self {
        Self {
            key,
            subkey: None,
            remote: None,
        }
    }
}

/// Pick the key to refine, importing one if needed.
///
/// # Arguments
/// * `keyring` - The real keyring, used for imports
/// * `console` - Interactive console
/// * `signing_key` - The key git is configured to sign with
/// * `local` - Secret keys in the keyring, without revoked primaries
/// * `remote` - Non-revoked keys registered to the remote account
///
/// # Returns
/// The candidate, or `None` if nothing was selected or imported.
pub fn find_candidate(
    keyring: &Keyring<'_>,
    console: &mut Console,
    signing_key: Option<&SigningKeyRef>,
    local: &[KeyRecord],
    remote: &[RemoteKey],
) -> Result<Option<Candidate>> {
    if !remote.is_empty() {
        if let Some(candidate) = from_signing_key(keyring, console, signing_key, local, remote)? {
            return Ok(Some(candidate));
        }
        if let Some(candidate) = from_registered(console, local, remote)? {
            return Ok(Some(candidate));
        }

        info!("No GPG keys registered to the remote account found in the keyring (or none selected).");
        let imported = import_secret_key(
            keyring,
            console,
            "Import GPG keys registered to the remote account to the keyring?",
            |key| {
                require(remote.iter().any(|r| same_key_id(&r.key_id, &key.key_id)), || {
                    format!("Imported key ({}) is not registered to the remote account.", key.key_id)
                })
            },
        )?;
        if let Some(key) = imported {
            let registered = remote
                .iter()
                .find(|r| same_key_id(&r.key_id, &key.key_id))
                .cloned();
            return Ok(Some(Candidate {
                key,
                subkey: None,
                remote: registered,
            }));
        }
    }

    if !local.is_empty() {
        info!("No GPG keys in the keyring are registered to the remote account.");
        if console.ask_yes_no("Do you want to use a key from the keyring for signing commits?")? {
            let selected = console.select("Multiple GPG keys found in the keyring.", local, |k| {
                format!(
                    "{} - created at {}",
                    k.key_id,
                    k.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                )
            })?;
            if let Some(key) = selected {
                return Ok(Some(Candidate::local(key.clone())));
            }
        }
    }

    let imported = import_secret_key(keyring, console, "Import a GPG key to the keyring?", |_| Ok(()))?;
    Ok(imported.map(Candidate::local))
}

/// The registered key holding the subkey git currently signs with.
fn from_signing_key(
    keyring: &Keyring<'_>,
    console: &mut Console,
    signing_key: Option<&SigningKeyRef>,
    local: &[KeyRecord],
    remote: &[RemoteKey],
) -> Result<Option<Candidate>> {
    let Some(signing_key) = signing_key else {
        return Ok(None);
    };
    let Some(registered) = remote.iter().find(|r| r.has_subkey(signing_key)) else {
        return Ok(None);
    };

    if let Some((key, subkey)) = local
        .iter()
        .find_map(|k| signing_subkey(k, signing_key).map(|s| (k, s)))
    {
        return Ok(Some(Candidate {
            subkey: Some(subkey.fingerprint.clone()),
            key: key.clone(),
            remote: Some(registered.clone()),
        }));
    }

    warn!("GPG key registered to the remote account found in git config but not in the keyring");
    let imported = import_secret_key(
        keyring,
        console,
        "Import GPG key currently set in git config to the keyring?",
        |key| {
            require(signing_subkey(key, signing_key).is_some(), || {
                format!(
                    "Imported key ({}) does not contain the current git signing key ({}).",
                    key.key_id, signing_key
                )
            })
        },
    )?;
    Ok(imported.map(|key| Candidate {
        subkey: signing_subkey(&key, signing_key).map(|s| s.fingerprint.clone()),
        key,
        remote: Some(registered.clone()),
    }))
}

/// Registered keys present in the keyring; one is picked without asking.
fn from_registered(
    console: &mut Console,
    local: &[KeyRecord],
    remote: &[RemoteKey],
) -> Result<Option<Candidate>> {
    let present: Vec<(&RemoteKey, &KeyRecord)> = remote
        .iter()
        .filter_map(|r| {
            local
                .iter()
                .find(|k| same_key_id(&k.key_id, &r.key_id))
                .map(|k| (r, k))
        })
        .collect();
    let selected = console.select(
        "Multiple GPG keys registered to the remote account found in the keyring.",
        &present,
        // the remote creation time is when the key was registered
        |(r, _)| {
            format!(
                "{} - added at {}",
                r.label(),
                r.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )
        },
    )?;
    Ok(selected.map(|(r, k)| Candidate {
        key: (*k).clone(),
        subkey: None,
        remote: Some((*r).clone()),
    }))
}

fn signing_subkey<'k>(key: &'k KeyRecord, signing_key: &SigningKeyRef) -> Option<&'k SubkeyRecord> {
    key.subkeys
        .iter()
        .find(|s| signing_key.matches(&s.key_id, Some(&s.fingerprint)))
}

fn same_key_id(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
