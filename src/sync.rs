//! Signing identity synchronization.
//!
//! Ties the steps together: pick a candidate key (or generate one), refine
//! it, publish it, revoke superseded keys, back up and remove the primary
//! secret key, and finally point git at the signing subkey. Every step can
//! be re-run from scratch after a failure.

use log::info;

use crate::config::Settings;
use crate::error::Result;
use crate::git::GitConfig;
use crate::gpg::GnuPg;
use crate::hygiene::{backup_and_destroy, configure_signing_key};
use crate::key::generate_key;
use crate::keyring::Keyring;
use crate::prompt::Console;
use crate::publish::{publish_key, revoke_stale_keys};
use crate::reconcile::find_candidate;
use crate::refine::{refine_key, AbortReason, RefinedKey, Refinement};
use crate::remote::{active_keys, RemoteKeyStore};
use crate::types::{KeyRecord, SigningKeyRef};

/// Result of [`synchronize_signing_identity`].
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Synchronized(SyncReport),
    /// Even the newly generated key could not be refined.
    Aborted(AbortReason),
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Primary key id of the signing identity
    pub key_id: String,
    pub fingerprint: String,
    /// The value written to the git signing key setting
    pub signing_key: String,
    /// True if a new primary key was generated
    pub generated: bool,
    /// True if the public key was (re)uploaded
    pub uploaded: bool,
    /// Key ids revoked during the run
    pub revoked: Vec<String>,
}

/// Reconcile the keyring, the git signing key and the remote registry into
/// one compliant signing identity.
///
/// # Arguments
/// * `gpg` - The keyring tool
/// * `git` - Git configuration holding the signing key
/// * `remote` - The remote key registry
/// * `console` - Interactive console
/// * `settings` - Identity, email and key title
pub fn synchronize_signing_identity(
    gpg: &dyn GnuPg,
    git: &dyn GitConfig,
    remote: &dyn RemoteKeyStore,
    console: &mut Console,
    settings: &Settings,
) -> Result<SyncOutcome> {
    settings.validate()?;
    let keyring = Keyring::new(gpg);

    let signing_key = git
        .signing_key()?
        .and_then(|value| SigningKeyRef::parse(&value));
    let local: Vec<KeyRecord> = keyring
        .secret_keys()?
        .into_iter()
        // public keys imported on their own are of no use
        .filter(|k| k.has_any_secret())
        // revocation is final
        .filter(|k| !k.is_revoked)
        .collect();
    let registered = active_keys(remote)?;

    let candidate = find_candidate(
        &keyring,
        console,
        signing_key.as_ref(),
        &local,
        &registered,
    )?;

    let mut matched = None;
    let mut refined: Option<RefinedKey> = None;
    if let Some(candidate) = candidate {
        match refine_key(
            &keyring,
            console,
            candidate.key,
            candidate.subkey.as_deref(),
            &settings.identity,
            &settings.email,
        )? {
            Refinement::Refined(key) => {
                matched = candidate.remote;
                refined = Some(key);
            }
            Refinement::Aborted(reason) => {
                info!("Refinement aborted ({:?}); generating a new key", reason)
            }
        }
    }

    let generated = refined.is_none();
    let refined = match refined {
        Some(refined) => refined,
        None => {
            let key = generate_key(&keyring, &settings.identity, &settings.email)?;
            match refine_key(&keyring, console, key, None, &settings.identity, &settings.email)? {
                Refinement::Refined(refined) => refined,
                Refinement::Aborted(reason) => return Ok(SyncOutcome::Aborted(reason)),
            }
        }
    };

    let uploaded = publish_key(
        &keyring,
        remote,
        &refined.key,
        matched.as_ref(),
        &settings.key_title,
    )?;
    let revoked = revoke_stale_keys(&keyring, console, remote, &refined.key, &settings.key_title)?;

    backup_and_destroy(gpg, console, &refined, generated)?;
    let signing_key = configure_signing_key(git, &refined.subkey)?;

    Ok(SyncOutcome::Synchronized(SyncReport {
        key_id: refined.key.key_id.clone(),
        fingerprint: refined.key.fingerprint.clone(),
        signing_key,
        generated,
        uploaded,
        revoked,
    }))
}
