//! Interactive secret key import.
//!
//! A pasted key is first imported into a scratch home so that the key it
//! contains can be identified and validated. Only a key that passes the
//! caller's predicate is merged into the real keyring: once merged, the
//! listing no longer tells which key was imported.

use log::{debug, info};

use crate::armor::{inspect_secret_block, ArmorKind};
use crate::error::{Error, Result};
use crate::keyring::{EphemeralHome, Keyring};
use crate::prompt::{Console, PastedBlock, SECRET_KEY_MARKERS};
use crate::types::KeyRecord;

/// Reject an imported key with `message` unless `condition` holds.
///
/// Convenience for import predicates.
pub fn require(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::PredicateRejected(message()))
    }
}

/// Ask for a secret key and import it into the keyring.
///
/// # Arguments
/// * `keyring` - The real keyring
/// * `console` - Where to ask and read the pasted key
/// * `question` - Yes/no question asked before anything is pasted
/// * `predicate` - Validation of the imported key; return
///   [`Error::PredicateRejected`] to ask for another key
///
/// # Returns
/// The imported key as listed in the real keyring, or `None` if the user
/// declined or cancelled.
pub fn import_secret_key<P>(
    keyring: &Keyring<'_>,
    console: &mut Console,
    question: &str,
    predicate: P,
) -> Result<Option<KeyRecord>>
where
    P: Fn(&KeyRecord) -> Result<()>,
{
    if !console.ask_yes_no(question)? {
        return Ok(None);
    }
    loop {
        let armor = match console.read_armored_block("secret key", SECRET_KEY_MARKERS)? {
            PastedBlock::Armored(armor) => armor,
            PastedBlock::Cancelled => return Ok(None),
            PastedBlock::Invalid => {
                console.say("Invalid secret key format.")?;
                continue;
            }
        };
        if let ArmorKind::PublicKeyOnly { fingerprint } = inspect_secret_block(&armor) {
            console.say(&format!(
                "The pasted block is the public key {}, not a secret key.",
                fingerprint
            ))?;
            continue;
        }

        let fingerprint = match identify(keyring, &armor, &predicate) {
            Ok(fingerprint) => fingerprint,
            Err(Error::PredicateRejected(message)) => {
                console.say(&format!("{} Import aborted.", message))?;
                continue;
            }
            Err(e @ Error::ExternalTool { .. }) => {
                debug!("scratch import failed: {}", e);
                console.say("Failed to import key.")?;
                continue;
            }
            Err(e) => return Err(e),
        };

        keyring.gpg().import(None, &armor)?;
        let key = keyring.find(&fingerprint)?.ok_or_else(|| {
            Error::Invariant(format!("imported key {} not found in the keyring", fingerprint))
        })?;
        info!("Imported key {}", key.key_id);
        return Ok(Some(key));
    }
}

/// Import `armor` into a scratch home and return the fingerprint of the
/// key it holds, if it is acceptable.
fn identify<P>(keyring: &Keyring<'_>, armor: &str, predicate: &P) -> Result<String>
where
    P: Fn(&KeyRecord) -> Result<()>,
{
    let home = EphemeralHome::create(keyring.gpg())?;
    keyring.gpg().import(Some(home.path()), armor)?;
    let key = keyring
        .secret_keys_in(home.path())?
        .into_iter()
        .next()
        .ok_or_else(|| Error::PredicateRejected("Failed to import key.".to_string()))?;
    require(!key.is_revoked, || "Imported key is already revoked.".to_string())?;
    require(key.has_any_secret(), || {
        "Imported key is not a secret key.".to_string()
    })?;
    predicate(&key)?;
    Ok(key.fingerprint)
}
