//! Pre-checks for pasted armored key blocks.
//!
//! A pasted block is read with rpgp before it reaches any keyring so that
//! obviously wrong input (a public key pasted where a secret key was
//! asked for) is rejected early. gpg stays authoritative: blocks rpgp
//! cannot read, such as keys with GnuPG stub extensions, are passed on.

use std::io::Cursor;

use log::debug;
use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey};
use pgp::types::KeyDetails;

/// What a pasted block turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmorKind {
    /// A transferable secret key with the given primary fingerprint.
    SecretKey { fingerprint: String },
    /// A public key without secret material.
    PublicKeyOnly { fingerprint: String },
    /// Not readable by rpgp; left to gpg to decide.
    Unreadable,
}

/// Inspect a pasted block that should hold a secret key.
///
/// # Arguments
/// * `armored` - ASCII-armored block as pasted
///
/// # Returns
/// The kind of key material found, see [`ArmorKind`].
pub fn inspect_secret_block(armored: &str) -> ArmorKind {
    match SignedSecretKey::from_armor_single(Cursor::new(armored.as_bytes())) {
        Ok((key, _headers)) => {
            return ArmorKind::SecretKey {
                fingerprint: hex::encode_upper(key.primary_key.fingerprint().as_bytes()),
            }
        }
        Err(e) => debug!("block is not a readable secret key: {}", e),
    }
    match SignedPublicKey::from_armor_single(Cursor::new(armored.as_bytes())) {
        Ok((key, _headers)) => ArmorKind::PublicKeyOnly {
            fingerprint: hex::encode_upper(key.primary_key.fingerprint().as_bytes()),
        },
        Err(e) => {
            debug!("block is not a readable public key either: {}", e);
            ArmorKind::Unreadable
        }
    }
}
