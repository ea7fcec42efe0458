//! Public type definitions for the wecansign library.
//!
//! This module contains the records parsed from the keyring listing, the
//! keys registered to the remote account, and the small value types used
//! to compare them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// A single key capability as reported by the keyring tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyUsage {
    /// Key can be used for encryption
    Encrypt,
    /// Key can be used for signing
    Sign,
    /// Key can certify other keys (primary keys)
    Certify,
    /// Key can be used for authentication
    Authenticate,
}

impl KeyUsage {
    /// The capability letter used in the colon listing and in `change-usage`.
    pub fn letter(self) -> char {
        match self {
            KeyUsage::Encrypt => 'e',
            KeyUsage::Sign => 's',
            KeyUsage::Certify => 'c',
            KeyUsage::Authenticate => 'a',
        }
    }

    /// Map a lowercase capability letter to a usage.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'e' => Some(KeyUsage::Encrypt),
            's' => Some(KeyUsage::Sign),
            'c' => Some(KeyUsage::Certify),
            'a' => Some(KeyUsage::Authenticate),
            _ => None,
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyUsage::Encrypt => write!(f, "encrypt"),
            KeyUsage::Sign => write!(f, "sign"),
            KeyUsage::Certify => write!(f, "certify"),
            KeyUsage::Authenticate => write!(f, "authenticate"),
        }
    }
}

/// The usable capabilities of one specific key or subkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyUsages {
    /// Key can encrypt
    pub encrypt: bool,
    /// Key can sign
    pub sign: bool,
    /// Key can certify
    pub certify: bool,
    /// Key can authenticate
    pub authenticate: bool,
}

impl KeyUsages {
    /// Parse the capability field of a listing record.
    ///
    /// The primary key line carries uppercase letters for the capabilities
    /// of the whole key; only lowercase letters describe the key itself, so
    /// uppercase letters are dropped. `"escESC"` yields encrypt, sign and
    /// certify.
    pub fn from_capabilities(field: &str) -> Self {
        let mut usages = Self::default();
        for usage in field
            .chars()
            .filter(|c| c.is_ascii_lowercase())
            .filter_map(KeyUsage::from_letter)
        {
            usages.insert(usage);
        }
        usages
    }

    /// A set holding exactly one usage.
    pub fn only(usage: KeyUsage) -> Self {
        let mut usages = Self::default();
        usages.insert(usage);
        usages
    }

    pub fn insert(&mut self, usage: KeyUsage) {
        *self.flag_mut(usage) = true;
    }

    pub fn contains(&self, usage: KeyUsage) -> bool {
        match usage {
            KeyUsage::Encrypt => self.encrypt,
            KeyUsage::Sign => self.sign,
            KeyUsage::Certify => self.certify,
            KeyUsage::Authenticate => self.authenticate,
        }
    }

    /// True if `usage` is the one and only capability.
    pub fn is_only(&self, usage: KeyUsage) -> bool {
        *self == Self::only(usage)
    }

    /// Usages in listing order (e, s, c, a).
    pub fn iter(&self) -> impl Iterator<Item = KeyUsage> + '_ {
        [
            KeyUsage::Encrypt,
            KeyUsage::Sign,
            KeyUsage::Certify,
            KeyUsage::Authenticate,
        ]
        .into_iter()
        .filter(move |usage| self.contains(*usage))
    }

    /// Every usage except `keep`, used to toggle them off with `change-usage`.
    pub fn others_than(&self, keep: KeyUsage) -> Vec<KeyUsage> {
        self.iter().filter(|usage| *usage != keep).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn flag_mut(&mut self, usage: KeyUsage) -> &mut bool {
        match usage {
            KeyUsage::Encrypt => &mut self.encrypt,
            KeyUsage::Sign => &mut self.sign,
            KeyUsage::Certify => &mut self.certify,
            KeyUsage::Authenticate => &mut self.authenticate,
        }
    }
}

impl fmt::Display for KeyUsages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters: String = self.iter().map(KeyUsage::letter).collect();
        f.write_str(&letters)
    }
}

/// A user ID bound to a primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId {
    /// Display name part
    pub name: String,
    /// Optional parenthesized comment
    pub comment: Option<String>,
    /// Email address between angle brackets
    pub email: String,
    /// Hash of the user ID as reported by the keyring tool
    pub hash: String,
    /// Whether this user ID has been revoked
    pub is_revoked: bool,
}

/// A subkey owned by exactly one [`KeyRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubkeyRecord {
    /// Long key ID (last 16 hex characters of the fingerprint)
    pub key_id: String,
    /// Full fingerprint as uppercase hex
    pub fingerprint: String,
    /// Reference to the secret key file of this subkey
    pub keygrip: String,
    /// Curve name, `None` for non-ECC algorithms
    pub curve_name: Option<String>,
    /// When the subkey was created
    pub created_at: DateTime<Utc>,
    /// When the subkey expires (None if never)
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this subkey has been revoked
    pub is_revoked: bool,
    /// Whether secret material for this subkey is usable locally
    pub is_secret_key_available: bool,
    /// Capabilities of this subkey
    pub key_usages: KeyUsages,
}

/// A primary key with its user IDs and subkeys, as listed by the keyring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Long key ID (last 16 hex characters of the fingerprint)
    pub key_id: String,
    /// Full fingerprint as uppercase hex
    pub fingerprint: String,
    /// Reference to the secret key file of the primary key
    pub keygrip: String,
    /// Curve name, `None` for non-ECC algorithms
    pub curve_name: Option<String>,
    /// User IDs in listing order
    pub user_ids: Vec<UserId>,
    /// When the key was created
    pub created_at: DateTime<Utc>,
    /// When the key expires (None if never)
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the primary key has been revoked
    pub is_revoked: bool,
    /// Whether the primary secret key is usable locally
    pub is_secret_key_available: bool,
    /// Capabilities of the primary key itself
    pub key_usages: KeyUsages,
    /// Whether the owner trust is ultimate
    pub is_ultimately_trusted: bool,
    /// Subkeys in listing order
    pub subkeys: Vec<SubkeyRecord>,
}

impl KeyRecord {
    /// True if the primary key or any subkey has local secret material.
    pub fn has_any_secret(&self) -> bool {
        self.is_secret_key_available
            || self.subkeys.iter().any(|s| s.is_secret_key_available)
    }

    /// Find a subkey by fingerprint.
    pub fn subkey(&self, fingerprint: &str) -> Option<&SubkeyRecord> {
        self.subkeys
            .iter()
            .find(|s| s.fingerprint.eq_ignore_ascii_case(fingerprint))
    }

    /// True if a non-revoked user ID carries `email`.
    pub fn has_email(&self, email: &str) -> bool {
        self.user_ids
            .iter()
            .any(|uid| !uid.is_revoked && uid.email.eq_ignore_ascii_case(email))
    }
}

/// The value of the git signing-key setting, normalized for comparison.
///
/// The setting may be a long key ID or a fingerprint, optionally followed
/// by `!` to force exact subkey resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyRef {
    id: String,
}

impl SigningKeyRef {
    /// Parse the raw setting.
    ///
    /// Returns `None` unless the value is a hex key ID or fingerprint; an
    /// SSH signing key path or any other format is not a GPG key reference.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw
            .trim()
            .trim_end_matches('!')
            .trim_start_matches("0x")
            .replace(' ', "")
            .to_ascii_uppercase();
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            None
        } else {
            Some(Self { id })
        }
    }

    /// The long key ID part of the reference.
    pub fn key_id(&self) -> &str {
        let len = self.id.len();
        if len > 16 {
            &self.id[len - 16..]
        } else {
            &self.id
        }
    }

    /// True if this reference designates the given key.
    pub fn matches(&self, key_id: &str, fingerprint: Option<&str>) -> bool {
        if self.id.len() > 16 {
            if let Some(fpr) = fingerprint {
                return fpr.eq_ignore_ascii_case(&self.id);
            }
        }
        key_id.eq_ignore_ascii_case(self.key_id())
    }

    /// Render the setting value that pins this exact subkey.
    pub fn pinned(fingerprint: &str) -> String {
        format!("{}!", fingerprint)
    }
}

impl fmt::Display for SigningKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// An email attached to a remote key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyEmail {
    pub email: String,
    #[serde(default)]
    pub verified: bool,
}

/// A subkey of a key registered to the remote account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSubkey {
    pub id: u64,
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub revoked: bool,
}

/// A public signing key registered to the remote account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteKey {
    /// Remote record ID, used for deletion
    pub id: u64,
    /// Long key ID of the primary key
    pub key_id: String,
    /// Title given when the key was added
    pub name: Option<String>,
    /// When the key was added to the account
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub revoked: bool,
    #[serde(default)]
    pub emails: Vec<KeyEmail>,
    /// Armored public key as uploaded; the API appends a trailing blank line
    pub raw_key: Option<String>,
    #[serde(default)]
    pub subkeys: Vec<RemoteSubkey>,
}

impl RemoteKey {
    /// True if `reference` designates one of this key's subkeys.
    pub fn has_subkey(&self, reference: &SigningKeyRef) -> bool {
        self.subkeys
            .iter()
            .any(|s| reference.matches(&s.key_id, None))
    }

    /// Human readable label used in prompts.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name.as_deref().unwrap_or("unnamed"), self.key_id)
    }
}

fn null_as_false<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}
