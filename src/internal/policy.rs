//! Key validity and signing-identity policy.
//!
//! The keyring tool reports raw flags; the checks that decide whether a
//! key is usable for commit signing, and whether it matches the
//! recommended shape, live here.

use chrono::{DateTime, Utc};

use crate::types::{KeyRecord, KeyUsage, SubkeyRecord};

/// Curve every new primary key and signing subkey is created on.
pub const RECOMMENDED_CURVE: &str = "ed25519";

/// Check if an expiry time has passed.
pub(crate) fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expiry) => expiry <= now,
        None => false, // No expiration set
    }
}

/// Which signing subkeys to keep when filtering.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SigningFilter {
    /// Keep subkeys whose secret material is not available locally
    pub allow_no_secret: bool,
    /// Keep expired subkeys
    pub allow_expired: bool,
}

/// Non-revoked, sign-capable subkeys of `key` passing `filter`.
///
/// Usages could be changed with `change-usage`, but what is supported
/// depends on the algorithm, so a subkey without the sign flag is never
/// treated as a signing candidate.
pub(crate) fn signing_subkeys(
    key: &KeyRecord,
    filter: SigningFilter,
    now: DateTime<Utc>,
) -> Vec<&SubkeyRecord> {
    key.subkeys
        .iter()
        .filter(|s| !s.is_revoked)
        .filter(|s| s.key_usages.contains(KeyUsage::Sign))
        .filter(|s| filter.allow_no_secret || s.is_secret_key_available)
        .filter(|s| filter.allow_expired || !is_expired(s.expires_at, now))
        .collect()
}

/// A usable signing subkey with the recommended settings: no expiry, the
/// recommended curve and signing as its only capability.
pub(crate) fn is_recommended_subkey(subkey: &SubkeyRecord) -> bool {
    !subkey.is_revoked
        && subkey.is_secret_key_available
        && subkey.expires_at.is_none()
        && subkey.curve_name.as_deref() == Some(RECOMMENDED_CURVE)
        && subkey.key_usages.is_only(KeyUsage::Sign)
}

/// True if the primary key uses the recommended curve.
pub(crate) fn has_recommended_curve(key: &KeyRecord) -> bool {
    key.curve_name.as_deref() == Some(RECOMMENDED_CURVE)
}
