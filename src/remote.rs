//! Remote key registry.
//!
//! The remote account keeps a list of registered public signing keys. It
//! can list, add and delete them; there is no way to mark a key revoked
//! other than uploading the revoked key again.

use crate::error::Result;
use crate::types::RemoteKey;

/// A remote account's registered public keys.
pub trait RemoteKeyStore {
    /// All registered keys, revoked or not.
    fn list_keys(&self) -> Result<Vec<RemoteKey>>;

    /// Register an armored public key under `title`.
    fn add_key(&self, title: &str, armored_public_key: &str) -> Result<RemoteKey>;

    /// Delete the registration with the given record id.
    fn delete_key(&self, id: u64) -> Result<()>;
}

/// Registered keys that are not revoked.
///
/// Revoked keys cannot be brought back and are ignored.
pub fn active_keys(store: &dyn RemoteKeyStore) -> Result<Vec<RemoteKey>> {
    Ok(store
        .list_keys()?
        .into_iter()
        .filter(|k| !k.revoked)
        .collect())
}
