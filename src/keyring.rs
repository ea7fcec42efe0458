//! Keyring listing operations.
//!
//! This module reads the keyring through [`GnuPg`] and folds the listing
//! into [`KeyRecord`]s. Records are never patched after a mutation: callers
//! re-read them with [`Keyring::reread`].

use std::collections::HashSet;
use std::path::Path;

use log::debug;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::gpg::GnuPg;
use crate::parse::parse_listing;
use crate::types::KeyRecord;

/// Read access to the keys held by a GnuPG home.
#[derive(Clone, Copy)]
pub struct Keyring<'g> {
    gpg: &'g dyn GnuPg,
}

impl<'g> Keyring<'g> {
    pub fn new(gpg: &'g dyn GnuPg) -> Self {
        Self { gpg }
    }

    /// The tool backing this keyring, for mutating operations.
    pub fn gpg(&self) -> &'g dyn GnuPg {
        self.gpg
    }

    /// All keys with a secret part in the real keyring.
    pub fn secret_keys(&self) -> Result<Vec<KeyRecord>> {
        parse_listing(&self.gpg.list_secret_keys(None)?)
    }

    /// All keys with a secret part in the keyring at `home`.
    pub fn secret_keys_in(&self, home: &Path) -> Result<Vec<KeyRecord>> {
        parse_listing(&self.gpg.list_secret_keys(Some(home))?)
    }

    /// All public keys in the real keyring, secret part or not.
    pub fn public_keys(&self) -> Result<Vec<KeyRecord>> {
        parse_listing(&self.gpg.list_public_keys()?)
    }

    /// Find a secret key by primary fingerprint.
    pub fn find(&self, fingerprint: &str) -> Result<Option<KeyRecord>> {
        Ok(self
            .secret_keys()?
            .into_iter()
            .find(|k| k.fingerprint.eq_ignore_ascii_case(fingerprint)))
    }

    /// Find a secret key by primary key id.
    pub fn find_by_key_id(&self, key_id: &str) -> Result<Option<KeyRecord>> {
        Ok(self
            .secret_keys()?
            .into_iter()
            .find(|k| k.key_id.eq_ignore_ascii_case(key_id)))
    }

    /// Read `key` again after a mutation.
    ///
    /// # Errors
    /// Returns [`Error::Invariant`] if the key is no longer listed.
    pub fn reread(&self, key: &KeyRecord) -> Result<KeyRecord> {
        self.find(&key.fingerprint)?.ok_or_else(|| {
            Error::Invariant(format!(
                "key {} disappeared from the keyring",
                key.fingerprint
            ))
        })
    }

    /// Primary key ids of every secret key currently listed.
    pub fn key_ids(&self) -> Result<HashSet<String>> {
        Ok(self.secret_keys()?.into_iter().map(|k| k.key_id).collect())
    }
}

/// A scratch GnuPG home, removed when dropped.
///
/// Imports land here first so the imported key can be identified before
/// it is merged into the real keyring.
pub struct EphemeralHome<'g> {
    dir: TempDir,
    gpg: &'g dyn GnuPg,
}

impl<'g> EphemeralHome<'g> {
    pub fn create(gpg: &'g dyn GnuPg) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("wecansign-").tempdir()?;
        debug!("created scratch home {}", dir.path().display());
        Ok(Self { dir, gpg })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for EphemeralHome<'_> {
    fn drop(&mut self) {
        self.gpg.release_home(self.dir.path());
        debug!("removing scratch home {}", self.dir.path().display());
    }
}
