//! In-memory stand-ins for gpg, git and the remote key registry.
//!
//! `FakeGnuPg` renders its keys in the same colon format gpg prints, so
//! the listings go through the real parser. Armored blocks are opaque
//! tokens registered with the fake.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::rc::Rc;

use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use tempfile::TempDir;

use wecansign::{
    private_key_path, Console, Error, GitConfig, GnuPg, KeyUsage, RemoteKey, RemoteKeyStore,
    RemoteSubkey, Result, ScriptedLines,
};

pub const IDENTITY: &str = "alice";
pub const EMAIL: &str = "alice@users.noreply.github.com";
pub const CREATED: i64 = 1_700_000_000;

pub fn user_id() -> String {
    format!("{} <{}>", IDENTITY, EMAIL)
}

// -----------------------------------------------------------------------------
// gpg
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeSubkey {
    pub fingerprint: String,
    pub keygrip: String,
    pub curve: String,
    pub expires: Option<i64>,
    pub revoked: bool,
    pub secret: bool,
    pub usages: String,
}

#[derive(Debug, Clone)]
pub struct FakeKey {
    pub fingerprint: String,
    pub keygrip: String,
    pub curve: String,
    pub expires: Option<i64>,
    pub revoked: bool,
    pub secret: bool,
    pub usages: String,
    pub trusted: bool,
    pub user_ids: Vec<String>,
    pub subkeys: Vec<FakeSubkey>,
    /// Bumped on every change so exported public keys differ
    pub version: u32,
}

impl FakeKey {
    pub fn key_id(&self) -> String {
        key_id_of(&self.fingerprint)
    }

    fn merge(&mut self, other: &FakeKey) {
        self.secret |= other.secret;
        self.revoked |= other.revoked;
        for uid in &other.user_ids {
            if !self.user_ids.contains(uid) {
                self.user_ids.push(uid.clone());
            }
        }
        for sub in &other.subkeys {
            match self
                .subkeys
                .iter_mut()
                .find(|s| s.fingerprint == sub.fingerprint)
            {
                Some(existing) => {
                    existing.secret |= sub.secret;
                    existing.revoked |= sub.revoked;
                }
                None => self.subkeys.push(sub.clone()),
            }
        }
        self.version += 1;
    }
}

pub fn key_id_of(fingerprint: &str) -> String {
    fingerprint[fingerprint.len() - 16..].to_string()
}

#[derive(Default)]
struct FakeState {
    keys: Vec<FakeKey>,
    scratch: HashMap<PathBuf, Vec<FakeKey>>,
    secret_armors: HashMap<String, FakeKey>,
    next: u64,
    log: Vec<String>,
    released: Vec<PathBuf>,
}

impl FakeState {
    fn next_hex(&mut self, salt: u128) -> String {
        self.next += 1;
        // odd multiplier keeps the low 64 bits (the key id) distinct
        format!(
            "{:040X}",
            (self.next as u128).wrapping_mul(0x1111_1111_1111_1111_1111) ^ (salt << 120)
        )
    }

    fn key_mut(&mut self, fingerprint: &str) -> Result<&mut FakeKey> {
        self.keys
            .iter_mut()
            .find(|k| k.fingerprint == fingerprint)
            .ok_or_else(|| failure(&["--edit-key", fingerprint], "key not found"))
    }
}

pub struct FakeGnuPg {
    home: TempDir,
    state: RefCell<FakeState>,
}

impl FakeGnuPg {
    pub fn new() -> Self {
        Self {
            home: tempfile::tempdir().unwrap(),
            state: RefCell::new(FakeState::default()),
        }
    }

    /// A certify-only ed25519 primary key with `user_id` and no subkeys.
    pub fn new_key(&self, user_id: &str) -> FakeKey {
        let mut state = self.state.borrow_mut();
        FakeKey {
            fingerprint: state.next_hex(0xA),
            keygrip: state.next_hex(0xB),
            curve: "ed25519".to_string(),
            expires: None,
            revoked: false,
            secret: true,
            usages: "c".to_string(),
            trusted: true,
            user_ids: vec![user_id.to_string()],
            subkeys: Vec::new(),
            version: 0,
        }
    }

    /// An ed25519 subkey with secret material and the given usage letters.
    pub fn new_subkey(&self, usages: &str) -> FakeSubkey {
        let mut state = self.state.borrow_mut();
        FakeSubkey {
            fingerprint: state.next_hex(0xC),
            keygrip: state.next_hex(0xD),
            curve: "ed25519".to_string(),
            expires: None,
            revoked: false,
            secret: true,
            usages: usages.to_string(),
        }
    }

    /// A key that needs no refinement.
    pub fn compliant_key(&self, user_id: &str) -> FakeKey {
        let mut key = self.new_key(user_id);
        key.subkeys.push(self.new_subkey("s"));
        key
    }

    /// Put `key` into the keyring.
    pub fn insert(&self, key: FakeKey) -> FakeKey {
        if key.secret {
            self.write_private_key(&key.keygrip);
        }
        self.state.borrow_mut().keys.push(key.clone());
        key
    }

    /// Drop `fingerprint` from the keyring, as if it lived on another machine.
    pub fn remove(&self, fingerprint: &str) {
        self.state
            .borrow_mut()
            .keys
            .retain(|k| k.fingerprint != fingerprint);
    }

    pub fn key(&self, fingerprint: &str) -> Option<FakeKey> {
        self.state
            .borrow()
            .keys
            .iter()
            .find(|k| k.fingerprint == fingerprint)
            .cloned()
    }

    pub fn keys(&self) -> Vec<FakeKey> {
        self.state.borrow().keys.clone()
    }

    /// Armored secret key for `key`, importable into any home.
    pub fn secret_armor(&self, key: &FakeKey) -> String {
        let token = format!("FAKE-SECRET-{}-{}", key.fingerprint, key.version);
        self.state
            .borrow_mut()
            .secret_armors
            .insert(token.clone(), key.clone());
        armor("PRIVATE KEY", &token)
    }

    /// Armored revocation certificate for `fingerprint`.
    pub fn revocation_armor(&self, fingerprint: &str) -> String {
        armor("PUBLIC KEY", &format!("FAKE-REV-{}", fingerprint))
    }

    /// Calls that changed the real keyring, in order.
    pub fn log(&self) -> Vec<String> {
        self.state.borrow().log.clone()
    }

    pub fn mutations(&self) -> usize {
        self.state.borrow().log.len()
    }

    pub fn released_homes(&self) -> Vec<PathBuf> {
        self.state.borrow().released.clone()
    }

    pub fn private_key_exists(&self, keygrip: &str) -> bool {
        private_key_path(self.home.path(), keygrip).exists()
    }

    fn write_private_key(&self, keygrip: &str) {
        let path = private_key_path(self.home.path(), keygrip);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("(private-key {})", keygrip)).unwrap();
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().log.push(call);
    }

    fn render(&self, keys: &[FakeKey], secret: bool, real: bool) -> String {
        let now = Utc::now().timestamp();
        let mut out = String::new();
        for key in keys {
            let primary_secret = key.secret && (!real || self.private_key_exists(&key.keygrip));
            if secret && !primary_secret && !key.subkeys.iter().any(|s| s.secret) {
                continue;
            }
            let validity = validity(key.revoked, key.expires, now);
            let mut caps = key.usages.clone();
            let mut usable = key.usages.clone();
            for sub in key.subkeys.iter().filter(|s| !s.revoked) {
                usable.push_str(&sub.usages);
            }
            for letter in ['e', 's', 'c', 'a'] {
                if usable.contains(letter) {
                    caps.push(letter.to_ascii_uppercase());
                }
            }
            out.push_str(&format!(
                "{}:{}:255:22:{}:{}:{}::{}:::{}:::{}::{}:::0:\n",
                if secret { "sec" } else { "pub" },
                validity,
                key.key_id(),
                CREATED,
                key.expires.map(|e| e.to_string()).unwrap_or_default(),
                if key.trusted { "u" } else { "-" },
                caps,
                token(secret, primary_secret),
                key.curve,
            ));
            out.push_str(&format!("fpr:::::::::{}:\n", key.fingerprint));
            out.push_str(&format!("grp:::::::::{}:\n", key.keygrip));
            for (i, uid) in key.user_ids.iter().enumerate() {
                out.push_str(&format!(
                    "uid:{}::::{}::{:040X}::{}::::::::::0:\n",
                    validity,
                    CREATED,
                    i + 1,
                    uid
                ));
            }
            for sub in &key.subkeys {
                out.push_str(&format!(
                    "{}:{}:255:22:{}:{}:{}:::::{}:::{}::{}::\n",
                    if secret { "ssb" } else { "sub" },
                    self::validity(sub.revoked, sub.expires, now),
                    key_id_of(&sub.fingerprint),
                    CREATED,
                    sub.expires.map(|e| e.to_string()).unwrap_or_default(),
                    sub.usages,
                    token(secret, sub.secret),
                    sub.curve,
                ));
                out.push_str(&format!("fpr:::::::::{}:\n", sub.fingerprint));
                out.push_str(&format!("grp:::::::::{}:\n", sub.keygrip));
            }
        }
        out
    }
}

fn validity(revoked: bool, expires: Option<i64>, now: i64) -> char {
    if revoked {
        'r'
    } else if expires.is_some_and(|e| e <= now) {
        'e'
    } else {
        'u'
    }
}

fn token(secret_listing: bool, available: bool) -> &'static str {
    match (secret_listing, available) {
        (false, _) => "",
        (true, true) => "+",
        (true, false) => "#",
    }
}

fn armor(kind: &str, body: &str) -> String {
    format!(
        "-----BEGIN PGP {kind} BLOCK-----\n\n{body}\n-----END PGP {kind} BLOCK-----\n",
        kind = kind,
        body = body
    )
}

fn armor_body(armored: &str) -> Option<&str> {
    armored
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("FAKE-"))
}

fn failure(args: &[&str], stderr: &str) -> Error {
    Error::ExternalTool {
        program: "gpg".to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        status: ExitStatus::from_raw(2 << 8),
        stderr: stderr.to_string(),
    }
}

impl GnuPg for FakeGnuPg {
    fn home_dir(&self) -> &Path {
        self.home.path()
    }

    fn list_secret_keys(&self, home: Option<&Path>) -> Result<String> {
        match home {
            None => Ok(self.render(&self.keys(), true, true)),
            Some(home) => {
                let keys = self
                    .state
                    .borrow()
                    .scratch
                    .get(home)
                    .cloned()
                    .unwrap_or_default();
                Ok(self.render(&keys, true, false))
            }
        }
    }

    fn list_public_keys(&self) -> Result<String> {
        Ok(self.render(&self.keys(), false, true))
    }

    fn import(&self, home: Option<&Path>, armored: &str) -> Result<()> {
        let body = armor_body(armored).unwrap_or_default().to_string();
        if let Some(fingerprint) = body.strip_prefix("FAKE-REV-") {
            if home.is_some() {
                return Err(failure(&["--import"], "no public key"));
            }
            let mut state = self.state.borrow_mut();
            let key = state
                .key_mut(fingerprint)
                .map_err(|_| failure(&["--import"], "no public key"))?;
            key.revoked = true;
            key.version += 1;
            state.log.push(format!("import-revocation {}", fingerprint));
            return Ok(());
        }

        let imported = self
            .state
            .borrow()
            .secret_armors
            .get(&body)
            .cloned()
            .ok_or_else(|| failure(&["--import"], "no valid OpenPGP data found"))?;
        let mut state = self.state.borrow_mut();
        let keys = match home {
            Some(home) => state.scratch.entry(home.to_path_buf()).or_default(),
            None => &mut state.keys,
        };
        match keys
            .iter_mut()
            .find(|k| k.fingerprint == imported.fingerprint)
        {
            Some(existing) => existing.merge(&imported),
            None => keys.push(imported.clone()),
        }
        if home.is_none() {
            state.log.push(format!("import {}", imported.fingerprint));
            drop(state);
            if imported.secret {
                self.write_private_key(&imported.keygrip);
            }
        }
        Ok(())
    }

    fn release_home(&self, home: &Path) {
        let mut state = self.state.borrow_mut();
        state.scratch.remove(home);
        state.released.push(home.to_path_buf());
    }

    fn generate_key(&self, user_id: &str, curve: &str) -> Result<()> {
        let mut key = self.new_key(user_id);
        key.curve = curve.to_string();
        self.record(format!("generate {}", user_id));
        self.insert(key);
        Ok(())
    }

    fn add_signing_subkey(&self, fingerprint: &str, curve: &str) -> Result<()> {
        let mut subkey = self.new_subkey("s");
        subkey.curve = curve.to_string();
        let mut state = self.state.borrow_mut();
        let key = state.key_mut(fingerprint)?;
        key.subkeys.push(subkey);
        key.version += 1;
        state.log.push(format!("add-subkey {}", fingerprint));
        Ok(())
    }

    fn add_user_id(&self, fingerprint: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let key = state.key_mut(fingerprint)?;
        key.user_ids.push(user_id.to_string());
        key.version += 1;
        state.log.push(format!("add-uid {}", fingerprint));
        Ok(())
    }

    fn clear_expiry(&self, fingerprint: &str, subkeys: &[String]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let key = state.key_mut(fingerprint)?;
        if subkeys.is_empty() {
            key.expires = None;
        }
        for sub in key
            .subkeys
            .iter_mut()
            .filter(|s| subkeys.contains(&s.fingerprint))
        {
            sub.expires = None;
        }
        key.version += 1;
        state
            .log
            .push(format!("clear-expiry {} {}", fingerprint, subkeys.join(",")));
        Ok(())
    }

    fn change_usage(
        &self,
        fingerprint: &str,
        subkey: Option<&str>,
        toggles: &[KeyUsage],
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let key = state.key_mut(fingerprint)?;
        let usages = match subkey {
            Some(sub) => {
                &mut key
                    .subkeys
                    .iter_mut()
                    .find(|s| s.fingerprint == sub)
                    .ok_or_else(|| failure(&["--edit-key"], "no such subkey"))?
                    .usages
            }
            None => &mut key.usages,
        };
        for usage in toggles {
            let letter = usage.letter();
            if usages.contains(letter) {
                usages.retain(|c| c != letter);
            } else {
                usages.push(letter);
            }
        }
        key.version += 1;
        state.log.push(format!("change-usage {}", fingerprint));
        Ok(())
    }

    fn revoke_subkeys(&self, fingerprint: &str, subkeys: &[String]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let key = state.key_mut(fingerprint)?;
        for sub in key
            .subkeys
            .iter_mut()
            .filter(|s| subkeys.contains(&s.fingerprint))
        {
            sub.revoked = true;
        }
        key.version += 1;
        state.log.push(format!("revoke-subkeys {}", subkeys.join(",")));
        Ok(())
    }

    fn revoke_key(&self, fingerprint: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let key = state.key_mut(fingerprint)?;
        key.revoked = true;
        key.version += 1;
        state.log.push(format!("revoke {}", fingerprint));
        Ok(())
    }

    fn set_ultimate_trust(&self, fingerprint: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.key_mut(fingerprint)?.trusted = true;
        state.log.push(format!("trust {}", fingerprint));
        Ok(())
    }

    fn export_public_key(&self, fingerprint: &str) -> Result<String> {
        let key = self
            .key(fingerprint)
            .ok_or_else(|| failure(&["--export"], "nothing exported"))?;
        let subkeys: Vec<String> = key
            .subkeys
            .iter()
            .map(|s| key_id_of(&s.fingerprint))
            .collect();
        let body = format!(
            "FAKE-PUB;{};{};{};{}",
            key.fingerprint,
            key.version,
            key.revoked,
            subkeys.join(",")
        );
        Ok(armor("PUBLIC KEY", &body))
    }

    fn export_secret_key(&self, fingerprint: &str) -> Result<SecretString> {
        let key = self
            .key(fingerprint)
            .ok_or_else(|| failure(&["--export-secret-keys"], "nothing exported"))?;
        Ok(SecretString::from(self.secret_armor(&key)))
    }

    fn generate_revocation(&self, fingerprint: &str) -> Result<String> {
        let key = self
            .key(fingerprint)
            .ok_or_else(|| failure(&["--gen-revoke"], "key not found"))?;
        if !self.private_key_exists(&key.keygrip) {
            return Err(failure(&["--gen-revoke"], "secret key not available"));
        }
        Ok(self.revocation_armor(fingerprint))
    }
}

// -----------------------------------------------------------------------------
// remote registry
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRemote {
    keys: RefCell<Vec<RemoteKey>>,
    next_id: Cell<u64>,
    log: RefCell<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` as exported by `gpg` right now.
    pub fn register(&self, gpg: &FakeGnuPg, key: &FakeKey, title: &str) -> RemoteKey {
        let armored = gpg.export_public_key(&key.fingerprint).unwrap();
        let added = self.add(title, &armored);
        self.keys.borrow_mut().push(added.clone());
        added
    }

    pub fn keys(&self) -> Vec<RemoteKey> {
        self.keys.borrow().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn add(&self, title: &str, armored: &str) -> RemoteKey {
        let body = armor_body(armored).expect("fake public key");
        let fields: Vec<&str> = body.split(';').collect();
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        // registration times increase with the id
        let created_at = Utc.timestamp_opt(CREATED + id as i64 * 60, 0).unwrap();
        let subkeys = fields[4]
            .split(',')
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, key_id)| RemoteSubkey {
                id: id * 100 + i as u64,
                key_id: key_id.to_string(),
                created_at,
                expires_at: None,
                revoked: false,
            })
            .collect();
        RemoteKey {
            id,
            key_id: key_id_of(fields[1]),
            name: Some(title.to_string()),
            created_at,
            expires_at: None,
            revoked: fields[3] == "true",
            emails: Vec::new(),
            raw_key: Some(format!("{}\n", armored)),
            subkeys,
        }
    }
}

impl RemoteKeyStore for FakeRemote {
    fn list_keys(&self) -> Result<Vec<RemoteKey>> {
        Ok(self.keys())
    }

    fn add_key(&self, title: &str, armored_public_key: &str) -> Result<RemoteKey> {
        let added = self.add(title, armored_public_key);
        if self.keys.borrow().iter().any(|k| k.key_id == added.key_id) {
            return Err(Error::Api {
                status: 422,
                message: "key_id already exists".to_string(),
            });
        }
        self.keys.borrow_mut().push(added.clone());
        self.log.borrow_mut().push(format!("add {}", added.key_id));
        Ok(added)
    }

    fn delete_key(&self, id: u64) -> Result<()> {
        let mut keys = self.keys.borrow_mut();
        let before = keys.len();
        keys.retain(|k| k.id != id);
        if keys.len() == before {
            return Err(Error::Api {
                status: 404,
                message: "Not Found".to_string(),
            });
        }
        self.log.borrow_mut().push(format!("delete {}", id));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// git
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGit {
    pub signing_key: RefCell<Option<String>>,
}

impl FakeGit {
    pub fn with_signing_key(value: &str) -> Self {
        Self {
            signing_key: RefCell::new(Some(value.to_string())),
        }
    }
}

impl GitConfig for FakeGit {
    fn signing_key(&self) -> Result<Option<String>> {
        Ok(self.signing_key.borrow().clone())
    }

    fn set_signing_key(&self, value: &str) -> Result<()> {
        *self.signing_key.borrow_mut() = Some(value.to_string());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// console
// -----------------------------------------------------------------------------

/// Console output captured for assertions.
#[derive(Clone, Default)]
pub struct Captured(Rc<RefCell<Vec<u8>>>);

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }

    /// Number of yes/no questions asked.
    pub fn questions(&self) -> usize {
        self.text().matches("[y/N]").count()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A console answering from `script`.
pub fn console(script: ScriptedLines) -> (Console, Captured) {
    let captured = Captured::default();
    (
        Console::new(Box::new(script), Box::new(captured.clone())),
        captured,
    )
}

/// A console answering `lines` in order.
pub fn answering(lines: &[&str]) -> (Console, Captured) {
    console(ScriptedLines::new(lines.iter().copied()))
}
