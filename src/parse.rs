//! Key listing parsing.
//!
//! This module folds the colon-delimited key listing of the keyring tool
//! (`--with-colons`) into [`KeyRecord`] trees. The format is line oriented
//! and append-only: a `sec`/`pub` record opens a key, `uid` and `ssb`/`sub`
//! records attach to it, and `fpr`/`grp` records fill in the fingerprint
//! and keygrip of whichever key or subkey they follow.
//!
//! Records are built with optional fields and only exposed once every
//! required field has been seen. A gap is fatal and reported together with
//! a dump of everything folded so far.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::internal::{normalize_hex, parse_timestamp, unescape_field};
use crate::types::{KeyRecord, KeyUsages, SubkeyRecord, UserId};

// Field positions, see doc/DETAILS in the GnuPG sources.
const FIELD_TYPE: usize = 0;
const FIELD_VALIDITY: usize = 1;
const FIELD_KEY_ID: usize = 4;
const FIELD_CREATED: usize = 5;
const FIELD_EXPIRES: usize = 6;
const FIELD_UID_HASH: usize = 7;
const FIELD_OWNER_TRUST: usize = 8;
const FIELD_USER_ID: usize = 9;
const FIELD_CAPABILITIES: usize = 11;
const FIELD_TOKEN: usize = 14;
const FIELD_CURVE: usize = 16;

static USER_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>.*?)(?: \((?P<comment>[^()]*)\))? <(?P<email>[^<>]+)>$")
        .expect("user id pattern is valid")
});

/// Record types the parser understands. Everything else is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    /// `sec` or `pub`
    Primary { secret: bool },
    /// `ssb` or `sub`
    Subkey { secret: bool },
    UserId,
    Fingerprint,
    Keygrip,
    Other,
}

impl RecordType {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "sec" => RecordType::Primary { secret: true },
            "pub" => RecordType::Primary { secret: false },
            "ssb" => RecordType::Subkey { secret: true },
            "sub" => RecordType::Subkey { secret: false },
            "uid" => RecordType::UserId,
            "fpr" => RecordType::Fingerprint,
            "grp" => RecordType::Keygrip,
            _ => RecordType::Other,
        }
    }
}

/// The two record types preceding the current one.
///
/// A `fpr` record always directly follows the key it belongs to; a `grp`
/// record follows that `fpr`, so its owner sits two records back.
#[derive(Debug, Default)]
struct Lookback {
    previous: Option<RecordType>,
    before_previous: Option<RecordType>,
}

impl Lookback {
    fn push(&mut self, record: RecordType) {
        self.before_previous = self.previous.replace(record);
    }
}

/// Which key a trailing `fpr`/`grp` record belongs to.
enum Owner {
    Primary,
    Subkey,
    Unknown,
}

impl Owner {
    fn of(record: Option<RecordType>) -> Self {
        match record {
            Some(RecordType::Primary { .. }) => Owner::Primary,
            Some(RecordType::Subkey { .. }) => Owner::Subkey,
            _ => Owner::Unknown,
        }
    }
}

/// Fields shared by primary and subkey records.
#[derive(Debug, Default)]
struct KeyFields {
    key_id: Option<String>,
    fingerprint: Option<String>,
    keygrip: Option<String>,
    curve_name: Option<String>,
    created_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    is_revoked: bool,
    is_secret_key_available: Option<bool>,
    key_usages: KeyUsages,
}

impl KeyFields {
    /// Read a `sec`/`pub`/`ssb`/`sub` record. Fails with the offending
    /// field name if a non-empty timestamp cannot be read.
    fn from_record(
        fields: &[&str],
        secret_listing: bool,
    ) -> std::result::Result<Self, String> {
        let key_id = field(fields, FIELD_KEY_ID).map(normalize_hex);
        let curve_name = field(fields, FIELD_CURVE).map(str::to_string);
        Ok(Self {
            key_id,
            fingerprint: None,
            keygrip: None,
            curve_name,
            created_at: timestamp(fields, FIELD_CREATED, "created_at")?,
            // empty means the key never expires
            expires_at: timestamp(fields, FIELD_EXPIRES, "expires_at")?,
            is_revoked: field(fields, FIELD_VALIDITY) == Some("r"),
            is_secret_key_available: secret_availability(fields, secret_listing),
            key_usages: KeyUsages::from_capabilities(
                field(fields, FIELD_CAPABILITIES).unwrap_or_default(),
            ),
        })
    }

    fn missing(&self, prefix: &str, missing: &mut Vec<String>) {
        let checks = [
            ("key_id", self.key_id.is_none()),
            ("fingerprint", self.fingerprint.is_none()),
            ("keygrip", self.keygrip.is_none()),
            ("created_at", self.created_at.is_none()),
            ("is_secret_key_available", self.is_secret_key_available.is_none()),
        ];
        for (name, absent) in checks {
            if absent {
                missing.push(format!("{}.{}", prefix, name));
            }
        }
    }
}

#[derive(Debug, Default)]
struct UserIdBuilder {
    name: Option<String>,
    comment: Option<String>,
    email: Option<String>,
    hash: Option<String>,
    is_revoked: bool,
}

#[derive(Debug)]
struct KeyRecordBuilder {
    fields: KeyFields,
    is_ultimately_trusted: bool,
    user_ids: Vec<UserIdBuilder>,
    subkeys: Vec<KeyFields>,
}

impl KeyRecordBuilder {
    fn missing_fields(&self, index: usize) -> Vec<String> {
        let mut missing = Vec::new();
        let prefix = format!("keys[{}]", index);
        self.fields.missing(&prefix, &mut missing);
        for (i, uid) in self.user_ids.iter().enumerate() {
            let uid_prefix = format!("{}.user_ids[{}]", prefix, i);
            for (name, absent) in [
                ("name", uid.name.is_none()),
                ("email", uid.email.is_none()),
                ("hash", uid.hash.is_none()),
            ] {
                if absent {
                    missing.push(format!("{}.{}", uid_prefix, name));
                }
            }
        }
        for (i, subkey) in self.subkeys.iter().enumerate() {
            subkey.missing(&format!("{}.subkeys[{}]", prefix, i), &mut missing);
        }
        missing
    }

    /// Consume the builder. Only called after `missing_fields` came back empty.
    fn build(self) -> Option<KeyRecord> {
        let user_ids = self
            .user_ids
            .into_iter()
            .map(|uid| {
                Some(UserId {
                    name: uid.name?,
                    comment: uid.comment,
                    email: uid.email?,
                    hash: uid.hash?,
                    is_revoked: uid.is_revoked,
                })
            })
            .collect::<Option<Vec<_>>>()?;
        let subkeys = self
            .subkeys
            .into_iter()
            .map(|s| {
                Some(SubkeyRecord {
                    key_id: s.key_id?,
                    fingerprint: s.fingerprint?,
                    keygrip: s.keygrip?,
                    curve_name: s.curve_name,
                    created_at: s.created_at?,
                    expires_at: s.expires_at,
                    is_revoked: s.is_revoked,
                    is_secret_key_available: s.is_secret_key_available?,
                    key_usages: s.key_usages,
                })
            })
            .collect::<Option<Vec<_>>>()?;
        let f = self.fields;
        Some(KeyRecord {
            key_id: f.key_id?,
            fingerprint: f.fingerprint?,
            keygrip: f.keygrip?,
            curve_name: f.curve_name,
            user_ids,
            created_at: f.created_at?,
            expires_at: f.expires_at,
            is_revoked: f.is_revoked,
            is_secret_key_available: f.is_secret_key_available?,
            key_usages: f.key_usages,
            is_ultimately_trusted: self.is_ultimately_trusted,
            subkeys,
        })
    }
}

/// Parse a colon-delimited key listing into key records.
///
/// Accepts both secret (`sec`/`ssb`) and public (`pub`/`sub`) listings;
/// keys from a public listing never have secret material available.
/// Empty input yields an empty list without further work.
///
/// # Errors
/// * [`Error::Invariant`] if a continuation record appears before any key
/// * [`Error::Parse`] if a user ID or timestamp is malformed or a required
///   field is never filled in
///
/// # Example
/// ```
/// let listing = "\
/// sec:u:255:22:1111111111111111:1700000000::::::cC:::+::ed25519:::0:
/// fpr:::::::::AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111:
/// grp:::::::::0123456789ABCDEF0123456789ABCDEF01234567:
/// uid:u::::1700000000::HASH::alice <alice@example.com>::::::::::0:
/// ";
/// let keys = wecansign::parse_listing(listing).unwrap();
/// assert_eq!(keys.len(), 1);
/// assert_eq!(keys[0].user_ids[0].email, "alice@example.com");
/// ```
pub fn parse_listing(listing: &str) -> Result<Vec<KeyRecord>> {
    if listing.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut builders: Vec<KeyRecordBuilder> = Vec::new();
    let mut lookback = Lookback::default();

    for line in listing.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(':').collect();
        let record = RecordType::from_tag(fields[FIELD_TYPE]);
        if record == RecordType::Other {
            lookback.push(record);
            continue;
        }

        if let RecordType::Primary { secret } = record {
            let key_fields = KeyFields::from_record(&fields, secret)
                .map_err(|bad| Error::parse(format!("{} in: {}", bad, line), &builders))?;
            builders.push(KeyRecordBuilder {
                fields: key_fields,
                is_ultimately_trusted: field(&fields, FIELD_OWNER_TRUST) == Some("u"),
                user_ids: Vec::new(),
                subkeys: Vec::new(),
            });
            lookback.push(record);
            continue;
        }

        if builders.is_empty() {
            return Err(Error::Invariant(format!(
                "{} record found without an open key record",
                fields[FIELD_TYPE]
            )));
        }

        match record {
            RecordType::UserId => {
                let uid = parse_user_id(&fields).ok_or_else(|| {
                    Error::parse(format!("malformed user id record: {}", line), &builders)
                })?;
                if let Some(current) = builders.last_mut() {
                    current.user_ids.push(uid);
                }
            }
            RecordType::Subkey { secret } => {
                let subkey = KeyFields::from_record(&fields, secret)
                    .map_err(|bad| Error::parse(format!("{} in: {}", bad, line), &builders))?;
                if let Some(current) = builders.last_mut() {
                    current.subkeys.push(subkey);
                }
            }
            RecordType::Fingerprint => {
                let value = field(&fields, FIELD_USER_ID).map(normalize_hex);
                if let Some(target) = attach_target(&mut builders, lookback.previous) {
                    target.fingerprint = value;
                }
            }
            RecordType::Keygrip => {
                let value = field(&fields, FIELD_USER_ID).map(normalize_hex);
                if let Some(target) = attach_target(&mut builders, lookback.before_previous) {
                    target.keygrip = value;
                }
            }
            RecordType::Primary { .. } | RecordType::Other => {}
        }
        lookback.push(record);
    }

    let missing: Vec<String> = builders
        .iter()
        .enumerate()
        .flat_map(|(i, b)| b.missing_fields(i))
        .collect();
    if !missing.is_empty() {
        return Err(Error::parse(
            format!("some properties are missing: {}", missing.join(", ")),
            &builders,
        ));
    }

    builders
        .into_iter()
        .map(|b| {
            b.build()
                .ok_or_else(|| Error::Invariant("complete key record failed to build".to_string()))
        })
        .collect()
}

/// Resolve the key fields a trailing `fpr`/`grp` record belongs to.
fn attach_target(
    builders: &mut [KeyRecordBuilder],
    owner: Option<RecordType>,
) -> Option<&mut KeyFields> {
    let current = builders.last_mut()?;
    match Owner::of(owner) {
        Owner::Primary => Some(&mut current.fields),
        Owner::Subkey => current.subkeys.last_mut(),
        Owner::Unknown => None,
    }
}

fn parse_user_id(fields: &[&str]) -> Option<UserIdBuilder> {
    let raw = unescape_field(field(fields, FIELD_USER_ID)?);
    let raw = raw.trim();
    let (name, comment, email) = match USER_ID.captures(raw) {
        Some(caps) => (
            caps.name("name").map(|m| m.as_str().to_string()),
            caps.name("comment").map(|m| m.as_str().to_string()),
            caps.name("email").map(|m| m.as_str().to_string()),
        ),
        // A bare address is a common user ID form
        None if raw.contains('@') && !raw.contains(' ') => {
            (Some(String::new()), None, Some(raw.to_string()))
        }
        None => return None,
    };
    Some(UserIdBuilder {
        name,
        comment,
        email,
        hash: field(fields, FIELD_UID_HASH).map(str::to_string),
        is_revoked: field(fields, FIELD_VALIDITY) == Some("r"),
    })
}

/// Secret availability from the token field.
///
/// `+` means the secret key is present, `#` means only a stub exists; a
/// serial number means the key lives on a smartcard, which can still sign.
/// Public listings carry no token and never have secret material.
fn secret_availability(fields: &[&str], secret_listing: bool) -> Option<bool> {
    if !secret_listing {
        return Some(false);
    }
    match field(fields, FIELD_TOKEN)? {
        "+" => Some(true),
        "#" => Some(false),
        _serial => Some(true),
    }
}

/// A non-empty field value.
fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|f| !f.is_empty())
}

/// An optional timestamp field. Empty is `None`; anything unreadable is an
/// error naming the field.
fn timestamp(
    fields: &[&str],
    index: usize,
    name: &str,
) -> std::result::Result<Option<DateTime<Utc>>, String> {
    match field(fields, index) {
        None => Ok(None),
        Some(value) => parse_timestamp(value)
            .map(Some)
            .ok_or_else(|| format!("unreadable {} '{}'", name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyUsage;

    const LISTING: &str = "\
sec:u:255:22:1111111111111111:1700000000:::u:::scESC:::+::ed25519:::0:
fpr:::::::::AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111:
grp:::::::::0000000000000000000000000000000000000001:
uid:u::::1700000000::UIDHASH1::alice (work) <alice@example.com>::::::::::0:
uid:r::::1700000000::UIDHASH2::Alice Smith <old@example.com>::::::::::0:
ssb:u:255:22:2222222222222222:1700000000::::::s:::+::ed25519::
fpr:::::::::BBBBBBBBBBBBBBBBBBBBBBBB2222222222222222:
grp:::::::::0000000000000000000000000000000000000002:
ssb:e:255:18:3333333333333333:1600000000:1650000000:::::e:::#::cv25519::
fpr:::::::::CCCCCCCCCCCCCCCCCCCCCCCC3333333333333333:
grp:::::::::0000000000000000000000000000000000000003:
sec:-:3072:1:4444444444444444:1500000000:::-:::scESC:::#::::::0:
fpr:::::::::DDDDDDDDDDDDDDDDDDDDDDDD4444444444444444:
grp:::::::::0000000000000000000000000000000000000004:
uid:-::::1500000000::UIDHASH3::bob@example.com::::::::::0:
";

    #[test]
    fn test_parse_listing_structure() {
        let keys = parse_listing(LISTING).unwrap();
        assert_eq!(keys.len(), 2);

        let alice = &keys[0];
        assert_eq!(alice.key_id, "1111111111111111");
        assert_eq!(alice.fingerprint, "AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111");
        assert_eq!(alice.keygrip, "0000000000000000000000000000000000000001");
        assert_eq!(alice.curve_name.as_deref(), Some("ed25519"));
        assert!(alice.is_ultimately_trusted);
        assert!(alice.is_secret_key_available);
        assert_eq!(alice.key_usages.to_string(), "sc");
        assert_eq!(alice.user_ids.len(), 2);
        assert_eq!(alice.user_ids[0].name, "alice");
        assert_eq!(alice.user_ids[0].comment.as_deref(), Some("work"));
        assert_eq!(alice.user_ids[0].email, "alice@example.com");
        assert!(alice.user_ids[1].is_revoked);
        assert_eq!(alice.user_ids[1].name, "Alice Smith");

        assert_eq!(alice.subkeys.len(), 2);
        let sign = &alice.subkeys[0];
        assert_eq!(sign.keygrip, "0000000000000000000000000000000000000002");
        assert!(sign.key_usages.is_only(KeyUsage::Sign));
        assert!(sign.expires_at.is_none());
        let enc = &alice.subkeys[1];
        assert!(!enc.is_secret_key_available);
        assert_eq!(enc.expires_at.unwrap().timestamp(), 1_650_000_000);
        assert_eq!(enc.fingerprint, "CCCCCCCCCCCCCCCCCCCCCCCC3333333333333333");

        let bob = &keys[1];
        assert!(bob.curve_name.is_none());
        assert!(!bob.is_secret_key_available);
        assert!(!bob.is_ultimately_trusted);
        assert_eq!(bob.user_ids[0].email, "bob@example.com");
        assert!(bob.subkeys.is_empty());
    }

    #[test]
    fn test_one_record_per_primary() {
        let keys = parse_listing(LISTING).unwrap();
        let sec_count = LISTING.lines().filter(|l| l.starts_with("sec:")).count();
        assert_eq!(keys.len(), sec_count);
    }

    #[test]
    fn test_empty_listing() {
        assert!(parse_listing("").unwrap().is_empty());
        assert!(parse_listing("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn test_public_listing() {
        let listing = "\
tru::1:1700000000:0:3:1:5
pub:r:255:22:5555555555555555:1700000000:::-:::scSC::::::ed25519:::0:
fpr:::::::::EEEEEEEEEEEEEEEEEEEEEEEE5555555555555555:
grp:::::::::0000000000000000000000000000000000000005:
uid:r::::1700000000::UIDHASH::carol <carol@example.com>::::::::::0:
sub:r:255:22:6666666666666666:1700000000::::::s:::::ed25519:
fpr:::::::::FFFFFFFFFFFFFFFFFFFFFFFF6666666666666666:
grp:::::::::0000000000000000000000000000000000000006:
";
        let keys = parse_listing(listing).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].is_revoked);
        assert!(!keys[0].is_secret_key_available);
        assert!(!keys[0].subkeys[0].is_secret_key_available);
    }

    #[test]
    fn test_missing_keygrip_is_fatal() {
        let listing = "\
sec:u:255:22:1111111111111111:1700000000:::u:::cC:::+::ed25519:::0:
fpr:::::::::AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111:
uid:u::::1700000000::UIDHASH1::alice <alice@example.com>::::::::::0:
";
        match parse_listing(listing) {
            Err(Error::Parse { message, partial }) => {
                assert!(message.contains("keys[0].keygrip"));
                assert!(partial.contains("AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_orphan_record_is_invariant_violation() {
        let listing = "uid:u::::1700000000::UIDHASH1::alice <alice@example.com>::::::::::0:\n";
        assert!(matches!(parse_listing(listing), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_unreadable_expiry_is_fatal() {
        let listing = "\
sec:u:255:22:1111111111111111:1700000000:::u:::cC:::+::ed25519:::0:
fpr:::::::::AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111:
grp:::::::::0000000000000000000000000000000000000001:
uid:u::::1700000000::UIDHASH1::alice <alice@example.com>::::::::::0:
ssb:u:255:22:2222222222222222:1700000000:soon:::::s:::+::ed25519::
fpr:::::::::BBBBBBBBBBBBBBBBBBBBBBBB2222222222222222:
grp:::::::::0000000000000000000000000000000000000002:
";
        match parse_listing(listing) {
            Err(Error::Parse { message, partial }) => {
                assert!(message.contains("unreadable expires_at 'soon'"));
                assert!(partial.contains("1111111111111111"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }

        let bad_created = "sec:u:255:22:1111111111111111:yesterday:::u:::cC:::+::ed25519:::0:\n";
        match parse_listing(bad_created) {
            Err(Error::Parse { message, .. }) => assert!(message.contains("created_at")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_user_id() {
        let listing = "\
sec:u:255:22:1111111111111111:1700000000:::u:::cC:::+::ed25519:::0:
fpr:::::::::AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111:
grp:::::::::0000000000000000000000000000000000000001:
uid:u::::1700000000::UIDHASH1::no address here::::::::::0:
";
        assert!(matches!(parse_listing(listing), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_escaped_user_id() {
        let listing = "\
sec:u:255:22:1111111111111111:1700000000:::u:::cC:::+::ed25519:::0:
fpr:::::::::AAAAAAAAAAAAAAAAAAAAAAAA1111111111111111:
grp:::::::::0000000000000000000000000000000000000001:
uid:u::::1700000000::UIDHASH1::team\\x3a ops <ops@example.com>::::::::::0:
";
        let keys = parse_listing(listing).unwrap();
        assert_eq!(keys[0].user_ids[0].name, "team: ops");
    }
}
