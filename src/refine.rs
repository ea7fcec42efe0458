//! Key refinement.
//!
//! A candidate key is brought in line with the signing policy by an
//! ordered table of rules. Each rule has a predicate on the current key,
//! an optional yes/no question and an action. Declining a mandatory rule
//! aborts the refinement and the caller generates a new key instead;
//! declining an optional rule only skips it.
//!
//! Every action that changes the key re-reads it from the keyring. A key
//! that already satisfies every rule goes through without any question or
//! mutation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::error::{Error, Result};
use crate::import::{import_secret_key, require};
use crate::internal::policy::{
    has_recommended_curve, is_expired, is_recommended_subkey, signing_subkeys, SigningFilter,
    RECOMMENDED_CURVE,
};
use crate::keyring::Keyring;
use crate::prompt::Console;
use crate::types::{KeyRecord, KeyUsage, SubkeyRecord};

/// Result of [`refine_key`].
#[derive(Debug, Clone)]
pub enum Refinement {
    /// The key complies with the policy.
    Refined(RefinedKey),
    /// Refinement stopped; a new key should be generated.
    Aborted(AbortReason),
}

/// A policy-compliant key and the subkey chosen for signing.
#[derive(Debug, Clone)]
pub struct RefinedKey {
    pub key: KeyRecord,
    pub subkey: SubkeyRecord,
    /// True if any action changed the key material
    pub secret_modified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The user asked for a new primary key.
    RegenerateRequested,
    /// The user declined the named mandatory rule.
    Declined(&'static str),
}

/// How a rule reacts to being declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Necessity {
    /// Declining aborts the refinement.
    Mandatory,
    /// Declining skips the rule.
    Optional,
    /// Accepting aborts the refinement so that a new key is generated.
    Regenerate,
}

/// The key under refinement, as seen by rule predicates.
#[derive(Debug, Clone)]
pub(crate) struct RefineState {
    pub key: KeyRecord,
    /// Fingerprint of the selected signing subkey
    pub subkey: Option<String>,
    pub email: String,
    pub now: DateTime<Utc>,
}

impl RefineState {
    fn current_subkey(&self) -> Option<&SubkeyRecord> {
        self.subkey.as_deref().and_then(|fpr| self.key.subkey(fpr))
    }

    fn signing_subkeys(&self, filter: SigningFilter) -> Vec<&SubkeyRecord> {
        signing_subkeys(&self.key, filter, self.now)
    }

    fn expired_signing_subkeys(&self) -> Vec<&SubkeyRecord> {
        self.signing_subkeys(SigningFilter {
            allow_expired: true,
            ..Default::default()
        })
        .into_iter()
        .filter(|s| is_expired(s.expires_at, self.now))
        .collect()
    }

    fn other_live_subkeys(&self) -> Vec<&SubkeyRecord> {
        self.key
            .subkeys
            .iter()
            .filter(|s| !s.is_revoked)
            .filter(|s| Some(s.fingerprint.as_str()) != self.subkey.as_deref())
            .collect()
    }
}

/// One step of the refinement.
pub(crate) struct Rule {
    pub name: &'static str,
    pub necessity: Necessity,
    pub applies: fn(&RefineState) -> bool,
    /// Warning shown when the rule applies
    pub notice: fn(&RefineState) -> String,
    /// Asked before acting; `None` acts without asking
    pub question: Option<&'static str>,
    /// Returns false if the action could not be carried out
    pub apply: fn(&mut Refiner<'_, '_>) -> Result<bool>,
}

const REMOVE_EXPIRY: Option<&str> = Some("Do you want to remove the expire date?");
const REMOVE_USAGES: Option<&str> = Some("Do you want to remove other key usages?");

/// The refinement rules, in evaluation order.
pub(crate) static RULES: &[Rule] = &[
    Rule {
        name: "primary-curve",
        necessity: Necessity::Regenerate,
        applies: |s| !has_recommended_curve(&s.key),
        notice: |s| {
            format!(
                "Primary key is using {}. It is recommended to use {}.",
                s.key.curve_name.as_deref().unwrap_or("no curve"),
                RECOMMENDED_CURVE
            )
        },
        question: Some("Do you want to generate a new primary key?"),
        apply: |_| Ok(true),
    },
    Rule {
        name: "expired-primary",
        necessity: Necessity::Mandatory,
        applies: |s| is_expired(s.key.expires_at, s.now),
        notice: |_| "Key is expired. Remove the expire date to use the key.".to_string(),
        question: REMOVE_EXPIRY,
        apply: |r| r.clear_primary_expiry(),
    },
    Rule {
        name: "user-id",
        necessity: Necessity::Mandatory,
        applies: |s| !s.key.has_email(&s.email),
        notice: |s| {
            format!(
                "GPG key does not include the no-reply email ({}). Adding a new user ID...",
                s.email
            )
        },
        question: None,
        apply: |r| r.add_user_id(),
    },
    Rule {
        name: "signing-secret",
        necessity: Necessity::Optional,
        applies: |s| {
            let all = SigningFilter {
                allow_no_secret: true,
                allow_expired: true,
            };
            let with_secret = SigningFilter {
                allow_expired: true,
                ..Default::default()
            };
            // no signing subkeys at all, as on a freshly generated key, is
            // left to add-subkey without offering an import
            !s.signing_subkeys(all).is_empty() && s.signing_subkeys(with_secret).is_empty()
        },
        notice: |_| {
            "GPG key has subkeys for signing but none of their secret keys are available."
                .to_string()
        },
        question: None,
        apply: |r| r.import_signing_secret(),
    },
    Rule {
        name: "expired-signing-subkeys",
        necessity: Necessity::Optional,
        applies: |s| {
            s.signing_subkeys(SigningFilter::default()).is_empty()
                && !s.expired_signing_subkeys().is_empty()
        },
        notice: |_| {
            "All subkeys for signing are expired. Remove the expire date to use the key or add a new subkey."
                .to_string()
        },
        question: REMOVE_EXPIRY,
        apply: |r| r.clear_signing_subkey_expiry(),
    },
    Rule {
        name: "select-subkey",
        necessity: Necessity::Optional,
        applies: |s| !s.current_subkey().is_some_and(is_recommended_subkey),
        notice: |_| {
            "No subkey with the recommended settings is selected for signing.".to_string()
        },
        question: None,
        apply: |r| r.select_subkey(),
    },
    Rule {
        name: "add-subkey",
        necessity: Necessity::Mandatory,
        applies: |s| s.current_subkey().is_none(),
        notice: |_| "GPG key does not have a subkey for signing. Adding a new subkey...".to_string(),
        question: None,
        apply: |r| r.add_subkey(),
    },
    Rule {
        name: "primary-expiry",
        necessity: Necessity::Optional,
        applies: |s| s.key.expires_at.is_some(),
        notice: |_| {
            "Primary key is set to expire. It is recommended to remove the expire date."
                .to_string()
        },
        question: REMOVE_EXPIRY,
        apply: |r| r.clear_primary_expiry(),
    },
    Rule {
        name: "subkey-curve",
        necessity: Necessity::Optional,
        applies: |s| {
            s.current_subkey()
                .is_some_and(|sub| sub.curve_name.as_deref() != Some(RECOMMENDED_CURVE))
        },
        notice: |s| {
            format!(
                "Subkey is using {}. It is recommended to use {}.",
                s.current_subkey()
                    .and_then(|sub| sub.curve_name.as_deref())
                    .unwrap_or("no curve"),
                RECOMMENDED_CURVE
            )
        },
        question: Some("Do you want to generate a new subkey?"),
        apply: |r| r.add_subkey(),
    },
    Rule {
        name: "subkey-expiry",
        necessity: Necessity::Optional,
        applies: |s| s.current_subkey().is_some_and(|sub| sub.expires_at.is_some()),
        notice: |_| {
            "Subkey is set to expire. It is recommended to remove the expire date.".to_string()
        },
        question: REMOVE_EXPIRY,
        apply: |r| r.clear_subkey_expiry(),
    },
    Rule {
        name: "subkey-usage",
        necessity: Necessity::Optional,
        applies: |s| {
            s.current_subkey()
                .is_some_and(|sub| !sub.key_usages.is_only(KeyUsage::Sign))
        },
        notice: |s| {
            let others = s
                .current_subkey()
                .map(|sub| join_usages(&sub.key_usages.others_than(KeyUsage::Sign)))
                .unwrap_or_default();
            format!(
                "Subkey key usages include more than signing: {}. It is not recommended to have other usages.",
                others
            )
        },
        question: REMOVE_USAGES,
        apply: |r| r.restrict_subkey_usage(),
    },
    Rule {
        name: "revoke-other-subkeys",
        necessity: Necessity::Optional,
        applies: |s| !s.other_live_subkeys().is_empty(),
        notice: |_| {
            "GPG key includes multiple subkeys. It is recommended to revoke other subkeys."
                .to_string()
        },
        question: Some(
            "Do you want to revoke other subkeys? Commits associated with the subkeys remain verified.",
        ),
        apply: |r| r.revoke_other_subkeys(),
    },
    Rule {
        name: "primary-usage",
        necessity: Necessity::Optional,
        applies: |s| !s.key.key_usages.is_only(KeyUsage::Certify),
        notice: |s| {
            format!(
                "Primary key usages include more than certification: {}. It is not recommended to have other usages.",
                join_usages(&s.key.key_usages.others_than(KeyUsage::Certify))
            )
        },
        question: REMOVE_USAGES,
        apply: |r| r.restrict_primary_usage(),
    },
    Rule {
        name: "ultimate-trust",
        necessity: Necessity::Optional,
        applies: |s| !s.key.is_ultimately_trusted,
        notice: |_| "GPG key is not ultimately trusted.".to_string(),
        question: Some("Do you want to trust the key ultimately?"),
        apply: |r| r.trust_ultimately(),
    },
];

fn join_usages(usages: &[KeyUsage]) -> String {
    usages
        .iter()
        .map(|u| u.letter().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Refinement in progress: the state plus the keyring and console the
/// actions need.
pub(crate) struct Refiner<'g, 'c> {
    keyring: Keyring<'g>,
    console: &'c mut Console,
    identity: String,
    state: RefineState,
    secret_modified: bool,
}

impl Refiner<'_, '_> {
    fn fingerprint(&self) -> String {
        self.state.key.fingerprint.clone()
    }

    /// Re-read the key after a mutation.
    fn update(&mut self, modifies_secret: bool) -> Result<()> {
        self.state.key = self.keyring.reread(&self.state.key)?;
        if modifies_secret {
            self.secret_modified = true;
        }
        Ok(())
    }

    /// Make sure the primary secret key is available, offering an import
    /// of the same key otherwise.
    fn ensure_secret(&mut self, reason: &str) -> Result<bool> {
        if self.state.key.is_secret_key_available {
            return Ok(true);
        }
        info!(
            "Primary secret key of the key {} is not available.",
            self.state.key.key_id
        );
        let fingerprint = self.fingerprint();
        let imported = import_secret_key(
            &self.keyring,
            self.console,
            &format!("Import the key for {}?", reason),
            |key| {
                require(key.fingerprint.eq_ignore_ascii_case(&fingerprint), || {
                    "Imported key mismatched.".to_string()
                })
            },
        )?;
        match imported {
            Some(key) => {
                self.state.key = key;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_primary_expiry(&mut self) -> Result<bool> {
        if !self.ensure_secret("removing expire date")? {
            return Ok(false);
        }
        self.keyring.gpg().clear_expiry(&self.fingerprint(), &[])?;
        self.update(true)?;
        Ok(true)
    }

    fn add_user_id(&mut self) -> Result<bool> {
        if !self.ensure_secret("adding user ID")? {
            return Ok(false);
        }
        let user_id = format!("{} <{}>", self.identity, self.state.email);
        self.keyring.gpg().add_user_id(&self.fingerprint(), &user_id)?;
        self.update(true)?;
        Ok(true)
    }

    fn import_signing_secret(&mut self) -> Result<bool> {
        let fingerprint = self.fingerprint();
        let now = self.state.now;
        let imported = import_secret_key(&self.keyring, self.console, "Import a secret key?", |key| {
            let has_signing_secret = !signing_subkeys(
                key,
                SigningFilter {
                    allow_expired: true,
                    ..Default::default()
                },
                now,
            )
            .is_empty();
            require(
                key.fingerprint.eq_ignore_ascii_case(&fingerprint) && has_signing_secret,
                || "Imported key mismatched or did not include secret subkey.".to_string(),
            )
        })?;
        match imported {
            Some(key) => {
                self.state.key = key;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_signing_subkey_expiry(&mut self) -> Result<bool> {
        if !self.ensure_secret("removing expire date")? {
            return Ok(false);
        }
        let expired: Vec<String> = self
            .state
            .expired_signing_subkeys()
            .iter()
            .map(|s| s.fingerprint.clone())
            .collect();
        self.keyring.gpg().clear_expiry(&self.fingerprint(), &expired)?;
        self.update(true)?;
        Ok(true)
    }

    /// Offer the recommended signing subkeys first, then the other usable
    /// ones. Leaves no subkey selected if nothing was picked.
    fn select_subkey(&mut self) -> Result<bool> {
        let usable: Vec<SubkeyRecord> = self
            .state
            .signing_subkeys(SigningFilter::default())
            .into_iter()
            .cloned()
            .collect();
        let (recommended, others): (Vec<SubkeyRecord>, Vec<SubkeyRecord>) =
            usable.into_iter().partition(is_recommended_subkey);

        let mut selected = self
            .console
            .select(
                "Multiple subkeys for signing with recommended settings found.",
                &recommended,
                |s| format!("{} - created at {}", s.key_id, s.created_at.to_rfc3339()),
            )?
            .map(|s| s.fingerprint.clone());
        if selected.is_none() {
            selected = self
                .console
                .select("Multiple subkeys for signing found.", &others, |s| {
                    format!(
                        "{}/{} - created at {} - {}",
                        s.curve_name.as_deref().unwrap_or("unknown"),
                        s.key_id,
                        s.created_at.to_rfc3339(),
                        join_usages(&s.key_usages.iter().collect::<Vec<_>>())
                    )
                })?
                .map(|s| s.fingerprint.clone());
        }
        self.state.subkey = selected;
        Ok(true)
    }

    fn add_subkey(&mut self) -> Result<bool> {
        info!("Adding a new subkey for signing...");
        if !self.ensure_secret("adding subkey")? {
            return Ok(false);
        }
        let before: HashSet<String> = self
            .state
            .key
            .subkeys
            .iter()
            .map(|s| s.fingerprint.clone())
            .collect();
        self.keyring
            .gpg()
            .add_signing_subkey(&self.fingerprint(), RECOMMENDED_CURVE)?;
        self.update(true)?;
        let added = self
            .state
            .key
            .subkeys
            .iter()
            .find(|s| !before.contains(&s.fingerprint))
            .ok_or_else(|| Error::Invariant("added subkey not found in the keyring".to_string()))?;
        self.state.subkey = Some(added.fingerprint.clone());
        Ok(true)
    }

    fn selected_subkey(&self) -> Result<SubkeyRecord> {
        self.state
            .current_subkey()
            .cloned()
            .ok_or_else(|| Error::Invariant("no signing subkey selected".to_string()))
    }

    fn clear_subkey_expiry(&mut self) -> Result<bool> {
        if !self.ensure_secret("removing expire date")? {
            return Ok(false);
        }
        let subkey = self.selected_subkey()?;
        self.keyring
            .gpg()
            .clear_expiry(&self.fingerprint(), &[subkey.fingerprint])?;
        self.update(true)?;
        Ok(true)
    }

    fn restrict_subkey_usage(&mut self) -> Result<bool> {
        if !self.ensure_secret("removing key usages")? {
            return Ok(false);
        }
        let subkey = self.selected_subkey()?;
        self.keyring.gpg().change_usage(
            &self.fingerprint(),
            Some(&subkey.fingerprint),
            &subkey.key_usages.others_than(KeyUsage::Sign),
        )?;
        self.update(true)?;
        Ok(true)
    }

    fn revoke_other_subkeys(&mut self) -> Result<bool> {
        if !self.ensure_secret("revoking subkeys")? {
            return Ok(false);
        }
        let others: Vec<String> = self
            .state
            .other_live_subkeys()
            .iter()
            .map(|s| s.fingerprint.clone())
            .collect();
        self.keyring.gpg().revoke_subkeys(&self.fingerprint(), &others)?;
        self.update(true)?;
        Ok(true)
    }

    fn restrict_primary_usage(&mut self) -> Result<bool> {
        if !self.ensure_secret("removing key usages")? {
            return Ok(false);
        }
        let toggles = self.state.key.key_usages.others_than(KeyUsage::Certify);
        self.keyring
            .gpg()
            .change_usage(&self.fingerprint(), None, &toggles)?;
        self.update(true)?;
        Ok(true)
    }

    fn trust_ultimately(&mut self) -> Result<bool> {
        self.keyring.gpg().set_ultimate_trust(&self.fingerprint())?;
        // owner trust lives in the trust database, not in the key
        self.update(false)?;
        Ok(true)
    }
}

/// Refine `key` until it complies with the signing policy.
///
/// # Arguments
/// * `keyring` - The real keyring
/// * `console` - Interactive console
/// * `key` - The candidate key
/// * `subkey` - Fingerprint of the subkey currently used for signing, if any
/// * `identity` - Name of the user ID added when `email` is missing
/// * `email` - Email the key must carry
///
/// # Returns
/// The refined key, or [`Refinement::Aborted`] if a mandatory rule was
/// declined or a new primary key was requested.
pub fn refine_key(
    keyring: &Keyring<'_>,
    console: &mut Console,
    key: KeyRecord,
    subkey: Option<&str>,
    identity: &str,
    email: &str,
) -> Result<Refinement> {
    let mut refiner = Refiner {
        keyring: *keyring,
        console,
        identity: identity.to_string(),
        state: RefineState {
            key,
            subkey: subkey.map(str::to_string),
            email: email.to_string(),
            now: Utc::now(),
        },
        secret_modified: false,
    };

    for rule in RULES {
        if !(rule.applies)(&refiner.state) {
            continue;
        }
        warn!("{}", (rule.notice)(&refiner.state));
        let accepted = match rule.question {
            Some(question) => refiner.console.ask_yes_no(question)?,
            None => true,
        };
        if rule.necessity == Necessity::Regenerate {
            if accepted {
                return Ok(Refinement::Aborted(AbortReason::RegenerateRequested));
            }
            continue;
        }
        let done = accepted && (rule.apply)(&mut refiner)?;
        if !done && rule.necessity == Necessity::Mandatory {
            info!("Refinement of {} aborted at {}", refiner.state.key.key_id, rule.name);
            return Ok(Refinement::Aborted(AbortReason::Declined(rule.name)));
        }
    }

    let subkey = refiner.selected_subkey()?;
    Ok(Refinement::Refined(RefinedKey {
        key: refiner.state.key,
        subkey,
        secret_modified: refiner.secret_modified,
    }))
}
