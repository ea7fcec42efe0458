//! # WeCanSign
//!
//! Keeps a workstation's commit-signing identity in order. A run
//! reconciles three sources of truth into one least-privilege signing
//! identity:
//!
//! - **The GnuPG keyring**: secret keys are read from the colon listing of
//!   `gpg` and refined into a certify-only primary key with a sign-only
//!   subkey on the recommended curve
//! - **The git configuration**: `user.signingkey` ends up pinned to the
//!   signing subkey
//! - **The remote account**: the finalized public key is registered and
//!   superseded keys are revoked
//!
//! At the end of a run the primary secret key is printed once for an
//! offline backup, together with a revocation certificate, and deleted
//! from the keyring.
//!
//! ## Quick Start
//!
//! ```no_run
//! use wecansign::*;
//!
//! let env = EnvSnapshot::capture();
//! let settings = Settings::with_defaults("alice", "alice@users.noreply.github.com", &env)?;
//! let gpg = GpgCommand::new("gpg", &settings.gnupg_home, env.clone());
//! let target = GitCli::resolve_target("git", None, &env)?;
//! let git = GitCli::new("git", target, env.clone());
//! # #[cfg(feature = "network")]
//! # {
//! # let token = secrecy::SecretString::from(String::from("token"));
//! let remote = GithubKeys::new(&settings.api_url, token)?;
//! let mut console = Console::stdio();
//! match synchronize_signing_identity(&gpg, &git, &remote, &mut console, &settings)? {
//!     SyncOutcome::Synchronized(report) => println!("signing with {}", report.signing_key),
//!     SyncOutcome::Aborted(reason) => println!("aborted: {:?}", reason),
//! }
//! # }
//! # Ok::<(), wecansign::Error>(())
//! ```
//!
//! ## Features
//!
//! - `network`: the REST client for the remote key registry (default)
//!
//! ## Design
//!
//! All cryptography is delegated to `gpg`; this crate only invokes it and
//! re-reads the keyring after every change. The keyring tool, git and the
//! remote registry sit behind the [`GnuPg`], [`GitConfig`] and
//! [`RemoteKeyStore`] traits, and all questions go through a [`Console`]
//! reading from a substitutable [`LineSource`].

// Modules
mod error;
mod types;
mod internal;

mod armor;
mod config;
mod env;
mod git;
mod gpg;
mod hygiene;
mod import;
mod key;
mod keyring;
mod parse;
mod prompt;
mod publish;
mod reconcile;
mod refine;
mod remote;
mod sync;

#[cfg(feature = "network")]
mod network;

// Re-export error types
pub use error::{Error, Result};

// Re-export all public types
pub use types::{
    KeyEmail,
    KeyRecord,
    KeyUsage,
    KeyUsages,
    RemoteKey,
    RemoteSubkey,
    SigningKeyRef,
    SubkeyRecord,
    UserId,
};

pub use internal::policy::RECOMMENDED_CURVE;

// Re-export parsing functions
pub use parse::parse_listing;

// Re-export collaborators
pub use env::{EnvSnapshot, FILTERED_VARS};
pub use gpg::{GnuPg, GpgCommand};
pub use git::{ConfigTarget, GitCli, GitConfig};
pub use remote::{active_keys, RemoteKeyStore};
pub use config::{default_gnupg_home, default_key_title, Settings, DEFAULT_API_URL};

// Re-export keyring access
pub use keyring::{EphemeralHome, Keyring};

// Re-export prompts
pub use prompt::{
    ArmorMarkers,
    Console,
    LineSource,
    PastedBlock,
    ScriptedLines,
    StdinLines,
    PUBLIC_KEY_MARKERS,
    SECRET_KEY_MARKERS,
};

// Re-export key lifecycle functions
pub use armor::{inspect_secret_block, ArmorKind};
pub use import::{import_secret_key, require};
pub use reconcile::{find_candidate, Candidate};
pub use refine::{refine_key, AbortReason, RefinedKey, Refinement};
pub use key::generate_key;
pub use publish::{publish_key, revoke_stale_keys};
pub use hygiene::{backup_and_destroy, configure_signing_key, private_key_path, secure_delete};
pub use sync::{synchronize_signing_identity, SyncOutcome, SyncReport};

// Re-export network client when feature is enabled
#[cfg(feature = "network")]
pub use network::{AccountIdentity, GithubKeys, NO_REPLY_DOMAIN};
