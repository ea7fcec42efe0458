//! Run settings.

use std::path::PathBuf;

use crate::env::EnvSnapshot;
use crate::error::{Error, Result};

/// Default remote API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Everything a synchronization run needs to know up front.
///
/// The access token is not part of the settings; it goes straight to the
/// remote client.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Name put in a new user ID
    pub identity: String,
    /// Email the signing key must carry
    pub email: String,
    /// GnuPG home holding the keyring
    pub gnupg_home: PathBuf,
    pub gpg_program: String,
    pub git_program: String,
    /// Git config file for the signing key; resolved from the global
    /// `include.path` when unset
    pub git_config_file: Option<PathBuf>,
    pub api_url: String,
    /// Title of keys uploaded to the remote account
    pub key_title: String,
}

impl Settings {
    /// Settings with defaults taken from `env`.
    pub fn with_defaults(identity: &str, email: &str, env: &EnvSnapshot) -> Result<Self> {
        Ok(Self {
            identity: identity.to_string(),
            email: email.to_string(),
            gnupg_home: default_gnupg_home(env)?,
            gpg_program: "gpg".to_string(),
            git_program: "git".to_string(),
            git_config_file: None,
            api_url: DEFAULT_API_URL.to_string(),
            key_title: default_key_title(env),
        })
    }

    /// Reject settings a run cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(Error::Config("identity must not be empty".to_string()));
        }
        if self.identity.contains(['<', '>']) {
            return Err(Error::Config(format!(
                "identity must not contain angle brackets: {}",
                self.identity
            )));
        }
        let valid_email = self
            .email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !valid_email {
            return Err(Error::Config(format!("invalid email: {}", self.email)));
        }
        if self.gnupg_home.as_os_str().is_empty() {
            return Err(Error::Config("GnuPG home must not be empty".to_string()));
        }
        if self.key_title.trim().is_empty() {
            return Err(Error::Config("key title must not be empty".to_string()));
        }
        Ok(())
    }

    /// The user ID a new key or user ID is created with.
    pub fn user_id(&self) -> String {
        format!("{} <{}>", self.identity, self.email)
    }
}

/// `$GNUPGHOME`, else `~/.gnupg`.
pub fn default_gnupg_home(env: &EnvSnapshot) -> Result<PathBuf> {
    if let Some(home) = env.get("GNUPGHOME").filter(|h| !h.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".gnupg"))
        .ok_or_else(|| Error::Config("cannot determine the home directory".to_string()))
}

/// `<user>@<host>`, naming the machine a key was uploaded from.
pub fn default_key_title(env: &EnvSnapshot) -> String {
    let user = ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|name| env.get(name))
        .map(|v| v.to_string_lossy().into_owned())
        .unwrap_or_else(|| "user".to_string());
    let host = env
        .get("HOSTNAME")
        .map(|v| v.to_string_lossy().into_owned())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", user, host)
}
