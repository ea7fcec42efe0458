//! Remote API client.
//!
//! This module talks to a GitHub-compatible REST API to manage the GPG
//! keys registered to the authenticated account, and to look up the
//! account login and its provider-issued no-reply email.

use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::remote::RemoteKeyStore;
use crate::types::{KeyEmail, RemoteKey};

/// Suffix of the provider-issued no-reply addresses.
pub const NO_REPLY_DOMAIN: &str = "@users.noreply.github.com";

const API_VERSION: &str = "2022-11-28";

/// The authenticated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub login: String,
    /// Display name, if set
    pub name: Option<String>,
    /// The no-reply email
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
    name: Option<String>,
}

/// [`RemoteKeyStore`] over the REST API.
pub struct GithubKeys {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl GithubKeys {
    /// Create a client for `base_url` authenticating with `token`.
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. [`DEFAULT_API_URL`](crate::config::DEFAULT_API_URL)
    /// * `token` - Access token allowed to manage GPG keys
    pub fn new(base_url: &str, token: SecretString) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("wecansign/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(self.token.expose_secret())
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(Error::Api {
            status: status.as_u16(),
            message: api_message(&body),
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self
            .send(self.request(Method::GET, path))?
            .text()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Look up the account login and its no-reply email.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the account has no no-reply email.
    pub fn identity(&self) -> Result<AccountIdentity> {
        let user: User = self.get("/user")?;
        let emails: Vec<KeyEmail> = self.get("/user/emails")?;
        let email = no_reply_email(&emails).ok_or_else(|| {
            Error::Config("Failed to get the provider-issued no-reply email".to_string())
        })?;
        Ok(AccountIdentity {
            login: user.login,
            name: user.name,
            email,
        })
    }
}

impl RemoteKeyStore for GithubKeys {
    fn list_keys(&self) -> Result<Vec<RemoteKey>> {
        self.get("/user/gpg_keys")
    }

    fn add_key(&self, title: &str, armored_public_key: &str) -> Result<RemoteKey> {
        let body = serde_json::json!({
            "name": title,
            "armored_public_key": armored_public_key,
        });
        let text = self
            .send(self.request(Method::POST, "/user/gpg_keys").json(&body))?
            .text()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn delete_key(&self, id: u64) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/user/gpg_keys/{}", id)))?;
        Ok(())
    }
}

/// The first no-reply address among `emails`.
fn no_reply_email(emails: &[KeyEmail]) -> Option<String> {
    emails
        .iter()
        .map(|e| e.email.as_str())
        .find(|e| e.ends_with(NO_REPLY_DOMAIN))
        .map(str::to_string)
}

/// The `message` field of an API error body, or the body itself.
fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }
    match serde_json::from_str::<ApiError>(body) {
        Ok(e) => e.message,
        Err(_) => body.trim().to_string(),
    }
}
