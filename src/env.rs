//! Environment snapshot handed to external tools.
//!
//! The process environment is read once at startup. Access tokens are
//! dropped from the snapshot so that tools which would pick them up on
//! their own never see them. The snapshot is immutable and applied to
//! each invocation explicitly.

use std::ffi::{OsStr, OsString};
use std::process::Command;

/// Variables never forwarded to subprocesses.
pub const FILTERED_VARS: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN"];

/// An immutable copy of the environment, minus access tokens.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: Vec<(OsString, OsString)>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    /// Build a snapshot from explicit variables, applying the same filter.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| -> (OsString, OsString) { (k.into(), v.into()) })
            .filter(|(k, _)| !FILTERED_VARS.iter().any(|f| k.as_os_str() == OsStr::new(f)))
            .collect();
        Self { vars }
    }

    /// Look up a variable in the snapshot.
    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars
            .iter()
            .find(|(k, _)| k.as_os_str() == OsStr::new(key))
            .map(|(_, v)| v.as_os_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    /// Replace the environment of `command` with this snapshot.
    pub fn apply<'c>(&self, command: &'c mut Command) -> &'c mut Command {
        command.env_clear().envs(self.iter())
    }
}
