//! Keyring tool operations.
//!
//! All cryptography is delegated to GnuPG. [`GnuPg`] names the operations
//! the synchronization needs; [`GpgCommand`] implements them by running the
//! `gpg` binary with an explicit home directory and environment snapshot.
//! Scripted `--edit-key` sessions cover what the `--quick-*` commands do
//! not (usage changes, revocation, owner trust).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;
use secrecy::SecretString;

use crate::env::EnvSnapshot;
use crate::error::{Error, Result};
use crate::types::KeyUsage;

/// Answers to the revocation dialogue: confirm, reason "key is no longer
/// used", empty description, confirm the reason.
const REVOCATION_ANSWERS: &[&str] = &["y", "3", "", "y"];

/// Answers to the `trust` dialogue: ultimate trust, confirm.
const ULTIMATE_TRUST_ANSWERS: &[&str] = &["5", "y"];

/// Operations on a GnuPG keyring.
///
/// Every mutating operation leaves the keyring in a state that must be
/// re-read; derived fields such as validity are recomputed by the tool.
pub trait GnuPg {
    /// Home directory of the real keyring.
    fn home_dir(&self) -> &Path;

    /// Raw colon listing of secret keys in `home` (or the real keyring).
    fn list_secret_keys(&self, home: Option<&Path>) -> Result<String>;

    /// Raw colon listing of public keys in the real keyring.
    fn list_public_keys(&self) -> Result<String>;

    /// Import armored key material (secret key or revocation certificate).
    fn import(&self, home: Option<&Path>, armor: &str) -> Result<()>;

    /// Release tool resources tied to a scratch home before it is removed.
    fn release_home(&self, _home: &Path) {}

    /// Create a certify-only primary key without expiry.
    fn generate_key(&self, user_id: &str, curve: &str) -> Result<()>;

    /// Add a sign-only subkey without expiry.
    fn add_signing_subkey(&self, fingerprint: &str, curve: &str) -> Result<()>;

    fn add_user_id(&self, fingerprint: &str, user_id: &str) -> Result<()>;

    /// Remove the expiry of the primary key, or of `subkeys` if not empty.
    fn clear_expiry(&self, fingerprint: &str, subkeys: &[String]) -> Result<()>;

    /// Toggle `usages` off on the primary key or on one subkey.
    fn change_usage(
        &self,
        fingerprint: &str,
        subkey: Option<&str>,
        usages: &[KeyUsage],
    ) -> Result<()>;

    fn revoke_subkeys(&self, fingerprint: &str, subkeys: &[String]) -> Result<()>;

    /// Revoke the whole key.
    fn revoke_key(&self, fingerprint: &str) -> Result<()>;

    fn set_ultimate_trust(&self, fingerprint: &str) -> Result<()>;

    /// ASCII-armored public key.
    fn export_public_key(&self, fingerprint: &str) -> Result<String>;

    /// ASCII-armored secret key, including the primary secret key.
    fn export_secret_key(&self, fingerprint: &str) -> Result<SecretString>;

    /// ASCII-armored revocation certificate.
    fn generate_revocation(&self, fingerprint: &str) -> Result<String>;
}

/// [`GnuPg`] backed by the `gpg` command line tool.
#[derive(Debug, Clone)]
pub struct GpgCommand {
    program: String,
    home: PathBuf,
    env: EnvSnapshot,
}

impl GpgCommand {
    /// Create a runner for `program` operating on the keyring in `home`.
    pub fn new(program: impl Into<String>, home: impl Into<PathBuf>, env: EnvSnapshot) -> Self {
        Self {
            program: program.into(),
            home: home.into(),
            env,
        }
    }

    /// Run gpg and return its stdout. A non-zero exit is an error.
    fn run(&self, home: Option<&Path>, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        let home = home.unwrap_or(&self.home);
        let mut full_args: Vec<String> = vec!["--homedir".to_string(), home.display().to_string()];
        full_args.extend(args.iter().map(|a| a.to_string()));
        debug!("running {} {}", self.program, full_args.join(" "));

        let mut command = Command::new(&self.program);
        self.env.apply(&mut command);
        command
            .args(&full_args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)?;
            // dropping the pipe closes stdin
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::ExternalTool {
                program: self.program.clone(),
                args: full_args,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn run_text(&self, home: Option<&Path>, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        let stdout = self.run(home, args, stdin)?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    /// Drive `--edit-key` with `commands`, answering prompts from `answers`.
    fn edit_key(&self, fingerprint: &str, commands: &[String], answers: &[&str]) -> Result<()> {
        let mut args = vec!["--command-fd", "0", "--edit-key", fingerprint];
        args.extend(commands.iter().map(String::as_str));
        args.push("save");
        let input: String = answers.iter().map(|a| format!("{}\n", a)).collect();
        self.run(None, &args, Some(input.as_bytes()))?;
        Ok(())
    }

    /// True if `home` holds a keyring at all.
    ///
    /// Listing a home without one makes gpg create files in it.
    fn has_keyring(home: &Path) -> bool {
        ["pubring.kbx", "pubring.gpg"]
            .iter()
            .any(|name| home.join(name).exists())
    }
}

impl GnuPg for GpgCommand {
    fn home_dir(&self) -> &Path {
        &self.home
    }

    fn list_secret_keys(&self, home: Option<&Path>) -> Result<String> {
        if !Self::has_keyring(home.unwrap_or(&self.home)) {
            return Ok(String::new());
        }
        self.run_text(
            home,
            &["--list-secret-keys", "--with-colons", "--with-keygrip"],
            None,
        )
    }

    fn list_public_keys(&self) -> Result<String> {
        if !Self::has_keyring(&self.home) {
            return Ok(String::new());
        }
        self.run_text(
            None,
            &["--list-keys", "--with-colons", "--with-keygrip"],
            None,
        )
    }

    fn import(&self, home: Option<&Path>, armor: &str) -> Result<()> {
        self.run(home, &["--import"], Some(armor.as_bytes()))?;
        Ok(())
    }

    fn release_home(&self, home: &Path) {
        let mut command = Command::new("gpgconf");
        self.env.apply(&mut command);
        let result = command
            .arg("--homedir")
            .arg(home)
            .args(["--kill", "gpg-agent"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = result {
            debug!("failed to stop agent for {}: {}", home.display(), e);
        }
    }

    fn generate_key(&self, user_id: &str, curve: &str) -> Result<()> {
        self.run(
            None,
            &["--quick-generate-key", user_id, curve, "cert", "never"],
            None,
        )?;
        Ok(())
    }

    fn add_signing_subkey(&self, fingerprint: &str, curve: &str) -> Result<()> {
        self.run(
            None,
            &["--quick-add-key", fingerprint, curve, "sign", "never"],
            None,
        )?;
        Ok(())
    }

    fn add_user_id(&self, fingerprint: &str, user_id: &str) -> Result<()> {
        self.run(None, &["--quick-add-uid", fingerprint, user_id], None)?;
        Ok(())
    }

    fn clear_expiry(&self, fingerprint: &str, subkeys: &[String]) -> Result<()> {
        let mut args = vec!["--quick-set-expire", fingerprint, "0"];
        args.extend(subkeys.iter().map(String::as_str));
        self.run(None, &args, None)?;
        Ok(())
    }

    fn change_usage(
        &self,
        fingerprint: &str,
        subkey: Option<&str>,
        usages: &[KeyUsage],
    ) -> Result<()> {
        let mut commands = Vec::new();
        if let Some(subkey) = subkey {
            commands.push(format!("key {}", subkey));
        }
        commands.push("change-usage".to_string());
        let toggles: Vec<String> = usages.iter().map(|u| u.letter().to_string()).collect();
        let mut answers: Vec<&str> = toggles.iter().map(String::as_str).collect();
        answers.push("q");
        self.edit_key(fingerprint, &commands, &answers)
    }

    fn revoke_subkeys(&self, fingerprint: &str, subkeys: &[String]) -> Result<()> {
        if subkeys.is_empty() {
            return Ok(());
        }
        // select every subkey first, one revkey then revokes the selection
        let mut commands: Vec<String> = subkeys.iter().map(|s| format!("key {}", s)).collect();
        commands.push("revkey".to_string());
        self.edit_key(fingerprint, &commands, REVOCATION_ANSWERS)
    }

    fn revoke_key(&self, fingerprint: &str) -> Result<()> {
        self.edit_key(fingerprint, &["revkey".to_string()], REVOCATION_ANSWERS)
    }

    fn set_ultimate_trust(&self, fingerprint: &str) -> Result<()> {
        self.edit_key(fingerprint, &["trust".to_string()], ULTIMATE_TRUST_ANSWERS)
    }

    fn export_public_key(&self, fingerprint: &str) -> Result<String> {
        self.run_text(None, &["--export", "--armor", fingerprint], None)
    }

    fn export_secret_key(&self, fingerprint: &str) -> Result<SecretString> {
        let armored = self.run_text(None, &["--export-secret-keys", "--armor", fingerprint], None)?;
        Ok(SecretString::from(armored))
    }

    fn generate_revocation(&self, fingerprint: &str) -> Result<String> {
        let input: String = REVOCATION_ANSWERS.iter().map(|a| format!("{}\n", a)).collect();
        self.run_text(
            None,
            &["--command-fd", "0", "--armor", "--gen-revoke", fingerprint],
            Some(input.as_bytes()),
        )
    }
}
