//! Git signing key configuration.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use log::debug;

use crate::env::EnvSnapshot;
use crate::error::{Error, Result};

const SIGNING_KEY: &str = "user.signingkey";

/// Read and write the git signing key setting.
pub trait GitConfig {
    /// The configured signing key, if any.
    fn signing_key(&self) -> Result<Option<String>>;

    fn set_signing_key(&self, value: &str) -> Result<()>;
}

/// Which git configuration file is read and written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigTarget {
    /// An explicit file, passed with `--file`.
    File(PathBuf),
    /// The user's global configuration.
    Global,
}

/// [`GitConfig`] backed by the `git` command line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    target: ConfigTarget,
    env: EnvSnapshot,
}

impl GitCli {
    pub fn new(program: impl Into<String>, target: ConfigTarget, env: EnvSnapshot) -> Self {
        Self {
            program: program.into(),
            target,
            env,
        }
    }

    /// Decide which file holds the signing key setting.
    ///
    /// An explicit file wins. Otherwise the file named by the global
    /// `include.path` is used, so machine-local settings stay out of a
    /// shared global config; without one, the global config is used.
    pub fn resolve_target(
        program: &str,
        explicit: Option<PathBuf>,
        env: &EnvSnapshot,
    ) -> Result<ConfigTarget> {
        if let Some(path) = explicit {
            return Ok(ConfigTarget::File(path));
        }
        let probe = GitCli::new(program, ConfigTarget::Global, env.clone());
        let output = probe.run(&["config", "--global", "include.path"])?;
        let included = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || included.is_empty() {
            return Ok(ConfigTarget::Global);
        }
        Ok(ConfigTarget::File(expand_home(&included)))
    }

    fn target_args(&self) -> Vec<String> {
        match &self.target {
            ConfigTarget::File(path) => vec!["--file".to_string(), path.display().to_string()],
            ConfigTarget::Global => vec!["--global".to_string()],
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!("running {} {}", self.program, args.join(" "));
        let mut command = Command::new(&self.program);
        self.env.apply(&mut command);
        Ok(command
            .args(args)
            .stdin(Stdio::null())
            .output()?)
    }

    fn config(&self, args: &[&str]) -> Result<Output> {
        let mut full: Vec<String> = vec!["config".to_string()];
        full.extend(self.target_args());
        full.extend(args.iter().map(|a| a.to_string()));
        let full_refs: Vec<&str> = full.iter().map(String::as_str).collect();
        let output = self.run(&full_refs)?;
        // exit code 1 means the key is not set
        if !output.status.success() && output.status.code() != Some(1) {
            return Err(Error::ExternalTool {
                program: self.program.clone(),
                args: full,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl GitConfig for GitCli {
    fn signing_key(&self) -> Result<Option<String>> {
        let output = self.config(&[SIGNING_KEY])?;
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(value).filter(|v| output.status.success() && !v.is_empty()))
    }

    fn set_signing_key(&self, value: &str) -> Result<()> {
        let output = self.config(&[SIGNING_KEY, value])?;
        if !output.status.success() {
            return Err(Error::ExternalTool {
                program: self.program.clone(),
                args: vec!["config".to_string(), SIGNING_KEY.to_string(), value.to_string()],
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Expand a leading `~/` the way git does for `include.path`.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}
