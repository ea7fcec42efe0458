//! wecansign: set up a least-privilege commit-signing identity.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use secrecy::SecretString;

use wecansign::{
    synchronize_signing_identity, Console, EnvSnapshot, GitCli, GithubKeys, GpgCommand, Settings,
    SyncOutcome, DEFAULT_API_URL,
};

#[derive(Parser)]
#[command(name = "wecansign")]
#[command(about = "Reconcile the GnuPG keyring, git and the remote account into one signing key")]
#[command(version)]
struct Cli {
    /// Name for new user IDs (defaults to the account login)
    #[arg(long, env = "WECANSIGN_IDENTITY")]
    identity: Option<String>,

    /// Email the key must carry (defaults to the account's no-reply email)
    #[arg(long, env = "WECANSIGN_EMAIL")]
    email: Option<String>,

    /// GnuPG home directory
    #[arg(long, env = "GNUPGHOME")]
    gnupg_home: Option<PathBuf>,

    /// Git config file for user.signingkey (defaults to the global include.path)
    #[arg(long)]
    git_config_file: Option<PathBuf>,

    /// gpg executable
    #[arg(long, default_value = "gpg")]
    gpg: String,

    /// git executable
    #[arg(long, default_value = "git")]
    git: String,

    /// Remote API base URL
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Access token for the remote API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Title for uploaded keys (defaults to <user>@<host>)
    #[arg(long)]
    key_title: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Builder::new()
        .filter(None, level)
        .parse_env("RUST_LOG")
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // tokens never reach gpg or git
    let env = EnvSnapshot::capture();

    let Some(token) = cli.token else {
        bail!("an access token is required (--token or GITHUB_TOKEN)");
    };
    let remote = GithubKeys::new(&cli.api_url, SecretString::from(token))
        .context("failed to create the remote API client")?;

    let (identity, email) = match (cli.identity, cli.email) {
        (Some(identity), Some(email)) => (identity, email),
        (identity, email) => {
            let account = remote
                .identity()
                .context("failed to look up the account identity")?;
            (
                identity.unwrap_or(account.login),
                email.unwrap_or(account.email),
            )
        }
    };

    let mut settings = Settings::with_defaults(&identity, &email, &env)?;
    if let Some(home) = cli.gnupg_home {
        settings.gnupg_home = home;
    }
    if let Some(title) = cli.key_title {
        settings.key_title = title;
    }
    settings.gpg_program = cli.gpg;
    settings.git_program = cli.git;
    settings.git_config_file = cli.git_config_file;
    settings.api_url = cli.api_url;
    settings.validate()?;
    info!("Setting up signing key for {}", settings.user_id());

    let gpg = GpgCommand::new(&settings.gpg_program, &settings.gnupg_home, env.clone());
    let target = GitCli::resolve_target(
        &settings.git_program,
        settings.git_config_file.clone(),
        &env,
    )?;
    let git = GitCli::new(&settings.git_program, target, env);
    let mut console = Console::stdio();

    match synchronize_signing_identity(&gpg, &git, &remote, &mut console, &settings)? {
        SyncOutcome::Synchronized(report) => {
            info!(
                "Key {} is ready; git signs with {}",
                report.key_id, report.signing_key
            );
            Ok(())
        }
        SyncOutcome::Aborted(reason) => bail!("key setup aborted: {:?}", reason),
    }
}
