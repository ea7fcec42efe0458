//! Error types for the wecansign library.
//!
//! The variants follow the failure classes of a synchronization run:
//! malformed tool output, rejected imports, failing subprocesses, broken
//! invariants and remote API problems. An explicit decline by the user is
//! not an error; it surfaces as `None` or as an aborted refinement.

use std::process::ExitStatus;

use thiserror::Error;

/// The main error type for wecansign operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Key listing output could not be folded into complete records.
    ///
    /// `partial` holds a dump of the partially built records for diagnosis.
    #[error("Failed to parse key listing: {message}\n{partial}")]
    Parse { message: String, partial: String },

    /// An imported key did not satisfy the caller's validation
    #[error("{0}")]
    PredicateRejected(String),

    /// An external tool exited unsuccessfully
    #[error("{program} {} failed ({status}): {stderr}", .args.join(" "))]
    ExternalTool {
        program: String,
        args: Vec<String>,
        status: ExitStatus,
        stderr: String,
    },

    /// An internal invariant did not hold
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Transport level failure talking to the remote API
    #[error("Network error: {0}")]
    Network(String),

    /// The remote API answered with an error status
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Settings are missing or unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// The interactive input ended while an answer was expected
    #[error("Unexpected end of input")]
    EndOfInput,

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for wecansign operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn parse(message: impl Into<String>, partial: impl std::fmt::Debug) -> Self {
        Error::Parse {
            message: message.into(),
            partial: format!("{:#?}", partial),
        }
    }
}
