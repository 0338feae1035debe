//! Error types.
//!
//! Three kinds of things go wrong in a run and they are kept apart:
//! a suite that cannot be loaded ([`LoadError`]), a suite that loads but
//! describes something impossible ([`ConfigError`]), and a command that could
//! not be executed ([`ExecError`]). Assertion failures are not errors at all;
//! they travel as a diff on the test result.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for anything that stops a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure to read or parse a suite document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Failed to read the file.
    #[error("open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path is a directory but directory mode was not requested.
    #[error("{}: is a directory\nUse --dir to test directories with multiple test files", .0.display())]
    IsDirectory(PathBuf),

    /// Failed to parse YAML.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failed to parse TOML.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Unsupported file extension.
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),

    /// Reading a suite from stdin only works through a pipe.
    #[error("when testing from stdin the command is intended to work with pipes")]
    StdinIsTerminal,

    #[error("failed to read stdin: {0}")]
    Stdin(#[source] std::io::Error),
}

/// A suite that parsed but cannot be run as written.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("node '{node}' referenced by test '{test}' is not defined")]
    UnknownNode { test: String, node: String },

    #[error("test '{test}': invalid retry interval '{interval}': {reason}")]
    InvalidInterval {
        test: String,
        interval: String,
        reason: String,
    },

    #[error("test '{test}': line numbers start at 1, got {line}")]
    InvalidLineNumber { test: String, line: usize },

    #[error(
        "test '{test}': invalid line number {line}, {property} has only {available} line(s)"
    )]
    LineOutOfRange {
        test: String,
        property: String,
        line: usize,
        available: usize,
    },

    #[error("test '{test}': inherit-env is not supported on ssh node '{node}'")]
    InheritEnvOverSsh { test: String, node: String },

    #[error("invalid filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: regex::Error,
    },
}

/// Reasons a command could not be run at all.
///
/// Stored on [`crate::model::CommandResult::error`]; a test carrying one of
/// these is reported as "could not be executed" rather than as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("invalid timeout '{value}': {reason}")]
    InvalidTimeout { value: String, reason: String },

    #[error("failed to spawn: {0}")]
    Spawn(String),

    #[error("{0}")]
    Io(String),

    #[error("command timed out after {0}")]
    Timeout(String),

    #[error("timeout occurred and process could not be killed: {0}")]
    KillFailed(String),

    #[error("failed to connect to ssh host {addr}: {reason}")]
    Connection { addr: String, reason: String },

    #[error("ssh authentication failed for user '{0}'")]
    Authentication(String),

    #[error(
        "failed setting env variable '{key}', maybe ssh server is configured to only accept LC_ prefixed env variables: {reason}"
    )]
    EnvRejected { key: String, reason: String },

    #[error("ssh error: {0}")]
    Ssh(String),

    #[error("{0}")]
    Docker(String),
}

impl ExecError {
    /// Whether this error came from a deadline rather than a broken setup.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout(_) | ExecError::KillFailed(_))
    }
}
