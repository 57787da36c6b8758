//! Error types for linkscope.
//!
//! Session-level failures use [`Error`]. Per-line parse failures use
//! [`ParseError`] and never leave the acquisition loop.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for linkscope operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Session-level error surfaced through the control surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration rejected before any resource was allocated.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("transport failure: {reason}")]
    Transport { reason: String },

    /// The source closed its output while the session was still running.
    #[error("source exited unexpectedly: {reason}")]
    SourceExited { reason: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

/// A single chunk (line, row or field) failed to convert.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{metric}: cannot parse {text:?} as a number")]
    Number { metric: &'static str, text: String },

    #[error("row {row}: column {column} ({metric}) is not numeric: {text:?}")]
    Column {
        row: usize,
        column: usize,
        metric: &'static str,
        text: String,
    },
}
