//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archive file does not exist
    #[display("archive not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The file exists but is not a readable zip
    #[display("not a valid zip archive: {}", _0.display())]
    Malformed(#[error(not(source))] PathBuf),
    /// A named member is missing from the archive
    #[display("no member {name} in {}", archive.display())]
    MemberNotFound { archive: PathBuf, name: String },
    /// Underlying I/O error; the cause is attached as a child frame
    #[display("I/O error")]
    Io,
    /// The rewritten archive could not be renamed over the original
    #[display("failed to persist rewritten archive: {}", _0.display())]
    Persist(#[error(not(source))] PathBuf),
}
