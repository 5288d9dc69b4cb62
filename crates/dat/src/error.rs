//! Dat Manifest Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A manifest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input bytes are not a well-formed dat document
    #[display("malformed dat file: {_0}")]
    Parse(#[error(not(source))] String),
    /// A merge input contained a top-level element other than `header`/`game`
    #[display("unknown element: {_0}")]
    BadElement(#[error(not(source))] String),
    /// The manifest contains more than one rom with the same identity
    #[display("more than one matched rom: {game}/{name}")]
    AmbiguousRom { game: String, name: String },
    /// Serialising the remaining document failed
    #[display("failed to serialise dat file")]
    Marshal,
}
