//! Layout Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A layout error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for layout operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The game name has no usable character to bucket under
    #[display("no alphanumeric character in game name: {_0}")]
    NoAlphanumeric(#[error(not(source))] String),
    /// Not one of the recognised layout names
    #[display("unknown layout: {_0}")]
    UnknownLayout(#[error(not(source))] String),
}
