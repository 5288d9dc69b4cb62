//! Engine Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Worker tasks raise the first error
//! they hit; the pipeline surfaces whichever arrives first and cancels the
//! rest.

use derive_more::{Display, Error};
use romset_archive::error::{Error as ArchiveError, ErrorKind as ArchiveErrorKind};
use romset_dat::error::{Error as DatError, ErrorKind as DatErrorKind};
use romset_layout::error::{Error as LayoutError, ErrorKind as LayoutErrorKind};
use std::io::Error as IoError;

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The directory walk failed
    #[display("walk error: {_0}")]
    Walk(IoError),
    /// Content sniffing failed
    #[display("classify error: {_0}")]
    Classify(IoError),
    /// Raised from the manifest index
    #[display("manifest error: {_0}")]
    Dat(DatErrorKind),
    /// Raised from a layout strategy
    #[display("layout error: {_0}")]
    Layout(LayoutErrorKind),
    /// Raised from zip reading or rewriting
    #[display("archive error: {_0}")]
    Archive(ArchiveErrorKind),
    /// The operation needs a layout but the engine was built without one
    #[display("no layout configured")]
    NoLayout,
    /// The operation's cancellation scope fired
    #[display("operation cancelled")]
    Cancelled,
    /// A pipeline task panicked or was aborted
    #[display("pipeline task failed")]
    Join,
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Convert a manifest error into an engine error, preserving the dat
    /// crate's `Exn` frame (error tree) as a child in its own error tree.
    #[track_caller]
    pub fn dat(err: DatError) -> Error {
        let inner = err.current_value().clone();
        err.raise(ErrorKind::Dat(inner))
    }

    /// Convert a layout error, keeping the child frame.
    #[track_caller]
    pub fn layout(err: LayoutError) -> Error {
        let inner = err.current_value().clone();
        err.raise(ErrorKind::Layout(inner))
    }

    /// Convert an archive error, keeping the child frame.
    #[track_caller]
    pub fn archive(err: ArchiveError) -> Error {
        let inner = err.current_value().clone();
        err.raise(ErrorKind::Archive(inner))
    }
}
