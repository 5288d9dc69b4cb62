//! Dat-file manifests: parse, query, mutate and merge.
//!
//! A dat file is an XML catalogue of games and their constituent roms,
//! each identified by size, CRC-32 and SHA-1. [`Datafile`] holds two views
//! over one parse: an immutable catalogue indexed by content hash, and a
//! mutable remaining view that shrinks as roms are [`seen`](Datafile::seen).

pub mod error;
mod datafile;
mod model;
mod xml;

pub use crate::datafile::Datafile;
pub use crate::model::{Game, Header, Rom};
