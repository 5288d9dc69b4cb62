//! Zip archives: reading members and rewriting deterministically.
//!
//! The read side lists members with the CRC-32 and uncompressed size the
//! archive recorded for them, which is all reconciliation needs; member
//! content is only ever streamed, never buffered whole.
//!
//! The write side (the [`torrent`] module) always produces the canonical
//! encoding: members sorted by name, fixed timestamps, fixed compression,
//! no extra fields. Equal contents therefore yield byte-equal archives,
//! which is what makes "is this archive already canonical?" a SHA-1
//! comparison.

pub mod error;
pub mod torrent;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Metadata of one archive member, as recorded in the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    /// CRC-32 of the uncompressed content, 8 lowercase hex characters
    pub crc: String,
    /// Uncompressed size in bytes
    pub size: u64,
}

/// Format a CRC-32 the way dat files record it.
pub fn crc_hex(crc: u32) -> String {
    format!("{crc:08x}")
}

/// An open zip with its member list read up front.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    inner: ZipArchive<File>,
    members: Vec<Member>,
}

impl Archive {
    /// Open an archive and read its central directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::NotFound(path))
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
        };
        let mut inner =
            ZipArchive::new(file).or_raise(|| ErrorKind::Malformed(path.clone()))?;

        let mut members = Vec::with_capacity(inner.len());
        for index in 0..inner.len() {
            let entry = inner.by_index(index).or_raise(|| ErrorKind::Malformed(path.clone()))?;
            members.push(Member {
                name: entry.name().to_string(),
                crc: crc_hex(entry.crc32()),
                size: entry.size(),
            });
        }
        Ok(Self { path, inner, members })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Stream the uncompressed content of one member.
    pub fn member_reader(&mut self, name: &str) -> Result<impl Read + '_> {
        match self.inner.by_name(name) {
            Ok(entry) => Ok(entry),
            Err(_) => exn::bail!(ErrorKind::MemberNotFound {
                archive: self.path.clone(),
                name: name.to_string(),
            }),
        }
    }
}

/// Look up a single member of an archive that may not exist yet.
///
/// Returns `Ok(None)` both when the archive itself is missing and when the
/// member is absent: the caller's question is "is the right content
/// already there?", and in both cases it is not.
pub fn find_member(path: impl AsRef<Path>, name: &str) -> Result<Option<Member>> {
    match Archive::open(path) {
        Ok(archive) => Ok(archive.members().iter().find(|m| m.name == name).cloned()),
        Err(e) if matches!(e.current_value(), ErrorKind::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
