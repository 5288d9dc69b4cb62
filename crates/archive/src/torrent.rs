//! Deterministic zip rewriting.
//!
//! Every archive this module writes follows one canonical encoding
//! (members sorted by name, DOS-epoch timestamps, one fixed deflate level,
//! no extra fields), so archives with equal contents are byte-equal. All
//! writes go to a dot-prefixed temp file in the target's own directory and
//! are renamed into place, which keeps the rename atomic (same filesystem)
//! and leaves nothing behind on error: the temp file removes itself when
//! dropped unpersisted.

use crate::error::{ErrorKind, Result};
use crate::Archive;
use exn::ResultExt;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::instrument;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const DEFLATE_LEVEL: i64 = 9;

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DEFLATE_LEVEL))
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// A temp file next to `path`, dot-prefixed so scans skip it as hidden.
fn sibling_tempfile(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let base = path.file_name().and_then(|name| name.to_str()).unwrap_or("archive");
    tempfile::Builder::new()
        .prefix(&format!(".{base}"))
        .tempfile_in(dir)
        .or_raise(|| ErrorKind::Persist(path.to_path_buf()))
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    if let Err(e) = tmp.persist(path) {
        return Err(e.error).or_raise(|| ErrorKind::Persist(path.to_path_buf()));
    }
    Ok(())
}

/// Rewrite the archive at `path` so it contains every existing member
/// except `name`, plus `name` with content streamed from `reader`.
///
/// A missing archive is not an error; the result is a fresh archive with
/// only the new member.
#[instrument(skip(reader), fields(path = %path.display(), member = name))]
pub fn create_or_update(path: &Path, name: &str, mut reader: impl Read) -> Result<()> {
    let mut existing = match Archive::open(path) {
        Ok(archive) => Some(archive),
        Err(e) if matches!(e.current_value(), ErrorKind::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let mut names: Vec<String> = existing
        .iter()
        .flat_map(|archive| archive.members())
        .map(|member| member.name.clone())
        .filter(|existing_name| existing_name != name)
        .collect();
    names.push(name.to_string());
    names.sort_unstable();

    let tmp = sibling_tempfile(path)?;
    let mut writer = ZipWriter::new(tmp.as_file());
    for member_name in &names {
        writer
            .start_file(member_name.as_str(), options())
            .or_raise(|| ErrorKind::Malformed(path.to_path_buf()))?;
        if member_name == name {
            std::io::copy(&mut reader, &mut writer).or_raise(|| ErrorKind::Io)?;
        } else if let Some(archive) = existing.as_mut() {
            let mut member = archive.member_reader(member_name)?;
            std::io::copy(&mut member, &mut writer).or_raise(|| ErrorKind::Io)?;
        }
    }
    writer.finish().or_raise(|| ErrorKind::Malformed(path.to_path_buf()))?;

    persist(tmp, path)
}

/// The canonical rewrite of an archive, not yet persisted.
///
/// Dropping it without calling [`replace`](Self::replace) discards the
/// rewrite and removes the temp file.
pub struct Recreated {
    tmp: NamedTempFile,
    sha1: String,
}

impl Recreated {
    /// SHA-1 of the rewritten byte stream.
    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    /// Atomically rename the rewrite over `path`.
    pub fn replace(self, path: &Path) -> Result<()> {
        persist(self.tmp, path)
    }
}

/// Re-emit an archive through the deterministic writer.
///
/// The caller compares the returned SHA-1 against the on-disk file's to
/// decide whether the original was already canonical.
#[instrument(fields(path = %path.display()))]
pub fn recreate(path: &Path) -> Result<Recreated> {
    let mut archive = Archive::open(path)?;
    let names: Vec<String> = archive.members().iter().map(|m| m.name.clone()).collect();
    let tmp = rewrite(path, &mut archive, names)?;
    let sha1 = sha1_of_file(tmp.path())?;
    Ok(Recreated { tmp, sha1 })
}

/// Rewrite the archive keeping only members outside the drop set, renaming
/// the result over the original.
#[instrument(skip(drop_members), fields(path = %path.display(), dropped = drop_members.len()))]
pub fn prune(path: &Path, drop_members: &HashSet<String>) -> Result<()> {
    let mut archive = Archive::open(path)?;
    let names: Vec<String> = archive
        .members()
        .iter()
        .map(|m| m.name.clone())
        .filter(|name| !drop_members.contains(name))
        .collect();
    let tmp = rewrite(path, &mut archive, names)?;
    persist(tmp, path)
}

/// Write the given members of `archive` to a sibling temp file in sorted
/// order with fixed metadata.
fn rewrite(path: &Path, archive: &mut Archive, mut names: Vec<String>) -> Result<NamedTempFile> {
    names.sort_unstable();
    let tmp = sibling_tempfile(path)?;
    let mut writer = ZipWriter::new(tmp.as_file());
    for name in &names {
        writer
            .start_file(name.as_str(), options())
            .or_raise(|| ErrorKind::Malformed(path.to_path_buf()))?;
        let mut member = archive.member_reader(name)?;
        std::io::copy(&mut member, &mut writer).or_raise(|| ErrorKind::Io)?;
    }
    writer.finish().or_raise(|| ErrorKind::Malformed(path.to_path_buf()))?;
    Ok(tmp)
}

fn sha1_of_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).or_raise(|| ErrorKind::Io)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).or_raise(|| ErrorKind::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
