//! Content hashing for loose files.

use crate::error::{ErrorKind, Result};
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::io::AsyncReadExt;

const CHUNK: usize = 64 * 1024;

/// Stream a file through SHA-1, returning the lowercase hex digest and the
/// byte length. No partial-read retry; an I/O error aborts the caller.
pub async fn sha1_file(path: &Path) -> Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await.map_err(ErrorKind::Io)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK];
    let mut length = 0u64;
    loop {
        let n = file.read(&mut buf).await.map_err(ErrorKind::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        length += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), length))
}

/// Like [`sha1_file`], but a missing file is `Ok(None)` rather than an
/// error. Export uses this to ask "is the destination already correct?".
pub async fn sha1_file_if_exists(path: &Path) -> Result<Option<(String, u64)>> {
    match sha1_file(path).await {
        Ok(digest) => Ok(Some(digest)),
        Err(e)
            if matches!(
                e.current_value(),
                ErrorKind::Io(inner) if inner.kind() == std::io::ErrorKind::NotFound
            ) =>
        {
            Ok(None)
        },
        Err(e) => Err(e),
    }
}
