//! Content classification: loose file or archive.
//!
//! Routing is by magic bytes, not extension, so renamed archives are still
//! found and zip-shaped impostors (a `.smc` that is really a zip) don't get
//! hashed as roms.

use crate::error::{ErrorKind, Result};
use async_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// `infer` needs at most this much to identify every type we care about.
const SNIFF_LEN: usize = 8192;

enum Kind {
    Loose,
    Zip,
    SevenZip,
}

/// Split the discovered file stream into loose and archive queues.
///
/// Zips route to the archive queue, including `xlsx`, which is a zip that
/// sniffs as a spreadsheet. 7z archives cannot be read and are dropped with
/// a warning. Everything else is a loose file.
pub(crate) async fn classify(
    input: Receiver<PathBuf>,
    loose: Sender<PathBuf>,
    zipped: Sender<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let path = tokio::select! {
            received = input.recv() => match received {
                Ok(path) => path,
                // Walkers are done; close our queues so workers drain out.
                Err(_) => return Ok(()),
            },
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        };

        let queue = match sniff(&path).await? {
            Kind::Zip => &zipped,
            Kind::Loose => &loose,
            Kind::SevenZip => {
                warn!("cannot read 7z archive {}", path.display());
                continue;
            },
        };
        tokio::select! {
            sent = queue.send(path) => {
                if sent.is_err() {
                    exn::bail!(ErrorKind::Cancelled);
                }
            },
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        }
    }
}

async fn sniff(path: &Path) -> Result<Kind> {
    let mut file = tokio::fs::File::open(path).await.map_err(ErrorKind::Classify)?;
    let mut header = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..]).await.map_err(ErrorKind::Classify)?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(match infer::get(&header[..filled]).map(|t| t.extension()) {
        Some("zip" | "xlsx") => Kind::Zip,
        Some("7z") => Kind::SevenZip,
        _ => Kind::Loose,
    })
}
