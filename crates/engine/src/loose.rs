//! Per-file reconciliation: verify, export and clean for loose files.

use crate::error::{ErrorKind, Result};
use crate::hash;
use crate::pipeline::{Ctx, Op, ensure_parent};
use async_channel::Receiver;
use romset_dat::Rom;
use romset_layout::Placement;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Drain the loose-file queue, reconciling each file against the manifest.
/// Returns on queue exhaustion; the first error aborts the worker.
pub(crate) async fn worker(
    ctx: Arc<Ctx>,
    input: Receiver<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let path = tokio::select! {
            received = input.recv() => match received {
                Ok(path) => path,
                Err(_) => return Ok(()),
            },
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        };
        process(&ctx, &path).await?;
    }
}

async fn process(ctx: &Ctx, path: &Path) -> Result<()> {
    let (sha1, size) = hash::sha1_file(path).await?;
    ctx.counters.record_file();
    ctx.counters.record_read(size);

    let roms = ctx.datafile.find_by_sha1(size, &sha1);
    debug!(path = %path.display(), %sha1, size, matches = roms.len(), "loose file");

    match &ctx.op {
        Op::Verify => {
            for rom in &roms {
                ctx.datafile.seen(rom).map_err(ErrorKind::dat)?;
            }
        },
        Op::Export { target } => export(ctx, path, &roms, target).await?,
        Op::Clean { target } => clean(ctx, path, &roms, target).await?,
    }
    Ok(())
}

/// Put every rom this file satisfies into its canonical place, then mark it
/// seen. Content already in place is left untouched, so a second export of
/// the same tree is a no-op.
async fn export(ctx: &Ctx, path: &Path, roms: &[Rom], target: &Path) -> Result<()> {
    let layout = ctx.layout()?;
    for rom in roms {
        let placement = layout.export_path(rom).map_err(ErrorKind::layout)?;
        let full = target.join(placement.path());
        match &placement {
            Placement::Archived { member, .. } => {
                let _lock = ctx.archive_locks.hold(&full).await;
                let existing = {
                    let archive_path = full.clone();
                    let member = member.clone();
                    spawn_blocking(move || {
                        romset_archive::find_member(&archive_path, &member)
                            .map_err(ErrorKind::archive)
                    })
                    .await
                    .unwrap()?
                };
                if !existing.is_some_and(|m| m.crc == rom.crc && m.size == rom.size) {
                    info!("Archiving {} into {}", path.display(), full.display());
                    if ctx.destructive {
                        ensure_parent(&full).await?;
                        let source = path.to_path_buf();
                        let archive_path = full.clone();
                        let member = member.clone();
                        spawn_blocking(move || -> Result<()> {
                            let reader = std::fs::File::open(&source).map_err(ErrorKind::Io)?;
                            romset_archive::torrent::create_or_update(&archive_path, &member, reader)
                                .map_err(ErrorKind::archive)
                        })
                        .await
                        .unwrap()?;
                        ctx.counters.record_written(rom.size);
                    }
                }
            },
            Placement::Loose(_) => {
                let current = hash::sha1_file_if_exists(&full).await?;
                if !current.is_some_and(|(sha1, _)| sha1 == rom.sha1) {
                    info!("Copying {} to {}", path.display(), full.display());
                    if ctx.destructive {
                        ensure_parent(&full).await?;
                        tokio::fs::copy(path, &full).await.map_err(ErrorKind::Io)?;
                        ctx.counters.record_written(rom.size);
                    }
                }
            },
        }
        ctx.datafile.seen(rom).map_err(ErrorKind::dat)?;
    }
    Ok(())
}

/// Delete anything in the target tree that is not some rom's canonical
/// location, misplaced copies of valid content included.
async fn clean(ctx: &Ctx, path: &Path, roms: &[Rom], target: &Path) -> Result<()> {
    let layout = ctx.layout()?;
    for rom in roms {
        let placement = layout.export_path(rom).map_err(ErrorKind::layout)?;
        if target.join(placement.path()).as_path() == path {
            return Ok(());
        }
    }
    info!("Deleting {}", path.display());
    if ctx.destructive {
        tokio::fs::remove_file(path).await.map_err(ErrorKind::Io)?;
    }
    Ok(())
}
