//! Per-archive reconciliation: verify, export and clean for zip contents.
//!
//! Members are matched by the CRC-32 and uncompressed size the archive
//! recorded for them; content is only decompressed when it actually has to
//! move somewhere. Zip reading and rewriting is synchronous I/O, so every
//! such call runs on the blocking pool rather than a runtime worker.

use crate::error::{ErrorKind, Result};
use crate::hash;
use crate::pipeline::{Ctx, Op, ensure_parent};
use async_channel::Receiver;
use romset_archive::{Archive, Member, torrent};
use romset_layout::Placement;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Drain the archive queue, reconciling each zip against the manifest.
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
    let members = {
        let path = path.to_path_buf();
        spawn_blocking(move || -> Result<Vec<Member>> {
            let archive = Archive::open(&path).map_err(ErrorKind::archive)?;
            Ok(archive.members().to_vec())
        })
        .await
        .unwrap()?
    };
    ctx.counters.record_file();
    let on_disk = tokio::fs::metadata(path).await.map_err(ErrorKind::Io)?.len();
    ctx.counters.record_read(on_disk);

    debug!(path = %path.display(), members = members.len(), "archive");

    match &ctx.op {
        Op::Verify => {
            for member in &members {
                for rom in ctx.datafile.find_by_crc(member.size, &member.crc) {
                    ctx.datafile.seen(&rom).map_err(ErrorKind::dat)?;
                }
            }
        },
        Op::Export { target } => export(ctx, path, &members, target).await?,
        Op::Clean { target } => clean(ctx, path, &members, target).await?,
    }
    Ok(())
}

/// Route every recognised member to its canonical place, streaming straight
/// out of the source archive.
async fn export(ctx: &Ctx, source: &Path, members: &[Member], target: &Path) -> Result<()> {
    let layout = ctx.layout()?;
    for member in members {
        let roms = ctx.datafile.find_by_crc(member.size, &member.crc);
        for rom in &roms {
            let placement = layout.export_path(rom).map_err(ErrorKind::layout)?;
            let full = target.join(placement.path());
            match &placement {
                Placement::Archived { member: destination, .. } => {
                    let _lock = ctx.archive_locks.hold(&full).await;
                    let existing = {
                        let archive_path = full.clone();
                        let destination = destination.clone();
                        spawn_blocking(move || {
                            romset_archive::find_member(&archive_path, &destination)
                                .map_err(ErrorKind::archive)
                        })
                        .await
                        .unwrap()?
                    };
                    if !existing.is_some_and(|m| m.crc == rom.crc && m.size == rom.size) {
                        info!(
                            "Archiving {} from {} into {}",
                            member.name,
                            source.display(),
                            full.display()
                        );
                        if ctx.destructive {
                            ensure_parent(&full).await?;
                            let source = source.to_path_buf();
                            let member_name = member.name.clone();
                            let archive_path = full.clone();
                            let destination = destination.clone();
                            spawn_blocking(move || -> Result<()> {
                                let mut archive =
                                    Archive::open(&source).map_err(ErrorKind::archive)?;
                                let reader = archive
                                    .member_reader(&member_name)
                                    .map_err(ErrorKind::archive)?;
                                torrent::create_or_update(&archive_path, &destination, reader)
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
                        info!(
                            "Extracting {} from {} to {}",
                            member.name,
                            source.display(),
                            full.display()
                        );
                        if ctx.destructive {
                            ensure_parent(&full).await?;
                            let source = source.to_path_buf();
                            let member_name = member.name.clone();
                            let destination = full.clone();
                            spawn_blocking(move || -> Result<()> {
                                let mut archive =
                                    Archive::open(&source).map_err(ErrorKind::archive)?;
                                let mut reader = archive
                                    .member_reader(&member_name)
                                    .map_err(ErrorKind::archive)?;
                                let mut out = std::fs::File::create(&destination)
                                    .map_err(ErrorKind::Io)?;
                                std::io::copy(&mut reader, &mut out).map_err(ErrorKind::Io)?;
                                Ok(())
                            })
                            .await
                            .unwrap()?;
                            ctx.counters.record_written(rom.size);
                        }
                    }
                },
            }
            ctx.datafile.seen(rom).map_err(ErrorKind::dat)?;
        }
    }
    Ok(())
}

/// Decide the fate of an archive in the target tree.
///
/// Members that are not some rom's canonical `(archive, member)` pairing
/// are evictees. All evictees: the zip goes. No evictees: the content is
/// right but the encoding may not be canonical, so rewrite and compare.
/// Some evictees: prune them.
async fn clean(ctx: &Ctx, path: &Path, members: &[Member], target: &Path) -> Result<()> {
    let layout = ctx.layout()?;

    let mut evict: HashSet<String> = HashSet::new();
    for member in members {
        let roms = ctx.datafile.find_by_crc(member.size, &member.crc);
        let mut retained = false;
        for rom in &roms {
            let placement = layout.export_path(rom).map_err(ErrorKind::layout)?;
            if let Placement::Archived { member: destination, .. } = &placement {
                if target.join(placement.path()).as_path() == path && *destination == member.name {
                    retained = true;
                    break;
                }
            }
        }
        if !retained {
            evict.insert(member.name.clone());
        }
    }

    if evict.len() == members.len() {
        info!("Deleting {}", path.display());
        if ctx.destructive {
            tokio::fs::remove_file(path).await.map_err(ErrorKind::Io)?;
        }
    } else if evict.is_empty() {
        let recreated = {
            let path = path.to_path_buf();
            spawn_blocking(move || torrent::recreate(&path).map_err(ErrorKind::archive))
                .await
                .unwrap()?
        };
        let (current, _) = hash::sha1_file(path).await?;
        if recreated.sha1() != current {
            info!("Replacing {}", path.display());
            if ctx.destructive {
                let target_path = path.to_path_buf();
                spawn_blocking(move || {
                    recreated.replace(&target_path).map_err(ErrorKind::archive)
                })
                .await
                .unwrap()?;
                let rewritten = tokio::fs::metadata(path).await.map_err(ErrorKind::Io)?.len();
                ctx.counters.record_written(rewritten);
            }
        }
    } else {
        for name in &evict {
            info!("Deleting {} from {}", name, path.display());
        }
        if ctx.destructive {
            let path = path.to_path_buf();
            spawn_blocking(move || torrent::prune(&path, &evict).map_err(ErrorKind::archive))
                .await
                .unwrap()?;
        }
    }
    Ok(())
}
