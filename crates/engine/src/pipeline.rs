//! Pipeline assembly: walkers feeding a classifier feeding two worker
//! pools, all under one cancellation scope.
//!
//! Every walker publishes into one shared queue, the classifier splits that
//! into loose and archive queues, and a fixed pool of workers contends on
//! each (receive contention is the work-stealing). Nothing here survives
//! the operation: queues, tasks and the cancellation token all live and die
//! inside [`run`].

use crate::error::{ErrorKind, Result};
use crate::{Stats, loose, sniff, walk, zipped};
use exn::ResultExt;
use romset_dat::Datafile;
use romset_layout::Layout;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Loose and archive workers each.
const WORKERS: usize = 10;
/// Queue depth between stages. Small: the queues exist for hand-off, not
/// buffering, and walkers are far faster than hashing workers anyway.
const QUEUE_DEPTH: usize = 32;

/// What the workers do with each classified file.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Verify,
    Export { target: PathBuf },
    Clean { target: PathBuf },
}

/// Shared, read-only context for one pipeline run.
pub(crate) struct Ctx {
    pub datafile: Arc<Datafile>,
    pub layout: Option<Layout>,
    pub destructive: bool,
    pub op: Op,
    pub counters: Counters,
    pub archive_locks: ArchiveLocks,
}

impl Ctx {
    pub fn layout(&self) -> Result<Layout> {
        match self.layout {
            Some(layout) => Ok(layout),
            None => exn::bail!(ErrorKind::NoLayout),
        }
    }
}

/// One async mutex per destination archive.
///
/// Two roms of the same game arrive as independent queue items, and both
/// rewrite the same per-game zip. The rewrite is read-all, write-temp,
/// rename; unserialised, the later rename would drop the earlier rom's
/// member.
#[derive(Debug, Default)]
pub(crate) struct ArchiveLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ArchiveLocks {
    pub async fn hold(&self, path: &Path) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Run counters, updated lock-free by every worker.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    files: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Counters {
    pub fn record_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            files: self.files.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Create missing parent directories for a destination file.
pub(crate) async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
    }
    Ok(())
}

/// Spawn the full pipeline over the given roots and wait for it to drain.
///
/// The first error cancels the scope and becomes the operation's result;
/// secondary `Cancelled` failures from other tasks never mask the cause.
pub(crate) async fn run(ctx: Arc<Ctx>, roots: Vec<PathBuf>) -> Result<Stats> {
    let cancel = CancellationToken::new();
    let (found_tx, found_rx) = async_channel::bounded(QUEUE_DEPTH);
    let (loose_tx, loose_rx) = async_channel::bounded(QUEUE_DEPTH);
    let (zip_tx, zip_rx) = async_channel::bounded(QUEUE_DEPTH);

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    for root in roots {
        tasks.spawn(walk::walk(root, ctx.layout, found_tx.clone(), cancel.clone()));
    }
    drop(found_tx);

    tasks.spawn(sniff::classify(found_rx, loose_tx, zip_tx, cancel.clone()));

    for _ in 0..WORKERS {
        tasks.spawn(loose::worker(ctx.clone(), loose_rx.clone(), cancel.clone()));
        tasks.spawn(zipped::worker(ctx.clone(), zip_rx.clone(), cancel.clone()));
    }
    drop(loose_rx);
    drop(zip_rx);

    let mut first_error: Option<crate::error::Error> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(e).or_raise(|| ErrorKind::Join),
        };
        if let Err(e) = result {
            let cause = !matches!(e.current_value(), ErrorKind::Cancelled);
            match &first_error {
                None => {
                    cancel.cancel();
                    first_error = Some(e);
                },
                // A real failure always beats a secondary cancellation.
                Some(current) if cause && matches!(current.current_value(), ErrorKind::Cancelled) => {
                    first_error = Some(e);
                },
                Some(_) => {},
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(ctx.counters.snapshot()),
    }
}
