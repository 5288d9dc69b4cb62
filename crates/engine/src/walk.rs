//! Directory traversal feeding the reconciliation pipeline.

use crate::error::{ErrorKind, Result};
use async_channel::Sender;
use romset_layout::Layout;
use std::path::PathBuf;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Walk one root, emitting every regular file into the shared queue.
///
/// Hidden entries (basename starting with `.`) are skipped silently, and so
/// is anything the bound layout claims as its own bookkeeping. Both suppress
/// the entire subtree when the entry is a directory.
///
/// Emission is a select against the cancellation token; a fired token ends
/// the walk with [`ErrorKind::Cancelled`].
#[instrument(skip(out, cancel), fields(root = %root.display()))]
pub(crate) async fn walk(
    root: PathBuf,
    layout: Option<Layout>,
    out: Sender<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut pending = vec![root.clone()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await.map_err(ErrorKind::Walk)?;
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Walk)? {
            let path = entry.path();

            if entry.file_name().as_encoded_bytes().first() == Some(&b'.') {
                continue;
            }

            if let (Some(layout), Ok(rel)) = (layout, path.strip_prefix(&root)) {
                if layout.ignore_path(rel) {
                    continue;
                }
            }

            let file_type = entry.file_type().await.map_err(ErrorKind::Walk)?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            tokio::select! {
                sent = out.send(path) => {
                    // The queue only closes when the pipeline is tearing
                    // down, which is indistinguishable from cancellation
                    // from in here.
                    if sent.is_err() {
                        exn::bail!(ErrorKind::Cancelled);
                    }
                },
                _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::Path;

    async fn collect(root: &Path, layout: Option<Layout>) -> BTreeSet<PathBuf> {
        let (tx, rx) = async_channel::unbounded();
        let cancel = CancellationToken::new();
        walk(root.to_path_buf(), layout, tx, cancel).await.unwrap();
        let mut found = BTreeSet::new();
        while let Ok(path) = rx.try_recv() {
            found.insert(path.strip_prefix(root).unwrap().to_path_buf());
        }
        found
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn test_walk_emits_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.bin"));
        touch(&dir.path().join("sub/b.bin"));
        let found = collect(dir.path(), None).await;
        assert_eq!(found, BTreeSet::from([PathBuf::from("a.bin"), PathBuf::from("sub/b.bin")]));
    }

    #[tokio::test]
    async fn test_walk_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.bin"));
        touch(&dir.path().join(".hidden"));
        touch(&dir.path().join(".git/config"));
        let found = collect(dir.path(), None).await;
        assert_eq!(found, BTreeSet::from([PathBuf::from("a.bin")]));
    }

    #[tokio::test]
    async fn test_walk_honours_layout_ignores() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("game.j64"));
        touch(&dir.path().join("firmware.upd"));
        touch(&dir.path().join("save.e2p"));
        let found = collect(dir.path(), Some(Layout::JaguarSd)).await;
        assert_eq!(found, BTreeSet::from([PathBuf::from("game.j64")]));
    }

    #[tokio::test]
    async fn test_walk_skips_ignored_subtree() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("game.smc"));
        touch(&dir.path().join("sd2snes/firmware.img"));
        let found = collect(dir.path(), Some(Layout::Sd2Snes)).await;
        assert_eq!(found, BTreeSet::from([PathBuf::from("game.smc")]));
    }

    #[tokio::test]
    async fn test_cancelled_walk_errors() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.bin"));
        // A rendezvous queue nobody reads from, so the send must select on
        // the already-fired token.
        let (tx, _rx) = async_channel::bounded(1);
        tx.send(PathBuf::new()).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = walk(dir.path().to_path_buf(), None, tx, cancel).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Cancelled));
    }
}
