//! The reconciliation engine: scan trees, match content against a dat
//! manifest, and verify, export or clean accordingly.
//!
//! One [`Engine`] wraps a shared [`Datafile`], a [`Layout`] and the
//! destructive flag. Each public operation assembles a fresh pipeline
//! (walkers, a classifier and two worker pools under a single cancellation
//! scope), runs it to completion and returns transfer [`Stats`]. With the
//! destructive flag off every would-be mutation is logged instead.

pub mod error;
mod hash;
mod loose;
mod pipeline;
mod sniff;
mod walk;
mod zipped;

use crate::error::{ErrorKind, Result};
use crate::pipeline::{Counters, Ctx, Op};
use romset_dat::Datafile;
use romset_layout::Layout;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Totals for one operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Files (loose or archive) processed
    pub files: u64,
    /// Bytes hashed or read from archives
    pub bytes_read: u64,
    /// Bytes written into the target tree
    pub bytes_written: u64,
}

/// The scanning-and-reconciliation engine.
pub struct Engine {
    datafile: Arc<Datafile>,
    layout: Option<Layout>,
    destructive: bool,
}

impl Engine {
    /// Build an engine over a parsed manifest.
    ///
    /// Without a layout only [`verify`](Self::verify) is available;
    /// [`export`](Self::export) and [`clean`](Self::clean) need one to know
    /// where content belongs. With `destructive` false the engine logs
    /// intended actions without touching the tree.
    pub fn new(
        datafile: Arc<Datafile>,
        destructive: bool,
        layout: impl Into<Option<Layout>>,
    ) -> Self {
        Self { datafile, layout: layout.into(), destructive }
    }

    /// Check one or more trees against the manifest, marking every matched
    /// rom as seen. The residual manifest afterwards is whatever was never
    /// observed.
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub async fn verify(&self, roots: &[PathBuf]) -> Result<Stats> {
        self.run(Op::Verify, roots.to_vec()).await
    }

    /// Materialise every recognised rom from the source trees into its
    /// canonical location under `target`.
    #[instrument(skip_all, fields(dest = %target.as_ref().display(), sources = sources.len()))]
    pub async fn export(&self, target: impl AsRef<Path>, sources: &[PathBuf]) -> Result<Stats> {
        if self.layout.is_none() {
            exn::bail!(ErrorKind::NoLayout);
        }
        self.run(Op::Export { target: target.as_ref().to_path_buf() }, sources.to_vec()).await
    }

    /// Remove everything under `target` that the layout does not account
    /// for, and canonicalise archives whose content is right but whose
    /// encoding is not.
    #[instrument(skip_all, fields(dest = %target.as_ref().display()))]
    pub async fn clean(&self, target: impl AsRef<Path>) -> Result<Stats> {
        if self.layout.is_none() {
            exn::bail!(ErrorKind::NoLayout);
        }
        let target = target.as_ref().to_path_buf();
        self.run(Op::Clean { target: target.clone() }, vec![target]).await
    }

    async fn run(&self, op: Op, roots: Vec<PathBuf>) -> Result<Stats> {
        let ctx = Arc::new(Ctx {
            datafile: self.datafile.clone(),
            layout: self.layout,
            destructive: self.destructive,
            op,
            counters: Counters::default(),
            archive_locks: Default::default(),
        });
        pipeline::run(ctx, roots).await
    }
}
