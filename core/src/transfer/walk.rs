//! Lazy depth-first traversal of a remote directory tree.

use std::collections::HashSet;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use super::{LazyChannel, SessionGuard};
use crate::backends::RemoteBackend;
use crate::errors::TransferError;
use crate::files::{RemoteFile, RemotePath};

/// Decides whether a directory entry is descended into. Rejected
/// directories are still emitted.
pub type BranchSelector = Arc<dyn Fn(&RemoteFile) -> bool + Send + Sync>;

/// Traversal options.
///
/// - `branch_selector`: directories it rejects are emitted but not listed.
/// - `max_depth`: deepest level emitted, counting the base's children as
///   level 1. `None` walks the whole tree. Servers that report a symlinked
///   directory as a plain one can only be kept from looping by this bound.
#[derive(Clone, Default)]
pub struct ListOptions {
    pub branch_selector: Option<BranchSelector>,
    pub max_depth: Option<usize>,
}

impl ListOptions {
    pub fn with_branch_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&RemoteFile) -> bool + Send + Sync + 'static,
    {
        self.branch_selector = Some(Arc::new(selector));
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    fn descends_into(&self, entry: &RemoteFile) -> bool {
        entry.is_directory
            && !entry.is_symlink
            && self.branch_selector.as_ref().map_or(true, |select| select(entry))
    }
}

impl fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListOptions")
            .field("branch_selector", &self.branch_selector.is_some())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// Entries below a base path, each directory before its descendants.
///
/// A failure ends the stream with that error as the last item.
pub struct RemoteFileStream {
    inner: LazyChannel<Result<RemoteFile, TransferError>>,
}

impl Stream for RemoteFileStream {
    type Item = Result<RemoteFile, TransferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_recv(cx)
    }
}

impl fmt::Debug for RemoteFileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFileStream")
            .field("started", &self.inner.is_started())
            .finish()
    }
}

/// Walk the tree under `base_path`, excluding the base itself.
///
/// Nothing is contacted until the stream is first polled. One session is
/// opened for the whole walk and closed when it ends, fails, or the stream
/// is dropped.
pub fn list<B: RemoteBackend>(
    backend: Arc<B>,
    settings: B::Settings,
    base_path: &str,
    options: ListOptions,
) -> RemoteFileStream {
    let base = RemotePath::parse(base_path);
    RemoteFileStream {
        inner: LazyChannel::new(move |tx| walk(backend, settings, base, options, tx)),
    }
}

fn walk<B: RemoteBackend>(
    backend: Arc<B>,
    settings: B::Settings,
    base: RemotePath,
    options: ListOptions,
    tx: mpsc::Sender<Result<RemoteFile, TransferError>>,
) {
    let protocol = backend.protocol();
    let mut guard = match SessionGuard::connect(backend, &settings) {
        Ok(guard) => guard,
        Err(e) => {
            debug!(protocol, base = %base, "Traversal could not connect: {e}");
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };

    // Each directory waits with the level of its own entries.
    let mut pending = vec![(base.clone(), 1usize)];
    let mut visited = HashSet::new();
    let mut emitted = 0usize;

    while let Some((dir, level)) = pending.pop() {
        if options.max_depth.is_some_and(|max| level > max) {
            continue;
        }
        if !visited.insert(dir.clone()) {
            debug!(protocol, path = %dir, "Skipping already listed directory");
            continue;
        }

        let entries = match guard.list(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                // Close first so the session is gone once the error is seen.
                guard.close();
                debug!(protocol, path = %dir, "Traversal failed: {e}");
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        debug!(protocol, path = %dir, entries = entries.len(), "Listed directory");

        let mut subdirs = Vec::new();
        for entry in entries {
            if options.descends_into(&entry) {
                subdirs.push((entry.path.clone(), level + 1));
            }
            if tx.blocking_send(Ok(entry)).is_err() {
                debug!(protocol, base = %base, emitted, "Traversal dropped by consumer");
                return;
            }
            emitted += 1;
        }
        // Reversed so the first subdirectory is popped first.
        pending.extend(subdirs.into_iter().rev());
    }

    guard.close();
    debug!(protocol, base = %base, emitted, "Traversal complete");
}
