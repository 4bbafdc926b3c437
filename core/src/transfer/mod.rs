//! Async engines over the blocking [`RemoteBackend`] trait.
//!
//! Each traversal or download runs its backend calls on one
//! `spawn_blocking` task that feeds the async consumer through a bounded
//! `tokio::sync::mpsc` channel of capacity one, so the producer is never
//! more than one item ahead. The task is only spawned when the consumer
//! first polls the stream.

pub mod download;
pub mod walk;

use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tracing::info;

use crate::backends::RemoteBackend;
use crate::errors::TransferError;
use crate::files::{RemoteFile, RemotePath};

pub use download::{download, ChunkStream, Download, DownloadOptions, TransferHandle};
pub use walk::{list, BranchSelector, ListOptions, RemoteFileStream};

/// Owns one backend session and closes it exactly once: explicitly via
/// [`SessionGuard::close`], or on drop (including unwinding).
pub(crate) struct SessionGuard<B: RemoteBackend> {
    backend: Arc<B>,
    session: B::Session,
    closed: bool,
}

impl<B: RemoteBackend> SessionGuard<B> {
    pub(crate) fn connect(backend: Arc<B>, settings: &B::Settings) -> Result<Self, TransferError> {
        let session = backend.connect(settings)?;
        info!(protocol = backend.protocol(), "Session opened");
        Ok(Self {
            backend,
            session,
            closed: false,
        })
    }

    pub(crate) fn list(&mut self, path: &RemotePath) -> Result<Vec<RemoteFile>, TransferError> {
        self.backend.list(&mut self.session, path)
    }

    pub(crate) fn open_read(
        &mut self,
        path: &RemotePath,
        offset: u64,
    ) -> Result<B::Reader, TransferError> {
        self.backend.open_read(&mut self.session, path, offset)
    }

    pub(crate) fn finish_read(&mut self, path: &RemotePath) -> Result<(), TransferError> {
        self.backend.finish_read(&mut self.session, path)
    }

    pub(crate) fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.backend.close(&mut self.session);
        }
    }
}

impl<B: RemoteBackend> Drop for SessionGuard<B> {
    fn drop(&mut self) {
        self.release();
    }
}

type Launch = Box<dyn FnOnce() + Send>;

/// Receiving end of a producer that starts on first poll.
///
/// Dropping it before the first poll drops the producer without running
/// it, so no connection is ever made.
pub(crate) struct LazyChannel<T> {
    rx: mpsc::Receiver<T>,
    launch: Option<Launch>,
}

impl<T: Send + 'static> LazyChannel<T> {
    pub(crate) fn new<F>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let launch: Launch = Box::new(move || {
            tokio::task::spawn_blocking(move || producer(tx));
        });
        Self {
            rx,
            launch: Some(launch),
        }
    }

    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if let Some(launch) = self.launch.take() {
            launch();
        }
        self.rx.poll_recv(cx)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.launch.is_none()
    }
}
