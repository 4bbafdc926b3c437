//! Lazy chunked download of one remote file with a deferred result.

use std::fmt;
use std::future::Future;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{LazyChannel, SessionGuard};
use crate::backends::RemoteBackend;
use crate::errors::{Operation, TransferError};
use crate::files::{RemotePath, TransferResult};

pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Download options.
///
/// - `chunk_size`: bytes per emitted chunk (the last may be shorter); must
///   be greater than zero.
/// - `offset`: byte position to start reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOptions {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub offset: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            offset: 0,
        }
    }
}

impl DownloadOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A started download: the chunks and the result that resolves once they
/// end.
#[derive(Debug)]
pub struct Download {
    pub chunks: ChunkStream,
    pub result: TransferHandle,
}

impl Download {
    pub fn into_parts(self) -> (ChunkStream, TransferHandle) {
        (self.chunks, self.result)
    }
}

/// File content in order. A read failure is the last item.
///
/// Owns the sending half of the result. It counts the bytes it actually
/// yields and resolves the result when the stream ends: success only after
/// the producer's clean end of stream, failure on an error item, and
/// [`TransferError::Cancelled`] when dropped before either.
pub struct ChunkStream {
    inner: LazyChannel<Result<Bytes, TransferError>>,
    result_tx: Option<oneshot::Sender<TransferResult>>,
    /// Fires once the producer has finished the transfer cleanly.
    completed: oneshot::Receiver<()>,
    delivered: u64,
    path: String,
}

impl ChunkStream {
    fn resolve(&mut self, result: TransferResult) {
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(result);
        }
    }

    fn cancelled(&self) -> TransferResult {
        TransferResult::failure(
            self.delivered,
            TransferError::Cancelled {
                path: self.path.clone(),
            },
        )
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes, TransferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(this.inner.poll_recv(cx));
        match &item {
            Some(Ok(chunk)) => this.delivered += chunk.len() as u64,
            Some(Err(e)) => this.resolve(TransferResult::failure(this.delivered, e.clone())),
            // The producer sends its completion signal before closing the
            // channel, so a missing signal here means it did not finish.
            None if this.completed.try_recv().is_ok() => {
                this.resolve(TransferResult::success(this.delivered));
            }
            None => {
                let result = this.cancelled();
                this.resolve(result);
            }
        }
        Poll::Ready(item)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if self.result_tx.is_some() {
            debug!(path = %self.path, delivered = self.delivered, "Chunk stream dropped early");
            let result = self.cancelled();
            self.resolve(result);
        }
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream")
            .field("path", &self.path)
            .field("started", &self.inner.is_started())
            .field("delivered", &self.delivered)
            .finish()
    }
}

/// Resolves to the download's [`TransferResult`] once the chunk stream has
/// ended or been dropped. Awaiting it while still holding an unpolled
/// stream never completes.
///
/// On success or failure the session is already closed when the result
/// resolves. After a cancellation the producer notices the dropped stream
/// at its next send and closes the session shortly after.
#[derive(Debug)]
pub struct TransferHandle {
    rx: oneshot::Receiver<TransferResult>,
    path: String,
}

impl Future for TransferHandle {
    type Output = TransferResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TransferResult> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            // The stream resolves the result before it goes away, so a
            // closed channel only happens if it was leaked.
            received.unwrap_or_else(|_| {
                TransferResult::failure(
                    0,
                    TransferError::Cancelled {
                        path: this.path.clone(),
                    },
                )
            })
        })
    }
}

/// Stream the file at `path` in chunks of `options.chunk_size`.
///
/// Fails immediately only on invalid options. Connection and read errors
/// arrive through the chunk stream and the result.
pub fn download<B: RemoteBackend>(
    backend: Arc<B>,
    settings: B::Settings,
    path: &str,
    options: DownloadOptions,
) -> Result<Download, TransferError> {
    options.validate()?;
    let path = RemotePath::parse(path);
    let (result_tx, result_rx) = oneshot::channel();
    let (completed_tx, completed_rx) = oneshot::channel();
    let handle = TransferHandle {
        rx: result_rx,
        path: path.to_string(),
    };
    let display = path.to_string();
    let inner = LazyChannel::new(move |tx| {
        if transfer(backend, settings, path, options, &tx).is_success() {
            let _ = completed_tx.send(());
        }
        // `tx` drops here, after the completion signal.
    });
    let chunks = ChunkStream {
        inner,
        result_tx: Some(result_tx),
        completed: completed_rx,
        delivered: 0,
        path: display,
    };
    Ok(Download {
        chunks,
        result: handle,
    })
}

/// Runs on the blocking pool. The session is closed before returning.
///
/// The returned result describes what the producer sent; the result the
/// caller sees is resolved by [`ChunkStream`] from what it delivered.
fn transfer<B: RemoteBackend>(
    backend: Arc<B>,
    settings: B::Settings,
    path: RemotePath,
    options: DownloadOptions,
    tx: &mpsc::Sender<Result<Bytes, TransferError>>,
) -> TransferResult {
    let protocol = backend.protocol();
    let fail = |error: TransferError, sent: u64| {
        let _ = tx.blocking_send(Err(error.clone()));
        TransferResult::failure(sent, error)
    };

    let mut guard = match SessionGuard::connect(backend, &settings) {
        Ok(guard) => guard,
        Err(e) => return fail(e, 0),
    };
    let mut reader = match guard.open_read(&path, options.offset) {
        Ok(reader) => reader,
        Err(e) => {
            guard.close();
            return fail(e, 0);
        }
    };
    info!(protocol, path = %path, offset = options.offset, "Download started");

    let mut sent = 0u64;
    loop {
        let (chunk, read_error) = read_chunk(&mut reader, options.chunk_size);
        let at_end = chunk.len() < options.chunk_size;
        let len = chunk.len() as u64;

        if !chunk.is_empty() {
            if tx.blocking_send(Ok(chunk)).is_err() {
                drop(reader);
                guard.close();
                debug!(protocol, path = %path, sent, "Download cancelled by consumer");
                return TransferResult::failure(
                    sent,
                    TransferError::Cancelled {
                        path: path.to_string(),
                    },
                );
            }
            sent += len;
        }

        if let Some(e) = read_error {
            drop(reader);
            guard.close();
            debug!(protocol, path = %path, sent, "Download failed: {e}");
            return fail(TransferError::transfer(&path, Operation::Read, e), sent);
        }
        if at_end {
            break;
        }
    }

    drop(reader);
    let finished = guard.finish_read(&path);
    guard.close();
    if let Err(e) = finished {
        debug!(protocol, path = %path, sent, "Download rejected at completion: {e}");
        return fail(e, sent);
    }
    debug!(protocol, path = %path, bytes = sent, "Download complete");
    TransferResult::success(sent)
}

/// Fill one chunk, stopping early only at end of stream or on error.
///
/// Bytes read before an error are returned alongside it.
fn read_chunk<R: Read>(reader: &mut R, chunk_size: usize) -> (Bytes, Option<io::Error>) {
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut filled = 0;
    let mut error = None;
    while filled < chunk_size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    buf.truncate(filled);
    (buf.freeze(), error)
}
