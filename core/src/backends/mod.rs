//! Transport backends implementing [`RemoteBackend`].
//!
//! The network backends depend on optional native libraries (`openssl`,
//! `libssh2`) and are gated behind cargo features so that consumers that
//! only need one protocol avoid the other's dependency.
//!
//! All methods are **synchronous** and may block on network I/O. The
//! engines in [`crate::transfer`] run them on the tokio blocking pool, one
//! dedicated task per traversal or download.

#[cfg(feature = "ftp")]
pub mod ftp;
pub mod local;
#[cfg(feature = "sftp")]
pub mod sftp;

use std::io::Read;

use crate::errors::TransferError;
use crate::files::{RemoteFile, RemotePath};

/// A pluggable transfer protocol: connect, list, open-read, close.
///
/// One `Session` is owned by exactly one traversal or download for its full
/// duration; sessions are never shared between calls. The associated
/// `Reader` must not borrow the session, so the download engine can hold
/// both side by side.
pub trait RemoteBackend: Send + Sync + 'static {
    type Settings: Clone + Send + Sync + 'static;
    type Session: Send + 'static;
    type Reader: Read + Send + 'static;

    /// Short protocol name for log fields (e.g., `"ftp"`, `"sftp"`).
    fn protocol(&self) -> &'static str;

    /// Open an authenticated session.
    fn connect(&self, settings: &Self::Settings) -> Result<Self::Session, TransferError>;

    /// List the immediate children of `path`, excluding `.` and `..`.
    fn list(
        &self,
        session: &mut Self::Session,
        path: &RemotePath,
    ) -> Result<Vec<RemoteFile>, TransferError>;

    /// Open `path` for reading, positioned at `offset`.
    fn open_read(
        &self,
        session: &mut Self::Session,
        path: &RemotePath,
        offset: u64,
    ) -> Result<Self::Reader, TransferError>;

    /// Confirm that a read opened with [`open_read`](Self::open_read) and
    /// drained to end of stream completed on the server. Called after the
    /// reader is dropped. Protocols that report completion separately
    /// from the data (FTP's reply after the data connection closes)
    /// surface a server-side abort here.
    fn finish_read(
        &self,
        _session: &mut Self::Session,
        _path: &RemotePath,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    /// Release the session. Must be idempotent and must not fail: cleanup
    /// problems are logged by the implementation.
    fn close(&self, session: &mut Self::Session);
}

/// Resolve `host:port` and connect to the first address that answers
/// within `timeout`.
#[cfg(any(feature = "ftp", feature = "sftp"))]
pub(crate) fn connect_tcp(
    host: &str,
    port: u16,
    timeout: std::time::Duration,
) -> std::io::Result<std::net::TcpStream> {
    use std::net::ToSocketAddrs;

    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match std::net::TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses resolved for {host}"),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn local_backend_is_send_sync() {
        _assert_send_sync::<local::LocalBackend>();
    }

    #[cfg(feature = "ftp")]
    #[test]
    fn ftp_backends_are_send_sync() {
        _assert_send_sync::<ftp::FtpBackend>();
        _assert_send_sync::<ftp::FtpsBackend>();
    }

    #[cfg(feature = "sftp")]
    #[test]
    fn sftp_backend_is_send_sync() {
        _assert_send_sync::<sftp::SftpBackend>();
    }
}
