//! Error types shared by every backend and both transfer engines.
//!
//! Backends map their library errors (`ssh2::Error`, `std::io::Error`,
//! FTP reply codes) into [`TransferError`] at the boundary, so the engines
//! and callers only ever see one taxonomy. Every variant names the remote
//! path (or host) and the [`Operation`] that failed.

use std::fmt;

use thiserror::Error;

/// The backend operation during which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    List,
    Open,
    Read,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::List => "list",
            Operation::Open => "open",
            Operation::Read => "read",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by traversals and downloads.
///
/// The type is `Clone` so a failing download can both terminate its chunk
/// stream with the error and carry it in the final
/// [`TransferResult`](crate::files::TransferResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The session could not be established (network, handshake or auth).
    #[error("Connection to {host}:{port} failed: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    /// The remote path does not exist.
    #[error("Not found: {path} ({operation})")]
    NotFound { path: String, operation: Operation },

    /// The server refused access to the remote path.
    #[error("Permission denied: {path} ({operation})")]
    PermissionDenied { path: String, operation: Operation },

    /// A protocol or mid-stream failure. Bytes already emitted stay emitted.
    #[error("Transfer failed: {operation} {path}: {reason}")]
    Transfer {
        path: String,
        operation: Operation,
        reason: String,
    },

    /// The consumer stopped pulling before the download completed.
    #[error("Transfer cancelled: {path}")]
    Cancelled { path: String },

    /// The settings or options are unusable.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl TransferError {
    pub(crate) fn connection(host: &str, port: u16, reason: impl fmt::Display) -> Self {
        TransferError::Connection {
            host: host.to_string(),
            port,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn transfer(
        path: impl fmt::Display,
        operation: Operation,
        reason: impl fmt::Display,
    ) -> Self {
        TransferError::Transfer {
            path: path.to_string(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Map an I/O error for `path` into the matching variant.
    pub(crate) fn from_io(err: &std::io::Error, path: impl fmt::Display, operation: Operation) -> Self {
        let path = path.to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => TransferError::NotFound { path, operation },
            std::io::ErrorKind::PermissionDenied => {
                TransferError::PermissionDenied { path, operation }
            }
            _ => TransferError::Transfer {
                path,
                operation,
                reason: err.to_string(),
            },
        }
    }

    /// Whether this error is the cancellation marker rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        let err = TransferError::connection("ftp.example.com", 21, "refused");
        assert_eq!(
            err.to_string(),
            "Connection to ftp.example.com:21 failed: refused"
        );
    }

    #[test]
    fn path_errors_name_path_and_operation() {
        let err = TransferError::NotFound {
            path: "/data/missing".into(),
            operation: Operation::List,
        };
        assert_eq!(err.to_string(), "Not found: /data/missing (list)");

        let err = TransferError::PermissionDenied {
            path: "/root".into(),
            operation: Operation::Open,
        };
        assert_eq!(err.to_string(), "Permission denied: /root (open)");

        let err = TransferError::transfer("/data/a.txt", Operation::Read, "reset by peer");
        assert_eq!(
            err.to_string(),
            "Transfer failed: read /data/a.txt: reset by peer"
        );
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = TransferError::from_io(&io_err, "/x", Operation::Open);
        assert_eq!(
            err,
            TransferError::NotFound {
                path: "/x".into(),
                operation: Operation::Open
            }
        );
    }

    #[test]
    fn io_permission_maps_to_permission_denied() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = TransferError::from_io(&io_err, "/secret", Operation::List);
        assert!(matches!(err, TransferError::PermissionDenied { .. }));
    }

    #[test]
    fn other_io_maps_to_transfer_with_reason() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let err = TransferError::from_io(&io_err, "/a", Operation::Read);
        assert_eq!(err.to_string(), "Transfer failed: read /a: pipe broke");
    }

    #[test]
    fn cancelled_is_flagged() {
        let err = TransferError::Cancelled { path: "/a".into() };
        assert!(err.is_cancelled());
        assert!(!TransferError::InvalidConfig("x".into()).is_cancelled());
    }
}
