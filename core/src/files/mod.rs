pub mod path;
pub mod utils;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TransferError;

pub use path::RemotePath;

/// One entry discovered by a traversal.
///
/// Produced by every backend's `list`. Field names are serialized as
/// camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    pub path: RemotePath,
    pub is_directory: bool,
    /// Symlinks are reported but never followed during traversal.
    #[serde(default)]
    pub is_symlink: bool,
    /// `None` when the server does not report a size.
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Unix "rwxrwxrwx" format, `None` when not available.
    pub permissions: Option<String>,
}

impl RemoteFile {
    /// A plain file entry under `parent` with no optional metadata.
    pub fn file(parent: &RemotePath, name: &str, size: Option<u64>) -> Self {
        Self {
            name: name.to_string(),
            path: parent.child(name),
            is_directory: false,
            is_symlink: false,
            size,
            modified_at: None,
            permissions: None,
        }
    }

    /// A directory entry under `parent` with no optional metadata.
    pub fn directory(parent: &RemotePath, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: parent.child(name),
            is_directory: true,
            is_symlink: false,
            size: None,
            modified_at: None,
            permissions: None,
        }
    }
}

/// How a download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failure(TransferError),
}

/// Terminal record of one download, resolved exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub bytes_transferred: u64,
    pub outcome: TransferOutcome,
}

impl TransferResult {
    pub fn success(bytes_transferred: u64) -> Self {
        Self {
            bytes_transferred,
            outcome: TransferOutcome::Success,
        }
    }

    pub fn failure(bytes_transferred: u64, error: TransferError) -> Self {
        Self {
            bytes_transferred,
            outcome: TransferOutcome::Failure(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error().is_some_and(TransferError::is_cancelled)
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.outcome {
            TransferOutcome::Success => None,
            TransferOutcome::Failure(e) => Some(e),
        }
    }

    /// Convert into a `Result`, keeping the byte count on success.
    pub fn into_result(self) -> Result<u64, TransferError> {
        match self.outcome {
            TransferOutcome::Success => Ok(self.bytes_transferred),
            TransferOutcome::Failure(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Operation;

    #[test]
    fn remote_file_serializes_camel_case() {
        let entry = RemoteFile::file(&RemotePath::parse("/data"), "a.txt", Some(10));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["path"], "/data/a.txt");
        assert_eq!(json["isDirectory"], false);
        assert_eq!(json["size"], 10);
        assert!(json["modifiedAt"].is_null());
    }

    #[test]
    fn remote_file_deserializes_path_string() {
        let entry: RemoteFile = serde_json::from_value(serde_json::json!({
            "name": "b",
            "path": "/data/./b/",
            "isDirectory": true,
            "size": null,
            "modifiedAt": null,
            "permissions": "rwxr-xr-x"
        }))
        .unwrap();
        assert_eq!(entry.path, RemotePath::parse("/data/b"));
        assert!(!entry.is_symlink);
    }

    #[test]
    fn result_accessors() {
        let ok = TransferResult::success(10);
        assert!(ok.is_success());
        assert_eq!(ok.into_result(), Ok(10));

        let cancelled = TransferResult::failure(4, TransferError::Cancelled { path: "/a".into() });
        assert!(!cancelled.is_success());
        assert!(cancelled.is_cancelled());

        let failed = TransferResult::failure(
            0,
            TransferError::NotFound {
                path: "/a".into(),
                operation: Operation::Open,
            },
        );
        assert!(!failed.is_cancelled());
        assert!(failed.into_result().is_err());
    }
}
