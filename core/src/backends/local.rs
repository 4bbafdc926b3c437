//! Local-directory backend: serves a directory on this machine as if it
//! were a remote root.
//!
//! Used as the reference implementation of [`RemoteBackend`] and for
//! exercising the engines without a server.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use tracing::debug;

use super::RemoteBackend;
use crate::config::{validate_local_settings, LocalSettings};
use crate::errors::{Operation, TransferError};
use crate::files::utils::datetime_from_epoch;
use crate::files::{RemoteFile, RemotePath};

/// Backend over the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

/// An "open" local root. Closing only flips the flag.
#[derive(Debug)]
pub struct LocalSession {
    root: PathBuf,
    open: bool,
}

impl LocalSession {
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Resolve a remote path below the root. `RemotePath` normalization
    /// already removed `..`, so the result cannot escape the root.
    fn resolve(&self, path: &RemotePath) -> PathBuf {
        // Backslashes separate components on Windows, so they are split
        // and normalized again before touching the filesystem.
        #[cfg(windows)]
        let path = &RemotePath::parse(&path.to_string().replace('\\', "/"));
        let mut full = self.root.clone();
        for segment in path.segments() {
            full.push(segment);
        }
        full
    }

    fn ensure_open(&self, path: &RemotePath, operation: Operation) -> Result<(), TransferError> {
        if self.open {
            Ok(())
        } else {
            Err(TransferError::transfer(path, operation, "session is closed"))
        }
    }
}

impl RemoteBackend for LocalBackend {
    type Settings = LocalSettings;
    type Session = LocalSession;
    type Reader = File;

    fn protocol(&self) -> &'static str {
        "local"
    }

    fn connect(&self, settings: &LocalSettings) -> Result<LocalSession, TransferError> {
        validate_local_settings(settings)?;
        let host = settings.root.to_string_lossy();
        let metadata = std::fs::metadata(&settings.root)
            .map_err(|e| TransferError::connection(&host, 0, e))?;
        if !metadata.is_dir() {
            return Err(TransferError::connection(&host, 0, "root is not a directory"));
        }
        Ok(LocalSession {
            root: settings.root.clone(),
            open: true,
        })
    }

    fn list(
        &self,
        session: &mut LocalSession,
        path: &RemotePath,
    ) -> Result<Vec<RemoteFile>, TransferError> {
        session.ensure_open(path, Operation::List)?;
        let dir = session.resolve(path);
        let entries =
            std::fs::read_dir(&dir).map_err(|e| TransferError::from_io(&e, path, Operation::List))?;

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TransferError::from_io(&e, path, Operation::List))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "." || name == ".." {
                continue;
            }

            let link_meta = entry
                .metadata()
                .map_err(|e| TransferError::from_io(&e, path.child(&name), Operation::List))?;
            let is_symlink = link_meta.file_type().is_symlink();
            // Report the target's type and size for symlinks, like `ls -lL`;
            // dangling links fall back to the link itself.
            let metadata = if is_symlink {
                std::fs::metadata(entry.path()).unwrap_or(link_meta)
            } else {
                link_meta
            };

            let modified_at = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .and_then(|d| datetime_from_epoch(d.as_secs()));

            result.push(RemoteFile {
                path: path.child(&name),
                name,
                is_directory: metadata.is_dir(),
                is_symlink,
                size: if metadata.is_dir() {
                    None
                } else {
                    Some(metadata.len())
                },
                modified_at,
                permissions: get_permissions(&metadata),
            });
        }

        result.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(result)
    }

    fn open_read(
        &self,
        session: &mut LocalSession,
        path: &RemotePath,
        offset: u64,
    ) -> Result<File, TransferError> {
        session.ensure_open(path, Operation::Open)?;
        let full = session.resolve(path);
        if full.is_dir() {
            return Err(TransferError::transfer(path, Operation::Open, "is a directory"));
        }
        let mut file =
            File::open(&full).map_err(|e| TransferError::from_io(&e, path, Operation::Open))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| TransferError::from_io(&e, path, Operation::Open))?;
        }
        Ok(file)
    }

    fn close(&self, session: &mut LocalSession) {
        if session.open {
            session.open = false;
            debug!(root = %session.root.display(), "Local session closed");
        }
    }
}

/// Get permission string from metadata (Unix only).
#[cfg(unix)]
fn get_permissions(metadata: &std::fs::Metadata) -> Option<String> {
    use crate::files::utils::format_permissions;
    use std::os::unix::fs::PermissionsExt;
    Some(format_permissions(metadata.permissions().mode()))
}

/// On non-Unix platforms, permissions are not available in rwx format.
#[cfg(not(unix))]
fn get_permissions(_metadata: &std::fs::Metadata) -> Option<String> {
    None
}
