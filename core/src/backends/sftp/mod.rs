//! SFTP backend on libssh2 (`ssh2`), in blocking mode.

pub mod auth;

use std::io::{Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info, warn};

use self::auth::{authenticate, verify_host_key};
use super::{connect_tcp, RemoteBackend};
use crate::config::{validate_sftp_settings, SftpSettings};
use crate::errors::{Operation, TransferError};
use crate::files::utils::{datetime_from_epoch, format_permissions};
use crate::files::{RemoteFile, RemotePath};

/// SFTP over SSH.
#[derive(Debug, Clone, Copy, Default)]
pub struct SftpBackend;

/// SSH session and its SFTP channel.
pub struct SftpSession {
    host: String,
    port: u16,
    // Field order matters on drop: the channel goes before the session.
    sftp: Option<ssh2::Sftp>,
    session: Option<ssh2::Session>,
}

impl std::fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("open", &self.sftp.is_some())
            .finish()
    }
}

impl SftpSession {
    fn sftp(&self, path: &RemotePath, operation: Operation) -> Result<&ssh2::Sftp, TransferError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| TransferError::transfer(path, operation, "session is closed"))
    }
}

/// Map an SFTP status into the error taxonomy.
///
/// SFTP status codes: `SSH_FX_NO_SUCH_FILE` = 2, `SSH_FX_PERMISSION_DENIED` = 3.
fn map_ssh_error(e: ssh2::Error, path: &RemotePath, operation: Operation) -> TransferError {
    match e.code() {
        ssh2::ErrorCode::SFTP(2) => TransferError::NotFound {
            path: path.to_string(),
            operation,
        },
        ssh2::ErrorCode::SFTP(3) => TransferError::PermissionDenied {
            path: path.to_string(),
            operation,
        },
        _ => TransferError::transfer(path, operation, e.message()),
    }
}

fn entry_from_stat(parent: &RemotePath, name: &str, stat: &ssh2::FileStat) -> RemoteFile {
    let file_type = stat.file_type();
    let is_directory = file_type.is_dir();
    RemoteFile {
        name: name.to_string(),
        path: parent.child(name),
        is_directory,
        is_symlink: file_type.is_symlink(),
        size: if is_directory { None } else { stat.size },
        modified_at: stat.mtime.and_then(datetime_from_epoch),
        permissions: stat.perm.map(format_permissions),
    }
}

impl RemoteBackend for SftpBackend {
    type Settings = SftpSettings;
    type Session = SftpSession;
    type Reader = ssh2::File;

    fn protocol(&self) -> &'static str {
        "sftp"
    }

    fn connect(&self, settings: &SftpSettings) -> Result<SftpSession, TransferError> {
        validate_sftp_settings(settings)?;
        let settings = settings.expand();
        let (host, port) = (settings.host.as_str(), settings.port);
        let conn_err = |reason: &dyn std::fmt::Display| TransferError::connection(host, port, reason);

        let tcp = connect_tcp(host, port, settings.connect_timeout()).map_err(|e| conn_err(&e))?;
        let mut session = ssh2::Session::new().map_err(|e| conn_err(&e))?;
        session.set_tcp_stream(tcp);
        session.set_blocking(true);
        session.set_timeout(u32::try_from(settings.read_timeout().as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| conn_err(&format!("Handshake failed: {e}")))?;

        if settings.strict_host_key_checking {
            verify_host_key(&session, &settings).map_err(|e| conn_err(&e))?;
        }
        authenticate(&session, &settings).map_err(|e| conn_err(&e))?;

        let sftp = session
            .sftp()
            .map_err(|e| conn_err(&format!("SFTP init failed: {e}")))?;

        info!(host, port, username = %settings.username, "SFTP session established");
        Ok(SftpSession {
            host: host.to_string(),
            port,
            sftp: Some(sftp),
            session: Some(session),
        })
    }

    fn list(
        &self,
        session: &mut SftpSession,
        path: &RemotePath,
    ) -> Result<Vec<RemoteFile>, TransferError> {
        let sftp = session.sftp(path, Operation::List)?;
        let raw = path.to_string();
        let entries = sftp
            .readdir(Path::new(&raw))
            .map_err(|e| map_ssh_error(e, path, Operation::List))?;

        let mut result: Vec<RemoteFile> = entries
            .iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy();
                if name == "." || name == ".." {
                    return None;
                }
                Some(entry_from_stat(path, &name, stat))
            })
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(path = %path, entries = result.len(), "SFTP listing received");
        Ok(result)
    }

    fn open_read(
        &self,
        session: &mut SftpSession,
        path: &RemotePath,
        offset: u64,
    ) -> Result<ssh2::File, TransferError> {
        let sftp = session.sftp(path, Operation::Open)?;
        let raw = path.to_string();
        let mut file = sftp
            .open(Path::new(&raw))
            .map_err(|e| map_ssh_error(e, path, Operation::Open))?;
        if file
            .stat()
            .map_err(|e| map_ssh_error(e, path, Operation::Open))?
            .is_dir()
        {
            return Err(TransferError::transfer(path, Operation::Open, "is a directory"));
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| TransferError::from_io(&e, path, Operation::Open))?;
        }
        Ok(file)
    }

    fn close(&self, session: &mut SftpSession) {
        drop(session.sftp.take());
        if let Some(ssh) = session.session.take() {
            if let Err(e) = ssh.disconnect(None, "closing", None) {
                warn!(host = %session.host, "SSH disconnect failed: {e}");
            }
            debug!(host = %session.host, port = session.port, "SFTP session closed");
        }
    }
}
