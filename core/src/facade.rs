//! Convenience entry points per protocol.
//!
//! ```no_run
//! # async fn demo() -> Result<(), remotefs_core::TransferError> {
//! use futures_util::StreamExt;
//! use remotefs_core::facade::{Ftp, RemoteFs};
//!
//! let mut entries = Ftp::ls_anonymous("/pub", "ftp.example.com");
//! while let Some(entry) = entries.next().await {
//!     println!("{}", entry?.path);
//! }
//!
//! let download = Ftp::from_path_anonymous("/pub/README", "ftp.example.com")?;
//! let (mut chunks, result) = download.into_parts();
//! while let Some(chunk) = chunks.next().await {
//!     let _bytes = chunk?;
//! }
//! println!("{} bytes", result.await.into_result()?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::backends::RemoteBackend;
use crate::config::FtpCredentials;
use crate::errors::TransferError;
use crate::transfer::{self, Download, DownloadOptions, ListOptions, RemoteFileStream};

/// Settings type of a facade's backend.
pub type SettingsOf<F> = <<F as RemoteFs>::Backend as RemoteBackend>::Settings;

/// Binds a backend kind to the engines.
///
/// Explicit settings take precedence over host plus credentials, which in
/// turn take precedence over a bare host (anonymous login).
pub trait RemoteFs {
    type Backend: RemoteBackend + Default;

    /// Settings for `host` on the protocol's default port.
    fn settings_for(host: &str, credentials: FtpCredentials) -> SettingsOf<Self>;

    fn backend() -> Arc<Self::Backend> {
        Arc::new(Self::Backend::default())
    }

    fn ls(base_path: &str, settings: SettingsOf<Self>) -> RemoteFileStream {
        Self::ls_with_options(base_path, settings, ListOptions::default())
    }

    fn ls_with_options(
        base_path: &str,
        settings: SettingsOf<Self>,
        options: ListOptions,
    ) -> RemoteFileStream {
        transfer::list(Self::backend(), settings, base_path, options)
    }

    fn ls_with_credentials(
        base_path: &str,
        host: &str,
        username: &str,
        password: &str,
    ) -> RemoteFileStream {
        let settings = Self::settings_for(host, FtpCredentials::basic(username, password));
        Self::ls(base_path, settings)
    }

    fn ls_anonymous(base_path: &str, host: &str) -> RemoteFileStream {
        Self::ls(base_path, Self::settings_for(host, FtpCredentials::Anonymous))
    }

    fn from_path(path: &str, settings: SettingsOf<Self>) -> Result<Download, TransferError> {
        Self::from_path_with_options(path, settings, DownloadOptions::default())
    }

    fn from_path_with_options(
        path: &str,
        settings: SettingsOf<Self>,
        options: DownloadOptions,
    ) -> Result<Download, TransferError> {
        transfer::download(Self::backend(), settings, path, options)
    }

    fn from_path_with_credentials(
        path: &str,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<Download, TransferError> {
        let settings = Self::settings_for(host, FtpCredentials::basic(username, password));
        Self::from_path(path, settings)
    }

    fn from_path_anonymous(path: &str, host: &str) -> Result<Download, TransferError> {
        Self::from_path(path, Self::settings_for(host, FtpCredentials::Anonymous))
    }
}

/// Plain FTP.
#[cfg(feature = "ftp")]
#[derive(Debug, Clone, Copy)]
pub struct Ftp;

#[cfg(feature = "ftp")]
impl RemoteFs for Ftp {
    type Backend = crate::backends::ftp::FtpBackend;

    fn settings_for(host: &str, credentials: FtpCredentials) -> crate::config::FtpSettings {
        crate::config::FtpSettings::new(host).with_credentials(credentials)
    }
}

/// FTP over TLS (explicit mode).
#[cfg(feature = "ftp")]
#[derive(Debug, Clone, Copy)]
pub struct Ftps;

#[cfg(feature = "ftp")]
impl RemoteFs for Ftps {
    type Backend = crate::backends::ftp::FtpsBackend;

    fn settings_for(host: &str, credentials: FtpCredentials) -> crate::config::FtpsSettings {
        crate::config::FtpsSettings::new(host).with_credentials(credentials)
    }
}

/// SFTP with password authentication. Anonymous means user `anonymous`
/// with an empty password.
#[cfg(feature = "sftp")]
#[derive(Debug, Clone, Copy)]
pub struct Sftp;

#[cfg(feature = "sftp")]
impl RemoteFs for Sftp {
    type Backend = crate::backends::sftp::SftpBackend;

    fn settings_for(host: &str, credentials: FtpCredentials) -> crate::config::SftpSettings {
        use crate::config::{SftpAuth, SftpSettings, ANONYMOUS_USERNAME};

        let (username, password) = match credentials {
            FtpCredentials::Anonymous => (ANONYMOUS_USERNAME.to_string(), String::new()),
            FtpCredentials::Basic { username, password } => (username, password),
        };
        SftpSettings::new(host, username, SftpAuth::Password { password })
    }
}
