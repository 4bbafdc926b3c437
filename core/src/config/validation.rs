//! Settings validation run by each backend before it connects.

use super::{FtpSettings, FtpsSettings, LocalSettings, SftpAuth, SftpSettings};
use crate::errors::TransferError;

pub fn validate_ftp_settings(settings: &FtpSettings) -> Result<(), TransferError> {
    validate_endpoint("FTP", &settings.host, settings.port)?;
    validate_timeouts(
        "FTP",
        settings.connect_timeout_secs,
        settings.read_timeout_secs,
    )
}

pub fn validate_ftps_settings(settings: &FtpsSettings) -> Result<(), TransferError> {
    validate_ftp_settings(&settings.ftp)?;
    if let Some(ca_file) = &settings.ca_file {
        if ca_file.trim().is_empty() {
            return Err(TransferError::InvalidConfig(
                "FTPS CA file must not be empty when set".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_sftp_settings(settings: &SftpSettings) -> Result<(), TransferError> {
    validate_endpoint("SFTP", &settings.host, settings.port)?;
    validate_timeouts(
        "SFTP",
        settings.connect_timeout_secs,
        settings.read_timeout_secs,
    )?;

    if settings.username.trim().is_empty() {
        return Err(TransferError::InvalidConfig(
            "SFTP username must not be empty".to_string(),
        ));
    }

    if let SftpAuth::Key {
        key_path,
        private_key,
        ..
    } = &settings.auth
    {
        let has_path = key_path.as_deref().is_some_and(|p| !p.trim().is_empty());
        let has_key = private_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        match (has_path, has_key) {
            (false, false) => {
                return Err(TransferError::InvalidConfig(
                    "SFTP key auth requires a key path or private key".to_string(),
                ));
            }
            (true, true) => {
                return Err(TransferError::InvalidConfig(
                    "SFTP key auth takes either a key path or a private key, not both"
                        .to_string(),
                ));
            }
            _ => {}
        }
    }

    if settings.strict_host_key_checking && settings.known_hosts.trim().is_empty() {
        return Err(TransferError::InvalidConfig(
            "SFTP known_hosts path is required with strict host key checking".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_local_settings(settings: &LocalSettings) -> Result<(), TransferError> {
    if settings.root.as_os_str().is_empty() {
        return Err(TransferError::InvalidConfig(
            "Local root must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_endpoint(kind: &str, host: &str, port: u16) -> Result<(), TransferError> {
    if host.trim().is_empty() {
        return Err(TransferError::InvalidConfig(format!(
            "{kind} host must not be empty"
        )));
    }
    if port == 0 {
        return Err(TransferError::InvalidConfig(format!(
            "{kind} port must not be 0"
        )));
    }
    Ok(())
}

fn validate_timeouts(kind: &str, connect_secs: u64, read_secs: u64) -> Result<(), TransferError> {
    if connect_secs == 0 || read_secs == 0 {
        return Err(TransferError::InvalidConfig(format!(
            "{kind} timeouts must be at least one second"
        )));
    }
    Ok(())
}
