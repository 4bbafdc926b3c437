pub mod validation;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use validation::{
    validate_ftp_settings, validate_ftps_settings, validate_local_settings,
    validate_sftp_settings,
};

/// Login for FTP and FTPS control connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FtpCredentials {
    /// `USER anonymous` with [`ANONYMOUS_PASSWORD`].
    #[default]
    Anonymous,
    Basic { username: String, password: String },
}

pub const ANONYMOUS_USERNAME: &str = "anonymous";
pub const ANONYMOUS_PASSWORD: &str = "anonymous@";

impl FtpCredentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        FtpCredentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        match self {
            FtpCredentials::Anonymous => ANONYMOUS_USERNAME,
            FtpCredentials::Basic { username, .. } => username,
        }
    }

    pub fn password(&self) -> &str {
        match self {
            FtpCredentials::Anonymous => ANONYMOUS_PASSWORD,
            FtpCredentials::Basic { password, .. } => password,
        }
    }
}

/// Plain FTP connection settings.
///
/// - `port`: defaults to 21.
/// - `binary`: `TYPE I` when true (default), `TYPE A` otherwise.
/// - `passive_mode`: `EPSV`/`PASV` when true (default), `PORT`/`EPRT` otherwise.
/// - `prefer_mlsd`: use `MLSD` listings when the server advertises `MLST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSettings {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default)]
    pub credentials: FtpCredentials,
    #[serde(default = "default_true")]
    pub binary: bool,
    #[serde(default = "default_true")]
    pub passive_mode: bool,
    #[serde(default = "default_true")]
    pub prefer_mlsd: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl FtpSettings {
    /// Anonymous settings for `host` on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ftp_port(),
            credentials: FtpCredentials::Anonymous,
            binary: true,
            passive_mode: true,
            prefer_mlsd: true,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, credentials: FtpCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// When TLS starts on an FTPS control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FtpsMode {
    /// Plain connect, then `AUTH TLS`.
    #[default]
    Explicit,
    /// TLS handshake right after the TCP connect (usually port 990).
    Implicit,
}

/// FTP-over-TLS connection settings: the FTP settings plus TLS options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpsSettings {
    #[serde(flatten)]
    pub ftp: FtpSettings,
    #[serde(default)]
    pub tls_mode: FtpsMode,
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    /// PEM bundle used instead of the system trust store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    /// Resume the control connection's TLS session on data connections.
    /// Many servers refuse data connections without it.
    #[serde(default = "default_true")]
    pub reuse_tls_session: bool,
}

impl FtpsSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            ftp: FtpSettings::new(host),
            tls_mode: FtpsMode::Explicit,
            verify_certificate: true,
            ca_file: None,
            reuse_tls_session: true,
        }
    }

    pub fn with_credentials(mut self, credentials: FtpCredentials) -> Self {
        self.ftp.credentials = credentials;
        self
    }
}

/// Authentication method for SFTP sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum SftpAuth {
    Password { password: String },
    /// Private key from a file (`key_path`) or in memory (`private_key`).
    #[serde(rename_all = "camelCase")]
    Key {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    Agent,
}

/// SFTP connection settings.
///
/// - `port`: defaults to 22.
/// - `strict_host_key_checking`: reject hosts missing from `known_hosts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpSettings {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    #[serde(default = "default_true")]
    pub strict_host_key_checking: bool,
    #[serde(default = "default_known_hosts")]
    pub known_hosts: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl SftpSettings {
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: SftpAuth) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            username: username.into(),
            auth,
            strict_host_key_checking: true,
            known_hosts: default_known_hosts(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[cfg(feature = "sftp")]
impl SftpSettings {
    /// Expand `~` in the local paths (`known_hosts`, key file).
    pub fn expand(&self) -> Self {
        let mut out = self.clone();
        out.known_hosts = shellexpand::tilde(&self.known_hosts).into_owned();
        if let SftpAuth::Key {
            key_path: Some(path),
            ..
        } = &mut out.auth
        {
            *path = shellexpand::tilde(path.as_str()).into_owned();
        }
        out
    }
}

/// A local directory served as if it were a remote root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSettings {
    pub root: PathBuf,
}

impl LocalSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_known_hosts() -> String {
    "~/.ssh/known_hosts".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftp_settings_defaults_from_json() {
        let settings: FtpSettings =
            serde_json::from_value(serde_json::json!({ "host": "ftp.example.com" })).unwrap();
        assert_eq!(settings, FtpSettings::new("ftp.example.com"));
        assert_eq!(settings.port, 21);
        assert!(settings.binary);
        assert!(settings.passive_mode);
        assert_eq!(settings.credentials, FtpCredentials::Anonymous);
    }

    #[test]
    fn ftp_settings_with_basic_credentials() {
        let settings: FtpSettings = serde_json::from_value(serde_json::json!({
            "host": "ftp.example.com",
            "port": 2121,
            "credentials": { "type": "basic", "username": "bob", "password": "secret" },
            "passiveMode": false,
            "binary": false
        }))
        .unwrap();
        assert_eq!(settings.port, 2121);
        assert_eq!(settings.credentials.username(), "bob");
        assert_eq!(settings.credentials.password(), "secret");
        assert!(!settings.passive_mode);
        assert!(!settings.binary);
    }

    #[test]
    fn anonymous_credentials() {
        let creds = FtpCredentials::Anonymous;
        assert_eq!(creds.username(), "anonymous");
        assert_eq!(creds.password(), "anonymous@");
    }

    #[test]
    fn ftps_settings_flatten_ftp_fields() {
        let settings: FtpsSettings = serde_json::from_value(serde_json::json!({
            "host": "secure.example.com",
            "port": 990,
            "tlsMode": "implicit",
            "verifyCertificate": false
        }))
        .unwrap();
        assert_eq!(settings.ftp.host, "secure.example.com");
        assert_eq!(settings.ftp.port, 990);
        assert_eq!(settings.tls_mode, FtpsMode::Implicit);
        assert!(!settings.verify_certificate);
        assert!(settings.ca_file.is_none());
        assert!(settings.reuse_tls_session);
    }

    #[test]
    fn ftps_session_reuse_can_be_turned_off() {
        assert!(FtpsSettings::new("secure.example.com").reuse_tls_session);
        let settings: FtpsSettings = serde_json::from_value(serde_json::json!({
            "host": "secure.example.com",
            "reuseTlsSession": false
        }))
        .unwrap();
        assert!(!settings.reuse_tls_session);
    }

    #[test]
    fn sftp_settings_key_auth_from_json() {
        let settings: SftpSettings = serde_json::from_value(serde_json::json!({
            "host": "sftp.example.com",
            "username": "deploy",
            "auth": { "method": "key", "keyPath": "~/.ssh/id_ed25519", "passphrase": "pw" }
        }))
        .unwrap();
        assert_eq!(settings.port, 22);
        assert!(settings.strict_host_key_checking);
        assert_eq!(settings.known_hosts, "~/.ssh/known_hosts");
        match settings.auth {
            SftpAuth::Key {
                key_path,
                private_key,
                passphrase,
            } => {
                assert_eq!(key_path.as_deref(), Some("~/.ssh/id_ed25519"));
                assert!(private_key.is_none());
                assert_eq!(passphrase.as_deref(), Some("pw"));
            }
            other => panic!("unexpected auth: {other:?}"),
        }
    }

    #[test]
    fn sftp_settings_agent_auth_round_trip() {
        let settings = SftpSettings::new("h", "u", SftpAuth::Agent).with_port(2222);
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["auth"]["method"], "agent");
        let back: SftpSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
    }

    #[cfg(feature = "sftp")]
    #[test]
    fn sftp_expand_resolves_tilde() {
        let settings = SftpSettings::new(
            "h",
            "u",
            SftpAuth::Key {
                key_path: Some("~/.ssh/id_rsa".into()),
                private_key: None,
                passphrase: None,
            },
        )
        .expand();
        assert!(!settings.known_hosts.starts_with('~'));
        match settings.auth {
            SftpAuth::Key { key_path, .. } => assert!(!key_path.unwrap().starts_with('~')),
            other => panic!("unexpected auth: {other:?}"),
        }
    }
}
