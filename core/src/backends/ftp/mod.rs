//! FTP and FTPS backends over a blocking control connection.
//!
//! One [`FtpSession`] owns one control connection. Listings change into
//! the directory first (`CWD`), so a missing directory surfaces as
//! `NotFound` before any data connection is opened, then use `MLSD` when
//! the server advertises `MLST` and `LIST` otherwise.

mod control;
mod data;
mod listing;

use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;

use chrono::Utc;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tracing::{debug, info, warn};

use self::control::{ControlChannel, FtpCommand, FtpReply, FtpStream};
use self::data::{connect_tls, DataTls, PendingData};
use super::{connect_tcp, RemoteBackend};
use crate::config::{
    validate_ftp_settings, validate_ftps_settings, FtpCredentials, FtpSettings, FtpsMode,
    FtpsSettings,
};
use crate::errors::{Operation, TransferError};
use crate::files::{RemoteFile, RemotePath};

/// Longest listing line accepted on a data connection.
const MAX_LISTING_LINE: u64 = 8192;

/// Plain FTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpBackend;

/// FTP over TLS, explicit (`AUTH TLS`) or implicit.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpsBackend;

/// An authenticated control connection plus transfer state.
pub struct FtpSession {
    control: Option<ControlChannel>,
    host: String,
    port: u16,
    passive: bool,
    epsv: bool,
    use_mlsd: bool,
    timeout: Duration,
    data_tls: Option<DataTls>,
    /// A `RETR` whose completion reply has not been read yet.
    pending: Option<RemotePath>,
}

impl std::fmt::Debug for FtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("open", &self.control.is_some())
            .field("tls", &self.data_tls.is_some())
            .finish()
    }
}

/// Data connection of a `RETR`. Dropping it closes the connection.
pub struct FtpReader {
    stream: FtpStream,
}

impl Read for FtpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Drop for FtpReader {
    fn drop(&mut self) {
        self.stream.shutdown();
    }
}

impl RemoteBackend for FtpBackend {
    type Settings = FtpSettings;
    type Session = FtpSession;
    type Reader = FtpReader;

    fn protocol(&self) -> &'static str {
        "ftp"
    }

    fn connect(&self, settings: &FtpSettings) -> Result<FtpSession, TransferError> {
        validate_ftp_settings(settings)?;
        open_session(settings, None)
    }

    fn list(
        &self,
        session: &mut FtpSession,
        path: &RemotePath,
    ) -> Result<Vec<RemoteFile>, TransferError> {
        session.list(path)
    }

    fn open_read(
        &self,
        session: &mut FtpSession,
        path: &RemotePath,
        offset: u64,
    ) -> Result<FtpReader, TransferError> {
        session.open_read(path, offset)
    }

    fn finish_read(
        &self,
        session: &mut FtpSession,
        _path: &RemotePath,
    ) -> Result<(), TransferError> {
        session.finish_read()
    }

    fn close(&self, session: &mut FtpSession) {
        session.close();
    }
}

impl RemoteBackend for FtpsBackend {
    type Settings = FtpsSettings;
    type Session = FtpSession;
    type Reader = FtpReader;

    fn protocol(&self) -> &'static str {
        "ftps"
    }

    fn connect(&self, settings: &FtpsSettings) -> Result<FtpSession, TransferError> {
        validate_ftps_settings(settings)?;
        open_session(&settings.ftp, Some(settings))
    }

    fn list(
        &self,
        session: &mut FtpSession,
        path: &RemotePath,
    ) -> Result<Vec<RemoteFile>, TransferError> {
        session.list(path)
    }

    fn open_read(
        &self,
        session: &mut FtpSession,
        path: &RemotePath,
        offset: u64,
    ) -> Result<FtpReader, TransferError> {
        session.open_read(path, offset)
    }

    fn finish_read(
        &self,
        session: &mut FtpSession,
        _path: &RemotePath,
    ) -> Result<(), TransferError> {
        session.finish_read()
    }

    fn close(&self, session: &mut FtpSession) {
        session.close();
    }
}

fn build_connector(settings: &FtpsSettings) -> Result<SslConnector, openssl::error::ErrorStack> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    if let Some(ca_file) = &settings.ca_file {
        builder.set_ca_file(ca_file)?;
    }
    if !settings.verify_certificate {
        builder.set_verify(SslVerifyMode::NONE);
    }
    Ok(builder.build())
}

/// Connect, negotiate TLS if requested, log in and set the transfer type.
fn open_session(
    settings: &FtpSettings,
    tls: Option<&FtpsSettings>,
) -> Result<FtpSession, TransferError> {
    let host = settings.host.as_str();
    let port = settings.port;
    let conn_err = |reason: &dyn std::fmt::Display| TransferError::connection(host, port, reason);

    let connector = tls
        .map(build_connector)
        .transpose()
        .map_err(|e| conn_err(&e))?;
    let verify = tls.is_some_and(|t| t.verify_certificate);

    let tcp = connect_tcp(host, port, settings.connect_timeout()).map_err(|e| conn_err(&e))?;
    tcp.set_read_timeout(Some(settings.read_timeout()))
        .and_then(|()| tcp.set_write_timeout(Some(settings.read_timeout())))
        .map_err(|e| conn_err(&e))?;

    let implicit = tls.is_some_and(|t| t.tls_mode == FtpsMode::Implicit);
    let stream = match &connector {
        Some(connector) if implicit => {
            connect_tls(connector, host, verify, None, tcp).map_err(|e| conn_err(&e))?
        }
        _ => FtpStream::Plain(tcp),
    };
    let mut control = ControlChannel::new(stream);

    read_greeting(&mut control).map_err(|e| conn_err(&e))?;

    if let Some(connector) = connector.as_ref().filter(|_| !implicit) {
        let reply = control
            .command(FtpCommand::AUTH, Some("TLS"))
            .map_err(|e| conn_err(&e))?;
        if reply.code != 234 {
            return Err(conn_err(&format!("AUTH TLS refused: {reply}")));
        }
        let tcp = control
            .into_stream()
            .into_plain()
            .ok_or_else(|| conn_err(&"control connection already encrypted"))?;
        control = ControlChannel::new(
            connect_tls(connector, host, verify, None, tcp).map_err(|e| conn_err(&e))?,
        );
    }

    login(&mut control, &settings.credentials).map_err(|e| conn_err(&e))?;

    let mlst = settings.prefer_mlsd && supports_mlst(&mut control).map_err(|e| conn_err(&e))?;

    if tls.is_some() {
        expect(&mut control, FtpCommand::PBSZ, Some("0"), &[200]).map_err(|e| conn_err(&e))?;
        expect(&mut control, FtpCommand::PROT, Some("P"), &[200]).map_err(|e| conn_err(&e))?;
    }

    // Some servers reject this, harmless either way.
    let _ = control.command(FtpCommand::OPTS, Some("UTF8 ON"));

    let type_arg = if settings.binary { "I" } else { "A" };
    expect(&mut control, FtpCommand::TYPE, Some(type_arg), &[200]).map_err(|e| conn_err(&e))?;

    let data_tls = connector.map(|connector| DataTls {
        connector,
        domain: host.to_string(),
        verify,
        session: tls
            .filter(|t| t.reuse_tls_session)
            .and_then(|_| control.stream().tls_session()),
    });

    info!(
        host,
        port,
        tls = data_tls.is_some(),
        mlsd = mlst,
        passive = settings.passive_mode,
        "FTP session established"
    );

    Ok(FtpSession {
        control: Some(control),
        host: host.to_string(),
        port,
        passive: settings.passive_mode,
        epsv: true,
        use_mlsd: mlst,
        timeout: settings.read_timeout(),
        data_tls,
        pending: None,
    })
}

/// Send a command and require one of `codes`.
fn expect(
    control: &mut ControlChannel,
    cmd: FtpCommand,
    arg: Option<&str>,
    codes: &[u16],
) -> io::Result<FtpReply> {
    let reply = control.command(cmd, arg)?;
    if codes.contains(&reply.code) {
        Ok(reply)
    } else {
        Err(io::Error::other(format!("{cmd} failed: {reply}")))
    }
}

fn read_greeting(control: &mut ControlChannel) -> io::Result<()> {
    // 120 means "ready in N minutes"; the real greeting follows.
    loop {
        let reply = control.read_reply()?;
        match reply.code {
            120 => continue,
            220 => return Ok(()),
            _ => return Err(io::Error::other(format!("server not ready: {reply}"))),
        }
    }
}

fn login(control: &mut ControlChannel, credentials: &FtpCredentials) -> io::Result<()> {
    let reply = control.command(FtpCommand::USER, Some(credentials.username()))?;
    match reply.code {
        230 => return Ok(()),
        331 => {}
        332 => return Err(io::Error::other("login requires an account")),
        _ => return Err(io::Error::other(format!("login rejected: {reply}"))),
    }
    let reply = control.command(FtpCommand::PASS, Some(credentials.password()))?;
    match reply.code {
        230 | 202 => Ok(()),
        332 => Err(io::Error::other("login requires an account")),
        _ => Err(io::Error::other(format!("login rejected: {reply}"))),
    }
}

fn supports_mlst(control: &mut ControlChannel) -> io::Result<bool> {
    let reply = control.command(FtpCommand::FEAT, None)?;
    if reply.code != 211 {
        return Ok(false);
    }
    Ok(reply.lines.iter().any(|line| {
        line.trim_start()
            .get(..4)
            .is_some_and(|f| f.eq_ignore_ascii_case("MLST"))
    }))
}

/// Map a negative reply about `path` into the error taxonomy.
fn reply_error(reply: &FtpReply, path: &RemotePath, operation: Operation) -> TransferError {
    let text = reply.text().to_ascii_lowercase();
    let denied = text.contains("permission") || text.contains("denied");
    let path_str = path.to_string();
    match reply.code {
        530 | 532 => TransferError::PermissionDenied {
            path: path_str,
            operation,
        },
        450 | 550 | 553 if denied => TransferError::PermissionDenied {
            path: path_str,
            operation,
        },
        450 | 550 | 553 => TransferError::NotFound {
            path: path_str,
            operation,
        },
        _ => TransferError::transfer(path, operation, format!("unexpected reply: {reply}")),
    }
}

fn check_path(path: &RemotePath, operation: Operation) -> Result<String, TransferError> {
    let raw = path.to_string();
    if raw.contains(['\r', '\n']) {
        return Err(TransferError::transfer(
            path,
            operation,
            "path contains a line break",
        ));
    }
    Ok(raw)
}

impl FtpSession {
    fn control(
        &mut self,
        path: &RemotePath,
        operation: Operation,
    ) -> Result<&mut ControlChannel, TransferError> {
        self.control
            .as_mut()
            .ok_or_else(|| TransferError::transfer(path, operation, "session is closed"))
    }

    /// Read the completion reply of the last `RETR`. A server that aborts
    /// after closing the data connection (`426`, `451`) is only heard here.
    fn finish_read(&mut self) -> Result<(), TransferError> {
        let Some(path) = self.pending.take() else {
            return Ok(());
        };
        let control = self.control(&path, Operation::Read)?;
        let reply = control
            .read_reply()
            .map_err(|e| TransferError::transfer(&path, Operation::Read, e))?;
        if reply.is_positive_completion() {
            Ok(())
        } else {
            Err(TransferError::transfer(
                &path,
                Operation::Read,
                format!("transfer aborted: {reply}"),
            ))
        }
    }

    /// Drain the reply of a `RETR` that was abandoned before its end.
    fn finish_pending(&mut self) {
        if let Err(e) = self.finish_read() {
            warn!("FTP transfer did not complete cleanly: {e}");
        }
    }

    fn list(&mut self, path: &RemotePath) -> Result<Vec<RemoteFile>, TransferError> {
        self.finish_pending();
        let raw = check_path(path, Operation::List)?;
        let io_err = |e: io::Error| TransferError::transfer(path, Operation::List, e);

        let control = self.control(path, Operation::List)?;
        let reply = control.command(FtpCommand::CWD, Some(&raw)).map_err(io_err)?;
        if reply.code != 250 {
            return Err(reply_error(&reply, path, Operation::List));
        }

        let mut lines = None;
        if self.use_mlsd {
            lines = self.list_lines(path, FtpCommand::MLSD)?;
            if lines.is_none() {
                debug!(host = %self.host, "MLSD rejected, falling back to LIST");
                self.use_mlsd = false;
            }
        }
        if !self.use_mlsd {
            lines = self.list_lines(path, FtpCommand::LIST)?;
        }

        let now = Utc::now();
        let entries = lines
            .unwrap_or_default()
            .iter()
            .filter_map(|line| {
                let entry = if self.use_mlsd {
                    listing::parse_mlsd_line(line, path)
                } else {
                    listing::parse_list_line(line, path, now)
                };
                if entry.is_none() {
                    debug!(path = %path, line = %line, "Skipping listing line");
                }
                entry
            })
            .collect();
        Ok(entries)
    }

    /// Run one listing command in the current directory.
    ///
    /// Returns `None` when the server does not implement `cmd`, and an empty
    /// listing for "no files" replies (450/550 after a successful `CWD`).
    fn list_lines(
        &mut self,
        path: &RemotePath,
        cmd: FtpCommand,
    ) -> Result<Option<Vec<String>>, TransferError> {
        let io_err = |e: io::Error| TransferError::transfer(path, Operation::List, e);
        let (passive, timeout) = (self.passive, self.timeout);
        let mut epsv = self.epsv;
        let control = self.control(path, Operation::List)?;

        let pending = PendingData::negotiate(control, passive, &mut epsv, timeout);
        self.epsv = epsv;
        let pending = pending.map_err(io_err)?;

        let control = self.control(path, Operation::List)?;
        let reply = control.command(cmd, None).map_err(io_err)?;
        match reply.code {
            125 | 150 => {}
            500 | 502 | 504 if cmd == FtpCommand::MLSD => return Ok(None),
            450 | 550 if !reply.text().to_ascii_lowercase().contains("denied") => {
                return Ok(Some(Vec::new()));
            }
            _ => return Err(reply_error(&reply, path, Operation::List)),
        }

        let stream = pending
            .establish(timeout, self.data_tls.as_ref())
            .map_err(io_err)?;
        let lines = read_lines(stream).map_err(io_err)?;

        let control = self.control(path, Operation::List)?;
        let reply = control.read_reply().map_err(io_err)?;
        if !reply.is_positive_completion() {
            return Err(TransferError::transfer(
                path,
                Operation::List,
                format!("listing did not complete: {reply}"),
            ));
        }
        debug!(path = %path, entries = lines.len(), "FTP listing received");
        Ok(Some(lines))
    }

    fn open_read(&mut self, path: &RemotePath, offset: u64) -> Result<FtpReader, TransferError> {
        self.finish_pending();
        let raw = check_path(path, Operation::Open)?;
        let io_err = |e: io::Error| TransferError::transfer(path, Operation::Open, e);
        let (passive, timeout) = (self.passive, self.timeout);
        let mut epsv = self.epsv;
        let control = self.control(path, Operation::Open)?;

        let pending = PendingData::negotiate(control, passive, &mut epsv, timeout);
        self.epsv = epsv;
        let pending = pending.map_err(io_err)?;

        let control = self.control(path, Operation::Open)?;
        if offset > 0 {
            let reply = control
                .command(FtpCommand::REST, Some(&offset.to_string()))
                .map_err(io_err)?;
            if reply.code != 350 {
                return Err(TransferError::transfer(
                    path,
                    Operation::Open,
                    format!("server does not support resume: {reply}"),
                ));
            }
        }

        let reply = control.command(FtpCommand::RETR, Some(&raw)).map_err(io_err)?;
        if !matches!(reply.code, 125 | 150) {
            return Err(reply_error(&reply, path, Operation::Open));
        }

        let stream = pending
            .establish(timeout, self.data_tls.as_ref())
            .map_err(io_err)?;
        self.pending = Some(path.clone());
        debug!(path = %path, offset, "FTP download started");
        Ok(FtpReader { stream })
    }

    fn close(&mut self) {
        self.finish_pending();
        let Some(mut control) = self.control.take() else {
            return;
        };
        if let Err(e) = control.command(FtpCommand::QUIT, None) {
            warn!(host = %self.host, "FTP QUIT failed: {e}");
        }
        control.shutdown();
        debug!(host = %self.host, port = self.port, "FTP session closed");
    }
}

fn read_lines(stream: FtpStream) -> io::Result<Vec<String>> {
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_LISTING_LINE)
            .read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    reader.into_inner().shutdown();
    Ok(lines)
}
