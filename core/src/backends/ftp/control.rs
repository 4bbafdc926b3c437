//! FTP control channel: command writing and reply parsing (RFC 959).

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use openssl::ssl::{SslSession, SslStream};
use tracing::debug;

/// Longest reply line accepted from the server, including CRLF.
const MAX_LINE_LEN: usize = 2048;

/// Most lines accepted in one multi-line reply (e.g., a long `FEAT`).
const MAX_REPLY_LINES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FtpCommand(&'static str);

impl FtpCommand {
    pub(crate) const AUTH: FtpCommand = FtpCommand("AUTH");
    pub(crate) const USER: FtpCommand = FtpCommand("USER");
    pub(crate) const PASS: FtpCommand = FtpCommand("PASS");
    pub(crate) const FEAT: FtpCommand = FtpCommand("FEAT");
    pub(crate) const OPTS: FtpCommand = FtpCommand("OPTS");
    pub(crate) const PBSZ: FtpCommand = FtpCommand("PBSZ");
    pub(crate) const PROT: FtpCommand = FtpCommand("PROT");
    pub(crate) const TYPE: FtpCommand = FtpCommand("TYPE");
    pub(crate) const CWD: FtpCommand = FtpCommand("CWD");
    pub(crate) const PASV: FtpCommand = FtpCommand("PASV");
    pub(crate) const EPSV: FtpCommand = FtpCommand("EPSV");
    pub(crate) const PORT: FtpCommand = FtpCommand("PORT");
    pub(crate) const EPRT: FtpCommand = FtpCommand("EPRT");
    pub(crate) const MLSD: FtpCommand = FtpCommand("MLSD");
    pub(crate) const LIST: FtpCommand = FtpCommand("LIST");
    pub(crate) const REST: FtpCommand = FtpCommand("REST");
    pub(crate) const RETR: FtpCommand = FtpCommand("RETR");
    pub(crate) const QUIT: FtpCommand = FtpCommand("QUIT");
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A complete server reply: the code plus every text line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FtpReply {
    pub(crate) code: u16,
    pub(crate) lines: Vec<String>,
}

impl FtpReply {
    /// Text of the last line (the one carrying the final code).
    pub(crate) fn text(&self) -> &str {
        self.lines.last().map(|s| s.trim()).unwrap_or("")
    }

    pub(crate) fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

impl fmt::Display for FtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Read one CRLF/LF-terminated line, bounded by [`MAX_LINE_LEN`].
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<()> {
    buf.clear();
    let n = reader
        .by_ref()
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', buf)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "control connection closed",
        ));
    }
    if buf.last() != Some(&b'\n') {
        if n == MAX_LINE_LEN {
            return Err(invalid_data("reply line too long"));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "control connection closed mid-line",
        ));
    }
    Ok(())
}

fn parse_code(line: &[u8]) -> Option<u16> {
    if line.len() < 3 || !line[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code = line[..3]
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    (100..600).contains(&code).then_some(code)
}

/// Read a single or multi-line (`ddd-` ... `ddd `) reply.
pub(crate) fn read_reply<R: BufRead>(reader: &mut R) -> io::Result<FtpReply> {
    let mut buf = Vec::with_capacity(128);
    read_line(reader, &mut buf)?;

    let line = String::from_utf8_lossy(&buf);
    let line = line.trim_end_matches(['\r', '\n']);
    let code = parse_code(line.as_bytes())
        .ok_or_else(|| invalid_data(format!("invalid reply line: {line:?}")))?;
    let separator = line.as_bytes().get(3).copied();
    let first_text = line.get(4..).unwrap_or("").to_string();

    match separator {
        None | Some(b' ') => Ok(FtpReply {
            code,
            lines: vec![first_text],
        }),
        Some(b'-') => {
            let end_prefix = format!("{code} ");
            let mut lines = vec![first_text];
            for _ in 0..MAX_REPLY_LINES {
                read_line(reader, &mut buf)?;
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                if line.starts_with(&end_prefix) || line == end_prefix.trim_end() {
                    lines.push(line.get(4..).unwrap_or("").to_string());
                    return Ok(FtpReply { code, lines });
                }
                // Keep leading whitespace: FEAT lists are indented.
                lines.push(line.to_string());
            }
            Err(invalid_data("too many lines in multi-line reply"))
        }
        Some(_) => Err(invalid_data(format!("invalid reply line: {line:?}"))),
    }
}

/// A control or data socket, plain or wrapped in TLS.
pub(crate) enum FtpStream {
    Plain(TcpStream),
    Tls(Box<SslStream<TcpStream>>),
}

impl FtpStream {
    pub(crate) fn tcp(&self) -> &TcpStream {
        match self {
            FtpStream::Plain(s) => s,
            FtpStream::Tls(s) => s.get_ref(),
        }
    }

    /// Unwrap a plain stream, e.g. to start TLS after `AUTH TLS`.
    pub(crate) fn into_plain(self) -> Option<TcpStream> {
        match self {
            FtpStream::Plain(s) => Some(s),
            FtpStream::Tls(_) => None,
        }
    }

    /// The TLS session, for reuse on data connections.
    pub(crate) fn tls_session(&self) -> Option<SslSession> {
        match self {
            FtpStream::Plain(_) => None,
            FtpStream::Tls(s) => s.ssl().session().map(|s| s.to_owned()),
        }
    }

    /// Send `close_notify` on TLS streams. Best-effort.
    pub(crate) fn shutdown(&mut self) {
        if let FtpStream::Tls(s) = self {
            if let Err(e) = s.shutdown() {
                debug!("TLS shutdown failed: {e}");
            }
        }
    }
}

impl Read for FtpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FtpStream::Plain(s) => s.read(buf),
            FtpStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for FtpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FtpStream::Plain(s) => s.write(buf),
            FtpStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FtpStream::Plain(s) => s.flush(),
            FtpStream::Tls(s) => s.flush(),
        }
    }
}

/// Buffered control connection.
pub(crate) struct ControlChannel {
    stream: BufReader<FtpStream>,
}

impl ControlChannel {
    pub(crate) fn new(stream: FtpStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub(crate) fn send(&mut self, cmd: FtpCommand, arg: Option<&str>) -> io::Result<()> {
        let line = match arg {
            Some(arg) => format!("{cmd} {arg}\r\n"),
            None => format!("{cmd}\r\n"),
        };
        if cmd == FtpCommand::PASS {
            debug!("FTP > PASS ****");
        } else {
            debug!("FTP > {}", line.trim_end());
        }
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.flush()
    }

    pub(crate) fn read_reply(&mut self) -> io::Result<FtpReply> {
        let reply = read_reply(&mut self.stream)?;
        debug!("FTP < {reply}");
        Ok(reply)
    }

    /// Send a command and read its reply.
    pub(crate) fn command(&mut self, cmd: FtpCommand, arg: Option<&str>) -> io::Result<FtpReply> {
        self.send(cmd, arg)?;
        self.read_reply()
    }

    pub(crate) fn stream(&self) -> &FtpStream {
        self.stream.get_ref()
    }

    pub(crate) fn into_stream(self) -> FtpStream {
        self.stream.into_inner()
    }

    pub(crate) fn shutdown(&mut self) {
        self.stream.get_mut().shutdown();
    }
}
