//! FTP data connections: passive (`EPSV`/`PASV`) and active (`EPRT`/`PORT`)
//! setup, plus TLS wrapping for FTPS.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use openssl::ssl::{SslConnector, SslSession};

use super::control::{ControlChannel, FtpCommand, FtpReply, FtpStream};

/// Poll interval while waiting for the server to dial in (active mode).
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn unexpected(cmd: FtpCommand, reply: &FtpReply) -> io::Error {
    io::Error::other(format!("unexpected reply to {cmd}: {reply}"))
}

/// Extract the port from an `EPSV` reply: `229 Entering Extended Passive Mode (|||6446|)`.
pub(crate) fn parse_epsv_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = start + text[start..].find(')')?;
    let inner = &text[start + 1..end];
    let mut chars = inner.chars();
    let delim = chars.next()?;
    let parts: Vec<&str> = inner.split(delim).collect();
    // "|||6446|" splits into ["", "", "", "6446", ""].
    if parts.len() != 5 {
        return None;
    }
    parts[3].parse().ok()
}

/// Extract the address from a `PASV` reply: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
pub(crate) fn parse_pasv_addr(text: &str) -> Option<SocketAddr> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let numbers: Vec<u8> = text[start..]
        .split(|c: char| !c.is_ascii_digit())
        .take(6)
        .map(|s| s.parse::<u8>().ok())
        .collect::<Option<Vec<_>>>()?;
    if numbers.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(numbers[0], numbers[1], numbers[2], numbers[3]);
    let port = u16::from(numbers[4]) << 8 | u16::from(numbers[5]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Argument for `PORT` (IPv4) or `EPRT` (IPv6) announcing `addr`.
pub(crate) fn active_command(addr: SocketAddr) -> (FtpCommand, String) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            let [a, b, c, d] = ip.octets();
            let port = addr.port();
            (
                FtpCommand::PORT,
                format!("{a},{b},{c},{d},{},{}", port >> 8, port & 0xff),
            )
        }
        IpAddr::V6(ip) => (FtpCommand::EPRT, format!("|2|{ip}|{}|", addr.port())),
    }
}

/// TLS parameters for FTPS data connections.
pub(crate) struct DataTls {
    pub(crate) connector: SslConnector,
    pub(crate) domain: String,
    pub(crate) verify: bool,
    /// Control-connection session to resume on data connections. `None`
    /// when reuse is turned off in the settings.
    pub(crate) session: Option<SslSession>,
}

impl DataTls {
    pub(crate) fn wrap(&self, tcp: TcpStream) -> io::Result<FtpStream> {
        connect_tls(
            &self.connector,
            &self.domain,
            self.verify,
            self.session.as_ref(),
            tcp,
        )
    }
}

pub(crate) fn connect_tls(
    connector: &SslConnector,
    domain: &str,
    verify: bool,
    session: Option<&SslSession>,
    tcp: TcpStream,
) -> io::Result<FtpStream> {
    let mut config = connector.configure().map_err(io::Error::other)?;
    config.set_verify_hostname(verify);
    if let Some(session) = session {
        // SAFETY: the only caller passing a session is `DataTls::wrap`, whose
        // session comes from the control connection made with this same
        // connector, so it belongs to the same SSL_CTX.
        unsafe { config.set_session(session) }.map_err(io::Error::other)?;
    }
    let stream = config
        .connect(domain, tcp)
        .map_err(|e| io::Error::other(format!("TLS handshake failed: {e}")))?;
    Ok(FtpStream::Tls(Box::new(stream)))
}

/// A data connection that has been negotiated but not yet established.
pub(crate) enum PendingData {
    Passive(TcpStream),
    Active(TcpListener),
}

impl PendingData {
    /// Negotiate a data connection before the transfer command is sent.
    ///
    /// `epsv` is cleared when the server rejects `EPSV`, so later transfers
    /// go straight to `PASV`.
    pub(crate) fn negotiate(
        control: &mut ControlChannel,
        passive: bool,
        epsv: &mut bool,
        timeout: Duration,
    ) -> io::Result<Self> {
        let peer = control.stream().tcp().peer_addr()?;
        if passive {
            let port = passive_port(control, epsv, peer)?;
            let tcp = TcpStream::connect_timeout(&SocketAddr::new(peer.ip(), port), timeout)?;
            Ok(PendingData::Passive(tcp))
        } else {
            let local = control.stream().tcp().local_addr()?;
            let listener = TcpListener::bind(SocketAddr::new(local.ip(), 0))?;
            let (cmd, arg) = active_command(listener.local_addr()?);
            let reply = control.command(cmd, Some(&arg))?;
            if reply.code != 200 {
                return Err(unexpected(cmd, &reply));
            }
            Ok(PendingData::Active(listener))
        }
    }

    /// Finish the connection after the server answered 125/150.
    pub(crate) fn establish(
        self,
        timeout: Duration,
        tls: Option<&DataTls>,
    ) -> io::Result<FtpStream> {
        let tcp = match self {
            PendingData::Passive(tcp) => tcp,
            PendingData::Active(listener) => accept_with_timeout(&listener, timeout)?,
        };
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;
        match tls {
            Some(tls) => tls.wrap(tcp),
            None => Ok(FtpStream::Plain(tcp)),
        }
    }
}

/// Ask for a passive port. The host part of `PASV` replies is ignored and
/// the control peer is dialed instead, which also works behind NAT.
fn passive_port(control: &mut ControlChannel, epsv: &mut bool, peer: SocketAddr) -> io::Result<u16> {
    if *epsv {
        let reply = control.command(FtpCommand::EPSV, None)?;
        if reply.code == 229 {
            return parse_epsv_port(reply.text())
                .ok_or_else(|| unexpected(FtpCommand::EPSV, &reply));
        }
        if peer.is_ipv6() {
            return Err(unexpected(FtpCommand::EPSV, &reply));
        }
        *epsv = false;
    }
    let reply = control.command(FtpCommand::PASV, None)?;
    if reply.code != 227 {
        return Err(unexpected(FtpCommand::PASV, &reply));
    }
    parse_pasv_addr(reply.text())
        .map(|addr| addr.port())
        .ok_or_else(|| unexpected(FtpCommand::PASV, &reply))
}

fn accept_with_timeout(listener: &TcpListener, timeout: Duration) -> io::Result<TcpStream> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "server did not open the data connection",
                    ));
                }
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn epsv_port() {
        assert_eq!(
            parse_epsv_port("Entering Extended Passive Mode (|||6446|)"),
            Some(6446)
        );
        assert_eq!(parse_epsv_port("Extended Passive (!!!2121!)"), Some(2121));
        assert_eq!(parse_epsv_port("no parens"), None);
        assert_eq!(parse_epsv_port("(|||notaport|)"), None);
        assert_eq!(parse_epsv_port("(||6446|)"), None);
    }

    #[test]
    fn pasv_addr() {
        let addr = parse_pasv_addr("Entering Passive Mode (192,168,1,10,195,80).").unwrap();
        assert_eq!(addr, "192.168.1.10:50000".parse().unwrap());
    }

    #[test]
    fn pasv_addr_without_parens() {
        let addr = parse_pasv_addr("Entering Passive Mode 10,0,0,1,4,1").unwrap();
        assert_eq!(addr.port(), 1025);
    }

    #[test]
    fn pasv_addr_rejects_garbage() {
        assert!(parse_pasv_addr("Entering Passive Mode").is_none());
        assert!(parse_pasv_addr("(1,2,3,4,5)").is_none());
        assert!(parse_pasv_addr("(300,2,3,4,5,6)").is_none());
    }

    #[test]
    fn port_command_for_ipv4() {
        let (cmd, arg) = active_command("10.1.2.3:50000".parse().unwrap());
        assert_eq!(cmd, FtpCommand::PORT);
        assert_eq!(arg, "10,1,2,3,195,80");
    }

    #[test]
    fn eprt_command_for_ipv6() {
        let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 2121);
        let (cmd, arg) = active_command(addr);
        assert_eq!(cmd, FtpCommand::EPRT);
        assert_eq!(arg, "|2|::1|2121|");
    }

    #[test]
    fn accept_times_out_without_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let err = accept_with_timeout(&listener, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn accept_returns_blocking_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
        let stream = accept_with_timeout(&listener, Duration::from_secs(5)).unwrap();
        client.join().unwrap();
        assert!(stream.peer_addr().is_ok());
    }
}
