//! Shared test utilities for remotefs-core integration tests.
//!
//! Provides an in-memory recording backend for the engine tests and Docker
//! container availability checks for the server-backed FTP/SFTP tests
//! (containers from `tests/docker/docker-compose.yml`).

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remotefs_core::{Operation, RemoteBackend, RemoteFile, RemotePath, TransferError};

/// Check if a TCP port is reachable on the given host.
///
/// Returns `true` if a TCP connection can be established within 2 seconds.
pub fn is_port_reachable(host: &str, port: u16) -> bool {
    let addr = format!("{host}:{port}");
    if let Ok(addr) = addr.parse() {
        TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok()
    } else {
        false
    }
}

/// Skip the current test if a Docker container is not reachable on the given port.
///
/// Prints a message to stderr and returns early (runtime check instead of
/// `#[ignore]`).
macro_rules! require_docker {
    ($port:expr) => {
        if !common::is_port_reachable("127.0.0.1", $port) {
            eprintln!(
                "SKIPPED: Docker container not reachable on port {} \
                 (start with: cd tests/docker && docker compose up -d)",
                $port
            );
            return;
        }
    };
}
pub(crate) use require_docker;

// --- Docker container port constants ---

/// ftp-server container (vsftpd, user `testuser` / `testpass`).
pub const PORT_FTP: u16 = 2121;
/// sftp-server container (OpenSSH, user `testuser` / `testpass`).
pub const PORT_SFTP: u16 = 2222;

pub const TEST_USER: &str = "testuser";
pub const TEST_PASSWORD: &str = "testpass";

/// Poll `condition` every 10 ms for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Settings for [`MockBackend`].
#[derive(Debug, Clone, Default)]
pub struct MockSettings {
    pub fail_connect: bool,
}

#[derive(Debug)]
pub struct MockSession {
    open: bool,
}

/// In-memory tree with call recording and fault injection.
///
/// Counters are shared, so clones of the `Arc` handed to the engines still
/// report into the same test.
#[derive(Default)]
pub struct MockBackend {
    dirs: HashMap<RemotePath, Vec<RemoteFile>>,
    files: HashMap<RemotePath, Vec<u8>>,
    list_errors: HashMap<RemotePath, TransferError>,
    read_failures: HashMap<RemotePath, usize>,
    finish_errors: HashMap<RemotePath, TransferError>,
    cycle: Option<RemotePath>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    bytes_read: Arc<AtomicUsize>,
    listed: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let mut backend = Self::default();
        backend.dirs.insert(RemotePath::root(), Vec::new());
        backend
    }

    fn register(&mut self, entry: RemoteFile) {
        let parent = entry.path.parent().unwrap_or_else(RemotePath::root);
        if !self.dirs.contains_key(&parent) {
            self.add_dir(&parent.to_string());
        }
        if let Some(siblings) = self.dirs.get_mut(&parent) {
            siblings.push(entry);
        }
    }

    fn add_dir(&mut self, path: &str) {
        let path = RemotePath::parse(path);
        if self.dirs.contains_key(&path) {
            return;
        }
        self.dirs.insert(path.clone(), Vec::new());
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            self.register(RemoteFile::directory(&parent, name));
        }
    }

    /// Add a directory (and any missing parents).
    pub fn dir(mut self, path: &str) -> Self {
        self.add_dir(path);
        self
    }

    /// Add a file (and any missing parent directories).
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        let path = RemotePath::parse(path);
        let parent = path.parent().unwrap_or_else(RemotePath::root);
        let name = path.file_name().unwrap_or_default().to_string();
        self.register(RemoteFile::file(&parent, &name, Some(content.len() as u64)));
        self.files.insert(path, content.to_vec());
        self
    }

    /// Add a symlink to a directory whose listing contains itself, so a
    /// traversal that follows it would never end.
    pub fn symlink_loop(mut self, path: &str) -> Self {
        let path = RemotePath::parse(path);
        let parent = path.parent().unwrap_or_else(RemotePath::root);
        let name = path.file_name().unwrap_or_default().to_string();
        let mut link = RemoteFile::directory(&parent, &name);
        link.is_symlink = true;
        self.register(link);
        let mut inner = RemoteFile::directory(&path, &name);
        inner.is_symlink = true;
        self.dirs.insert(path, vec![inner]);
        self
    }

    /// Add a directory reported as a plain directory whose listing holds
    /// another one of the same name, at every depth.
    pub fn dir_cycle(mut self, path: &str) -> Self {
        self.add_dir(path);
        self.cycle = Some(RemotePath::parse(path));
        self
    }

    /// Make listing `path` fail with `error`.
    pub fn fail_list(mut self, path: &str, error: TransferError) -> Self {
        self.list_errors.insert(RemotePath::parse(path), error);
        self
    }

    /// Make reads of `path` fail once `after` bytes have been returned.
    pub fn fail_read_after(mut self, path: &str, after: usize) -> Self {
        self.read_failures.insert(RemotePath::parse(path), after);
        self
    }

    /// Make the completion check after a fully read `path` fail with `error`.
    pub fn fail_finish_read(mut self, path: &str, error: TransferError) -> Self {
        self.finish_errors.insert(RemotePath::parse(path), error);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Total bytes handed out by all readers.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read.load(Ordering::SeqCst)
    }

    /// Paths passed to `list`, in call order.
    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }
}

pub struct MockReader {
    data: Vec<u8>,
    pos: usize,
    fail_at: Option<usize>,
    counter: Arc<AtomicUsize>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut end = self.data.len();
        if let Some(fail_at) = self.fail_at {
            if self.pos >= fail_at {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
            }
            end = end.min(fail_at);
        }
        let n = buf.len().min(end - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        self.counter.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }
}

impl RemoteBackend for MockBackend {
    type Settings = MockSettings;
    type Session = MockSession;
    type Reader = MockReader;

    fn protocol(&self) -> &'static str {
        "mock"
    }

    fn connect(&self, settings: &MockSettings) -> Result<MockSession, TransferError> {
        if settings.fail_connect {
            return Err(TransferError::Connection {
                host: "mock".into(),
                port: 0,
                reason: "refused".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession { open: true })
    }

    fn list(
        &self,
        session: &mut MockSession,
        path: &RemotePath,
    ) -> Result<Vec<RemoteFile>, TransferError> {
        assert!(session.open, "list on a closed session");
        self.listed.lock().unwrap().push(path.to_string());
        if let Some(error) = self.list_errors.get(path) {
            return Err(error.clone());
        }
        if let Some(cycle) = &self.cycle {
            if path.segments().starts_with(cycle.segments()) {
                let name = cycle.file_name().unwrap_or_default();
                return Ok(vec![RemoteFile::directory(path, name)]);
            }
        }
        self.dirs
            .get(path)
            .cloned()
            .ok_or_else(|| TransferError::NotFound {
                path: path.to_string(),
                operation: Operation::List,
            })
    }

    fn open_read(
        &self,
        session: &mut MockSession,
        path: &RemotePath,
        offset: u64,
    ) -> Result<MockReader, TransferError> {
        assert!(session.open, "open_read on a closed session");
        let data = self.files.get(path).ok_or_else(|| TransferError::NotFound {
            path: path.to_string(),
            operation: Operation::Open,
        })?;
        let start = (offset as usize).min(data.len());
        Ok(MockReader {
            data: data[start..].to_vec(),
            pos: 0,
            fail_at: self.read_failures.get(path).copied(),
            counter: self.bytes_read.clone(),
        })
    }

    fn finish_read(
        &self,
        session: &mut MockSession,
        path: &RemotePath,
    ) -> Result<(), TransferError> {
        assert!(session.open, "finish_read on a closed session");
        self.finish_errors.get(path).cloned().map_or(Ok(()), Err)
    }

    // Every call is counted, so a double close shows up in the tests.
    fn close(&self, session: &mut MockSession) {
        session.open = false;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// `/data` with `a.txt` (10 bytes) and `b/c.txt` (5 bytes).
pub fn scenario_tree() -> MockBackend {
    MockBackend::new()
        .file("/data/a.txt", b"0123456789")
        .file("/data/b/c.txt", b"hello")
}
