//! In-memory FTP server used by the unit tests.

use crate::ftp_session::{Connector, FtpConnection, FtpEndpoint, TransferError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::Arc;
use suppaftp::types::Response;
use suppaftp::{FtpError, FtpResult, Status};
use tokio_util::sync::CancellationToken;

pub(crate) fn endpoint() -> FtpEndpoint {
    FtpEndpoint {
        host: "ftp.example.org".to_string(),
        port: 21,
        login: "jane".to_string(),
        password: "secret".to_string(),
        passive: true,
        tls: false,
    }
}

/// Deterministic bytes of length `len`
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn rejected(status: Status) -> FtpError {
    FtpError::UnexpectedResponse(Response::new(status, Vec::new()))
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ServerState {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
    pub reject_login: bool,
    pub refuse: bool,
    /// Control connections opened
    pub opened: usize,
    pub quits: usize,
    /// Data channel writes
    pub writes: usize,
    /// Bytes received on data channels
    pub received: u64,
    /// Cancel the token once this many writes have landed
    pub cancel_at: Option<(usize, CancellationToken)>,
}

/// Shared handle on the fake server
#[derive(Debug, Clone, Default)]
pub(crate) struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn reject_logins(&self) {
        self.state.lock().reject_login = true;
    }

    pub fn refuse_connections(&self) {
        self.state.lock().refuse = true;
    }

    pub fn put_file(&self, path: &str, contents: Vec<u8>) {
        let mut state = self.state.lock();
        if let Some((dir, _)) = path.rsplit_once('/') {
            state.dirs.insert(dir.to_string());
        }
        state.files.insert(path.to_string(), contents);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn cancel_at_write(&self, write: usize, token: CancellationToken) {
        self.state.lock().cancel_at = Some((write, token));
    }

    pub fn snapshot(&self) -> ServerState {
        self.state.lock().clone()
    }
}

pub(crate) struct MockConnector {
    server: MockServer,
}

impl MockConnector {
    pub fn new(server: &MockServer) -> Self {
        Self {
            server: server.clone(),
        }
    }
}

impl Connector for MockConnector {
    fn open(&self, _endpoint: &FtpEndpoint) -> Result<Box<dyn FtpConnection>, TransferError> {
        let mut state = self.server.state.lock();
        if state.refuse {
            return Err(TransferError::Ftp(FtpError::ConnectionError(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))));
        }
        state.opened += 1;

        Ok(Box::new(MockConnection {
            server: self.server.clone(),
            cwd: "/".to_string(),
        }))
    }
}

struct MockConnection {
    server: MockServer,
    cwd: String,
}

impl MockConnection {
    fn path(&self, name: &str) -> String {
        format!("{}/{}", self.cwd.trim_end_matches('/'), name)
    }
}

impl FtpConnection for MockConnection {
    fn login(&mut self, _user: &str, _password: &str) -> FtpResult<()> {
        if self.server.state.lock().reject_login {
            Err(rejected(Status::NotLoggedIn))
        } else {
            Ok(())
        }
    }

    fn set_passive(&mut self, _passive: bool) {}

    fn cwd(&mut self, path: &str) -> FtpResult<()> {
        if path == "/" || self.server.state.lock().dirs.contains(path) {
            self.cwd = path.to_string();
            Ok(())
        } else {
            Err(rejected(Status::FileUnavailable))
        }
    }

    fn mkdir(&mut self, path: &str) -> FtpResult<()> {
        self.server.state.lock().dirs.insert(path.to_string());
        Ok(())
    }

    fn size(&mut self, name: &str) -> FtpResult<usize> {
        self.server
            .state
            .lock()
            .files
            .get(&self.path(name))
            .map(Vec::len)
            .ok_or_else(|| rejected(Status::FileUnavailable))
    }

    fn begin_store(&mut self, name: &str, offset: u64) -> FtpResult<Box<dyn Write>> {
        let key = self.path(name);
        let mut state = self.server.state.lock();
        let file = state.files.entry(key.clone()).or_default();
        let offset = offset as usize;
        if offset > file.len() {
            return Err(rejected(Status::FileUnavailable));
        }
        file.truncate(offset);

        Ok(Box::new(MockWriter {
            server: self.server.clone(),
            key,
        }))
    }

    fn finish_store(&mut self, stream: Box<dyn Write>) -> FtpResult<()> {
        drop(stream);
        Ok(())
    }

    fn quit(&mut self) -> FtpResult<()> {
        self.server.state.lock().quits += 1;
        Ok(())
    }
}

struct MockWriter {
    server: MockServer,
    key: String,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.server.state.lock();
        state.files.entry(self.key.clone()).or_default().extend_from_slice(buf);
        state.writes += 1;
        state.received += buf.len() as u64;

        if let Some((at, token)) = &state.cancel_at {
            if state.writes == *at {
                token.cancel();
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
