//! FTP / FTPS transfer session.
//!
//! A [`TransferSession`] wraps one control connection to the FTP server. It
//! is driven from a single blocking worker; every operation takes `&mut self`
//! so only one command is ever in flight.
//!
//! With TLS enabled, every data channel resumes the TLS session negotiated on
//! the control channel. Servers enforcing session reuse (vsftpd's
//! `require_ssl_reuse`, for one) reject data connections that do a full
//! handshake of their own.

use parking_lot::RwLock;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{Resumption, Tls12Resumption};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpResult, FtpStream, Mode, RustlsConnector, RustlsFtpStream};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// TLS sessions kept for resumption by data channels
const TLS_SESSION_CACHE_SIZE: usize = 64;

/// Errors that can occur during FTP operations.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Not connected to the FTP server")]
    NotConnected,

    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send data to the FTP server: {0}")]
    Send(#[source] io::Error),
}

impl TransferError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// FTP server address and credentials
#[derive(Clone, PartialEq, Eq)]
pub struct FtpEndpoint {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub passive: bool,
    pub tls: bool,
}

impl fmt::Debug for FtpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"***")
            .field("passive", &self.passive)
            .field("tls", &self.tls)
            .finish()
    }
}

/// The commands a session needs from an FTP control connection
pub trait FtpConnection {
    fn login(&mut self, user: &str, password: &str) -> FtpResult<()>;

    fn set_passive(&mut self, passive: bool);

    fn cwd(&mut self, path: &str) -> FtpResult<()>;

    fn mkdir(&mut self, path: &str) -> FtpResult<()>;

    /// Size of a remote file in bytes (SIZE)
    fn size(&mut self, name: &str) -> FtpResult<usize>;

    /// Switch to binary mode and open a STOR data channel for `name`,
    /// preceded by REST when `offset` is non-zero
    fn begin_store(&mut self, name: &str, offset: u64) -> FtpResult<Box<dyn Write>>;

    /// Close the data channel and read the server's completion reply
    fn finish_store(&mut self, stream: Box<dyn Write>) -> FtpResult<()>;

    fn quit(&mut self) -> FtpResult<()>;
}

macro_rules! impl_ftp_connection {
    ($stream:ty) => {
        impl FtpConnection for $stream {
            fn login(&mut self, user: &str, password: &str) -> FtpResult<()> {
                <$stream>::login(self, user, password)
            }

            fn set_passive(&mut self, passive: bool) {
                let mode = if passive { Mode::Passive } else { Mode::Active };
                <$stream>::set_mode(self, mode);
            }

            fn cwd(&mut self, path: &str) -> FtpResult<()> {
                <$stream>::cwd(self, path)
            }

            fn mkdir(&mut self, path: &str) -> FtpResult<()> {
                <$stream>::mkdir(self, path)
            }

            fn size(&mut self, name: &str) -> FtpResult<usize> {
                <$stream>::size(self, name)
            }

            fn begin_store(&mut self, name: &str, offset: u64) -> FtpResult<Box<dyn Write>> {
                <$stream>::transfer_type(self, FileType::Binary)?;
                if offset > 0 {
                    let offset = usize::try_from(offset).map_err(|e| {
                        FtpError::ConnectionError(io::Error::new(io::ErrorKind::InvalidInput, e))
                    })?;
                    <$stream>::resume_transfer(self, offset)?;
                }
                let stream = <$stream>::put_with_stream(self, name)?;
                Ok(Box::new(stream))
            }

            fn finish_store(&mut self, stream: Box<dyn Write>) -> FtpResult<()> {
                <$stream>::finalize_put_stream(self, stream)
            }

            fn quit(&mut self) -> FtpResult<()> {
                <$stream>::quit(self)
            }
        }
    };
}

impl_ftp_connection!(FtpStream);
impl_ftp_connection!(RustlsFtpStream);

/// Opens control connections
pub trait Connector: Send + Sync {
    /// Connect to `endpoint`; TLS, when used, is negotiated before returning
    fn open(&self, endpoint: &FtpEndpoint) -> Result<Box<dyn FtpConnection>, TransferError>;
}

/// [`Connector`] backed by suppaftp, plain or explicit FTPS
pub struct SuppaftpConnector {
    tls_config: Option<Arc<ClientConfig>>,
}

impl SuppaftpConnector {
    /// Create a connector; the TLS configuration is only built when `tls` is set.
    ///
    /// With `verify_tls` off any server certificate is accepted.
    pub fn new(tls: bool, verify_tls: bool) -> Result<Self, TransferError> {
        let tls_config = if tls {
            Some(tls_client_config(verify_tls)?)
        } else {
            None
        };
        Ok(Self { tls_config })
    }

    /// Configuration shared by every control and data channel
    pub fn tls_config(&self) -> Option<&Arc<ClientConfig>> {
        self.tls_config.as_ref()
    }
}

impl Connector for SuppaftpConnector {
    #[instrument(skip(self))]
    fn open(&self, endpoint: &FtpEndpoint) -> Result<Box<dyn FtpConnection>, TransferError> {
        let address = (endpoint.host.as_str(), endpoint.port);

        match &self.tls_config {
            None => Ok(Box::new(FtpStream::connect(address)?)),
            Some(config) => {
                let stream = RustlsFtpStream::connect(address)?;
                let secure =
                    stream.into_secure(RustlsConnector::from(Arc::clone(config)), &endpoint.host)?;
                Ok(Box::new(secure))
            }
        }
    }
}

/// rustls client configuration shared by the control and data channels.
///
/// The in-memory session store lets each data channel resume the control
/// channel's session instead of negotiating a new one.
fn tls_client_config(verify: bool) -> Result<Arc<ClientConfig>, TransferError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransferError::Tls(e.to_string()))?;

    let mut config = if verify {
        builder
            .with_root_certificates(native_roots())
            .with_no_client_auth()
    } else {
        warn!("FTPS server certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            .with_no_client_auth()
    };

    config.resumption = Resumption::in_memory_sessions(TLS_SESSION_CACHE_SIZE)
        .tls12_resumption(Tls12Resumption::SessionIdOrTickets);

    Ok(Arc::new(config))
}

fn native_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(error = %error, "Failed to load a native root certificate");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "Root certificates loaded");
    roots
}

/// Accepts any certificate; handshake signatures are still checked
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// State of the control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// Statistics for a session.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub connects: u32,
    pub rejected_logins: u32,
    pub bytes_sent: u64,
    pub files_stored: u32,
    pub transfers_cancelled: u32,
}

/// How a store ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The whole file was sent and acknowledged
    Completed { sent: u64 },
    /// The progress callback asked to stop; the data channel was abandoned
    Cancelled { sent: u64 },
}

/// One control connection to the FTP server
pub struct TransferSession {
    endpoint: FtpEndpoint,
    connector: Arc<dyn Connector>,
    connection: Option<Box<dyn FtpConnection>>,
    stats: Arc<RwLock<SessionStats>>,
}

impl TransferSession {
    pub fn new(endpoint: FtpEndpoint, connector: Arc<dyn Connector>) -> Self {
        Self::with_stats(endpoint, connector, Arc::default())
    }

    /// Create a session recording into shared statistics
    pub fn with_stats(
        endpoint: FtpEndpoint,
        connector: Arc<dyn Connector>,
        stats: Arc<RwLock<SessionStats>>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            connection: None,
            stats,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> SessionState {
        if self.connection.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Get current session statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    /// Open the control connection and log in.
    ///
    /// An existing connection is closed first. Returns `Ok(false)` when the
    /// server rejects the credentials; network and TLS failures are errors.
    #[instrument(skip(self), fields(host = %self.endpoint.host, port = self.endpoint.port))]
    pub fn connect(&mut self) -> Result<bool, TransferError> {
        if self.connection.is_some() {
            self.close();
        }

        let mut connection = self.connector.open(&self.endpoint)?;
        connection.set_passive(self.endpoint.passive);

        match connection.login(&self.endpoint.login, &self.endpoint.password) {
            Ok(()) => {}
            Err(FtpError::UnexpectedResponse(response)) => {
                warn!(login = %self.endpoint.login, status = ?response.status, "FTP login rejected");
                if let Err(e) = connection.quit() {
                    debug!(error = %e, "QUIT after rejected login failed");
                }
                self.stats.write().rejected_logins += 1;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        self.connection = Some(connection);
        self.stats.write().connects += 1;
        info!(tls = self.endpoint.tls, passive = self.endpoint.passive, "Connected to FTP server");
        Ok(true)
    }

    /// Change into `path`, creating it first if the server does not know it
    pub fn select_remote_directory(&mut self, path: &str) -> Result<(), TransferError> {
        let connection = self.connection.as_mut().ok_or(TransferError::NotConnected)?;

        match connection.cwd(path) {
            Ok(()) => Ok(()),
            Err(FtpError::UnexpectedResponse(_)) => {
                debug!(path, "Creating remote directory");
                connection.mkdir(path)?;
                connection.cwd(path)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Size of a file in the current remote directory
    pub fn remote_size(&mut self, name: &str) -> Result<u64, TransferError> {
        let connection = self.connection.as_mut().ok_or(TransferError::NotConnected)?;
        Ok(connection.size(name)? as u64)
    }

    /// Store `path` under its base name in the current remote directory.
    ///
    /// The file is sent in blocks of `block_size` bytes starting at
    /// `resume_offset`. `on_progress` receives the size of each block once it
    /// is written and may break to abandon the transfer. A failed transfer
    /// drops the connection.
    #[instrument(skip(self, on_progress), fields(path = %path.display()))]
    pub fn upload(
        &mut self,
        path: &Path,
        block_size: usize,
        resume_offset: Option<u64>,
        on_progress: impl FnMut(usize) -> ControlFlow<()>,
    ) -> Result<StoreOutcome, TransferError> {
        let connection = self.connection.as_mut().ok_or(TransferError::NotConnected)?;

        match store(connection.as_mut(), path, block_size.max(1), resume_offset.unwrap_or(0), on_progress) {
            Ok(outcome) => {
                let mut stats = self.stats.write();
                match outcome {
                    StoreOutcome::Completed { sent } => {
                        stats.bytes_sent += sent;
                        stats.files_stored += 1;
                        info!(bytes = sent, "File stored");
                    }
                    StoreOutcome::Cancelled { sent } => {
                        stats.bytes_sent += sent;
                        stats.transfers_cancelled += 1;
                        warn!(bytes = sent, "Transfer cancelled");
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Transfer failed, dropping connection");
                self.connection = None;
                Err(e)
            }
        }
    }

    /// Log out and mark the session disconnected
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            match connection.quit() {
                Ok(()) => debug!("FTP session closed"),
                Err(e) => debug!(error = %e, "QUIT failed, connection dropped"),
            }
        }
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn store(
    connection: &mut dyn FtpConnection,
    path: &Path,
    block_size: usize,
    offset: u64,
    mut on_progress: impl FnMut(usize) -> ControlFlow<()>,
) -> Result<StoreOutcome, TransferError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            TransferError::io(path, io::Error::new(io::ErrorKind::InvalidInput, "no file name"))
        })?;

    let mut file = File::open(path).map_err(|e| TransferError::io(path, e))?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| TransferError::io(path, e))?;
    }

    let mut stream = connection.begin_store(&name, offset)?;
    let mut buffer = vec![0u8; block_size];
    let mut sent = 0u64;

    loop {
        let read = read_block(&mut file, &mut buffer).map_err(|e| TransferError::io(path, e))?;
        if read == 0 {
            break;
        }

        stream
            .write_all(&buffer[..read])
            .map_err(TransferError::Send)?;
        sent += read as u64;

        if on_progress(read).is_break() {
            return Ok(StoreOutcome::Cancelled { sent });
        }
    }

    stream.flush().map_err(TransferError::Send)?;
    connection.finish_store(stream)?;
    Ok(StoreOutcome::Completed { sent })
}

/// Fill `buffer` from `reader`, short only at end of input
fn read_block(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
