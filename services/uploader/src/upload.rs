//! Upload of a data package (manifest and archive) to the Trapper FTP server.
//!
//! Files are sent one after another, in the order given, on a single session
//! owned by a blocking worker. Every run (and every [`Uploader::check`]) opens
//! its own control connection and closes it before returning, so any further
//! operation starts from a fresh login. Progress is published as
//! [`UploadProgress`] events. A [`CancellationToken`] is checked after every
//! block; once it is cancelled the transfer in flight is abandoned, the session
//! is closed and the run ends with [`UploadOutcome::Stopped`].

use crate::config::UploaderConfig;
use crate::ftp_session::{Connector, FtpEndpoint, SessionStats, StoreOutcome, TransferError, TransferSession};
use parking_lot::RwLock;
use std::fmt;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trapper_remote::{ProcessRequest, ProgressSender, TrapperApi};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("There are no files to upload.")]
    NoFiles,

    #[error("There is no file {}.", .0.display())]
    MissingFile(PathBuf),

    #[error("No FTP connection. Please, check your settings.")]
    AuthenticationFailed,

    #[error("Can not resume a previous upload. There is no such a file on the FTP server.")]
    ResumeUnavailable {
        file: String,
        #[source]
        source: TransferError,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Processing was requested but no Trapper client is configured")]
    NoRemote,

    #[error("Upload worker failed: {0}")]
    Worker(String),
}

/// Progress of the file currently being sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub file_name: String,
}

/// Terminal state of an upload run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Every file was uploaded; processing was not requested
    Uploaded,
    /// Every file was uploaded and Trapper accepted the processing request
    Processing,
    /// Every file was uploaded but Trapper did not start processing
    UploadedNotProcessed {
        status: Option<u16>,
        message: String,
        errors: String,
    },
    /// The run was cancelled
    Stopped,
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Uploaded => {
                write!(f, "Your data package has been successfully uploaded to Trapper!")
            }
            UploadOutcome::Processing => write!(
                f,
                "Your data package has been successfully uploaded and is being \
                 processed by Trapper now!"
            ),
            UploadOutcome::UploadedNotProcessed {
                status,
                message,
                errors,
            } => {
                let status = status.map_or_else(|| "none".to_string(), |s| s.to_string());
                write!(
                    f,
                    "Your data package has been successfully uploaded but could not \
                     be automatically processed by Trapper. See the reason below:\n\
                     Response status: {status}\n{message}\n{errors}"
                )
            }
            UploadOutcome::Stopped => write!(f, "The upload of your data has been stopped."),
        }
    }
}

/// What to upload and what to do afterwards
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Files in upload order, usually the manifest then the archive
    pub files: Vec<PathBuf>,
    /// Continue partial remote files instead of starting over
    pub resume: bool,
    pub trigger_processing: bool,
    pub remove_zip: bool,
}

/// Result of the blocking part of a run
enum TransferSummary {
    Completed,
    Stopped,
}

/// Sends packages and asks Trapper to process them
pub struct Uploader {
    endpoint: FtpEndpoint,
    remote_dir: String,
    block_size: usize,
    connector: Arc<dyn Connector>,
    api: Option<Arc<dyn TrapperApi>>,
    stats: Arc<RwLock<SessionStats>>,
}

impl Uploader {
    pub fn new(
        endpoint: FtpEndpoint,
        remote_dir: impl Into<String>,
        block_size: usize,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            endpoint,
            remote_dir: remote_dir.into(),
            block_size,
            connector,
            api: None,
            stats: Arc::default(),
        }
    }

    pub fn from_config(config: &UploaderConfig, connector: Arc<dyn Connector>) -> Self {
        Self::new(
            config.endpoint(),
            config.ftp.remote_dir.clone(),
            config.ftp.block_size,
            connector,
        )
    }

    /// Client used for the processing request
    pub fn with_api(mut self, api: Arc<dyn TrapperApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Statistics accumulated over every session opened by this uploader
    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    /// Check that the FTP server accepts the configured credentials
    pub async fn check(&self) -> Result<bool, UploadError> {
        let (endpoint, connector, stats) = self.session_parts();
        tokio::task::spawn_blocking(move || {
            let mut session = TransferSession::with_stats(endpoint, connector, stats);
            let accepted = session.connect()?;
            session.close();
            Ok::<_, UploadError>(accepted)
        })
        .await
        .map_err(|e| UploadError::Worker(e.to_string()))?
    }

    /// Upload `request.files` and, if asked, trigger processing.
    ///
    /// Missing local files are reported before any connection is made.
    #[instrument(skip(self, request, cancel, progress), fields(files = request.files.len(), resume = request.resume))]
    pub async fn upload(
        &self,
        request: UploadRequest,
        cancel: CancellationToken,
        progress: ProgressSender<UploadProgress>,
    ) -> Result<UploadOutcome, UploadError> {
        if request.files.is_empty() {
            return Err(UploadError::NoFiles);
        }
        if let Some(missing) = request.files.iter().find(|f| !f.is_file()) {
            return Err(UploadError::MissingFile(missing.clone()));
        }
        if request.trigger_processing && self.api.is_none() {
            return Err(UploadError::NoRemote);
        }

        let (endpoint, connector, stats) = self.session_parts();
        let files = request.files.clone();
        let remote_dir = self.remote_dir.clone();
        let block_size = self.block_size;
        let resume = request.resume;

        let summary = tokio::task::spawn_blocking(move || {
            let mut session = TransferSession::with_stats(endpoint, connector, stats);
            transfer_files(&mut session, &files, &remote_dir, block_size, resume, &cancel, &progress)
        })
        .await
        .map_err(|e| UploadError::Worker(e.to_string()))??;

        match summary {
            TransferSummary::Stopped => Ok(UploadOutcome::Stopped),
            TransferSummary::Completed if !request.trigger_processing => Ok(UploadOutcome::Uploaded),
            TransferSummary::Completed => self.request_processing(&request).await,
        }
    }

    async fn request_processing(&self, request: &UploadRequest) -> Result<UploadOutcome, UploadError> {
        let api = self.api.as_ref().ok_or(UploadError::NoRemote)?;
        let process = ProcessRequest {
            yaml_file: base_name_with_extension(&request.files, &["yaml", "yml"]),
            zip_file: base_name_with_extension(&request.files, &["zip"]),
            remove_zip: request.remove_zip,
        };

        let outcome = match api.notify_collection_process(&process).await {
            Ok(response) if response.is_success() => UploadOutcome::Processing,
            Ok(response) => {
                let (message, errors) = response.diagnostic();
                UploadOutcome::UploadedNotProcessed {
                    status: Some(response.status),
                    message,
                    errors,
                }
            }
            Err(e) => {
                warn!(error = %e, "Processing request failed");
                UploadOutcome::UploadedNotProcessed {
                    status: None,
                    message: "TRAPPER API did not respond.".to_string(),
                    errors: e.to_string(),
                }
            }
        };

        info!(outcome = ?outcome, "Upload finished");
        Ok(outcome)
    }

    /// Everything a worker needs to open its own session
    fn session_parts(&self) -> (FtpEndpoint, Arc<dyn Connector>, Arc<RwLock<SessionStats>>) {
        (
            self.endpoint.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.stats),
        )
    }
}

/// Blocking part of a run: connect, then send every file in order
fn transfer_files(
    session: &mut TransferSession,
    files: &[PathBuf],
    remote_dir: &str,
    block_size: usize,
    resume: bool,
    cancel: &CancellationToken,
    progress: &ProgressSender<UploadProgress>,
) -> Result<TransferSummary, UploadError> {
    if !session.connect()? {
        return Err(UploadError::AuthenticationFailed);
    }

    for path in files {
        let file_name = base_name(path);
        let total_bytes = fs::metadata(path)
            .map_err(|_| UploadError::MissingFile(path.clone()))?
            .len();

        let resume_offset = if resume {
            let offset = session
                .select_remote_directory(remote_dir)
                .and_then(|()| session.remote_size(&file_name))
                .map_err(|source| UploadError::ResumeUnavailable {
                    file: file_name.clone(),
                    source,
                })?;
            debug!(file = %file_name, offset, "Resuming upload");
            Some(offset)
        } else {
            None
        };

        let mut uploaded_bytes = resume_offset.unwrap_or(0);
        progress.send(UploadProgress {
            uploaded_bytes,
            total_bytes,
            file_name: file_name.clone(),
        });

        session.select_remote_directory(remote_dir)?;
        let outcome = session.upload(path, block_size, resume_offset, |sent| {
            uploaded_bytes += sent as u64;
            progress.send(UploadProgress {
                uploaded_bytes,
                total_bytes,
                file_name: file_name.clone(),
            });

            if cancel.is_cancelled() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        if let StoreOutcome::Cancelled { sent } = outcome {
            info!(file = %file_name, sent, "Upload stopped");
            session.close();
            return Ok(TransferSummary::Stopped);
        }
    }

    session.close();
    Ok(TransferSummary::Completed)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Base name of the first file with one of `extensions`, or empty
fn base_name_with_extension(files: &[PathBuf], extensions: &[&str]) -> String {
    files
        .iter()
        .find(|f| {
            f.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        })
        .map(|f| base_name(f))
        .unwrap_or_default()
}
