//! Trapper Uploader
//!
//! Sends a data package (manifest and archive) to the Trapper FTP server and
//! asks Trapper to process it.
//!
//! ```text
//! files -> Uploader -> TransferSession (FTP / FTPS) -> /collections
//!              |
//!              +-> TrapperApi::notify_collection_process
//! ```
//!
//! Interrupted uploads can be resumed from the size of the partial remote
//! file.

pub mod config;
pub mod ftp_session;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigValidationError, UploaderConfig};
pub use ftp_session::{
    Connector, FtpConnection, FtpEndpoint, SessionState, SessionStats, StoreOutcome,
    SuppaftpConnector, TransferError, TransferSession,
};
pub use trapper_remote::ProgressSender;
pub use upload::{UploadError, UploadOutcome, UploadProgress, UploadRequest, Uploader};
