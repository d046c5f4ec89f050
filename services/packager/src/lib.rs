//! Trapper Packager
//!
//! Turns a tree of camera-trap media into an upload-ready package:
//!
//! ```text
//! media root -> Manifest scan -> manifest (.yaml) + archive (.zip) + audit log (.log)
//!                     |
//!                     +-> deployments template / validation against Trapper
//! ```
//!
//! Capture times come from EXIF `DateTimeOriginal` where available and from
//! file modification times otherwise, and are localized to the configured
//! IANA zone (optionally ignoring daylight saving time).

pub mod archive;
pub mod audit;
pub mod config;
pub mod deployments;
pub mod manifest;
pub mod package;
pub mod progress;
pub mod timezone;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::{ArchiveError, ManifestDocument};
pub use audit::AuditLog;
pub use config::{Compression, ConfigValidationError, PackagerConfig};
pub use deployments::{deployments_template, validate_deployments, write_template, DeploymentRow, TemplateError};
pub use manifest::{build_manifest, Manifest, ManifestError, ManifestScan, ScanOptions};
pub use package::{package_name, PackageBuilder, PackageError, PackageFiles, PackageRequest};
pub use progress::PackageProgress;
pub use trapper_remote::ProgressSender;
pub use timezone::{localize, resolve_zone, TimezoneError};
