//! End-to-end package build.
//!
//! A [`PackageBuilder`] validates its inputs and scans the media tree when it
//! is constructed, so configuration mistakes and empty selections surface
//! before anything is written. [`PackageBuilder::run`] then writes the audit
//! log, the manifest and the archive. If any step of the run fails, all three
//! files are removed before the error is returned.

use crate::archive::{self, ArchiveError};
use crate::audit::AuditLog;
use crate::config::{Compression, PackagerConfig};
use crate::manifest::{build_manifest, Manifest, ManifestError, ManifestScan, ScanOptions};
use crate::progress::PackageProgress;
use crate::timezone::{resolve_zone, TimezoneError};
use chrono::Local;
use chrono_tz::Tz;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use trapper_remote::ProgressSender;

/// Layout of the timestamp embedded in package file names
const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("You have to choose both \"Media root\" and \"Output path\".")]
    MissingPaths,

    #[error("There is no directory: {0}")]
    MissingDirectory(PathBuf),

    #[error("You have to provide at least one image or video extension.")]
    NoExtensions,

    #[error("You have to select at least one collection.")]
    NoCollections,

    #[error(transparent)]
    Timezone(#[from] TimezoneError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Failed to write audit log {path}: {source}")]
    AuditLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Everything needed to build one package
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub media_root: PathBuf,
    pub output_path: PathBuf,
    pub collections: Vec<String>,
    pub project: String,
    pub username: String,
    pub name_prefix: String,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    pub timezone: String,
    pub ignore_dst: bool,
    pub compression: Compression,
}

impl PackageRequest {
    pub fn from_config(config: &PackagerConfig) -> Self {
        Self {
            media_root: config.package.media_root.clone(),
            output_path: config.package.output_path.clone(),
            collections: config.package.collections.clone(),
            project: config.package.project.clone(),
            username: config.username(),
            name_prefix: config.package.name_prefix.clone(),
            image_extensions: config.package.image_extensions.clone(),
            video_extensions: config.package.video_extensions.clone(),
            timezone: config.timezone.name.clone(),
            ignore_dst: config.timezone.ignore_dst,
            compression: config.archive.compression,
        }
    }
}

/// Paths of the three files making up a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFiles {
    pub manifest: PathBuf,
    pub archive: PathBuf,
    pub log: PathBuf,
}

impl PackageFiles {
    fn new(output: &Path, request: &PackageRequest, timestamp: &str) -> Self {
        let path = |ext: &str| {
            output.join(package_name(
                &request.name_prefix,
                &request.project,
                timestamp,
                &request.username,
                ext,
            ))
        };

        Self {
            manifest: path("yaml"),
            archive: path("zip"),
            log: path("log"),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.log, &self.manifest, &self.archive]
    }
}

/// File name `[prefix_]{project}_{timestamp}_{username}.{ext}` with spaces
/// replaced by underscores
pub fn package_name(prefix: &str, project: &str, timestamp: &str, username: &str, ext: &str) -> String {
    let mut name = format!("{project}_{timestamp}_{username}.{ext}");
    if !prefix.is_empty() {
        name = format!("{prefix}_{name}");
    }
    name.replace(' ', "_")
}

/// A validated, scanned package ready to be written
#[derive(Debug)]
pub struct PackageBuilder {
    request: PackageRequest,
    scan: ManifestScan,
    files: PackageFiles,
}

impl PackageBuilder {
    /// Validate `request`, scan the media tree and fix the output names
    pub fn new(request: PackageRequest) -> Result<Self, PackageError> {
        let timestamp = Local::now().format(NAME_TIMESTAMP_FORMAT).to_string();
        Self::with_timestamp(request, &timestamp)
    }

    /// Like [`PackageBuilder::new`] with an explicit name timestamp
    pub fn with_timestamp(request: PackageRequest, timestamp: &str) -> Result<Self, PackageError> {
        let zone = validate(&request)?;

        let files = PackageFiles::new(&request.output_path, &request, timestamp);

        let scan = build_manifest(&ScanOptions {
            media_root: request.media_root.clone(),
            collections: request.collections.clone(),
            image_extensions: request.image_extensions.clone(),
            video_extensions: request.video_extensions.clone(),
            project_name: request.project.clone(),
            zone,
            ignore_dst: request.ignore_dst,
        })?;

        debug!(
            manifest = %files.manifest.display(),
            archive = %files.archive.display(),
            resources = scan.files.len(),
            "Package prepared"
        );

        Ok(Self {
            request,
            scan,
            files,
        })
    }

    pub fn files(&self) -> &PackageFiles {
        &self.files
    }

    pub fn manifest(&self) -> &Manifest {
        &self.scan.manifest
    }

    /// Number of resources that will be archived
    pub fn total_files(&self) -> usize {
        self.scan.files.len()
    }

    /// Write the audit log, the manifest and the archive.
    ///
    /// On failure every package file created so far is deleted and the error
    /// is returned.
    #[instrument(skip(self, progress), fields(project = %self.request.project))]
    pub fn run(&self, progress: &ProgressSender<PackageProgress>) -> Result<PackageFiles, PackageError> {
        match self.write_package(progress) {
            Ok(()) => {
                info!(archive = %self.files.archive.display(), "Package generated");
                Ok(self.files.clone())
            }
            Err(e) => {
                error!(error = %e, "Package generation failed, removing partial output");
                self.rollback();
                Err(e)
            }
        }
    }

    fn write_package(&self, progress: &ProgressSender<PackageProgress>) -> Result<(), PackageError> {
        let log_path = &self.files.log;
        let audit_err = |source: io::Error| PackageError::AuditLog {
            path: log_path.clone(),
            source,
        };

        let mut log = AuditLog::create(log_path).map_err(audit_err)?;
        log.info(format!("Generating package started at {}", Local::now()))
            .map_err(audit_err)?;
        log.info(format!("Data path: {}", self.request.media_root.display()))
            .map_err(audit_err)?;
        log.info(format!("Output path: {}", self.request.output_path.display()))
            .map_err(audit_err)?;
        log.info(format!("Collections: {}", self.request.collections.join(", ")))
            .map_err(audit_err)?;

        let document = archive::serialize(&self.scan.manifest);
        archive::write_manifest(&self.files.manifest, &document)?;

        log.info(format!(
            "Building the zip archive: {}",
            self.files.archive.display()
        ))
        .map_err(audit_err)?;

        let total = self.scan.files.len();
        let mut log_failure = None;
        archive::build_archive(
            &self.files.archive,
            &self.request.media_root,
            &self.scan.files,
            self.request.compression,
            |index, name| {
                if let Err(e) = log.info(format!("Adding file: {name}")) {
                    log_failure.get_or_insert(e);
                }
                progress.send(PackageProgress {
                    index,
                    total,
                    label: name.to_string(),
                });
            },
        )?;

        if let Some(e) = log_failure {
            return Err(audit_err(e));
        }

        log.info(format!("Package finished: {total} files archived"))
            .map_err(audit_err)?;
        Ok(())
    }

    fn rollback(&self) {
        for path in self.files.all() {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed partial package file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial package file"),
            }
        }
    }
}

/// Check paths, extensions, collections and the time zone
fn validate(request: &PackageRequest) -> Result<Tz, PackageError> {
    if request.media_root.as_os_str().is_empty() || request.output_path.as_os_str().is_empty() {
        return Err(PackageError::MissingPaths);
    }
    for dir in [&request.media_root, &request.output_path] {
        if !dir.is_dir() {
            return Err(PackageError::MissingDirectory(dir.clone()));
        }
    }

    if request.image_extensions.is_empty() && request.video_extensions.is_empty() {
        return Err(PackageError::NoExtensions);
    }

    if request.collections.is_empty() {
        return Err(PackageError::NoCollections);
    }
    for collection in &request.collections {
        let path = request.media_root.join(collection);
        if !path.is_dir() {
            return Err(PackageError::MissingDirectory(path));
        }
    }

    Ok(resolve_zone(&request.timezone)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{jpeg_with_capture_time, write_file};
    use std::collections::BTreeSet;
    use std::io::Read;
    use tokio::sync::mpsc;

    struct Fixture {
        media: tempfile::TempDir,
        out: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let media = tempfile::tempdir().unwrap();
            write_file(
                &media.path().join("siteA/cam01-north/IMG_0001.jpg"),
                &jpeg_with_capture_time("2023:06:01 08:00:00"),
            );
            write_file(
                &media.path().join("siteA/cam01-north/IMG_0002.jpg"),
                &jpeg_with_capture_time("2023:06:01 09:30:00"),
            );
            write_file(&media.path().join("siteA/cam02-south/VID_0001.mp4"), b"video");
            Self {
                media,
                out: tempfile::tempdir().unwrap(),
            }
        }

        fn request(&self) -> PackageRequest {
            PackageRequest {
                media_root: self.media.path().to_path_buf(),
                output_path: self.out.path().to_path_buf(),
                collections: vec!["siteA".to_string()],
                project: "WOLF".to_string(),
                username: "jane".to_string(),
                name_prefix: String::new(),
                image_extensions: vec![".jpg".to_string()],
                video_extensions: vec![".mp4".to_string()],
                timezone: "Europe/Warsaw".to_string(),
                ignore_dst: false,
                compression: Compression::Deflated,
            }
        }

        fn output_entries(&self) -> usize {
            fs::read_dir(self.out.path()).unwrap().count()
        }
    }

    #[test]
    fn test_package_name() {
        assert_eq!(
            package_name("", "WOLF", "20230601120000", "jane", "zip"),
            "WOLF_20230601120000_jane.zip"
        );
        assert_eq!(
            package_name("spring batch", "Wolf Project", "20230601120000", "jane doe", "yaml"),
            "spring_batch_Wolf_Project_20230601120000_jane_doe.yaml"
        );
    }

    #[test]
    fn test_files_share_timestamp() {
        let fixture = Fixture::new();
        let builder = PackageBuilder::with_timestamp(fixture.request(), "20230601120000").unwrap();
        let files = builder.files();

        assert_eq!(
            files.manifest,
            fixture.out.path().join("WOLF_20230601120000_jane.yaml")
        );
        assert_eq!(files.archive, fixture.out.path().join("WOLF_20230601120000_jane.zip"));
        assert_eq!(files.log, fixture.out.path().join("WOLF_20230601120000_jane.log"));
        assert_eq!(builder.total_files(), 3);
        assert_eq!(fixture.output_entries(), 0);
    }

    #[test]
    fn test_validation_errors() {
        let fixture = Fixture::new();

        let mut request = fixture.request();
        request.output_path = PathBuf::new();
        assert!(matches!(
            PackageBuilder::new(request),
            Err(PackageError::MissingPaths)
        ));

        let mut request = fixture.request();
        request.media_root = fixture.media.path().join("nope");
        assert!(matches!(
            PackageBuilder::new(request),
            Err(PackageError::MissingDirectory(_))
        ));

        let mut request = fixture.request();
        request.image_extensions.clear();
        request.video_extensions.clear();
        assert!(matches!(
            PackageBuilder::new(request),
            Err(PackageError::NoExtensions)
        ));

        let mut request = fixture.request();
        request.collections = vec!["siteZ".to_string()];
        assert!(matches!(
            PackageBuilder::new(request),
            Err(PackageError::MissingDirectory(p)) if p.ends_with("siteZ")
        ));

        let mut request = fixture.request();
        request.timezone = "Europe/Atlantis".to_string();
        assert!(matches!(
            PackageBuilder::new(request),
            Err(PackageError::Timezone(_))
        ));

        assert_eq!(fixture.output_entries(), 0);
    }

    #[test]
    fn test_nothing_to_package_writes_nothing() {
        let fixture = Fixture::new();
        let mut request = fixture.request();
        request.image_extensions = vec![".png".to_string()];
        request.video_extensions = vec![".avi".to_string()];

        let result = PackageBuilder::new(request);
        assert!(matches!(
            result,
            Err(PackageError::Manifest(ManifestError::NothingToPackage))
        ));
        assert_eq!(fixture.output_entries(), 0);
    }

    #[test]
    fn test_run_writes_consistent_package() {
        let fixture = Fixture::new();
        let builder = PackageBuilder::with_timestamp(fixture.request(), "20230601120000").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let files = builder.run(&ProgressSender::new(tx)).unwrap();

        for path in files.all() {
            assert!(path.is_file(), "{} missing", path.display());
        }

        // manifest resources == archive entries
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(&files.manifest).unwrap()).unwrap();
        let mut listed = BTreeSet::new();
        for collection in yaml["collections"].as_sequence().unwrap() {
            let dir = collection["resources_dir"].as_str().unwrap();
            for deployment in collection["deployments"].as_sequence().unwrap() {
                let id = deployment["deployment_id"].as_str().unwrap();
                for resource in deployment["resources"].as_sequence().unwrap() {
                    listed.insert(format!("{dir}/{id}/{}", resource["file"].as_str().unwrap()));
                }
            }
        }

        let mut archive = zip::ZipArchive::new(fs::File::open(&files.archive).unwrap()).unwrap();
        let mut archived = BTreeSet::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            assert_eq!(contents, fs::read(fixture.media.path().join(entry.name())).unwrap());
            archived.insert(entry.name().to_string());
        }
        assert_eq!(listed, archived);

        let log = fs::read_to_string(&files.log).unwrap();
        assert!(log.starts_with("INFO:Generating package started at "));
        assert!(log.contains("INFO:Collections: siteA\n"));
        assert!(log.contains("INFO:Adding file: siteA/cam02-south/VID_0001.mp4\n"));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            PackageProgress {
                index: 0,
                total: 3,
                label: "siteA/cam01-north/IMG_0001.jpg".to_string()
            }
        );
    }

    #[test]
    fn test_failed_archive_removes_all_files() {
        let fixture = Fixture::new();
        let builder = PackageBuilder::with_timestamp(fixture.request(), "20230601120000").unwrap();

        // the second of three entries vanishes between scan and run
        fs::remove_file(fixture.media.path().join("siteA/cam01-north/IMG_0002.jpg")).unwrap();

        let result = builder.run(&ProgressSender::disabled());
        assert!(matches!(result, Err(PackageError::Archive(_))));
        for path in builder.files().all() {
            assert!(!path.exists(), "{} left behind", path.display());
        }
    }

    #[test]
    fn test_failed_manifest_removes_log() {
        let fixture = Fixture::new();
        let builder = PackageBuilder::with_timestamp(fixture.request(), "20230601120000").unwrap();

        // a directory squatting on the manifest path makes the write fail
        fs::create_dir(&builder.files().manifest).unwrap();

        let result = builder.run(&ProgressSender::disabled());
        assert!(matches!(result, Err(PackageError::Archive(ArchiveError::Io { .. }))));
        assert!(!builder.files().log.exists());
        assert!(!builder.files().archive.exists());
    }
}
