//! Manifest document serialization and the package archive.

use crate::config::Compression;
use crate::manifest::{Manifest, Resource};
use chrono::Utc;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entries at or above this size are written with zip64 headers
const ZIP64_ENTRY_THRESHOLD: u64 = u32::MAX as u64;

/// Timestamp layout of `date_recorded`
const DATE_RECORDED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to write archive entry: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0} is not inside the media root")]
    OutsideRoot(PathBuf),
}

impl ArchiveError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Serializable form of the manifest; field order is the document's key order
#[derive(Debug, Clone, Serialize)]
pub struct ManifestDocument {
    pub collections: Vec<CollectionEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionEntry {
    pub name: String,
    pub project_name: String,
    pub timezone: String,
    pub timezone_ignore_dst: bool,
    pub resources_dir: String,
    pub deployments: Vec<DeploymentEntry>,
    /// Always empty; kept for the server's schema
    pub resources: Vec<ResourceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentEntry {
    pub deployment_id: String,
    pub resources: Vec<ResourceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceEntry {
    pub name: String,
    pub file: String,
    pub date_recorded: String,
}

impl From<&Resource> for ResourceEntry {
    fn from(resource: &Resource) -> Self {
        Self {
            name: resource.name.clone(),
            file: resource.file.clone(),
            date_recorded: resource
                .recorded_at
                .with_timezone(&Utc)
                .format(DATE_RECORDED_FORMAT)
                .to_string(),
        }
    }
}

/// Build the manifest document
pub fn serialize(manifest: &Manifest) -> ManifestDocument {
    let collections = manifest
        .collections
        .iter()
        .map(|collection| CollectionEntry {
            name: collection.name.clone(),
            project_name: collection.project_name.clone(),
            timezone: collection.timezone.name().to_string(),
            timezone_ignore_dst: collection.timezone_ignore_dst,
            resources_dir: collection.resources_dir().to_string(),
            deployments: collection
                .deployments
                .iter()
                .map(|deployment| DeploymentEntry {
                    deployment_id: deployment.deployment_id.clone(),
                    resources: deployment.resources.iter().map(ResourceEntry::from).collect(),
                })
                .collect(),
            resources: Vec::new(),
        })
        .collect();

    ManifestDocument { collections }
}

/// Write the manifest document as YAML
#[instrument(skip(document))]
pub fn write_manifest(path: &Path, document: &ManifestDocument) -> Result<(), ArchiveError> {
    let file = File::create(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_yaml::to_writer(&mut writer, document)?;
    writer.flush().map_err(|e| ArchiveError::io(path, e))?;

    debug!(path = %path.display(), "Manifest written");
    Ok(())
}

/// Name of an archive entry: the file's path under the media root, `/`-separated
pub fn entry_name(media_root: &Path, file: &Path) -> Result<String, ArchiveError> {
    let relative = file
        .strip_prefix(media_root)
        .map_err(|_| ArchiveError::OutsideRoot(file.to_path_buf()))?;

    let parts = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => Ok(part.to_string_lossy().into_owned()),
            _ => Err(ArchiveError::OutsideRoot(file.to_path_buf())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(parts.join("/"))
}

/// Whether an entry of `size` bytes needs zip64 headers
fn needs_zip64(size: u64) -> bool {
    size >= ZIP64_ENTRY_THRESHOLD
}

/// Bundle `files` into a zip archive at `archive_path`, in the given order.
///
/// `on_file` receives the entry index and name before each entry is written.
#[instrument(skip(files, on_file), fields(files = files.len()))]
pub fn build_archive(
    archive_path: &Path,
    media_root: &Path,
    files: &[PathBuf],
    compression: Compression,
    mut on_file: impl FnMut(usize, &str),
) -> Result<(), ArchiveError> {
    let method = match compression {
        Compression::Stored => CompressionMethod::Stored,
        Compression::Deflated => CompressionMethod::Deflated,
    };

    let file = File::create(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for (index, path) in files.iter().enumerate() {
        let entry = entry_name(media_root, path)?;
        on_file(index, &entry);

        let mut source = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        let size = source
            .metadata()
            .map_err(|e| ArchiveError::io(path, e))?
            .len();

        let options = SimpleFileOptions::default()
            .compression_method(method)
            .large_file(needs_zip64(size));

        zip.start_file(entry.as_str(), options)?;
        io::copy(&mut source, &mut zip).map_err(|e| ArchiveError::io(path, e))?;
    }

    let mut writer = zip.finish()?;
    writer
        .flush()
        .map_err(|e| ArchiveError::io(archive_path, e))?;

    info!(path = %archive_path.display(), entries = files.len(), "Archive written");
    Ok(())
}
