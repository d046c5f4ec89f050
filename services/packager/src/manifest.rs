//! Scanning of the collection / deployment / resource tree.
//!
//! The media root holds one directory per collection, each collection one
//! directory per deployment, and each deployment the media files themselves:
//!
//! ```text
//! media_root/
//! ├── siteA/                 collection
//! │   ├── cam01-north/       deployment (locationID = "north")
//! │   │   ├── IMG_0001.JPG   resource
//! │   │   └── VID_0002.MP4
//! │   └── cam02-south/
//! └── siteB/
//! ```
//!
//! Directory listings are sorted by name so that the manifest and the archive
//! order do not depend on the platform.

use crate::timezone::{localize, TimezoneError};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(
        "There is nothing to package. Better check your \"Media root\" path \
         and selected image and video extensions."
    )]
    NothingToPackage,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Timezone(#[from] TimezoneError),
}

impl ManifestError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where a capture timestamp was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// The EXIF `DateTimeOriginal` tag
    Exif,
    /// The file's last modification time
    Modified,
}

/// One media file
#[derive(Debug, Clone)]
pub struct Resource {
    /// File name without extension
    pub name: String,
    /// File name with extension
    pub file: String,
    /// Capture time, expressed in the collection's zone
    pub recorded_at: DateTime<Tz>,
    pub source: CaptureSource,
}

/// One camera placement
#[derive(Debug, Clone)]
pub struct Deployment {
    pub deployment_id: String,
    pub resources: Vec<Resource>,
}

impl Deployment {
    /// Part of the deployment ID after the first `-`, or empty
    pub fn location_id(&self) -> &str {
        self.deployment_id
            .split_once('-')
            .map(|(_, location)| location)
            .unwrap_or_default()
    }
}

/// One top-level collection
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub project_name: String,
    pub timezone: Tz,
    pub timezone_ignore_dst: bool,
    pub deployments: Vec<Deployment>,
}

impl Collection {
    /// Directory of the collection relative to the media root
    pub fn resources_dir(&self) -> &str {
        &self.name
    }
}

/// Hierarchical description of everything being packaged
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub collections: Vec<Collection>,
}

impl Manifest {
    pub fn resource_count(&self) -> usize {
        self.collections
            .iter()
            .flat_map(|c| &c.deployments)
            .map(|d| d.resources.len())
            .sum()
    }
}

/// Inputs of a scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub media_root: PathBuf,
    pub collections: Vec<String>,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    pub project_name: String,
    pub zone: Tz,
    pub ignore_dst: bool,
}

impl ScanOptions {
    fn is_image(&self, ext: &str) -> bool {
        self.image_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    fn is_video(&self, ext: &str) -> bool {
        self.video_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Manifest plus the absolute paths of its resources, in manifest order
#[derive(Debug, Clone)]
pub struct ManifestScan {
    pub manifest: Manifest,
    pub files: Vec<PathBuf>,
}

/// Walk the media tree and describe every recognised media file.
///
/// Fails with [`ManifestError::NothingToPackage`] once the whole walk is done
/// if no file matched the extension filters.
#[instrument(skip(options), fields(media_root = %options.media_root.display()))]
pub fn build_manifest(options: &ScanOptions) -> Result<ManifestScan, ManifestError> {
    let mut manifest = Manifest::default();
    let mut files = Vec::new();

    for name in &options.collections {
        let collection_dir = options.media_root.join(name);
        let mut collection = Collection {
            name: name.clone(),
            project_name: options.project_name.clone(),
            timezone: options.zone,
            timezone_ignore_dst: options.ignore_dst,
            deployments: Vec::new(),
        };

        for deployment_dir in sorted_entries(&collection_dir, |p| p.is_dir())? {
            let mut deployment = Deployment {
                deployment_id: file_name(&deployment_dir),
                resources: Vec::new(),
            };

            for path in sorted_entries(&deployment_dir, |p| p.is_file())? {
                let Some(ext) = dotted_extension(&path) else {
                    continue;
                };
                let is_image = options.is_image(&ext);
                if !is_image && !options.is_video(&ext) {
                    trace!(path = %path.display(), "Skipping unrecognised file");
                    continue;
                }

                deployment
                    .resources
                    .push(describe_resource(&path, is_image, options)?);
                files.push(path);
            }

            debug!(
                collection = %collection.name,
                deployment = %deployment.deployment_id,
                resources = deployment.resources.len(),
                "Deployment scanned"
            );
            collection.deployments.push(deployment);
        }

        manifest.collections.push(collection);
    }

    if files.is_empty() {
        return Err(ManifestError::NothingToPackage);
    }

    info!(
        collections = manifest.collections.len(),
        resources = files.len(),
        "Manifest built"
    );

    Ok(ManifestScan { manifest, files })
}

fn describe_resource(
    path: &Path,
    is_image: bool,
    options: &ScanOptions,
) -> Result<Resource, ManifestError> {
    let (naive, source) = capture_time(path, is_image)?;
    let recorded_at = localize(naive, options.zone, options.ignore_dst)?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Resource {
        name,
        file: file_name(path),
        recorded_at,
        source,
    })
}

/// Naive local capture time of a media file.
///
/// Images are first asked for their EXIF `DateTimeOriginal`; anything else, or
/// an image without a readable tag, falls back to the modification time.
pub fn capture_time(path: &Path, is_image: bool) -> Result<(NaiveDateTime, CaptureSource), ManifestError> {
    if is_image {
        if let Some(taken) = read_exif_capture_time(path) {
            return Ok((taken, CaptureSource::Exif));
        }
    }

    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| ManifestError::io(path, e))?;

    Ok((
        DateTime::<Local>::from(modified).naive_local(),
        CaptureSource::Modified,
    ))
}

fn read_exif_capture_time(path: &Path) -> Option<NaiveDateTime> {
    let file = fs::File::open(path).ok()?;
    let mut reader = BufReader::new(file);

    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            trace!(path = %path.display(), error = %e, "No EXIF data");
            return None;
        }
    };

    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let exif::Value::Ascii(ref values) = field.value else {
        return None;
    };
    let taken = exif::DateTime::from_ascii(values.first()?).ok()?;

    NaiveDate::from_ymd_opt(taken.year.into(), taken.month.into(), taken.day.into())?.and_hms_opt(
        taken.hour.into(),
        taken.minute.into(),
        taken.second.into(),
    )
}

/// Immediate children of `dir` accepted by `keep`, sorted by name
pub(crate) fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, ManifestError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| ManifestError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ManifestError::io(dir, e))?;

    entries.retain(|p| keep(p));
    entries.sort();
    Ok(entries)
}

/// Lower-cased extension with its leading dot, e.g. ".jpg"
fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
