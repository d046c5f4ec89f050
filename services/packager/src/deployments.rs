//! Deployment metadata template and validation against the Trapper project.

use crate::manifest::{file_name, sorted_entries, Manifest, ManifestError};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// File name of the deployments template in the output directory
pub const TEMPLATE_FILE_NAME: &str = "deployments_metadata.csv";

/// File name of the validation report in the output directory
pub const MISSING_DEPLOYMENTS_FILE_NAME: &str = "missing_deployments.csv";

const TEMPLATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Error. The collection {0} does not contain any deployments.")]
    EmptyCollection(String),

    #[error(
        "Some of your deployments are not recognized by Trapper. \
         Please, check the logfile below and try again.\n{}",
        .path.display()
    )]
    MissingDeployments { path: PathBuf, count: usize },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// One row of the deployments template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRow {
    #[serde(rename = "deploymentID")]
    pub deployment_id: String,
    #[serde(rename = "locationID")]
    pub location_id: String,
    pub start: String,
    pub end: String,
}

/// A local deployment the Trapper project does not know
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDeployment {
    pub collection: String,
    #[serde(rename = "deploymentID")]
    pub deployment_id: String,
}

/// One row per deployment holding at least one resource, spanning its capture times
pub fn deployments_template(manifest: &Manifest) -> Vec<DeploymentRow> {
    manifest
        .collections
        .iter()
        .flat_map(|c| &c.deployments)
        .filter_map(|deployment| {
            let times = deployment.resources.iter().map(|r| r.recorded_at);
            let start = times.clone().min()?;
            let end = times.max()?;

            Some(DeploymentRow {
                deployment_id: deployment.deployment_id.clone(),
                location_id: deployment.location_id().to_string(),
                start: start.format(TEMPLATE_TIME_FORMAT).to_string(),
                end: end.format(TEMPLATE_TIME_FORMAT).to_string(),
            })
        })
        .collect()
}

/// Write the template as comma-separated values with a header row
#[instrument(skip(rows), fields(rows = rows.len()))]
pub fn write_template(path: &Path, rows: &[DeploymentRow]) -> Result<(), TemplateError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), "Deployments template written");
    Ok(())
}

/// Check that every local deployment directory is known to the Trapper project.
///
/// Unknown deployments are listed in [`MISSING_DEPLOYMENTS_FILE_NAME`] under
/// `output_dir` and reported as [`TemplateError::MissingDeployments`].
#[instrument(skip(collections, remote_ids))]
pub fn validate_deployments(
    media_root: &Path,
    collections: &[String],
    remote_ids: &[String],
    output_dir: &Path,
) -> Result<(), TemplateError> {
    let known: HashSet<&str> = remote_ids.iter().map(String::as_str).collect();
    let mut missing = Vec::new();

    for collection in collections {
        let deployments = sorted_entries(&media_root.join(collection), |p| p.is_dir())?;
        if deployments.is_empty() {
            return Err(TemplateError::EmptyCollection(collection.clone()));
        }

        missing.extend(
            deployments
                .iter()
                .map(|dir| file_name(dir))
                .filter(|id| !known.contains(id.as_str()))
                .map(|deployment_id| MissingDeployment {
                    collection: collection.clone(),
                    deployment_id,
                }),
        );
    }

    if missing.is_empty() {
        info!("All local deployments are known to Trapper");
        return Ok(());
    }

    let path = output_dir.join(MISSING_DEPLOYMENTS_FILE_NAME);
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(&path)?;
    for row in &missing {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|source| TemplateError::Io {
        path: path.clone(),
        source,
    })?;

    warn!(count = missing.len(), report = %path.display(), "Unknown deployments found");
    Err(TemplateError::MissingDeployments {
        path,
        count: missing.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{build_manifest, ScanOptions};
    use crate::testing::{jpeg_with_capture_time, write_file};
    use std::fs;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_template_rows() {
        let media = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_file(
            &media.path().join("siteA/cam01-north/IMG_0002.jpg"),
            &jpeg_with_capture_time("2023:06:01 09:30:00"),
        );
        write_file(
            &media.path().join("siteA/cam01-north/IMG_0001.jpg"),
            &jpeg_with_capture_time("2023:06:01 08:00:00"),
        );
        fs::create_dir_all(media.path().join("siteA/cam02-empty")).unwrap();

        let scan = build_manifest(&ScanOptions {
            media_root: media.path().to_path_buf(),
            collections: ids(&["siteA"]),
            image_extensions: ids(&[".jpg"]),
            video_extensions: vec![],
            project_name: "WOLF".to_string(),
            zone: chrono_tz::Europe::Warsaw,
            ignore_dst: false,
        })
        .unwrap();

        let rows = deployments_template(&scan.manifest);
        assert_eq!(
            rows,
            vec![DeploymentRow {
                deployment_id: "cam01-north".to_string(),
                location_id: "north".to_string(),
                start: "2023-06-01T08:00:00+0200".to_string(),
                end: "2023-06-01T09:30:00+0200".to_string(),
            }]
        );

        let path = out.path().join(TEMPLATE_FILE_NAME);
        write_template(&path, &rows).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "deploymentID,locationID,start,end\n\
             cam01-north,north,2023-06-01T08:00:00+0200,2023-06-01T09:30:00+0200\n"
        );
    }

    #[test]
    fn test_validation_passes() {
        let media = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(media.path().join("siteA/cam01-north")).unwrap();

        validate_deployments(
            media.path(),
            &ids(&["siteA"]),
            &ids(&["cam01-north", "cam09"]),
            out.path(),
        )
        .unwrap();
        assert!(!out.path().join(MISSING_DEPLOYMENTS_FILE_NAME).exists());
    }

    #[test]
    fn test_unknown_deployments_reported() {
        let media = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(media.path().join("siteA/cam01-north")).unwrap();
        fs::create_dir_all(media.path().join("siteA/cam02-south")).unwrap();
        fs::create_dir_all(media.path().join("siteB/cam03")).unwrap();

        let result = validate_deployments(
            media.path(),
            &ids(&["siteA", "siteB"]),
            &ids(&["cam01-north"]),
            out.path(),
        );

        let report = out.path().join(MISSING_DEPLOYMENTS_FILE_NAME);
        assert!(matches!(
            result,
            Err(TemplateError::MissingDeployments { ref path, count: 2 }) if *path == report
        ));
        assert_eq!(
            fs::read_to_string(&report).unwrap(),
            "collection\tdeploymentID\nsiteA\tcam02-south\nsiteB\tcam03\n"
        );
    }

    #[test]
    fn test_collection_without_deployments() {
        let media = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_file(&media.path().join("siteA/stray.jpg"), b"x");

        let result = validate_deployments(media.path(), &ids(&["siteA"]), &[], out.path());
        assert!(matches!(result, Err(TemplateError::EmptyCollection(c)) if c == "siteA"));
    }
}
