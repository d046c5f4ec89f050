//! HTTP client for the Trapper server API.

use crate::config::RemoteConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const LOGIN_PATH: &str = "/accounts/api/users/login/";
const DEPLOYMENTS_PATH: &str = "/geomap/api/deployments/export/";
const PROJECTS_PATH: &str = "/research/api/projects";
const PROCESS_COLLECTION_PATH: &str = "/storage/api/collection/process/";

/// Page size requested from the project listing endpoint
const PROJECTS_PAGE_SIZE: u32 = 100;

/// Roles that allow uploading collections to a project
pub const DEFAULT_PROJECT_ROLES: &[&str] = &["Admin", "Collaborator"];

/// Fallback diagnostic when a processing response carries no readable message
const NO_RESPONSE_MESSAGE: &str = "TRAPPER API did not respond.";

/// Errors returned by the remote API client
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request to Trapper failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Trapper responded to {endpoint} with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid deployments export: {0}")]
    Csv(#[from] csv::Error),

    #[error("Deployments export has no '{0}' column")]
    MissingColumn(String),

    #[error("You are not logged in to Trapper")]
    NotAuthenticated,
}

/// Result of a login check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    /// Error code reported by the server ("0" on success)
    pub code: String,
    /// Username reported by the server on success
    pub username: Option<String>,
}

impl AuthStatus {
    pub fn is_success(&self) -> bool {
        self.code == "0"
    }
}

/// A research project visible to the authenticated account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProject {
    pub id: u64,
    pub acronym: String,
}

/// One row of the deployment export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeployment {
    pub deployment_id: String,
}

/// Request body for the collection processing trigger
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRequest {
    pub yaml_file: String,
    pub zip_file: String,
    pub remove_zip: bool,
}

/// Raw response of the collection processing trigger
#[derive(Debug, Clone)]
pub struct ProcessResponse {
    pub status: u16,
    pub body: String,
}

impl ProcessResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Extract `data.message` and `data.errors` from the response body.
    ///
    /// Falls back to a generic message when the body is not JSON or carries
    /// no message.
    pub fn diagnostic(&self) -> (String, String) {
        let data = serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("data").cloned())
            .unwrap_or(serde_json::Value::Null);

        let message = data
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or(NO_RESPONSE_MESSAGE)
            .to_string();

        let errors = match data.get("errors") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        (message, errors)
    }
}

/// Operations the packaging and upload tools need from the Trapper server
#[async_trait]
pub trait TrapperApi: Send + Sync {
    /// Check the account credentials
    async fn authenticate(&self, login: &str, password: &str) -> Result<AuthStatus, RemoteError>;

    /// List projects matching an acronym on which the account holds one of `roles`
    async fn list_projects(
        &self,
        acronym: &str,
        roles: &[&str],
    ) -> Result<Vec<RemoteProject>, RemoteError>;

    /// List the deployments registered for a research project
    async fn list_remote_deployments(
        &self,
        project_id: u64,
    ) -> Result<Vec<RemoteDeployment>, RemoteError>;

    /// Ask the server to start processing an uploaded package
    async fn notify_collection_process(
        &self,
        request: &ProcessRequest,
    ) -> Result<ProcessResponse, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    error: Option<serde_json::Value>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectPage {
    #[serde(default)]
    results: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    pk: u64,
    acronym: String,
    #[serde(default)]
    project_roles: Vec<ProjectRole>,
}

#[derive(Debug, Deserialize)]
struct ProjectRole {
    username: String,
    #[serde(default)]
    roles: Vec<String>,
}

/// reqwest-backed implementation of [`TrapperApi`]
pub struct TrapperClient {
    http: reqwest::Client,
    config: RemoteConfig,
    username: RwLock<Option<String>>,
}

impl TrapperClient {
    /// Create a new client for the configured server
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(!config.verify_ssl);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| RemoteError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            config,
            username: RwLock::new(None),
        })
    }

    /// Full URL of an API endpoint
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host.trim_end_matches('/'), path)
    }

    /// Username recorded by the last successful login
    pub fn username(&self) -> Option<String> {
        self.username.read().clone()
    }

    fn check_status(endpoint: &str, response: &reqwest::Response) -> Result<(), RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl TrapperApi for TrapperClient {
    #[instrument(skip(self, password))]
    async fn authenticate(&self, login: &str, password: &str) -> Result<AuthStatus, RemoteError> {
        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .form(&[("email", login), ("password", password)])
            .send()
            .await?;

        let body: LoginResponse = response.json().await?;
        let code = match body.error {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let status = AuthStatus {
            code,
            username: body.username,
        };

        *self.username.write() = if status.is_success() {
            status.username.clone()
        } else {
            None
        };

        if status.is_success() {
            info!(host = %self.config.host, "Logged in to Trapper");
        } else {
            warn!(host = %self.config.host, code = %status.code, "Trapper login failed");
        }

        Ok(status)
    }

    #[instrument(skip(self))]
    async fn list_projects(
        &self,
        acronym: &str,
        roles: &[&str],
    ) -> Result<Vec<RemoteProject>, RemoteError> {
        let username = self.username();
        if !roles.is_empty() && username.is_none() {
            return Err(RemoteError::NotAuthenticated);
        }

        let page_size = PROJECTS_PAGE_SIZE.to_string();
        let response = self
            .http
            .get(self.url(PROJECTS_PATH))
            .query(&[("acronym", acronym), ("psize", page_size.as_str())])
            .basic_auth(&self.config.login, Some(&self.config.password))
            .send()
            .await?;
        Self::check_status(PROJECTS_PATH, &response)?;

        let page: ProjectPage = response.json().await?;
        let projects = page
            .results
            .into_iter()
            .filter(|project| {
                roles.is_empty()
                    || project.project_roles.iter().any(|role| {
                        Some(role.username.as_str()) == username.as_deref()
                            && role.roles.iter().any(|r| roles.contains(&r.as_str()))
                    })
            })
            .map(|project| RemoteProject {
                id: project.pk,
                acronym: project.acronym,
            })
            .collect::<Vec<_>>();

        debug!(count = projects.len(), "Projects matched");
        Ok(projects)
    }

    #[instrument(skip(self))]
    async fn list_remote_deployments(
        &self,
        project_id: u64,
    ) -> Result<Vec<RemoteDeployment>, RemoteError> {
        let response = self
            .http
            .get(self.url(DEPLOYMENTS_PATH))
            .query(&[("research_project", project_id)])
            .basic_auth(&self.config.login, Some(&self.config.password))
            .send()
            .await?;
        Self::check_status(DEPLOYMENTS_PATH, &response)?;

        let body = response.bytes().await?;
        let deployments = parse_deployments_export(&body)?;

        debug!(count = deployments.len(), "Remote deployments fetched");
        Ok(deployments)
    }

    #[instrument(skip(self))]
    async fn notify_collection_process(
        &self,
        request: &ProcessRequest,
    ) -> Result<ProcessResponse, RemoteError> {
        let remove_zip = if request.remove_zip { "True" } else { "False" };
        let response = self
            .http
            .post(self.url(PROCESS_COLLECTION_PATH))
            .form(&[
                ("yaml_file", request.yaml_file.as_str()),
                ("zip_file", request.zip_file.as_str()),
                ("remove_zip", remove_zip),
            ])
            .basic_auth(&self.config.login, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        info!(status, "Collection processing requested");
        Ok(ProcessResponse { status, body })
    }
}

/// Parse the CSV deployment export, keeping row order
fn parse_deployments_export(body: &[u8]) -> Result<Vec<RemoteDeployment>, RemoteError> {
    let mut reader = csv::Reader::from_reader(body);
    let column = reader
        .headers()?
        .iter()
        .position(|h| h == "deploymentID")
        .ok_or_else(|| RemoteError::MissingColumn("deploymentID".to_string()))?;

    let mut deployments = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(id) = record.get(column) {
            deployments.push(RemoteDeployment {
                deployment_id: id.to_string(),
            });
        }
    }
    Ok(deployments)
}
