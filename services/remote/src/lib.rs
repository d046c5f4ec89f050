//! Trapper Remote API
//!
//! Thin client for the parts of the Trapper server API that the packaging and
//! upload tools consume:
//!
//! - login check for the configured account
//! - research project lookup by acronym, filtered by the caller's roles
//! - deployment export for a research project (validation of local deployments)
//! - collection processing trigger once a package has been uploaded
//!
//! Orchestrators depend on the [`TrapperApi`] trait rather than on the HTTP
//! client directly.
//!
//! [`ProgressSender`], the non-blocking progress channel used by both tools,
//! lives here as well.

pub mod client;
pub mod config;
pub mod progress;

pub use client::{
    AuthStatus, ProcessRequest, ProcessResponse, RemoteDeployment, RemoteError,
    RemoteProject, TrapperApi, TrapperClient, DEFAULT_PROJECT_ROLES,
};
pub use config::RemoteConfig;
pub use progress::ProgressSender;
