//! Everything the resource needs from the BOSH director.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod cli;
pub mod lock;

pub use cli::BoshCli;
pub use lock::DeployLock;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Could not deploy: {0}")]
    Deploy(String),

    #[error("Could not delete deployment: {0}")]
    Delete(String),

    #[error("Could not clean up: {0}")]
    CleanUp(String),

    #[error("Could not interpolate: {0}")]
    Interpolate(String),

    #[error("Could not get deployment manifest: {0}")]
    DownloadManifest(String),

    #[error("Deployment {0} does not exist")]
    DeploymentNotFound(String),

    #[error("Could not upload release {path}: {reason}")]
    UploadRelease { path: String, reason: String },

    #[error("Could not upload stemcell {path}: {reason}")]
    UploadStemcell { path: String, reason: String },

    #[error("Could not fetch director info: {0}")]
    Info(String),

    #[error("Could not check if deployment was locked: {0}")]
    Locks(String),

    #[error("could not export releases: {0}")]
    ExportReleases(String),

    #[error("could not export release {name}: {reason}")]
    ExportRelease { name: String, reason: String },
}

/// Options for a single `deploy` call. Built fresh for every deploy.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeployParams {
    pub no_redact: bool,
    pub dry_run: bool,
    pub recreate: bool,
    pub fix: bool,
    pub max_in_flight: Option<u32>,
    pub skip_drain: Vec<String>,
    pub vars: BTreeMap<String, Value>,
    pub vars_files: Vec<PathBuf>,
    pub var_files: BTreeMap<String, PathBuf>,
    pub ops_files: Vec<PathBuf>,
    pub vars_store: Option<PathBuf>,
    pub cleanup: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct InterpolateParams {
    pub vars: BTreeMap<String, Value>,
    pub vars_files: Vec<PathBuf>,
    pub ops_files: Vec<PathBuf>,
}

/// A release to export from the deployment, compiled against its stemcell.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseSpec {
    pub name: String,
    pub jobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    /// Infrastructure identifier, e.g. `google_cpi`.
    pub cpi: String,
}

/// A director lock, held on one or more resources.
#[derive(Debug, Clone, PartialEq)]
pub struct Lock {
    pub resource_names: Vec<String>,
}

#[async_trait]
pub trait Director: Send + Sync {
    async fn delete(&self, force: bool) -> Result<(), Error>;

    async fn deploy(&self, manifest: &[u8], params: &DeployParams) -> Result<(), Error>;

    async fn clean_up(&self) -> Result<(), Error>;

    async fn interpolate(&self, manifest: &[u8], params: &InterpolateParams) -> Result<Vec<u8>, Error>;

    /// Manifest of the deployment as currently known to the director.
    async fn download_manifest(&self) -> Result<Vec<u8>, Error>;

    async fn export_releases(&self, target_dir: &Path, releases: &[ReleaseSpec]) -> Result<(), Error>;

    async fn upload_release(&self, path: &Path) -> Result<(), Error>;

    async fn upload_stemcell(&self, path: &Path) -> Result<(), Error>;

    async fn upload_remote_stemcell(
        &self,
        url: &str,
        name: &str,
        version: &str,
        sha1: &str,
    ) -> Result<(), Error>;

    async fn info(&self) -> Result<Info, Error>;

    async fn locks(&self) -> Result<Vec<Lock>, Error>;
}
