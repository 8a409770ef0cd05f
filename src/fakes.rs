//! In-memory collaborators for tests. All of them can share one call log so
//! the order of calls across collaborators can be asserted.

use crate::boshio::{self, BoshIoStemcell, StemcellCatalog};
use crate::director::{DeployParams, Director, Error, Info, InterpolateParams, Lock, ReleaseSpec};
use crate::storage::{self, StorageClient};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Delete { force: bool },
    Deploy { manifest: String, params: DeployParams },
    CleanUp,
    Interpolate { manifest: String, params: InterpolateParams },
    DownloadManifest,
    ExportReleases { target_dir: PathBuf, releases: Vec<ReleaseSpec> },
    UploadRelease(PathBuf),
    UploadStemcell(PathBuf),
    UploadRemoteStemcell { url: String, name: String, version: String, sha1: String },
    Info,
    Locks,
    StoreDownload(PathBuf),
    StoreUpload { path: PathBuf, contents: String },
    LookupStemcell { cpi: String, os: String, version: String, light: bool },
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn record(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug, Default)]
pub struct FakeDirector {
    log: CallLog,
    manifest: Vec<u8>,
    interpolated: Option<Vec<u8>>,
    locks: Mutex<VecDeque<Vec<Lock>>>,
    cpi: String,
    vars_store_update: Option<String>,
    failures: HashMap<&'static str, Error>,
}

impl FakeDirector {
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Manifest the director reports for the deployment.
    pub fn with_manifest(mut self, manifest: &[u8]) -> Self {
        self.manifest = manifest.to_vec();
        self
    }

    /// Result of every interpolation. Without it the input manifest is echoed back.
    pub fn with_interpolated(mut self, manifest: &[u8]) -> Self {
        self.interpolated = Some(manifest.to_vec());
        self
    }

    /// Answers for consecutive lock polls. Once used up, nothing is locked.
    pub fn with_locks(self, polls: Vec<Vec<Lock>>) -> Self {
        *self.locks.lock().unwrap() = polls.into();
        self
    }

    pub fn with_cpi(mut self, cpi: &str) -> Self {
        self.cpi = cpi.to_string();
        self
    }

    /// Text a deploy appends to the vars store it was given.
    pub fn with_vars_store_update(mut self, update: &str) -> Self {
        self.vars_store_update = Some(update.to_string());
        self
    }

    /// Make `method` fail with `err`.
    pub fn failing(mut self, method: &'static str, err: Error) -> Self {
        self.failures.insert(method, err);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.calls()
    }

    fn outcome(&self, method: &str) -> Result<(), Error> {
        match self.failures.get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Director for FakeDirector {
    async fn delete(&self, force: bool) -> Result<(), Error> {
        self.log.record(Call::Delete { force });
        self.outcome("delete")
    }

    async fn deploy(&self, manifest: &[u8], params: &DeployParams) -> Result<(), Error> {
        self.log.record(Call::Deploy {
            manifest: String::from_utf8_lossy(manifest).into_owned(),
            params: params.clone(),
        });
        self.outcome("deploy")?;

        if let (Some(update), Some(path)) = (&self.vars_store_update, &params.vars_store) {
            let mut store = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            store.write_all(update.as_bytes()).unwrap();
        }
        Ok(())
    }

    async fn clean_up(&self) -> Result<(), Error> {
        self.log.record(Call::CleanUp);
        self.outcome("clean_up")
    }

    async fn interpolate(&self, manifest: &[u8], params: &InterpolateParams) -> Result<Vec<u8>, Error> {
        self.log.record(Call::Interpolate {
            manifest: String::from_utf8_lossy(manifest).into_owned(),
            params: params.clone(),
        });
        self.outcome("interpolate")?;
        Ok(self.interpolated.clone().unwrap_or_else(|| manifest.to_vec()))
    }

    async fn download_manifest(&self) -> Result<Vec<u8>, Error> {
        self.log.record(Call::DownloadManifest);
        self.outcome("download_manifest")?;
        Ok(self.manifest.clone())
    }

    async fn export_releases(&self, target_dir: &Path, releases: &[ReleaseSpec]) -> Result<(), Error> {
        self.log.record(Call::ExportReleases {
            target_dir: target_dir.to_path_buf(),
            releases: releases.to_vec(),
        });
        self.outcome("export_releases")
    }

    async fn upload_release(&self, path: &Path) -> Result<(), Error> {
        self.log.record(Call::UploadRelease(path.to_path_buf()));
        self.outcome("upload_release")
    }

    async fn upload_stemcell(&self, path: &Path) -> Result<(), Error> {
        self.log.record(Call::UploadStemcell(path.to_path_buf()));
        self.outcome("upload_stemcell")
    }

    async fn upload_remote_stemcell(
        &self,
        url: &str,
        name: &str,
        version: &str,
        sha1: &str,
    ) -> Result<(), Error> {
        self.log.record(Call::UploadRemoteStemcell {
            url: url.into(),
            name: name.into(),
            version: version.into(),
            sha1: sha1.into(),
        });
        self.outcome("upload_remote_stemcell")
    }

    async fn info(&self) -> Result<Info, Error> {
        self.log.record(Call::Info);
        self.outcome("info")?;
        Ok(Info { cpi: self.cpi.clone() })
    }

    async fn locks(&self) -> Result<Vec<Lock>, Error> {
        self.log.record(Call::Locks);
        self.outcome("locks")?;
        Ok(self.locks.lock().unwrap().pop_front().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct FakeStorage {
    log: CallLog,
    contents: String,
    fail_download: bool,
    fail_upload: bool,
}

impl FakeStorage {
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Remote store contents handed out on download.
    pub fn with_contents(mut self, contents: &str) -> Self {
        self.contents = contents.to_string();
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.fail_download = true;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn download(&self, path: &Path) -> Result<(), storage::Error> {
        self.log.record(Call::StoreDownload(path.to_path_buf()));
        if self.fail_download {
            return Err(storage::Error::Read {
                object: "vars.yml".into(),
                bucket: "fake-bucket".into(),
                reason: "403 Forbidden".into(),
            });
        }
        std::fs::write(path, &self.contents).unwrap();
        Ok(())
    }

    async fn upload(&self, path: &Path) -> Result<(), storage::Error> {
        self.log.record(Call::StoreUpload {
            path: path.to_path_buf(),
            contents: std::fs::read_to_string(path).unwrap(),
        });
        if self.fail_upload {
            return Err(storage::Error::Write {
                object: "vars.yml".into(),
                bucket: "fake-bucket".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeCatalog {
    log: CallLog,
    stemcells: Vec<BoshIoStemcell>,
}

impl FakeCatalog {
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_stemcell(mut self, stemcell: BoshIoStemcell) -> Self {
        self.stemcells.push(stemcell);
        self
    }
}

#[async_trait]
impl StemcellCatalog for FakeCatalog {
    async fn lookup_stemcell(
        &self,
        cpi: &str,
        os: &str,
        version: &str,
        light: bool,
    ) -> Result<BoshIoStemcell, boshio::Error> {
        self.log.record(Call::LookupStemcell {
            cpi: cpi.into(),
            os: os.into(),
            version: version.into(),
            light,
        });
        if version == "latest" {
            return Err(boshio::Error::LatestUnsupported);
        }
        self.stemcells
            .iter()
            .find(|stemcell| stemcell.version == version)
            .cloned()
            .ok_or_else(|| boshio::Error::VersionNotFound(version.to_string()))
    }
}
