//! Deploy (or delete) the deployment.

use crate::artifact;
use crate::boshio::{self, StemcellCatalog};
use crate::concourse::{self, Metadata, OutParams, OutRequest, OutResponse, StemcellType};
use crate::director::{self, lock, DeployLock, DeployParams, Director, InterpolateParams};
use crate::globs;
use crate::manifest::{self, DeploymentManifest};
use crate::storage::StorageClient;
use crate::vars_store;
use crate::version::Version;
use log::info;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lock(#[from] lock::Error),

    #[error(transparent)]
    Director(#[from] director::Error),

    #[error("Could not read manifest {path}: {err}")]
    ReadManifest { path: String, err: std::io::Error },

    #[error("Invalid vars_file name: {0}")]
    VarsFile(#[source] globs::Error),

    #[error("Invalid ops_file name: {0}")]
    OpsFile(#[source] globs::Error),

    #[error(transparent)]
    Request(#[from] concourse::Error),

    #[error(transparent)]
    Manifest(#[from] manifest::Error),

    #[error(transparent)]
    Artifact(#[from] artifact::Error),

    #[error(transparent)]
    Catalog(#[from] boshio::Error),

    #[error(transparent)]
    VarsStore(#[from] vars_store::Error),
}

/// Everything a put talks to besides the local sources directory.
pub struct Put<'a> {
    pub director: &'a dyn Director,
    pub storage: Option<&'a dyn StorageClient>,
    pub catalog: &'a dyn StemcellCatalog,
    pub lock: DeployLock,
    pub sources_dir: &'a Path,
}

impl Put<'_> {
    /// Wait for the deployment lock, then delete or deploy.
    ///
    /// Lock progress is written to `progress`.
    pub async fn run(&self, request: &OutRequest, progress: &mut (dyn Write + Send)) -> Result<OutResponse, Error> {
        self.lock
            .wait(self.director, &request.source.deployment, progress)
            .await?;

        let delete = &request.params.delete;
        if delete.enabled {
            info!("Deleting deployment {}", request.source.deployment);
            self.director.delete(delete.force).await?;
            return Ok(OutResponse::default());
        }

        self.deploy(request).await
    }

    async fn deploy(&self, request: &OutRequest) -> Result<OutResponse, Error> {
        let params = &request.params;

        let manifest_path = self.sources_dir.join(&params.manifest);
        let template = std::fs::read(&manifest_path).map_err(|err| Error::ReadManifest {
            path: manifest_path.display().to_string(),
            err,
        })?;

        let vars_files = globs::unfurl(self.sources_dir, &params.vars_files).map_err(Error::VarsFile)?;
        let ops_files = globs::unfurl(self.sources_dir, &params.ops_files).map_err(Error::OpsFile)?;

        let interpolated = self
            .director
            .interpolate(
                &template,
                &InterpolateParams {
                    vars: params.vars.clone(),
                    vars_files: vars_files.clone(),
                    ops_files,
                },
            )
            .await?;
        let mut manifest = DeploymentManifest::parse(&interpolated)?;

        let mut metadata = self.consume_releases(&mut manifest, &params.releases).await?;
        metadata.extend(self.consume_stemcells(&mut manifest, &params.stemcells).await?);
        if let Some(stemcell_type) = params.stemcell_type()? {
            metadata.extend(self.upload_published_stemcells(&manifest, stemcell_type).await?);
        }

        let deploy_params = DeployParams {
            vars_files,
            var_files: self.var_files(&params.var_files),
            ..deploy_flags(params)
        };
        let manifest = manifest.to_bytes()?;

        let director = self.director;
        vars_store::with_store(self.storage, |vars_store| async move {
            let deploy_params = DeployParams {
                vars_store,
                ..deploy_params
            };
            info!("Deploying {}", request.source.deployment);
            director.deploy(&manifest, &deploy_params).await?;
            if deploy_params.cleanup {
                info!("Cleaning up unused director resources");
                director.clean_up().await?;
            }
            Ok::<(), Error>(())
        })
        .await?;

        let deployed = self.director.download_manifest().await?;
        Ok(OutResponse {
            version: Version::new(&deployed, &request.source.target),
            metadata,
        })
    }

    async fn consume_releases(
        &self,
        manifest: &mut DeploymentManifest,
        patterns: &[String],
    ) -> Result<Vec<Metadata>, Error> {
        let mut metadata = vec![];
        for release in artifact::releases(self.sources_dir, patterns)? {
            info!("Uploading release {release}");
            self.director.upload_release(&release.file_path).await?;
            manifest.use_release_version(&release.name, &release.version)?;
            metadata.push(Metadata::new("release", &release));
        }
        Ok(metadata)
    }

    async fn consume_stemcells(
        &self,
        manifest: &mut DeploymentManifest,
        patterns: &[String],
    ) -> Result<Vec<Metadata>, Error> {
        let mut metadata = vec![];
        for stemcell in artifact::stemcells(self.sources_dir, patterns)? {
            info!("Uploading stemcell {stemcell}");
            self.director.upload_stemcell(&stemcell.file_path).await?;
            manifest.use_stemcell_version(&stemcell.name, &stemcell.operating_system, &stemcell.version)?;
            metadata.push(Metadata::new("stemcell", &stemcell));
        }
        Ok(metadata)
    }

    /// Have the director fetch every stemcell the manifest names straight from bosh.io.
    async fn upload_published_stemcells(
        &self,
        manifest: &DeploymentManifest,
        stemcell_type: StemcellType,
    ) -> Result<Vec<Metadata>, Error> {
        let cpi = self.director.info().await?.cpi;
        let light = stemcell_type == StemcellType::Light;

        let mut metadata = vec![];
        for entry in manifest.stemcells()? {
            let stemcell = self
                .catalog
                .lookup_stemcell(&cpi, &entry.os, &entry.version, light)
                .await?;
            info!("Uploading stemcell {} v{} from {}", stemcell.name, stemcell.version, stemcell.url);
            self.director
                .upload_remote_stemcell(&stemcell.url, &stemcell.name, &stemcell.version, &stemcell.sha1)
                .await?;
            metadata.push(Metadata::new(
                "stemcell",
                format!("{} v{}", stemcell.name, stemcell.version),
            ));
        }
        Ok(metadata)
    }

    fn var_files(&self, var_files: &BTreeMap<String, String>) -> BTreeMap<String, PathBuf> {
        var_files
            .iter()
            .map(|(name, path)| (name.clone(), self.sources_dir.join(path)))
            .collect()
    }
}

// Ops files were already applied by the interpolation and must not be applied twice.
fn deploy_flags(params: &OutParams) -> DeployParams {
    DeployParams {
        no_redact: params.no_redact,
        dry_run: params.dry_run,
        recreate: params.recreate,
        fix: params.fix,
        max_in_flight: params.max_in_flight,
        skip_drain: params.skip_drain.clone(),
        vars: params.vars.clone(),
        cleanup: params.cleanup,
        ..Default::default()
    }
}
