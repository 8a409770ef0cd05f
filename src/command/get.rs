use crate::concourse::{InRequest, InResponse};
use crate::director::{self, Director, ReleaseSpec};
use crate::version::Version;
use log::{debug, info};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Director(#[from] director::Error),

    #[error("Requested deployment director is different than configured source")]
    TargetMismatch,

    #[error("Requested deployment version is not available")]
    VersionUnavailable,

    #[error("write {path}: {err}")]
    Write { path: String, err: std::io::Error },
}

/// Fetch the requested version of the deployment into `target_dir`.
///
/// Writes `manifest.yml` and `target`, plus any requested compiled releases.
pub async fn run(director: &dyn Director, request: &InRequest, target_dir: &Path) -> Result<InResponse, Error> {
    if request.source.target.is_empty() {
        debug!("no target configured, echoing the requested version");
        return Ok(InResponse {
            version: request.version.clone(),
        });
    }

    let manifest = match director.download_manifest().await {
        Ok(manifest) => manifest,
        // Expected right after the deployment was deleted by a put.
        Err(director::Error::DeploymentNotFound(deployment)) => {
            info!("Deployment {deployment} does not exist, nothing to fetch");
            return Ok(InResponse::default());
        }
        Err(err) => return Err(err.into()),
    };

    let current = Version::new(&manifest, &request.source.target);
    if current.target != request.version.target {
        return Err(Error::TargetMismatch);
    }
    if current.manifest_sha1 != request.version.manifest_sha1 {
        return Err(Error::VersionUnavailable);
    }

    let compiled_releases = &request.params.compiled_releases;
    if !compiled_releases.is_empty() {
        let releases: Vec<ReleaseSpec> = compiled_releases
            .iter()
            .map(|release| ReleaseSpec {
                name: release.name.clone(),
                jobs: release.jobs.clone(),
            })
            .collect();
        info!("Exporting {} compiled release(s)", releases.len());
        director.export_releases(target_dir, &releases).await?;
    }

    write(&target_dir.join("manifest.yml"), &manifest)?;
    write(&target_dir.join("target"), current.target.as_bytes())?;

    Ok(InResponse { version: current })
}

fn write(path: &Path, contents: &[u8]) -> Result<(), Error> {
    std::fs::write(path, contents).map_err(|err| Error::Write {
        path: path.display().to_string(),
        err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concourse::{CompiledRelease, InParams};
    use crate::fakes::{Call, FakeDirector};
    use crate::source::Source;

    const MANIFEST: &[u8] = b"name: concourse\nreleases: []\n";

    fn request() -> InRequest {
        InRequest {
            source: Source {
                deployment: "concourse".into(),
                target: "director.example.com".into(),
                ..Default::default()
            },
            version: Version::new(MANIFEST, "director.example.com"),
            params: InParams::default(),
        }
    }

    #[tokio::test]
    async fn writes_manifest_and_target() {
        let dir = tempfile::tempdir().unwrap();
        let director = FakeDirector::default().with_manifest(MANIFEST);

        let response = run(&director, &request(), dir.path()).await.unwrap();

        assert_eq!(response.version, Version::new(MANIFEST, "director.example.com"));
        assert_eq!(std::fs::read(dir.path().join("manifest.yml")).unwrap(), MANIFEST);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("target")).unwrap(),
            "director.example.com"
        );
        assert_eq!(director.calls(), vec![Call::DownloadManifest]);
    }

    #[tokio::test]
    async fn exports_compiled_releases() {
        let dir = tempfile::tempdir().unwrap();
        let director = FakeDirector::default().with_manifest(MANIFEST);
        let mut request = request();
        request.params.compiled_releases = vec![CompiledRelease {
            name: "cf-mysql".into(),
            jobs: vec!["mysql".into()],
        }];

        run(&director, &request, dir.path()).await.unwrap();

        assert_eq!(
            director.calls(),
            vec![
                Call::DownloadManifest,
                Call::ExportReleases {
                    target_dir: dir.path().to_path_buf(),
                    releases: vec![ReleaseSpec {
                        name: "cf-mysql".into(),
                        jobs: vec!["mysql".into()],
                    }],
                },
            ]
        );
    }

    #[tokio::test]
    async fn deleted_deployment_is_an_empty_version() {
        let dir = tempfile::tempdir().unwrap();
        let director = FakeDirector::default().failing(
            "download_manifest",
            director::Error::DeploymentNotFound("concourse".into()),
        );

        let response = run(&director, &request(), dir.path()).await.unwrap();

        assert_eq!(response, InResponse::default());
        assert!(!dir.path().join("manifest.yml").exists());
    }

    #[tokio::test]
    async fn other_director_failures_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let director = FakeDirector::default().failing(
            "download_manifest",
            director::Error::DownloadManifest("connection refused".into()),
        );

        let err = run(&director, &request(), dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "Could not get deployment manifest: connection refused");
    }

    #[tokio::test]
    async fn version_must_still_be_deployed() {
        let dir = tempfile::tempdir().unwrap();
        let director = FakeDirector::default().with_manifest(b"name: concourse\nreleases: [changed]\n");

        let err = run(&director, &request(), dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "Requested deployment version is not available");
    }

    #[tokio::test]
    async fn version_must_come_from_the_configured_director() {
        let dir = tempfile::tempdir().unwrap();
        let director = FakeDirector::default().with_manifest(MANIFEST);
        let mut request = request();
        request.version.target = "other-director.example.com".into();

        let err = run(&director, &request, dir.path()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Requested deployment director is different than configured source"
        );
    }

    #[tokio::test]
    async fn missing_target_echoes_requested_version() {
        let dir = tempfile::tempdir().unwrap();
        let director = FakeDirector::default().with_manifest(MANIFEST);
        let mut request = request();
        request.source.target = String::new();

        let response = run(&director, &request, dir.path()).await.unwrap();

        assert_eq!(response.version, request.version);
        assert!(director.calls().is_empty());
    }
}
