use super::{Error, StorageClient};
use crate::config;
use async_trait::async_trait;
use google_cloud_token::TokenSource;
use log::{debug, info};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/devstorage.full_control"];

/// `vars_store.config` for the `gcs` provider.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GcsConfig {
    pub file_name: String,
    pub bucket: String,
    /// Service account key, as JSON text.
    pub json_key: String,
}

/// One object in a Google Cloud Storage bucket, accessed through the JSON API.
#[derive(Debug)]
pub struct Gcs {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    api_url: String,
    upload_url: String,
    bucket: String,
    object: String,
}

impl Gcs {
    pub async fn new(config: GcsConfig, endpoints: &config::Gcs) -> Result<Self, Error> {
        debug!("Exchanging service account key for an oauth2 token source");

        use google_cloud_auth::{credentials::CredentialsFile, project::Config, token::DefaultTokenSourceProvider};
        use google_cloud_token::TokenSourceProvider as _;

        let credentials = CredentialsFile::new_from_str(&config.json_key).await?;
        let provider = DefaultTokenSourceProvider::new_with_credentials(
            Config::default().with_scopes(&SCOPES),
            Box::new(credentials),
        )
        .await?;

        Self::with_token_source(provider.token_source(), config, endpoints)
    }

    fn with_token_source(
        tokens: Arc<dyn TokenSource>,
        config: GcsConfig,
        endpoints: &config::Gcs,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("bosh-deployment-resource")
            .build()
            .map_err(|err| Error::Endpoint(err.to_string()))?;

        Ok(Self {
            client,
            tokens,
            api_url: endpoints.api_url.clone(),
            upload_url: endpoints.upload_url.clone(),
            bucket: config.bucket,
            object: config.file_name,
        })
    }

    async fn token(&self) -> Result<String, Error> {
        let token = self.tokens.token().await?;
        Ok(token.strip_prefix("Bearer ").unwrap_or(&token).to_string())
    }

    /// `<api_url>/b/<bucket>/o/<object>`, with the object name as a single path segment.
    fn object_url(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&self.api_url).map_err(|_| Error::Endpoint(self.api_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| Error::Endpoint(self.api_url.clone()))?
            .pop_if_empty()
            .push("b")
            .push(&self.bucket)
            .push("o")
            .push(&self.object);
        Ok(url)
    }

    fn insert_url(&self) -> Result<Url, Error> {
        let mut url =
            Url::parse(&self.upload_url).map_err(|_| Error::Endpoint(self.upload_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| Error::Endpoint(self.upload_url.clone()))?
            .pop_if_empty()
            .push("b")
            .push(&self.bucket)
            .push("o");
        Ok(url)
    }

    fn read_error(&self, reason: impl ToString) -> Error {
        Error::Read {
            object: self.object.clone(),
            bucket: self.bucket.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl StorageClient for Gcs {
    async fn download(&self, path: &Path) -> Result<(), Error> {
        debug!("downloading gs://{}/{}", self.bucket, self.object);
        let response = self
            .client
            .get(self.object_url()?)
            .query(&[("alt", "media")])
            .bearer_auth(self.token().await?)
            .send()
            .await
            .map_err(|err| self.read_error(err))?;

        if response.status() == StatusCode::NOT_FOUND {
            info!("gs://{}/{} does not exist yet, starting an empty vars store", self.bucket, self.object);
            return self.upload(path).await;
        }

        let contents = response
            .error_for_status()
            .map_err(|err| self.read_error(err))?
            .bytes()
            .await
            .map_err(|err| self.read_error(err))?;
        write_private(path, &contents)?;

        // Reading is not enough, the deploy will want to write the store back.
        self.upload(path).await
    }

    async fn upload(&self, path: &Path) -> Result<(), Error> {
        let contents = std::fs::read(path).map_err(|err| Error::LocalFile {
            path: path.display().to_string(),
            err,
        })?;

        debug!("uploading {} bytes to gs://{}/{}", contents.len(), self.bucket, self.object);
        let result = self
            .client
            .post(self.insert_url()?)
            .query(&[("uploadType", "media"), ("name", self.object.as_str())])
            .bearer_auth(self.token().await?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(contents)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                debug!("upload of gs://{}/{} failed: {err}", self.bucket, self.object);
                Err(Error::Write {
                    object: self.object.clone(),
                    bucket: self.bucket.clone(),
                })
            }
        }
    }
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let local = |err| Error::LocalFile {
        path: path.display().to_string(),
        err,
    };
    std::fs::write(path, contents).map_err(local)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(local)?;
    }
    Ok(())
}
