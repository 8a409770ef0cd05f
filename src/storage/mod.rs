//! Remote persistence of the vars store.

use crate::config;
use crate::source::Source;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub mod gcs;

pub use gcs::Gcs;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid vars store: unsupported provider {0}")]
    UnsupportedProvider(String),

    #[error("Invalid vars store config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("auth error: {0}")]
    Auth(#[from] google_cloud_auth::error::Error),

    #[error("auth token error: {0}")]
    AuthToken(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid storage endpoint {0}")]
    Endpoint(String),

    #[error("Can not read {object} from bucket {bucket}: {reason}")]
    Read {
        object: String,
        bucket: String,
        reason: String,
    },

    #[error("Can not write to {object} in bucket {bucket}")]
    Write { object: String, bucket: String },

    #[error("vars store file {path}: {err}")]
    LocalFile { path: String, err: std::io::Error },
}

/// Moves the vars store between a local file and its remote home.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Fill `path` with the remote store.
    ///
    /// A store that does not exist yet is created from the current contents of `path`.
    async fn download(&self, path: &Path) -> Result<(), Error>;

    async fn upload(&self, path: &Path) -> Result<(), Error>;
}

/// Build the client for the vars store declared in `source`, if any.
pub async fn new_storage_client(
    source: &Source,
    endpoints: &config::Gcs,
) -> Result<Option<Box<dyn StorageClient>>, Error> {
    let Some(vars_store) = &source.vars_store else {
        return Ok(None);
    };

    match vars_store.provider.as_str() {
        "" => Ok(None),
        "gcs" => {
            let config: gcs::GcsConfig = serde_json::from_value(vars_store.config.clone())?;
            let client = Gcs::new(config, endpoints).await?;
            Ok(Some(Box::new(client)))
        }
        other => Err(Error::UnsupportedProvider(other.to_string())),
    }
}
