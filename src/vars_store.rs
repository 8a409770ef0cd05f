use crate::storage::{self, StorageClient};
use log::debug;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not create vars store file: {0}")]
    Scratch(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

/// Run `deploy` with a local copy of the vars store.
///
/// With a store configured, a private scratch file is filled from the remote
/// store, its path is handed to `deploy`, and the file is uploaded again once
/// `deploy` succeeds. A failed `deploy` never uploads. The scratch file is
/// removed on every path out of this function.
///
/// Without a store, `deploy` gets `None` and nothing else happens.
pub async fn with_store<F, Fut, E>(storage: Option<&dyn StorageClient>, deploy: F) -> Result<(), E>
where
    F: FnOnce(Option<PathBuf>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<Error>,
{
    let Some(storage) = storage else {
        return deploy(None).await;
    };

    let scratch = tempfile::Builder::new()
        .prefix("vars-store")
        .tempfile()
        .map_err(Error::from)?
        .into_temp_path();

    debug!("checking out vars store to {}", scratch.display());
    storage.download(&scratch).await.map_err(Error::from)?;

    deploy(Some(scratch.to_path_buf())).await?;

    debug!("checking in vars store from {}", scratch.display());
    storage.upload(&scratch).await.map_err(Error::from)?;
    Ok(())
}
