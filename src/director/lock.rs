use super::Director;
use log::debug;
use std::io::Write;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Director(#[from] super::Error),

    #[error("Timed out after {}s waiting for deployment lock on {deployment}", .waited.as_secs())]
    Timeout { deployment: String, waited: Duration },

    #[error("write progress: {0}")]
    Progress(#[from] std::io::Error),
}

/// Blocks a deploy until no director lock is held on the deployment.
///
/// This is the only coordination between concurrent pipeline runs against the
/// same deployment: the director owns the lock, the resource just waits for it.
#[derive(Debug, Clone)]
pub struct DeployLock {
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl DeployLock {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Poll until `deployment` is unlocked, printing one dot per round it is still held.
    ///
    /// Without a timeout this waits for as long as the lock is held.
    pub async fn wait(
        &self,
        director: &dyn Director,
        deployment: &str,
        progress: &mut (dyn Write + Send),
    ) -> Result<(), Error> {
        let waiting = async {
            write!(progress, "Waiting for deployment lock")?;
            progress.flush()?;

            while is_locked(director, deployment).await? {
                write!(progress, ".")?;
                progress.flush()?;
                debug!("{deployment} is locked, polling again in {:?}", self.poll_interval);
                tokio::time::sleep(self.poll_interval).await;
            }

            writeln!(progress, " Done")?;
            Ok::<(), Error>(())
        };

        match self.timeout {
            None => waiting.await,
            Some(limit) => tokio::time::timeout(limit, waiting)
                .await
                .map_err(|_| Error::Timeout {
                    deployment: deployment.to_string(),
                    waited: limit,
                })?,
        }
    }
}

async fn is_locked(director: &dyn Director, deployment: &str) -> Result<bool, super::Error> {
    let locks = director.locks().await?;
    Ok(locks
        .iter()
        .any(|lock| lock.resource_names.iter().any(|name| name == deployment)))
}
