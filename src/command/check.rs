use crate::concourse::CheckRequest;
use crate::director::{self, Director};
use crate::version::Version;
use log::debug;

/// Report the deployment's current version if it differs from the last one seen.
///
/// The answer is empty when nothing changed or when the source opts out of
/// checking. `connect` is only called when the director has to be asked.
pub async fn run<D, E>(request: &CheckRequest, connect: impl FnOnce() -> Result<D, E>) -> Result<Vec<Version>, E>
where
    D: Director,
    E: From<director::Error>,
{
    if request.source.skip_check {
        debug!("skip_check is set, not contacting the director");
        return Ok(vec![]);
    }

    let director = connect()?;
    let manifest = director.download_manifest().await?;
    let current = Version::new(&manifest, &request.source.target);

    if request.version.as_ref() == Some(&current) {
        Ok(vec![])
    } else {
        Ok(vec![current])
    }
}
