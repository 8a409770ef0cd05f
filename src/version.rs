use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Resource version exchanged with the pipeline.
///
/// The digest covers the exact manifest bytes, so any change to the deployed
/// manifest, whitespace included, yields a new version.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    #[serde(default)]
    pub manifest_sha1: String,
    #[serde(default)]
    pub target: String,
}

impl Version {
    pub fn new(manifest: &[u8], target: &str) -> Self {
        Self {
            manifest_sha1: hex::encode(Sha1::digest(manifest)),
            target: target.to_string(),
        }
    }
}
