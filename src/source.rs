use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid dynamic source config: {0}")]
    DynamicSource(String),

    #[error("Missing required source {}: {}", parameter_noun(.0), .0.join(", "))]
    MissingParameters(Vec<&'static str>),

    #[error("Jumpbox URL and Jumpbox SSH Key are both required to use a jumpbox")]
    IncompleteJumpbox,
}

fn parameter_noun(missing: &[&str]) -> &'static str {
    if missing.len() > 1 {
        "parameters"
    } else {
        "parameter"
    }
}

/// Identifies one deployment on one director.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Source {
    pub deployment: String,
    pub target: String,
    pub client: String,
    pub client_secret: String,
    /// PEM content, not a path.
    pub ca_cert: String,
    pub vars_store: Option<VarsStore>,
    pub jumpbox_url: String,
    pub jumpbox_ssh_key: String,
    pub jumpbox_username: String,
    pub skip_check: bool,
    /// Ceiling in seconds for waiting on a deployment lock.
    pub lock_timeout: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct VarsStore {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}

/// SSH gateway used to reach a director on a private network.
#[derive(Debug, Clone, PartialEq)]
pub struct Jumpbox<'a> {
    pub url: &'a str,
    pub username: &'a str,
    pub private_key: &'a str,
}

impl Source {
    /// Read the source of a put request.
    ///
    /// When `params.source_file` is set, that file (relative to `sources_dir`) is
    /// read as JSON and its keys take precedence over the inline source.
    pub fn dynamic(request: &[u8], sources_dir: &Path) -> Result<Self, Error> {
        let request: Value = serde_json::from_slice(request)
            .map_err(|err| Error::DynamicSource(err.to_string()))?;

        let mut source = match request.get("source") {
            Some(Value::Object(inline)) => inline.clone(),
            _ => serde_json::Map::new(),
        };

        if let Some(source_file) = request
            .get("params")
            .and_then(|params| params.get("source_file"))
            .and_then(Value::as_str)
            .filter(|file| !file.is_empty())
        {
            let contents = std::fs::read(sources_dir.join(source_file))
                .map_err(|err| Error::DynamicSource(err.to_string()))?;
            let overlay: serde_json::Map<String, Value> = serde_json::from_slice(&contents)
                .map_err(|err| Error::DynamicSource(err.to_string()))?;
            source.extend(overlay);
        }

        let source: Source = serde_json::from_value(Value::Object(source))
            .map_err(|err| Error::DynamicSource(err.to_string()))?;
        source.check_required()?;
        Ok(source)
    }

    /// Everything needed to talk to the director must be present.
    pub fn check_required(&self) -> Result<(), Error> {
        let missing: Vec<_> = [
            ("deployment", &self.deployment),
            ("target", &self.target),
            ("client", &self.client),
            ("client_secret", &self.client_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(Error::MissingParameters(missing));
        }
        self.jumpbox().map(|_| ())
    }

    pub fn jumpbox(&self) -> Result<Option<Jumpbox<'_>>, Error> {
        match (self.jumpbox_url.is_empty(), self.jumpbox_ssh_key.is_empty()) {
            (true, true) => Ok(None),
            (false, false) => Ok(Some(Jumpbox {
                url: &self.jumpbox_url,
                username: &self.jumpbox_username,
                private_key: &self.jumpbox_ssh_key,
            })),
            _ => Err(Error::IncompleteJumpbox),
        }
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout.map(Duration::from_secs)
    }
}
