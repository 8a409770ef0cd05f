//! Request and response documents exchanged with the pipeline over stdin/stdout.

use crate::source::{self, Source};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameters: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Source(#[from] source::Error),

    #[error("Missing required parameter: manifest")]
    MissingManifest,

    #[error("bosh_io_stemcell_type only supports 'light' or 'regular' got: {0}")]
    StemcellType(String),
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct CheckRequest {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub version: Option<Version>,
}

impl CheckRequest {
    pub fn parse(request: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(request)?)
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct CompiledRelease {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct InParams {
    #[serde(default)]
    pub compiled_releases: Vec<CompiledRelease>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct InRequest {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub params: InParams,
}

impl InRequest {
    pub fn parse(request: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(request)?)
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct InResponse {
    pub version: Version,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct DeleteParams {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StemcellType {
    Light,
    Regular,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct OutParams {
    pub manifest: String,
    pub source_file: String,
    pub no_redact: bool,
    pub dry_run: bool,
    pub recreate: bool,
    pub fix: bool,
    pub max_in_flight: Option<u32>,
    pub skip_drain: Vec<String>,
    pub cleanup: bool,
    pub releases: Vec<String>,
    pub stemcells: Vec<String>,
    pub vars: BTreeMap<String, Value>,
    pub vars_files: Vec<String>,
    pub var_files: BTreeMap<String, String>,
    pub ops_files: Vec<String>,
    pub bosh_io_stemcell_type: String,
    pub delete: DeleteParams,
}

impl OutParams {
    pub fn stemcell_type(&self) -> Result<Option<StemcellType>, Error> {
        match self.bosh_io_stemcell_type.as_str() {
            "" => Ok(None),
            "light" => Ok(Some(StemcellType::Light)),
            "regular" => Ok(Some(StemcellType::Regular)),
            other => Err(Error::StemcellType(other.to_string())),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct OutRequest {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub params: OutParams,
}

impl OutRequest {
    /// Decode and validate a put request, resolving a dynamic source file.
    pub fn parse(request: &[u8], sources_dir: &Path) -> Result<Self, Error> {
        let mut out_request: OutRequest = serde_json::from_slice(request)?;
        out_request.source = Source::dynamic(request, sources_dir)?;

        if out_request.params.manifest.is_empty() && !out_request.params.delete.enabled {
            return Err(Error::MissingManifest);
        }
        out_request.params.stemcell_type()?;

        Ok(out_request)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub value: String,
}

impl Metadata {
    pub fn new(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct OutResponse {
    pub version: Version,
    pub metadata: Vec<Metadata>,
}
