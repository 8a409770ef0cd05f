use crate::{archive, globs};
use serde_yaml::Value;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

const RELEASE_MANIFEST: &str = "release.MF";
const STEMCELL_MANIFEST: &str = "stemcell.MF";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid release name: {0}")]
    ReleaseGlob(#[source] globs::Error),

    #[error("Invalid stemcell name: {0}")]
    StemcellGlob(#[source] globs::Error),

    #[error("Could not read release: {0}")]
    ReadRelease(#[source] archive::Error),

    #[error("Could not read stemcell: {0}")]
    ReadStemcell(#[source] archive::Error),

    #[error("Release {0} is not a valid release")]
    InvalidRelease(String),

    #[error("Stemcell {0} is not a valid stemcell")]
    InvalidStemcell(String),
}

/// A release tarball found on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub version: String,
    pub file_path: PathBuf,
}

/// A stemcell tarball found on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stemcell {
    pub name: String,
    pub operating_system: String,
    pub version: String,
    pub file_path: PathBuf,
}

impl Display for Release {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

impl Display for Stemcell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

impl Release {
    pub fn from_archive(path: &Path) -> Result<Self, Error> {
        let contents = archive::read_member(path, RELEASE_MANIFEST).map_err(Error::ReadRelease)?;
        let invalid = || Error::InvalidRelease(path.display().to_string());

        let doc: Value = serde_yaml::from_slice(&contents).map_err(|_| invalid())?;
        Ok(Self {
            name: scalar_field(&doc, "name").ok_or_else(invalid)?,
            version: scalar_field(&doc, "version").ok_or_else(invalid)?,
            file_path: path.to_path_buf(),
        })
    }
}

impl Stemcell {
    pub fn from_archive(path: &Path) -> Result<Self, Error> {
        let contents =
            archive::read_member(path, STEMCELL_MANIFEST).map_err(Error::ReadStemcell)?;
        let invalid = || Error::InvalidStemcell(path.display().to_string());

        let doc: Value = serde_yaml::from_slice(&contents).map_err(|_| invalid())?;
        Ok(Self {
            name: scalar_field(&doc, "name").ok_or_else(invalid)?,
            operating_system: scalar_field(&doc, "operating_system").unwrap_or_default(),
            version: scalar_field(&doc, "version").ok_or_else(invalid)?,
            file_path: path.to_path_buf(),
        })
    }
}

/// Expand the release globs and read every matching tarball.
pub fn releases(base_directory: &Path, patterns: &[String]) -> Result<Vec<Release>, Error> {
    globs::unfurl(base_directory, patterns)
        .map_err(Error::ReleaseGlob)?
        .iter()
        .map(|path| Release::from_archive(path))
        .collect()
}

/// Expand the stemcell globs and read every matching tarball.
pub fn stemcells(base_directory: &Path, patterns: &[String]) -> Result<Vec<Stemcell>, Error> {
    globs::unfurl(base_directory, patterns)
        .map_err(Error::StemcellGlob)?
        .iter()
        .map(|path| Stemcell::from_archive(path))
        .collect()
}

// Versions like `53` or `3586.25` are YAML numbers, but always mean a string here.
fn scalar_field(doc: &Value, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
