use log::debug;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} is not a valid file glob")]
    InvalidPattern(String),

    #[error("{0} did not match any files")]
    NoMatch(String),

    #[error("scan file system for {pattern}: {err}")]
    FileSystem {
        pattern: String,
        err: glob::GlobError,
    },
}

/// Expand every pattern relative to `base_directory`.
///
/// Paths are returned in pattern order, each path only once at the position
/// where it was first matched. A pattern matching nothing is an error.
pub fn unfurl(base_directory: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, Error> {
    let escaped_base = glob::Pattern::escape(&base_directory.to_string_lossy());
    let mut seen = HashSet::new();
    let mut paths = vec![];

    for pattern in patterns {
        let full_pattern = format!(
            "{}/{}",
            escaped_base.trim_end_matches('/'),
            pattern.trim_start_matches('/')
        );
        let entries = glob::glob(&full_pattern)
            .map_err(|_| Error::InvalidPattern(pattern.clone()))?;

        let mut matched = 0;
        for entry in entries {
            let path = entry.map_err(|err| Error::FileSystem {
                pattern: pattern.clone(),
                err,
            })?;
            matched += 1;
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }

        if matched == 0 {
            return Err(Error::NoMatch(pattern.clone()));
        }
        debug!("{pattern} matched {matched} file(s)");
    }

    Ok(paths)
}
