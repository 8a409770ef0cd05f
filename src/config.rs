use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile { err: std::io::Error, path: String },

    #[error("parse {path}: {err}")]
    Parse { err: toml::de::Error, path: String },
}

/// Runtime settings of the resource.
///
/// The defaults are compiled into the program. A user file only needs to
/// contain the keys it wants to override.
#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    pub description: Option<String>,
    #[serde(default)]
    pub bosh: Bosh,
    #[serde(default)]
    pub lock: Lock,
    #[serde(default)]
    pub boshio: BoshIo,
    #[serde(default)]
    pub gcs: Gcs,
}

impl Default for Settings {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl Settings {
    /// Merge the user configuration file on top of the built-in defaults.
    pub fn default_with_user_config_file(path: &Path) -> Result<Self, Error> {
        let display = path.display().to_string();
        let user = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: display.clone(),
        })?;
        Self::default_with_user_config(&user).map_err(|err| Error::Parse { err, path: display })
    }

    fn default_with_user_config(user: &str) -> Result<Self, toml::de::Error> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        let user: toml::Table = toml::from_str(user)?;
        merge(&mut merged, user);
        toml::Value::Table(merged).try_into()
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge(base_table, overlay_table)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Bosh {
    /// Director command-line client, either a bare name looked up in `PATH` or a full path.
    #[serde_inline_default("bosh".to_string())]
    pub cli: String,
}

impl Default for Bosh {
    fn default() -> Self {
        Self {
            cli: "bosh".to_string(),
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Lock {
    #[serde_inline_default(3)]
    pub poll_interval_seconds: u64,
    /// Unset means the lock wait never gives up.
    pub timeout_seconds: Option<u64>,
}

impl Lock {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 3,
            timeout_seconds: None,
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct BoshIo {
    #[serde_inline_default("https://bosh.io".to_string())]
    pub url: String,
}

impl Default for BoshIo {
    fn default() -> Self {
        Self {
            url: "https://bosh.io".to_string(),
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Gcs {
    #[serde_inline_default("https://storage.googleapis.com/storage/v1".to_string())]
    pub api_url: String,
    #[serde_inline_default("https://storage.googleapis.com/upload/storage/v1".to_string())]
    pub upload_url: String,
}

impl Default for Gcs {
    fn default() -> Self {
        Self {
            api_url: "https://storage.googleapis.com/storage/v1".to_string(),
            upload_url: "https://storage.googleapis.com/upload/storage/v1".to_string(),
        }
    }
}
