//! Lookup of published stemcells on bosh.io.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Auto upload of \"latest\" stemcell is not supported, please use bosh-io-stemcell-resource")]
    LatestUnsupported,

    #[error("Failed to determine stemcell name for cpi: {0}")]
    UnknownCpi(String),

    #[error("did not find a suitable stemcell with version: {0}")]
    VersionNotFound(String),

    #[error("Could not fetch stemcells {name} from bosh.io: {reason}")]
    Fetch { name: String, reason: String },
}

/// A published stemcell, ready for the director to fetch by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoshIoStemcell {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha1: String,
}

#[async_trait]
pub trait StemcellCatalog: Send + Sync {
    /// Find the `light` or regular stemcell for `os` at `version`, built for the director's `cpi`.
    async fn lookup_stemcell(
        &self,
        cpi: &str,
        os: &str,
        version: &str,
        light: bool,
    ) -> Result<BoshIoStemcell, Error>;
}

pub struct BoshIo {
    client: reqwest::Client,
    url: String,
}

impl BoshIo {
    pub fn new(url: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| Error::Fetch {
                name: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn stemcells(&self, name: &str) -> Result<Vec<Published>, reqwest::Error> {
        let url = format!("{}/api/v1/stemcells/{name}", self.url);
        debug!("fetching {url}");
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl StemcellCatalog for BoshIo {
    async fn lookup_stemcell(
        &self,
        cpi: &str,
        os: &str,
        version: &str,
        light: bool,
    ) -> Result<BoshIoStemcell, Error> {
        if version == "latest" {
            return Err(Error::LatestUnsupported);
        }
        let name = stemcell_name(cpi, os)?;
        let published = self.stemcells(&name).await.map_err(|err| Error::Fetch {
            name: name.clone(),
            reason: err.to_string(),
        })?;
        select(published, version, light)
    }
}

#[derive(Deserialize, Debug, Default)]
struct Published {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    regular: Option<Download>,
    #[serde(default)]
    light: Option<Download>,
}

#[derive(Deserialize, Debug, Default, Clone)]
struct Download {
    #[serde(default)]
    url: String,
    #[serde(default)]
    sha1: String,
}

fn select(published: Vec<Published>, version: &str, light: bool) -> Result<BoshIoStemcell, Error> {
    let stemcell = published
        .into_iter()
        .find(|stemcell| stemcell.version == version)
        .ok_or_else(|| Error::VersionNotFound(version.to_string()))?;

    let download = if light { stemcell.light } else { stemcell.regular }.unwrap_or_default();
    Ok(BoshIoStemcell {
        name: stemcell.name,
        version: stemcell.version,
        url: download.url,
        sha1: download.sha1,
    })
}

fn infrastructure(cpi: &str) -> Option<&'static str> {
    let infrastructure = match cpi {
        "google_cpi" => "google-kvm",
        "alicloud_cpi" => "alicloud-kvm",
        "vcloud_cpi" => "vcloud-esxi",
        "aws_cpi" => "aws-xen-hvm",
        "openstack_cpi" => "openstack-kvm",
        "virtualbox_cpi" => "vsphere-esxi",
        "docker_cpi" => "warden-boshlite",
        "vsphere_cpi" => "vsphere-esxi",
        "azure_cpi" => "azure-hyperv",
        "warden_cpi" => "warden-boshlite",
        _ => return None,
    };
    Some(infrastructure)
}

fn stemcell_name(cpi: &str, os: &str) -> Result<String, Error> {
    let infrastructure = infrastructure(cpi).ok_or_else(|| Error::UnknownCpi(cpi.to_string()))?;
    Ok(format!("bosh-{infrastructure}-{os}-go_agent"))
}
