//! Deployment manifest with the two sections the resource patches.
//!
//! The document is kept as a generic YAML tree so every field the resource
//! does not know about survives a parse/serialize round trip untouched, in
//! its original order.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

const LATEST: &str = "latest";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to unmarshal manifest: {0}")]
    Unmarshal(#[source] serde_yaml::Error),

    #[error("Failed to marshal manifest: {0}")]
    Marshal(#[source] serde_yaml::Error),

    #[error("Deployment manifest is not a mapping")]
    NotAMapping,

    #[error("No {0} section in deployment manifest")]
    SectionMissing(&'static str),

    #[error("expected {field} key for {section}")]
    FieldMissing {
        section: &'static str,
        field: &'static str,
    },

    #[error("expected {expected} in {section} section, found {found}")]
    TypeMismatch {
        section: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Release {0} not defined in deployment manifest")]
    ReleaseNotDefined(String),

    #[error("Stemcell {0} not defined in deployment manifest")]
    StemcellNotDefined(String),

    #[error("Multiple matches for stemcell {0}")]
    AmbiguousStemcell(String),
}

/// `os`/`version` pair of a manifest stemcell entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemcellEntry {
    pub os: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentManifest {
    root: Mapping,
}

impl DeploymentManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        match serde_yaml::from_slice(bytes).map_err(Error::Unmarshal)? {
            Value::Mapping(root) => Ok(Self { root }),
            // An empty document is an empty manifest, not an error.
            Value::Null => Ok(Self {
                root: Mapping::new(),
            }),
            _ => Err(Error::NotAMapping),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_yaml::to_string(&self.root)
            .map(String::into_bytes)
            .map_err(Error::Marshal)
    }

    /// Set the version of the release called `name`.
    pub fn use_release_version(&mut self, name: &str, version: &str) -> Result<(), Error> {
        let releases = self.section_mut("releases")?;

        for release in releases.iter_mut() {
            let release = entry_mut("releases", release)?;
            if release.get("name").and_then(Value::as_str) == Some(name) {
                release.insert("version".into(), version.into());
                return Ok(());
            }
        }

        Err(Error::ReleaseNotDefined(name.to_string()))
    }

    /// Pin the `latest` stemcell matching `name` or `os` to `version`.
    ///
    /// Entries already pinned to a concrete version are left alone. More than one
    /// matching `latest` entry is ambiguous and fails.
    pub fn use_stemcell_version(&mut self, name: &str, os: &str, version: &str) -> Result<(), Error> {
        let stemcells = self.section_mut("stemcells")?;

        let mut candidates = vec![];
        for stemcell in stemcells.iter_mut() {
            let stemcell = entry_mut("stemcells", stemcell)?;
            let name_matches = stemcell.get("name").and_then(Value::as_str) == Some(name);
            let os_matches = stemcell.get("os").and_then(Value::as_str) == Some(os);
            if name_matches || os_matches {
                candidates.push(stemcell);
            }
        }

        if candidates.is_empty() {
            return Err(Error::StemcellNotDefined(name.to_string()));
        }

        let mut latest = candidates
            .into_iter()
            .filter(|stemcell| stemcell.get("version").and_then(Value::as_str) == Some(LATEST));

        if let Some(target) = latest.next() {
            if latest.next().is_some() {
                return Err(Error::AmbiguousStemcell(name.to_string()));
            }
            target.insert("version".into(), version.into());
        }

        Ok(())
    }

    /// Every stemcell entry as an `os`/`version` pair.
    pub fn stemcells(&self) -> Result<Vec<StemcellEntry>, Error> {
        let stemcells = self.section("stemcells")?;

        stemcells
            .iter()
            .map(|stemcell| {
                let stemcell = entry("stemcells", stemcell)?;
                Ok(StemcellEntry {
                    os: string_field(stemcell, "os")?,
                    version: string_field(stemcell, "version")?,
                })
            })
            .collect()
    }

    fn section(&self, section: &'static str) -> Result<&Vec<Value>, Error> {
        match self.root.get(section) {
            None | Some(Value::Null) => Err(Error::SectionMissing(section)),
            Some(Value::Sequence(entries)) => Ok(entries),
            Some(other) => Err(Error::TypeMismatch {
                section,
                expected: "a sequence",
                found: kind(other),
            }),
        }
    }

    fn section_mut(&mut self, section: &'static str) -> Result<&mut Vec<Value>, Error> {
        match self.root.get_mut(section) {
            None | Some(Value::Null) => Err(Error::SectionMissing(section)),
            Some(Value::Sequence(entries)) => Ok(entries),
            Some(other) => Err(Error::TypeMismatch {
                section,
                expected: "a sequence",
                found: kind(other),
            }),
        }
    }
}

fn entry<'a>(section: &'static str, value: &'a Value) -> Result<&'a Mapping, Error> {
    value.as_mapping().ok_or(Error::TypeMismatch {
        section,
        expected: "mapping entries",
        found: kind(value),
    })
}

fn entry_mut<'a>(section: &'static str, value: &'a mut Value) -> Result<&'a mut Mapping, Error> {
    let found = kind(value);
    value.as_mapping_mut().ok_or(Error::TypeMismatch {
        section,
        expected: "mapping entries",
        found,
    })
}

fn string_field(entry: &Mapping, field: &'static str) -> Result<String, Error> {
    entry
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(Error::FieldMissing {
            section: "stemcell",
            field,
        })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: concourse
director_uuid: abc-123
releases:
- name: concourse
  version: latest
- name: garden-runc
  version: 1.2.3
  url: https://example.com/garden.tgz
stemcells:
- alias: trusty
  os: ubuntu-trusty
  version: latest
- alias: windows
  name: bosh-windows-stemcell
  version: 1200.1
instance_groups:
- name: web
  instances: 1
"#;

    fn parsed() -> DeploymentManifest {
        DeploymentManifest::parse(MANIFEST.as_bytes()).unwrap()
    }

    fn yaml(manifest: &DeploymentManifest) -> Value {
        serde_yaml::from_slice(&manifest.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn malformed_manifest() {
        let err = DeploymentManifest::parse(b"releases: [").unwrap_err();
        assert!(err.to_string().starts_with("Failed to unmarshal manifest: "));
    }

    #[test]
    fn scalar_manifest_is_rejected() {
        assert!(matches!(
            DeploymentManifest::parse(b"just a string"),
            Err(Error::NotAMapping)
        ));
    }

    #[test]
    fn round_trip_keeps_untouched_fields() {
        let manifest = parsed();
        let expected: Value = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(yaml(&manifest), expected);
    }

    #[test]
    fn pins_release_version_only() {
        let mut manifest = parsed();
        manifest.use_release_version("concourse", "3.3.0").unwrap();

        let mut expected: Value = serde_yaml::from_str(MANIFEST).unwrap();
        expected["releases"][0]["version"] = "3.3.0".into();
        assert_eq!(yaml(&manifest), expected);
    }

    #[test]
    fn keeps_key_order_when_pinning() {
        let mut manifest = parsed();
        manifest.use_release_version("concourse", "3.3.0").unwrap();

        let text = String::from_utf8(manifest.to_bytes().unwrap()).unwrap();
        let keys: Vec<_> = text
            .lines()
            .filter(|line| !line.starts_with(' ') && !line.starts_with('-'))
            .map(|line| line.split(':').next().unwrap())
            .collect();
        assert_eq!(
            keys,
            vec!["name", "director_uuid", "releases", "stemcells", "instance_groups"]
        );
    }

    #[test]
    fn release_not_in_manifest() {
        let err = parsed().use_release_version("nope", "1").unwrap_err();
        assert_eq!(err.to_string(), "Release nope not defined in deployment manifest");
    }

    #[test]
    fn release_without_releases_section() {
        let mut manifest = DeploymentManifest::parse(b"name: foo\n").unwrap();
        let err = manifest.use_release_version("concourse", "1").unwrap_err();
        assert_eq!(err.to_string(), "No releases section in deployment manifest");
    }

    #[test]
    fn release_section_of_wrong_shape() {
        let mut manifest = DeploymentManifest::parse(b"releases: concourse\n").unwrap();
        assert!(matches!(
            manifest.use_release_version("concourse", "1"),
            Err(Error::TypeMismatch {
                section: "releases",
                ..
            })
        ));
    }

    #[test]
    fn pins_latest_stemcell_by_os() {
        let mut manifest = parsed();
        manifest
            .use_stemcell_version("bosh-warden-boshlite-ubuntu-trusty-go_agent", "ubuntu-trusty", "3421.11")
            .unwrap();

        let result = yaml(&manifest);
        assert_eq!(result["stemcells"][0]["version"], Value::from("3421.11"));
        assert_eq!(result["stemcells"][1]["version"], Value::from(1200.1));
    }

    #[test]
    fn pins_latest_stemcell_by_name() {
        let mut manifest = DeploymentManifest::parse(
            b"stemcells:\n- name: bosh-windows-stemcell\n  version: latest\n",
        )
        .unwrap();
        manifest
            .use_stemcell_version("bosh-windows-stemcell", "windows2019", "2019.7")
            .unwrap();
        assert_eq!(yaml(&manifest)["stemcells"][0]["version"], Value::from("2019.7"));
    }

    #[test]
    fn already_pinned_stemcell_is_left_alone() {
        let mut manifest = parsed();
        manifest
            .use_stemcell_version("bosh-windows-stemcell", "windows2012R2", "1200.5")
            .unwrap();
        manifest
            .use_stemcell_version("bosh-windows-stemcell", "windows2012R2", "1200.5")
            .unwrap();

        let expected: Value = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(yaml(&manifest), expected);
    }

    #[test]
    fn ambiguous_latest_stemcells() {
        let mut manifest = DeploymentManifest::parse(
            br#"
stemcells:
- alias: one
  name: bosh-warden-boshlite-ubuntu-trusty-go_agent
  version: latest
- alias: two
  name: bosh-warden-boshlite-ubuntu-trusty-go_agent
  version: latest
"#,
        )
        .unwrap();

        let err = manifest
            .use_stemcell_version("bosh-warden-boshlite-ubuntu-trusty-go_agent", "ubuntu-trusty", "3421.11")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Multiple matches for stemcell bosh-warden-boshlite-ubuntu-trusty-go_agent"
        );
    }

    #[test]
    fn stemcell_not_in_manifest() {
        let err = parsed()
            .use_stemcell_version("bosh-aws-xen-hvm-centos-7-go_agent", "centos-7", "1")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stemcell bosh-aws-xen-hvm-centos-7-go_agent not defined in deployment manifest"
        );
    }

    #[test]
    fn stemcell_without_stemcells_section() {
        let mut manifest = DeploymentManifest::parse(b"releases: []\n").unwrap();
        assert!(matches!(
            manifest.use_stemcell_version("a", "b", "1"),
            Err(Error::SectionMissing("stemcells"))
        ));
    }

    #[test]
    fn lists_stemcells() {
        let manifest = DeploymentManifest::parse(
            b"stemcells:\n- alias: default\n  os: ubuntu-jammy\n  version: '1.351'\n- os: windows2019\n  version: '2019.7'\n",
        )
        .unwrap();

        assert_eq!(
            manifest.stemcells().unwrap(),
            vec![
                StemcellEntry {
                    os: "ubuntu-jammy".into(),
                    version: "1.351".into()
                },
                StemcellEntry {
                    os: "windows2019".into(),
                    version: "2019.7".into()
                },
            ]
        );
    }

    #[test]
    fn listing_stemcells_requires_os_and_version() {
        let manifest = DeploymentManifest::parse(
            b"stemcells:\n- name: bosh-windows-stemcell\n  version: latest\n",
        )
        .unwrap();
        assert_eq!(
            manifest.stemcells().unwrap_err().to_string(),
            "expected os key for stemcell"
        );

        let manifest =
            DeploymentManifest::parse(b"stemcells:\n- os: ubuntu-jammy\n  version: 1.351\n").unwrap();
        assert!(matches!(
            manifest.stemcells(),
            Err(Error::FieldMissing {
                field: "version",
                ..
            })
        ));
    }
}
