//! Director backed by the `bosh` command-line client.
//!
//! Every call spawns the client with an explicit environment. Nothing is set
//! on the resource's own process environment.

use super::{DeployParams, Director, Error, Info, InterpolateParams, Lock, ReleaseSpec};
use crate::source::{self, Source};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Director response code for a deployment that does not exist.
const DEPLOYMENT_NOT_FOUND: &str = "\"code\":70000";

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("could not run {program}: {err}")]
    Spawn { program: String, err: std::io::Error },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: ExitStatus,
        output: String,
    },

    #[error("{program} output: {err}")]
    Io { program: String, err: std::io::Error },

    #[error("unexpected output from {program}: {err}")]
    Output {
        program: String,
        err: serde_json::Error,
    },

    #[error("temporary file: {0}")]
    TempFile(#[from] std::io::Error),

    #[error("encode vars: {0}")]
    Vars(#[from] serde_yaml::Error),

    #[error(transparent)]
    Source(#[from] source::Error),
}

pub struct BoshCli {
    program: String,
    deployment: String,
    env: Vec<(&'static str, OsString)>,
    // Referenced by BOSH_ALL_PROXY, so it has to outlive every spawned command.
    _jumpbox_key: Option<NamedTempFile>,
}

impl BoshCli {
    pub fn new(program: &str, source: &Source) -> Result<Self, CliError> {
        let mut env: Vec<(&'static str, OsString)> = vec![
            ("BOSH_ENVIRONMENT", source.target.clone().into()),
            ("BOSH_CLIENT", source.client.clone().into()),
            ("BOSH_CLIENT_SECRET", source.client_secret.clone().into()),
            ("BOSH_DEPLOYMENT", source.deployment.clone().into()),
            ("BOSH_NON_INTERACTIVE", "true".into()),
        ];
        if !source.ca_cert.is_empty() {
            env.push(("BOSH_CA_CERT", source.ca_cert.clone().into()));
        }

        let jumpbox_key = match source.jumpbox()? {
            None => None,
            Some(jumpbox) => {
                let key = temp_file("ssh-key-file", jumpbox.private_key.as_bytes())?;
                let mut proxy = OsString::from(format!(
                    "ssh+socks5://{}@{}?private-key=",
                    jumpbox.username, jumpbox.url
                ));
                proxy.push(key.path());
                debug!("reaching the director through jumpbox {}", jumpbox.url);
                env.push(("BOSH_ALL_PROXY", proxy));
                Some(key)
            }
        };

        Ok(Self {
            program: program.to_string(),
            deployment: source.deployment.clone(),
            env,
            _jumpbox_key: jumpbox_key,
        })
    }

    fn command(&self, args: &[OsString]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .envs(self.env.iter().map(|(key, value)| (*key, value)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, err: std::io::Error) -> CliError {
        CliError::Spawn {
            program: self.program.clone(),
            err,
        }
    }

    fn io_error(&self, err: std::io::Error) -> CliError {
        CliError::Io {
            program: self.program.clone(),
            err,
        }
    }

    /// Run a long command, forwarding its output to stderr.
    async fn run(&self, args: Vec<OsString>) -> Result<(), CliError> {
        debug!("running {} {:?}", self.program, args);
        let mut child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| self.spawn_error(err))?;

        // stdout carries the resource's JSON response, so the client's output must not end up there.
        if let Some(mut stdout) = child.stdout.take() {
            tokio::io::copy(&mut stdout, &mut tokio::io::stderr())
                .await
                .map_err(|err| self.io_error(err))?;
        }

        let status = child.wait().await.map_err(|err| self.io_error(err))?;
        if status.success() {
            Ok(())
        } else {
            Err(CliError::Exit {
                program: self.program.clone(),
                status,
            })
        }
    }

    /// Run a command and collect its stdout.
    async fn capture(&self, args: Vec<OsString>) -> Result<Vec<u8>, CliError> {
        debug!("running {} {:?}", self.program, args);
        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(CliError::Failed {
                program: self.program.clone(),
                status: output.status,
                output: failure_text(&output.stdout, &output.stderr),
            })
        }
    }

    async fn json(&self, args: &[&str]) -> Result<UiOutput, CliError> {
        let args = std::iter::once("--json")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect();
        let stdout = self.capture(args).await?;
        serde_json::from_slice(&stdout).map_err(|err| CliError::Output {
            program: self.program.clone(),
            err,
        })
    }

    async fn try_deploy(&self, manifest: &[u8], params: &DeployParams) -> Result<(), CliError> {
        let manifest_file = temp_file("manifest", manifest)?;
        let vars_file = vars_file(&params.vars)?;
        let args = deploy_args(
            manifest_file.path(),
            vars_file.as_ref().map(NamedTempFile::path),
            params,
        );
        self.run(args).await
    }

    async fn try_interpolate(
        &self,
        manifest: &[u8],
        params: &InterpolateParams,
    ) -> Result<Vec<u8>, CliError> {
        let manifest_file = temp_file("manifest", manifest)?;
        let vars_file = vars_file(&params.vars)?;
        let args = interpolate_args(
            manifest_file.path(),
            vars_file.as_ref().map(NamedTempFile::path),
            params,
        );
        self.capture(args).await
    }

    /// Releases and stemcell slug of the deployment, plus the operating system of that stemcell.
    async fn deployed_releases(&self) -> Result<(Vec<Slug>, Slug, String), Error> {
        let export_error = |err: CliError| Error::ExportReleases(err.to_string());

        let deployment = self.json(&["deployment"]).await.map_err(export_error)?;
        let row = deployment
            .rows()
            .next()
            .ok_or_else(|| Error::ExportReleases(format!("could not fetch deployment {}", self.deployment)))?;

        let releases: Vec<Slug> = cell(row, "release_s").lines().filter_map(Slug::parse).collect();
        let stemcells: Vec<Slug> = cell(row, "stemcell_s").lines().filter_map(Slug::parse).collect();
        let stemcell = match stemcells.as_slice() {
            [stemcell] => stemcell.clone(),
            [] => return Err(Error::ExportReleases("deployment has no stemcell".into())),
            _ => {
                return Err(Error::ExportReleases(
                    "exporting releases from a deployment with multiple stemcells is unsupported".into(),
                ))
            }
        };

        let director_stemcells = self.json(&["stemcells"]).await.map_err(export_error)?;
        let os = director_stemcells
            .rows()
            .find(|row| {
                cell(row, "name") == stemcell.name
                    && cell(row, "version").trim_end_matches('*') == stemcell.version
            })
            .map(|row| cell(row, "os").to_string())
            .ok_or_else(|| {
                Error::ExportReleases(format!("could not find stemcell {}/{}", stemcell.name, stemcell.version))
            })?;

        Ok((releases, stemcell, os))
    }
}

#[async_trait]
impl Director for BoshCli {
    async fn delete(&self, force: bool) -> Result<(), Error> {
        let mut args: Vec<OsString> = vec!["delete-deployment".into()];
        if force {
            args.push("--force".into());
        }
        self.run(args)
            .await
            .map_err(|err| Error::Delete(err.to_string()))
    }

    async fn deploy(&self, manifest: &[u8], params: &DeployParams) -> Result<(), Error> {
        self.try_deploy(manifest, params)
            .await
            .map_err(|err| Error::Deploy(err.to_string()))
    }

    async fn clean_up(&self) -> Result<(), Error> {
        self.run(vec!["clean-up".into()])
            .await
            .map_err(|err| Error::CleanUp(err.to_string()))
    }

    async fn interpolate(&self, manifest: &[u8], params: &InterpolateParams) -> Result<Vec<u8>, Error> {
        self.try_interpolate(manifest, params)
            .await
            .map_err(|err| Error::Interpolate(err.to_string()))
    }

    async fn download_manifest(&self) -> Result<Vec<u8>, Error> {
        match self.json(&["manifest"]).await {
            Ok(output) => Ok(output.blocks.unwrap_or_default().concat().into_bytes()),
            Err(CliError::Failed { output, .. }) if output.contains(DEPLOYMENT_NOT_FOUND) => {
                Err(Error::DeploymentNotFound(self.deployment.clone()))
            }
            Err(err) => Err(Error::DownloadManifest(err.to_string())),
        }
    }

    async fn export_releases(&self, target_dir: &Path, releases: &[ReleaseSpec]) -> Result<(), Error> {
        let (deployed, stemcell, os) = self.deployed_releases().await?;

        let mut exports = vec![];
        for release in releases {
            let slug = deployed
                .iter()
                .find(|slug| slug.name == release.name)
                .ok_or_else(|| {
                    Error::ExportReleases(format!("could not find release {} in deployment", release.name))
                })?;
            exports.push((release, slug));
        }

        for (release, slug) in exports {
            let mut args: Vec<OsString> = vec![
                "export-release".into(),
                slug.to_string().into(),
                format!("{os}/{}", stemcell.version).into(),
                "--dir".into(),
                target_dir.into(),
            ];
            for job in &release.jobs {
                args.push(format!("--job={job}").into());
            }
            self.run(args).await.map_err(|err| Error::ExportRelease {
                name: release.name.clone(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }

    async fn upload_release(&self, path: &Path) -> Result<(), Error> {
        self.run(vec!["upload-release".into(), path.into()])
            .await
            .map_err(|err| Error::UploadRelease {
                path: path.display().to_string(),
                reason: err.to_string(),
            })
    }

    async fn upload_stemcell(&self, path: &Path) -> Result<(), Error> {
        self.run(vec!["upload-stemcell".into(), path.into()])
            .await
            .map_err(|err| Error::UploadStemcell {
                path: path.display().to_string(),
                reason: err.to_string(),
            })
    }

    async fn upload_remote_stemcell(
        &self,
        url: &str,
        name: &str,
        version: &str,
        sha1: &str,
    ) -> Result<(), Error> {
        let args = vec![
            "upload-stemcell".into(),
            url.into(),
            format!("--name={name}").into(),
            format!("--version={version}").into(),
            format!("--sha1={sha1}").into(),
        ];
        self.run(args).await.map_err(|err| Error::UploadStemcell {
            path: url.to_string(),
            reason: err.to_string(),
        })
    }

    async fn info(&self) -> Result<Info, Error> {
        let output = self
            .json(&["environment"])
            .await
            .map_err(|err| Error::Info(err.to_string()))?;
        let cpi = output
            .rows()
            .map(|row| cell(row, "cpi"))
            .find(|cpi| !cpi.is_empty())
            .map(str::to_string);
        cpi.map(|cpi| Info { cpi })
            .ok_or_else(|| Error::Info("director did not report a cpi".into()))
    }

    async fn locks(&self) -> Result<Vec<Lock>, Error> {
        let output = self
            .json(&["locks"])
            .await
            .map_err(|err| Error::Locks(err.to_string()))?;
        Ok(parse_locks(&output))
    }
}

fn deploy_args(manifest: &Path, vars_file: Option<&Path>, params: &DeployParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["deploy".into(), manifest.into()];

    if params.no_redact {
        args.push("--no-redact".into());
    }
    if params.dry_run {
        args.push("--dry-run".into());
    }
    if params.recreate {
        args.push("--recreate".into());
    }
    if params.fix {
        args.push("--fix".into());
    }
    if let Some(max_in_flight) = params.max_in_flight {
        args.push(format!("--max-in-flight={max_in_flight}").into());
    }
    for instance_group in &params.skip_drain {
        args.push(format!("--skip-drain={instance_group}").into());
    }
    push_vars_flags(&mut args, &params.vars_files, vars_file);
    for (name, path) in &params.var_files {
        let mut flag = OsString::from(format!("--var-file={name}="));
        flag.push(path);
        args.push(flag);
    }
    push_ops_flags(&mut args, &params.ops_files);
    if let Some(vars_store) = &params.vars_store {
        args.push("--vars-store".into());
        args.push(vars_store.into());
    }

    args
}

fn interpolate_args(
    manifest: &Path,
    vars_file: Option<&Path>,
    params: &InterpolateParams,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["interpolate".into(), manifest.into()];
    push_vars_flags(&mut args, &params.vars_files, vars_file);
    push_ops_flags(&mut args, &params.ops_files);
    args
}

// Vars given inline in the request come last, so they win over vars files.
fn push_vars_flags(args: &mut Vec<OsString>, vars_files: &[PathBuf], inline_vars: Option<&Path>) {
    for path in vars_files.iter().map(PathBuf::as_path).chain(inline_vars) {
        args.push("--vars-file".into());
        args.push(path.into());
    }
}

fn push_ops_flags(args: &mut Vec<OsString>, ops_files: &[PathBuf]) {
    for path in ops_files {
        args.push("--ops-file".into());
        args.push(path.into());
    }
}

fn temp_file(prefix: &str, contents: &[u8]) -> Result<NamedTempFile, CliError> {
    let mut file = tempfile::Builder::new().prefix(prefix).tempfile()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

/// Request vars may be any JSON value, so they are handed over as a YAML vars file.
fn vars_file(vars: &BTreeMap<String, Value>) -> Result<Option<NamedTempFile>, CliError> {
    if vars.is_empty() {
        return Ok(None);
    }
    let yaml = serde_yaml::to_string(vars)?;
    temp_file("vars", yaml.as_bytes()).map(Some)
}

fn failure_text(stdout: &[u8], stderr: &[u8]) -> String {
    if let Ok(output) = serde_json::from_slice::<UiOutput>(stdout) {
        let lines = output.lines.unwrap_or_default();
        if !lines.is_empty() {
            return lines.join("\n");
        }
    }
    let mut text = String::from_utf8_lossy(stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim());
    }
    text
}

fn parse_locks(output: &UiOutput) -> Vec<Lock> {
    output
        .rows()
        .map(|row| Lock {
            resource_names: cell(row, "resource")
                .split(':')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        })
        .collect()
}

type Row = BTreeMap<String, Value>;

/// Output of the client in `--json` mode.
#[derive(Deserialize, Debug, Default)]
struct UiOutput {
    #[serde(rename = "Tables", default)]
    tables: Option<Vec<Table>>,
    #[serde(rename = "Blocks", default)]
    blocks: Option<Vec<String>>,
    #[serde(rename = "Lines", default)]
    lines: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct Table {
    #[serde(rename = "Rows", default)]
    rows: Option<Vec<Row>>,
}

impl UiOutput {
    fn rows(&self) -> impl Iterator<Item = &Row> {
        self.tables
            .iter()
            .flatten()
            .flat_map(|table| table.rows.iter().flatten())
    }
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).and_then(Value::as_str).unwrap_or_default()
}

/// `name/version` as printed by the client.
#[derive(Debug, Clone, PartialEq)]
struct Slug {
    name: String,
    version: String,
}

impl Slug {
    fn parse(slug: &str) -> Option<Self> {
        let (name, version) = slug.trim().split_once('/')?;
        Some(Self {
            name: name.to_string(),
            version: version.trim_end_matches('*').to_string(),
        })
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}
