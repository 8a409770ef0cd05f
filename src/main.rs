use bosh_deployment_resource::boshio::{self, BoshIo};
use bosh_deployment_resource::command::put::Put;
use bosh_deployment_resource::command::{check, get, put};
use bosh_deployment_resource::concourse::{self, CheckRequest, InRequest, OutRequest};
use bosh_deployment_resource::config::{self, Settings};
use bosh_deployment_resource::director::{self, cli::CliError, BoshCli, DeployLock};
use bosh_deployment_resource::storage;
use clap::{Parser, Subcommand};
use log::{debug, error};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use thiserror::Error;

/// Deploy to a BOSH director from a pipeline, and track what is deployed.
///
/// The request is read as JSON from standard input and the response is
/// written as JSON to standard output.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file, merged over the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Report the currently deployed version if it changed.
    Check,
    /// Fetch the deployed manifest into a directory.
    In {
        target_dir: PathBuf,
    },
    /// Deploy, or delete, the deployment using files from a directory.
    Out {
        sources_dir: PathBuf,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration file: {0}")]
    Config(#[from] config::Error),

    #[error("Cannot read configuration: {0}")]
    ReadRequest(#[source] std::io::Error),

    #[error(transparent)]
    Request(#[from] concourse::Error),

    #[error(transparent)]
    Director(#[from] CliError),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Catalog(#[from] boshio::Error),

    #[error(transparent)]
    Check(#[from] director::Error),

    #[error(transparent)]
    Get(#[from] get::Error),

    #[error(transparent)]
    Put(#[from] put::Error),

    #[error("Could not generate version: {0}")]
    Encode(#[from] serde_json::Error),
}

fn read_config(args: &Cli) -> Result<Settings, Error> {
    Ok(match &args.config {
        Some(path) => Settings::default_with_user_config_file(path)?,
        None => Settings::default(),
    })
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

async fn run() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();
    let settings = read_config(&args)?;

    let mut request = vec![];
    std::io::stdin()
        .read_to_end(&mut request)
        .map_err(Error::ReadRequest)?;

    match &args.command {
        Commands::Check => {
            let request = CheckRequest::parse(&request)?;
            let versions = check::run(&request, || {
                BoshCli::new(&settings.bosh.cli, &request.source).map_err(Error::from)
            })
            .await?;
            respond(&versions)
        }
        Commands::In { target_dir } => {
            let request = InRequest::parse(&request)?;
            let director = BoshCli::new(&settings.bosh.cli, &request.source)?;
            let response = get::run(&director, &request, target_dir).await?;
            respond(&response)
        }
        Commands::Out { sources_dir } => {
            let request = OutRequest::parse(&request, sources_dir)?;
            let director = BoshCli::new(&settings.bosh.cli, &request.source)?;
            let storage = storage::new_storage_client(&request.source, &settings.gcs).await?;
            let catalog = BoshIo::new(&settings.boshio.url)?;

            let timeout = request.source.lock_timeout().or(settings.lock.timeout());
            debug!("lock poll interval {:?}, timeout {:?}", settings.lock.poll_interval(), timeout);

            let put = Put {
                director: &director,
                storage: storage.as_deref(),
                catalog: &catalog,
                lock: DeployLock::new(settings.lock.poll_interval(), timeout),
                sources_dir,
            };
            let response = put.run(&request, &mut std::io::stderr()).await?;
            respond(&response)
        }
    }
}

fn respond(response: &impl Serialize) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
