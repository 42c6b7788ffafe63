//! oci-metadata-scripts - runs startup and shutdown scripts from OCI metadata
//!
//! Scripts are declared in the instance metadata as `<type>-script` (local
//! path or base64 payload) and `<type>-script-url` (http(s) URL or
//! `oci://bucket@namespace/object`).

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use oci_metadata_scripts::metadata::MetadataSource;
use oci_metadata_scripts::metadata::oci::{OCI_METADATA_URL, OciMetadata};
use oci_metadata_scripts::objectstorage::{InstancePrincipal, OciObjectStorage};
use oci_metadata_scripts::scripts::runner::DEFAULT_SHELL;
use oci_metadata_scripts::scripts::{ScriptRunner, SourceResolver};
use oci_metadata_scripts::workdir::WORK_ROOT;
use oci_metadata_scripts::{ScriptPipeline, ScriptType, WorkDir};

#[derive(Parser)]
#[command(name = "oci-metadata-scripts")]
#[command(
    author,
    version,
    about = "Run startup and shutdown scripts from OCI instance metadata",
    long_about = None
)]
struct Cli {
    /// Display debug information and keep the work directory
    #[arg(long, env = "OCI_SCRIPTS_DEBUG")]
    debug: bool,

    /// Script type to run (startup or shutdown)
    #[arg(long, env = "OCI_SCRIPTS_TYPE", default_value = "unknown")]
    script_type: String,

    /// Directory under which the per-run work directory is created
    #[arg(long, env = "OCI_SCRIPTS_WORK_DIR", default_value = WORK_ROOT)]
    work_dir: PathBuf,

    /// Shell used to run scripts
    #[arg(long, env = "OCI_SCRIPTS_SHELL", default_value = DEFAULT_SHELL)]
    shell: PathBuf,

    /// Base URL of the instance metadata service
    #[arg(long, env = "OCI_SCRIPTS_METADATA_URL", default_value = OCI_METADATA_URL)]
    metadata_url: String,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let script_type: ScriptType = cli
        .script_type
        .parse()
        .context("no valid argument specified for script type")?;

    info!("starting {} scripts", script_type);

    let work_dir = WorkDir::create(&cli.work_dir, script_type)
        .context("error creating temp work directory")?;

    let result = run_in(&cli, script_type, &work_dir).await;

    if let Err(e) = work_dir.finish(cli.debug) {
        warn!("{}", e);
    }

    result
}

async fn run_in(cli: &Cli, script_type: ScriptType, work_dir: &WorkDir) -> anyhow::Result<()> {
    let metadata_source = OciMetadata::with_base_url(&cli.metadata_url)?;
    let metadata = metadata_source
        .get_metadata()
        .await
        .with_context(|| format!("error retrieving {script_type} scripts"))?;

    let authenticator = InstancePrincipal::new(metadata_source.clone())?;
    let object_store = OciObjectStorage::new(Arc::new(authenticator))?;
    let resolver = SourceResolver::new(work_dir.path(), Arc::new(object_store))?;
    let runner = ScriptRunner::new(work_dir.path()).with_shell(&cli.shell);

    let summary = ScriptPipeline::new(script_type, resolver, runner)
        .run(&metadata)
        .await;

    if summary.failed() > 0 {
        warn!(
            "{} of {} {} scripts failed",
            summary.failed(),
            summary.discovered(),
            script_type
        );
    }

    Ok(())
}
