// Entry point of the build-worker process.
//
// `build-worker run --job <file|->` executes one unit of work and exits with
// a return code that encodes the build status (100 + status).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use worker_common::constants::variables::settings as setting_env;
use worker_common::{BuildStatus, ConfigurationStore, StatusUtil, WorkerSettings};

use build_worker::worker::{load_work_unit, Worker};

#[derive(Parser, Debug)]
#[command(name = "build-worker", version, about = "Build worker")]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// Emit diagnostics as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

/// Overrides applied on top of the settings file.
#[derive(Args, Debug)]
struct SettingsArgs {
    /// JSON settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Controller API URL.
    #[arg(long, global = true, env = setting_env::API)]
    api: Option<String>,

    #[arg(long, global = true, env = setting_env::TOKEN, hide_env_values = true)]
    token: Option<String>,

    /// Worker name; defaults to the host name.
    #[arg(long, global = true, env = setting_env::NAME)]
    name: Option<String>,

    /// Directory under which build sandboxes are created.
    #[arg(long, global = true, env = setting_env::BASE_DIR)]
    basedir: Option<PathBuf>,

    #[arg(long, global = true, env = setting_env::PLUGINS_DIR)]
    plugins_dir: Option<PathBuf>,

    /// Accept invalid TLS certificates from the controller.
    #[arg(long, global = true, env = setting_env::TLS_NO_VERIFY)]
    tls_no_verify: bool,
}

impl SettingsArgs {
    fn resolve(self) -> Result<WorkerSettings> {
        let mut settings = match self.config {
            Some(ref path) => ConfigurationStore::new(path).get_settings()?,
            None => WorkerSettings::default(),
        };

        if let Some(api) = self.api {
            settings.api_url = api;
        }
        if self.token.is_some() {
            settings.token = self.token;
        }
        if let Some(name) = self.name {
            settings.name = name;
        }
        if settings.name.is_empty() {
            settings.name = hostname::get()
                .context("Cannot determine host name")?
                .to_string_lossy()
                .into_owned();
        }
        if let Some(basedir) = self.basedir {
            settings.base_dir = basedir;
        }
        if let Some(plugins_dir) = self.plugins_dir {
            settings.plugins_dir = plugins_dir;
        }
        settings.tls_no_verify |= self.tls_no_verify;

        Ok(settings)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one unit of work.
    Run {
        /// Work unit JSON file, `-` for standard input.
        #[arg(long, default_value = "-")]
        job: String,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build Tokio runtime: {e}");
            std::process::exit(StatusUtil::translate_to_return_code(BuildStatus::Fail));
        }
    };

    let exit_code = runtime.block_on(async move { run(cli).await });
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    tracing::info!("Worker process starting.");

    let status = match execute(cli).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("Worker failed: {e:#}");
            BuildStatus::Fail
        }
    };

    let return_code = StatusUtil::translate_to_return_code(status);
    tracing::info!("Worker exiting with status {status} (return code {return_code})");
    return_code
}

async fn execute(cli: Cli) -> Result<BuildStatus> {
    let settings = cli.settings.resolve()?;
    tracing::debug!(?settings, "Resolved settings");

    match cli.command {
        Command::Run { job } => {
            let work = load_work_unit(&job)?;
            let result = Worker::new(settings).run(work).await?;
            Ok(result.status)
        }
    }
}
