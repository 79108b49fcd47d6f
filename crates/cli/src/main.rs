//! Operator CLI: bring the geospatial service stack up, down, or ask how
//! it is doing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use geostack_orchestrator::{Orchestrator, OrchestratorOptions};
use geostack_registry::{OnFailure, ServiceRegistry};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Exit code when one or more services failed to reach ready under abort
/// semantics, or a stop attempt failed.
const EXIT_SESSION_FAILED: u8 = 1;

/// Exit code for configuration errors: cyclic or duplicate definitions, an
/// unknown service selection, or an unresolved strict environment variable.
const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Clone, Debug, Parser)]
#[command(name = "geostack", version, about, long_about = None)]
struct Args {
    /// Path to the stack definition file
    #[arg(long, default_value = "stack.json", env = "GEOSTACK_CONFIG")]
    config: PathBuf,

    /// Directory receiving one append-only log file per service
    #[arg(long, default_value = "/tmp/geostack/logs", env = "GEOSTACK_LOG_DIR")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Start services in dependency order
    Up {
        /// Restrict to these services plus their transitive dependencies
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Override every service's own onFailure policy for this run
        #[arg(long, value_enum)]
        on_failure: Option<OnFailureArg>,
    },
    /// Stop services in reverse dependency order
    Down {
        /// Restrict to exactly these services
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },
    /// Probe every service and report its health, managing nothing
    Status,
}

/// Command-line spelling of the failure propagation policy.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnFailureArg {
    /// Tear down everything already running and fail the session.
    Abort,
    /// Record the failure and keep starting the remaining services.
    Continue,
}

impl From<OnFailureArg> for OnFailure {
    fn from(arg: OnFailureArg) -> Self {
        match arg {
            OnFailureArg::Abort => Self::Abort,
            OnFailureArg::Continue => Self::Continue,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let registry = match ServiceRegistry::from_json_file(&args.config) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let on_failure = match &args.command {
        Command::Up { on_failure, .. } => on_failure.map(Into::into),
        _ => None,
    };

    let mut orchestrator = Orchestrator::new(OrchestratorOptions {
        registry,
        log_dir: args.log_dir,
        on_failure,
        cancel,
    });

    let result = match args.command {
        Command::Up { only, .. } => orchestrator.up(selection(&only)).await,
        Command::Down { only } => orchestrator.down(selection(&only)).await,
        Command::Status => Ok(orchestrator.status().await),
    };

    match result {
        Ok(report) => {
            print!("{report}");
            if report.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_SESSION_FAILED)
            }
        }
        Err(e) => {
            eprintln!("configuration error: {e}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

const fn selection(names: &[String]) -> Option<&[String]> {
    if names.is_empty() { None } else { Some(names) }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if cfg!(unix) {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler failed");
            let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler failed");

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        } else {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt signal");
        }

        info!("stop requested");
        cancel.cancel();
    });
}
