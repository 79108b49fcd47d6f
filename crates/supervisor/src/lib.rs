//! Spawns managed services as child processes with a per-service
//! environment overlay and an append-only log sink.
//!
//! Starting is non-blocking: the returned handle is in `Starting` state and
//! readiness is observed separately. The orchestrator's own environment is
//! never mutated; each child gets a minimal base environment with the
//! definition's overlay merged on top.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod handle;

pub use error::Error;
pub use handle::{ProcessHandle, ServiceStatus, pid_alive};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::SystemTime;

use geostack_registry::ServiceDefinition;
use tokio::process::Command;
use tracing::info;

/// Environment variables passed through from the orchestrator to every
/// child. Everything else comes from the definition's overlay.
const BASE_ENV: [&str; 3] = ["PATH", "HOME", "TMPDIR"];

/// Spawns service processes and owns the per-service log directory.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    log_dir: PathBuf,
}

impl ProcessSupervisor {
    /// Creates a supervisor writing log sinks under `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    /// Path of the append-only log sink for a service.
    #[must_use]
    pub fn log_path(&self, service: &str) -> PathBuf {
        self.log_dir.join(format!("{service}.log"))
    }

    /// Spawns the service with `overlay` merged over the minimal base
    /// environment, wiring stdout and stderr to the service's log sink.
    ///
    /// Returns immediately with a handle in `Starting` state. The log sink
    /// is attached at the OS level, so output keeps flowing for the
    /// lifetime of the process even after this session ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] synchronously if the binary cannot be found
    /// or launched; there is no retry at this layer.
    pub fn start(
        &self,
        definition: &ServiceDefinition,
        overlay: &BTreeMap<String, String>,
    ) -> Result<ProcessHandle, Error> {
        std::fs::create_dir_all(&self.log_dir)
            .map_err(|e| Error::Io("failed to create log directory", e))?;

        let sink = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.log_path(&definition.name))
            .map_err(|e| Error::Io("failed to open log sink", e))?;
        let sink_err = sink
            .try_clone()
            .map_err(|e| Error::Io("failed to clone log sink", e))?;

        let mut command = Command::new(&definition.command);
        command.args(&definition.args);

        command.env_clear();
        for key in BASE_ENV {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        command.envs(&definition.env);
        command.envs(overlay);

        if let Some(workdir) = &definition.workdir {
            command.current_dir(workdir);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(sink))
            .stderr(Stdio::from(sink_err));

        let started_at = SystemTime::now();
        let child = command.spawn().map_err(|e| Error::Spawn {
            command: definition.command.clone(),
            source: e,
        })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::MissingPid(definition.name.clone()))?;

        info!(
            service = %definition.name,
            pid,
            log = %self.log_path(&definition.name).display(),
            "spawned"
        );

        Ok(ProcessHandle::new(
            definition.name.clone(),
            pid,
            started_at,
            child,
        ))
    }
}
