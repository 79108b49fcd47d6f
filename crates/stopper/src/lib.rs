//! Stops managed services: gracefully for processes tracked by this
//! session, by discovery for processes a previous invocation left behind.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod discovery;
mod error;

pub use discovery::{pids_by_image_name, pids_by_port};
pub use error::Error;

use std::time::Duration;

use geostack_registry::{ServiceDefinition, StopMethod, StopSpec};
use geostack_supervisor::{ProcessHandle, ServiceStatus, pid_alive};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often survivors are re-checked while a grace period runs out.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a stop attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The listed pids were terminated.
    Stopped {
        /// Every pid that was signalled, in the order they were found.
        pids: Vec<u32>,
    },
    /// Discovery found nothing to stop.
    NoMatches,
    /// The service is externally managed and was not touched.
    Skipped,
}

/// Stops tracked handles gracefully and discovers untracked processes by
/// image name or listening port.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceStopper;

impl ServiceStopper {
    /// Creates a stopper.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Gracefully stops a process tracked by this session: SIGTERM, a
    /// bounded wait of `grace_period`, then SIGKILL if still alive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExited`] if the process was already gone and
    /// [`Error::Privilege`] if it may not be signalled. Callers treat these
    /// as log-and-continue conditions during teardown.
    pub async fn stop_tracked(
        &self,
        handle: &mut ProcessHandle,
        spec: &StopSpec,
    ) -> Result<StopOutcome, Error> {
        let pid = handle.pid();

        if !handle.is_alive() {
            handle.transition(ServiceStatus::Stopped);
            return Err(Error::AlreadyExited(pid));
        }

        info!(service = %handle.name(), pid, "stopping");
        send_signal(pid, Signal::SIGTERM)?;

        let graceful = match handle.child_mut() {
            Some(child) => tokio::time::timeout(spec.grace_period, child.wait())
                .await
                .is_ok(),
            None => wait_for_exit(pid, spec.grace_period).await,
        };

        if !graceful {
            warn!(service = %handle.name(), pid, "grace period elapsed, killing");
            match handle.child_mut() {
                Some(child) => child
                    .kill()
                    .await
                    .map_err(|e| Error::Io("failed to kill process", e))?,
                None => {
                    send_signal(pid, Signal::SIGKILL)?;
                }
            }
        }

        handle.transition(ServiceStatus::Stopped);
        info!(service = %handle.name(), pid, "stopped");
        Ok(StopOutcome::Stopped { pids: vec![pid] })
    }

    /// Stops a service no handle exists for in this session, discovering
    /// its processes by the definition's stop method.
    ///
    /// Every match is stopped and logged individually; an empty match set
    /// is a no-op, not an error. Externally managed definitions are never
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Privilege`] when every discovered process refused
    /// the signal, or [`Error::Io`] if port discovery cannot read the
    /// kernel socket tables.
    pub async fn stop_untracked(
        &self,
        definition: &ServiceDefinition,
    ) -> Result<StopOutcome, Error> {
        if definition.externally_managed {
            debug!(service = %definition.name, "externally managed, not touching");
            return Ok(StopOutcome::Skipped);
        }

        let pids = match &definition.stop.method {
            StopMethod::Signal => {
                warn!(
                    service = %definition.name,
                    "no tracked handle in this session and stop method is signal; nothing to do"
                );
                return Ok(StopOutcome::NoMatches);
            }
            StopMethod::ImageName { image } => discovery::pids_by_image_name(image),
            StopMethod::PortOwner { port } => discovery::pids_by_port(*port)
                .map_err(|e| Error::Io("failed to inspect socket tables", e))?,
        };

        if pids.is_empty() {
            debug!(service = %definition.name, "no matching processes");
            return Ok(StopOutcome::NoMatches);
        }

        self.terminate_all(&definition.name, &pids, definition.stop.grace_period)
            .await
    }

    /// SIGTERMs every pid, waits out the grace period, SIGKILLs survivors.
    async fn terminate_all(
        &self,
        service: &str,
        pids: &[u32],
        grace_period: Duration,
    ) -> Result<StopOutcome, Error> {
        let mut signalled = Vec::new();
        let mut denied = Vec::new();

        for &pid in pids {
            match send_signal(pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(service, pid, "terminating discovered process");
                    signalled.push(pid);
                }
                Err(Error::AlreadyExited(_)) => {
                    debug!(service, pid, "discovered process already gone");
                }
                Err(Error::Privilege(_)) => {
                    warn!(service, pid, "not allowed to signal discovered process");
                    denied.push(pid);
                }
                Err(e) => return Err(e),
            }
        }

        if signalled.is_empty() {
            return match denied.first() {
                Some(&pid) => Err(Error::Privilege(pid)),
                None => Ok(StopOutcome::NoMatches),
            };
        }

        let deadline = Instant::now() + grace_period;
        let mut survivors: Vec<u32> = signalled.clone();
        while !survivors.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(REAP_POLL_INTERVAL).await;
            survivors.retain(|&pid| pid_alive(pid));
        }

        for &pid in &survivors {
            warn!(service, pid, "grace period elapsed, killing");
            if let Err(e) = send_signal(pid, Signal::SIGKILL) {
                warn!(service, pid, error = %e, "force kill failed");
            }
        }

        Ok(StopOutcome::Stopped { pids: signalled })
    }
}

/// Polls a pid we do not own a child handle for until it exits or the
/// deadline passes. Returns whether the process exited in time.
async fn wait_for_exit(pid: u32, grace_period: Duration) -> bool {
    let deadline = Instant::now() + grace_period;
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(REAP_POLL_INTERVAL).await;
    }
    !pid_alive(pid)
}

fn send_signal(pid: u32, sig: Signal) -> Result<(), Error> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(Error::AlreadyExited(pid)),
        Err(Errno::EPERM) => Err(Error::Privilege(pid)),
        Err(source) => Err(Error::Signal { pid, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use geostack_supervisor::ProcessSupervisor;

    fn definition(json: serde_json::Value) -> ServiceDefinition {
        serde_json::from_value(json).unwrap()
    }

    fn stop_spec(grace: &str) -> StopSpec {
        serde_json::from_value(serde_json::json!({
            "method": "signal",
            "gracePeriod": grace,
        }))
        .unwrap()
    }

    async fn spawn(command: &str, args: &[&str]) -> (tempfile::TempDir, ProcessHandle) {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(dir.path());
        let def = definition(serde_json::json!({
            "name": "under-test",
            "command": command,
            "args": args,
        }));
        let handle = supervisor.start(&def, &BTreeMap::new()).unwrap();
        (dir, handle)
    }

    #[tokio::test]
    async fn stops_a_cooperative_process_within_grace() {
        let (_dir, mut handle) = spawn("sleep", &["30"]).await;

        let outcome = ServiceStopper::new()
            .stop_tracked(&mut handle, &stop_spec("5s"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pids: vec![handle.pid()]
            }
        );
        assert_eq!(handle.status(), ServiceStatus::Stopped);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn force_kills_after_the_grace_period() {
        let (_dir, mut handle) = spawn("sh", &["-c", "trap '' TERM; sleep 30"]).await;
        // Give the shell a beat to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let outcome = ServiceStopper::new()
            .stop_tracked(&mut handle, &stop_spec("300ms"))
            .await
            .unwrap();

        assert!(matches!(outcome, StopOutcome::Stopped { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn already_exited_is_reported_as_an_error() {
        let (_dir, mut handle) = spawn("true", &[]).await;
        handle.child_mut().unwrap().wait().await.unwrap();

        let err = ServiceStopper::new()
            .stop_tracked(&mut handle, &stop_spec("1s"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExited(_)));
    }

    #[tokio::test]
    async fn externally_managed_is_never_touched() {
        let def = definition(serde_json::json!({
            "name": "shared-db",
            "command": "postgres",
            "stop": {"method": "imageName", "image": "postgres"},
            "externallyManaged": true,
        }));

        let outcome = ServiceStopper::new().stop_untracked(&def).await.unwrap();
        assert_eq!(outcome, StopOutcome::Skipped);
    }

    #[tokio::test]
    async fn unbound_port_is_a_no_op() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let def = definition(serde_json::json!({
            "name": "tile-server",
            "command": "titiler",
            "stop": {"method": "portOwner", "port": port},
        }));

        let outcome = ServiceStopper::new().stop_untracked(&def).await.unwrap();
        assert_eq!(outcome, StopOutcome::NoMatches);
    }

    #[tokio::test]
    async fn unknown_image_name_is_a_no_op() {
        let def = definition(serde_json::json!({
            "name": "ghost",
            "command": "ghost",
            "stop": {"method": "imageName", "image": "geostack-no-such-process"},
        }));

        let outcome = ServiceStopper::new().stop_untracked(&def).await.unwrap();
        assert_eq!(outcome, StopOutcome::NoMatches);
    }

    #[tokio::test]
    async fn untracked_signal_method_has_nothing_to_do() {
        let def = definition(serde_json::json!({
            "name": "api",
            "command": "uvicorn",
        }));

        let outcome = ServiceStopper::new().stop_untracked(&def).await.unwrap();
        assert_eq!(outcome, StopOutcome::NoMatches);
    }
}
