//! Drives a session of "bring the stack up" / "bring the stack down" over
//! the registry's dependency graph.
//!
//! Startup walks the topological start order on a single orchestrating
//! task: resolve environment, spawn, wait for readiness, record the
//! outcome. Teardown walks the reverse order and is best-effort: one
//! failing stop never prevents attempting the rest. The handle map has a
//! single writer (the session itself); observers get cloned snapshots.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod report;

pub use error::Error;
pub use report::{ServiceOutcome, ServiceRow, SessionReport};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use geostack_environment::ResolvedPath;
use geostack_readiness::{Outcome as ProbeOutcome, ProbeContext, ReadinessChecker};
use geostack_registry::{
    OnFailure, ProbeTarget, ReadinessSpec, ServiceDefinition, ServiceRegistry, StopMethod,
};
use geostack_stopper::{ServiceStopper, StopOutcome};
use geostack_supervisor::{ProcessHandle, ProcessSupervisor, ServiceStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the session currently is in its lifecycle. Purely observational;
/// transitions are logged as they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Idle,
    Resolving,
    Starting(String),
    Running,
    StoppingRequested,
    Stopping(String),
    Stopped,
    FatalError,
}

/// Options for building an [`Orchestrator`].
pub struct OrchestratorOptions {
    /// The validated service registry.
    pub registry: ServiceRegistry,

    /// Directory receiving the per-service log sinks.
    pub log_dir: PathBuf,

    /// When set, overrides every service's `onFailure` policy.
    pub on_failure: Option<OnFailure>,

    /// Token an external stop request arrives on.
    pub cancel: CancellationToken,
}

/// Composes registry, environment resolution, supervision, readiness and
/// stopping into one operator-facing session.
pub struct Orchestrator {
    registry: ServiceRegistry,
    supervisor: ProcessSupervisor,
    checker: ReadinessChecker,
    stopper: ServiceStopper,
    handles: HashMap<String, ProcessHandle>,
    cancel: CancellationToken,
    on_failure: Option<OnFailure>,
    state: SessionState,
}

impl Orchestrator {
    /// Creates an idle session over the given registry.
    #[must_use]
    pub fn new(options: OrchestratorOptions) -> Self {
        Self {
            registry: options.registry,
            supervisor: ProcessSupervisor::new(options.log_dir),
            checker: ReadinessChecker::new(),
            stopper: ServiceStopper::new(),
            handles: HashMap::new(),
            cancel: options.cancel,
            on_failure: options.on_failure,
            state: SessionState::Idle,
        }
    }

    /// Consistent snapshot of the statuses this session tracks, for
    /// read-only observers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ServiceStatus)> {
        self.handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.status()))
            .collect()
    }

    /// Brings the stack up in dependency order.
    ///
    /// With `only`, the selection is the named services plus their
    /// transitive dependencies. Per-service failures land in the report;
    /// the session only errors out for configuration-class problems.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`] for an invalid `--only` selection and
    /// [`Error::Environment`] when a strict fallback cannot be resolved
    /// (everything already running is torn down first).
    pub async fn up(&mut self, only: Option<&[String]>) -> Result<SessionReport, Error> {
        self.enter(SessionState::Resolving);

        let included = match only {
            Some(names) => Some(self.registry.dependency_closure(names)?),
            None => None,
        };
        let start_defs: Vec<ServiceDefinition> = self.registry.start_order().cloned().collect();
        let stop_defs: Vec<ServiceDefinition> = self.registry.stop_order().cloned().collect();

        let mut report = SessionReport::default();
        let mut ready: HashMap<String, bool> = HashMap::new();
        let mut aborted = false;

        for def in &start_defs {
            if excluded(included.as_ref(), &def.name) {
                continue;
            }

            if !aborted && self.cancel.is_cancelled() {
                info!("stop requested, unwinding");
                self.teardown_running(&stop_defs, &mut report).await;
                aborted = true;
            }
            if aborted {
                report.record(&def.name, ServiceOutcome::NotAttempted);
                ready.insert(def.name.clone(), false);
                continue;
            }

            self.enter(SessionState::Starting(def.name.clone()));

            // A failed dependency is never silently ignored: the dependent
            // is marked failed without being spawned.
            if let Some(dep) = def
                .depends_on
                .iter()
                .find(|dep| ready.get(dep.as_str()) == Some(&false))
            {
                warn!(service = %def.name, dependency = %dep, "dependency failed, not starting");
                report.record(
                    &def.name,
                    ServiceOutcome::DependencyFailed {
                        dependency: dep.clone(),
                    },
                );
                ready.insert(def.name.clone(), false);
                continue;
            }

            if def.externally_managed {
                let ok = self.probe_external(def).await;
                report.record(
                    &def.name,
                    if ok {
                        ServiceOutcome::ExternalReady
                    } else {
                        ServiceOutcome::ExternalUnavailable
                    },
                );
                ready.insert(def.name.clone(), ok);
                if !ok && self.policy(def) == OnFailure::Abort {
                    self.teardown_running(&stop_defs, &mut report).await;
                    aborted = true;
                }
                continue;
            }

            let overlay = match geostack_environment::resolve_all(&def.env_fallback) {
                Ok(resolved) => overlay_from(&resolved),
                Err(e) => {
                    report.record(
                        &def.name,
                        ServiceOutcome::EnvUnresolved {
                            reason: e.to_string(),
                        },
                    );
                    self.teardown_running(&stop_defs, &mut report).await;
                    self.enter(SessionState::FatalError);
                    return Err(e.into());
                }
            };

            let mut handle = match self.supervisor.start(def, &overlay) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(service = %def.name, error = %e, "spawn failed");
                    report.record(
                        &def.name,
                        ServiceOutcome::SpawnFailed {
                            reason: e.to_string(),
                        },
                    );
                    ready.insert(def.name.clone(), false);
                    if self.policy(def) == OnFailure::Abort {
                        self.teardown_running(&stop_defs, &mut report).await;
                        aborted = true;
                    }
                    continue;
                }
            };

            let ctx = ProbeContext {
                started_at: handle.started_at(),
            };
            let outcome = match &def.readiness {
                None => {
                    handle.transition(ServiceStatus::Running);
                    ProbeOutcome::Ready { attempts: 0 }
                }
                Some(spec) => self.checker.wait_ready(spec, &ctx, &self.cancel).await,
            };

            match outcome {
                ProbeOutcome::Ready { attempts } => {
                    handle.transition(ServiceStatus::Running);
                    info!(service = %def.name, pid = handle.pid(), "ready");
                    report.record(
                        &def.name,
                        ServiceOutcome::Ready {
                            pid: handle.pid(),
                            attempts,
                        },
                    );
                    ready.insert(def.name.clone(), true);
                    self.handles.insert(def.name.clone(), handle);
                }
                ProbeOutcome::TimedOut { attempts } => {
                    // Left running on purpose: healthiness and liveness are
                    // tracked separately.
                    handle.transition(ServiceStatus::Failed);
                    warn!(service = %def.name, pid = handle.pid(), "never became ready");
                    report.record(
                        &def.name,
                        ServiceOutcome::TimedOut {
                            pid: handle.pid(),
                            attempts,
                        },
                    );
                    ready.insert(def.name.clone(), false);
                    self.handles.insert(def.name.clone(), handle);
                    if self.policy(def) == OnFailure::Abort {
                        self.teardown_running(&stop_defs, &mut report).await;
                        aborted = true;
                    }
                }
                ProbeOutcome::Interrupted => {
                    // No process is abandoned: the partial start is
                    // terminated before any further cleanup.
                    info!(service = %def.name, "start interrupted, terminating");
                    if let Err(e) = self.stopper.stop_tracked(&mut handle, &def.stop).await {
                        warn!(service = %def.name, error = %e, "failed to terminate partial start");
                    }
                    report.record(&def.name, ServiceOutcome::Interrupted);
                    ready.insert(def.name.clone(), false);
                    self.teardown_running(&stop_defs, &mut report).await;
                    aborted = true;
                }
            }
        }

        if aborted {
            self.enter(SessionState::Stopped);
        } else {
            self.enter(SessionState::Running);
        }
        Ok(report)
    }

    /// Brings the stack down in reverse dependency order, best-effort.
    ///
    /// Services tracked by this session are stopped through their handles;
    /// anything else goes through untracked discovery, the degraded
    /// fallback. A failing stop is recorded and the walk continues.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`] if `only` names an unknown service.
    pub async fn down(&mut self, only: Option<&[String]>) -> Result<SessionReport, Error> {
        let included = match only {
            Some(names) => Some(self.registry.validate_names(names)?),
            None => None,
        };
        let stop_defs: Vec<ServiceDefinition> = self.registry.stop_order().cloned().collect();

        let mut report = SessionReport::default();
        self.enter(SessionState::StoppingRequested);

        for def in &stop_defs {
            if excluded(included.as_ref(), &def.name) {
                continue;
            }
            self.enter(SessionState::Stopping(def.name.clone()));

            if def.externally_managed {
                report.record(&def.name, ServiceOutcome::SkippedExternal);
                continue;
            }

            let result = if let Some(handle) = self.handles.get_mut(&def.name) {
                self.stopper.stop_tracked(handle, &def.stop).await
            } else {
                self.stopper.stop_untracked(def).await
            };
            self.handles.remove(&def.name);

            match result {
                Ok(outcome) => report.record(&def.name, stop_row(outcome)),
                Err(e) => {
                    warn!(service = %def.name, error = %e, "stop failed");
                    report.record(
                        &def.name,
                        ServiceOutcome::StopFailed {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        self.enter(SessionState::Stopped);
        Ok(report)
    }

    /// Read-only health view over every definition. Probes what can be
    /// probed and manages nothing.
    pub async fn status(&self) -> SessionReport {
        let mut report = SessionReport::default();
        let epoch = ProbeContext {
            started_at: SystemTime::UNIX_EPOCH,
        };

        for def in self.registry.start_order() {
            let outcome = if let Some(spec) = &def.readiness {
                if self.checker.probe_once(spec, &epoch).await {
                    ServiceOutcome::Healthy
                } else {
                    ServiceOutcome::Unreachable
                }
            } else {
                match &def.stop.method {
                    StopMethod::PortOwner { port } => {
                        let spec = port_spec(*port);
                        if self.checker.probe_once(&spec, &epoch).await {
                            ServiceOutcome::Healthy
                        } else {
                            ServiceOutcome::Unreachable
                        }
                    }
                    StopMethod::ImageName { image } => {
                        if geostack_stopper::pids_by_image_name(image).is_empty() {
                            ServiceOutcome::Unreachable
                        } else {
                            ServiceOutcome::Healthy
                        }
                    }
                    StopMethod::Signal => ServiceOutcome::Unprobed,
                }
            };
            report.record(&def.name, outcome);
        }

        report
    }

    /// Effective failure policy for one service.
    fn policy(&self, def: &ServiceDefinition) -> OnFailure {
        self.on_failure.unwrap_or_else(|| {
            def.readiness
                .as_ref()
                .map_or(OnFailure::Abort, |spec| spec.on_failure)
        })
    }

    /// Probes an externally managed dependency so dependents can proceed.
    async fn probe_external(&self, def: &ServiceDefinition) -> bool {
        match &def.readiness {
            None => true,
            Some(spec) => {
                let epoch = ProbeContext {
                    started_at: SystemTime::UNIX_EPOCH,
                };
                self.checker
                    .wait_ready(spec, &epoch, &self.cancel)
                    .await
                    .is_ready()
            }
        }
    }

    /// Reverse-order stop of everything this session got to `Running`.
    /// Best-effort: failures are logged and recorded, never propagated.
    async fn teardown_running(&mut self, stop_defs: &[ServiceDefinition], report: &mut SessionReport) {
        self.enter(SessionState::StoppingRequested);

        for def in stop_defs {
            let running = self
                .handles
                .get(&def.name)
                .is_some_and(|handle| handle.status() == ServiceStatus::Running);
            if !running {
                continue;
            }

            self.enter(SessionState::Stopping(def.name.clone()));
            let result = if let Some(handle) = self.handles.get_mut(&def.name) {
                self.stopper.stop_tracked(handle, &def.stop).await
            } else {
                continue;
            };

            match result {
                Ok(StopOutcome::Stopped { pids }) => {
                    report.record(&def.name, ServiceOutcome::Stopped { pids });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(service = %def.name, error = %e, "teardown stop failed");
                    report.record(
                        &def.name,
                        ServiceOutcome::StopFailed {
                            reason: e.to_string(),
                        },
                    );
                }
            }
            self.handles.remove(&def.name);
        }

        self.enter(SessionState::Stopped);
    }

    fn enter(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }
}

fn excluded(included: Option<&HashSet<String>>, name: &str) -> bool {
    included.is_some_and(|set| !set.contains(name))
}

fn overlay_from(resolved: &[ResolvedPath]) -> BTreeMap<String, String> {
    resolved
        .iter()
        .map(|r| {
            (
                r.variable.clone(),
                r.path.to_string_lossy().into_owned(),
            )
        })
        .collect()
}

fn stop_row(outcome: StopOutcome) -> ServiceOutcome {
    match outcome {
        StopOutcome::Stopped { pids } => ServiceOutcome::Stopped { pids },
        StopOutcome::NoMatches => ServiceOutcome::NoMatches,
        StopOutcome::Skipped => ServiceOutcome::SkippedExternal,
    }
}

fn port_spec(port: u16) -> ReadinessSpec {
    ReadinessSpec {
        probe: ProbeTarget::Port(port),
        interval: Duration::from_secs(1),
        timeout: Duration::from_secs(5),
        max_attempts: 1,
        on_failure: OnFailure::Continue,
    }
}
