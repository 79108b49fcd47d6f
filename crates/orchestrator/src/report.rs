use std::fmt;

/// Per-service result of an `up`, `down` or `status` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Started and confirmed ready.
    Ready {
        /// Pid of the spawned process.
        pid: u32,
        /// Probes issued; zero when no readiness probe is declared.
        attempts: u32,
    },
    /// Externally managed dependency answered its probe (or has none).
    ExternalReady,
    /// Externally managed dependency did not answer its probe.
    ExternalUnavailable,
    /// The command could not be launched.
    SpawnFailed {
        /// Why the spawn failed.
        reason: String,
    },
    /// A mandatory environment variable could not be resolved.
    EnvUnresolved {
        /// Why the resolution failed.
        reason: String,
    },
    /// Spawned but never answered ready; the process is left running.
    TimedOut {
        /// Pid of the still-running process.
        pid: u32,
        /// Probes issued before giving up.
        attempts: u32,
    },
    /// Not spawned because a dependency failed.
    DependencyFailed {
        /// The dependency that failed first.
        dependency: String,
    },
    /// Not attempted: an earlier failure aborted the session.
    NotAttempted,
    /// The start was interrupted by an external stop request.
    Interrupted,
    /// Stopped; every terminated pid listed.
    Stopped {
        /// Pids that were signalled.
        pids: Vec<u32>,
    },
    /// A stop was attempted and failed.
    StopFailed {
        /// Why the stop failed.
        reason: String,
    },
    /// Teardown discovery found nothing to stop.
    NoMatches,
    /// Externally managed, deliberately left alone.
    SkippedExternal,
    /// Status probe answered.
    Healthy,
    /// Status probe did not answer.
    Unreachable,
    /// No probe available to ask.
    Unprobed,
}

impl ServiceOutcome {
    /// Whether this outcome makes the overall session a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ExternalUnavailable
                | Self::SpawnFailed { .. }
                | Self::EnvUnresolved { .. }
                | Self::TimedOut { .. }
                | Self::DependencyFailed { .. }
                | Self::NotAttempted
                | Self::Interrupted
                | Self::StopFailed { .. }
        )
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::ExternalReady => "external",
            Self::ExternalUnavailable => "external-down",
            Self::SpawnFailed { .. } => "spawn-failed",
            Self::EnvUnresolved { .. } => "env-failed",
            Self::TimedOut { .. } => "timed-out",
            Self::DependencyFailed { .. } => "dep-failed",
            Self::NotAttempted => "not-attempted",
            Self::Interrupted => "interrupted",
            Self::Stopped { .. } => "stopped",
            Self::StopFailed { .. } => "stop-failed",
            Self::NoMatches => "no-matches",
            Self::SkippedExternal => "skipped",
            Self::Healthy => "healthy",
            Self::Unreachable => "unreachable",
            Self::Unprobed => "unprobed",
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Ready { pid, attempts: 0 } => format!("pid {pid}"),
            Self::Ready { pid, attempts } => format!("pid {pid}, {attempts} probe(s)"),
            Self::SpawnFailed { reason }
            | Self::EnvUnresolved { reason }
            | Self::StopFailed { reason } => reason.clone(),
            Self::TimedOut { pid, attempts } => {
                format!("pid {pid} still running after {attempts} probe(s)")
            }
            Self::DependencyFailed { dependency } => format!("dependency {dependency} failed"),
            Self::Stopped { pids } => format!(
                "pid(s) {}",
                pids.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => String::new(),
        }
    }
}

/// One row of the outcome table.
#[derive(Debug, Clone)]
pub struct ServiceRow {
    /// Service name.
    pub name: String,
    /// What happened to it.
    pub outcome: ServiceOutcome,
}

/// Aggregate result of a session, one row per service considered.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    rows: Vec<ServiceRow>,
}

impl SessionReport {
    /// Records an outcome, replacing any earlier row for the same service
    /// so the table always holds one final row per service.
    pub fn record(&mut self, name: &str, outcome: ServiceOutcome) {
        if let Some(row) = self.rows.iter_mut().find(|r| r.name == name) {
            row.outcome = outcome;
        } else {
            self.rows.push(ServiceRow {
                name: name.to_string(),
                outcome,
            });
        }
    }

    /// The rows in the order services were considered.
    #[must_use]
    pub fn rows(&self) -> &[ServiceRow] {
        &self.rows
    }

    /// Looks up the outcome recorded for a service.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&ServiceOutcome> {
        self.rows
            .iter()
            .find(|row| row.name == name)
            .map(|row| &row.outcome)
    }

    /// Whether every service came through without a failing outcome.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.rows.iter().any(|row| row.outcome.is_failure())
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .rows
            .iter()
            .map(|row| row.name.len())
            .max()
            .unwrap_or(7)
            .max(7);

        writeln!(f, "{:<width$}  {:<14}  detail", "service", "outcome")?;
        for row in &self.rows {
            let detail = row.outcome.detail();
            writeln!(
                f,
                "{:<width$}  {:<14}  {}",
                row.name,
                row.outcome.label(),
                detail
            )?;
        }
        Ok(())
    }
}
