use std::time::SystemTime;

use tokio::process::Child;
use tracing::warn;

/// Lifecycle status of a managed service process.
///
/// Transitions are monotonic: `Starting` → `Running` → `Stopped`, or
/// `Starting` → `Failed`, with a cancelled start short-circuiting straight
/// to `Stopped`. Nothing ever re-enters `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Spawned, readiness not yet confirmed.
    Starting,
    /// Confirmed ready (or no readiness probe declared).
    Running,
    /// Spawn or readiness failed. The process may still be alive.
    Failed,
    /// Stopped by this session.
    Stopped,
}

/// Handle to a process started by this orchestrator session.
///
/// The orchestrator's handle map is the single source of truth for "is this
/// service currently managed here"; observers only ever see cloned
/// snapshots.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    started_at: SystemTime,
    status: ServiceStatus,
    child: Option<Child>,
}

impl ProcessHandle {
    pub(crate) const fn new(name: String, pid: u32, started_at: SystemTime, child: Child) -> Self {
        Self {
            name,
            pid,
            started_at,
            status: ServiceStatus::Starting,
            child: Some(child),
        }
    }

    /// Name of the service this handle belongs to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pid of the spawned process.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// When the process was spawned.
    #[must_use]
    pub const fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ServiceStatus {
        self.status
    }

    /// Mutable access to the underlying child, for stop/reap paths.
    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Advances the lifecycle status. Illegal transitions are ignored with
    /// a warning so status can never move backwards.
    pub fn transition(&mut self, next: ServiceStatus) {
        let legal = matches!(
            (self.status, next),
            (ServiceStatus::Starting, ServiceStatus::Running)
                | (ServiceStatus::Starting, ServiceStatus::Failed)
                | (ServiceStatus::Starting, ServiceStatus::Stopped)
                | (ServiceStatus::Running, ServiceStatus::Stopped)
        );

        if legal {
            self.status = next;
        } else if self.status != next {
            warn!(
                service = %self.name,
                from = ?self.status,
                to = ?next,
                "ignoring illegal status transition"
            );
        }
    }

    /// Whether the process is currently alive. Liveness is independent of
    /// [`status`](Self::status): a `Failed` service may still be running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(_))) => false,
            Some(Ok(None)) => true,
            _ => pid_alive(self.pid),
        }
    }
}

/// Signal-0 liveness check against an arbitrary pid.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only performs permission and existence
    // checks, it delivers nothing.
    (unsafe { libc::kill(pid as i32, 0) }) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ProcessHandle {
        let child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        ProcessHandle::new("svc".to_string(), pid, SystemTime::now(), child)
    }

    #[tokio::test]
    async fn status_moves_forward_only() {
        let mut h = handle();
        assert_eq!(h.status(), ServiceStatus::Starting);

        h.transition(ServiceStatus::Running);
        assert_eq!(h.status(), ServiceStatus::Running);

        // No way back to Starting, no way from Running to Failed.
        h.transition(ServiceStatus::Starting);
        assert_eq!(h.status(), ServiceStatus::Running);
        h.transition(ServiceStatus::Failed);
        assert_eq!(h.status(), ServiceStatus::Running);

        h.transition(ServiceStatus::Stopped);
        assert_eq!(h.status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn failed_is_terminal_for_starting() {
        let mut h = handle();
        h.transition(ServiceStatus::Failed);
        assert_eq!(h.status(), ServiceStatus::Failed);

        h.transition(ServiceStatus::Running);
        assert_eq!(h.status(), ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn liveness_tracks_process_exit() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let mut h = ProcessHandle::new("sleeper".to_string(), pid, SystemTime::now(), child);
        assert!(h.is_alive());

        h.child_mut().unwrap().kill().await.unwrap();
        assert!(!h.is_alive());
    }
}
