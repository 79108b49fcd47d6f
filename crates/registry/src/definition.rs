use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Declarative definition of one managed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceDefinition {
    /// Unique name of the service.
    pub name: String,

    /// The command to launch.
    pub command: String,

    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the spawned process.
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Environment overlay, fixed at definition time.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Environment variables resolved by fallback search at start time.
    #[serde(default)]
    pub env_fallback: Vec<EnvFallbackSpec>,

    /// Names of services that must be ready before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// How to decide the service is ready. `None` means ready on spawn.
    #[serde(default)]
    pub readiness: Option<ReadinessSpec>,

    /// How to stop the service.
    #[serde(default)]
    pub stop: StopSpec,

    /// Externally managed services are depended on but never started or
    /// stopped by the orchestrator.
    #[serde(default)]
    pub externally_managed: bool,
}

/// An environment variable resolved from an ordered candidate list, each
/// candidate validated by the presence of a marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvFallbackSpec {
    /// Name of the variable to resolve.
    pub variable: String,

    /// Candidate paths, tried in declared order. First match wins.
    pub candidates: Vec<String>,

    /// File whose existence under a candidate validates it.
    pub marker_file: String,

    /// What to do when no candidate validates.
    #[serde(default)]
    pub policy: FallbackPolicy,
}

/// Policy applied when no candidate carries the marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FallbackPolicy {
    /// Fail the resolution.
    #[default]
    Strict,
    /// Return the first candidate anyway, flagged as degraded.
    BestEffort,
}

/// The probe used to decide a started service can accept work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "camelCase")]
pub enum ProbeTarget {
    /// Ready once a TCP connection to the port succeeds.
    Port(u16),
    /// Ready once the endpoint answers with a 2xx status.
    Http(Url),
    /// Ready once the file's modification time advances past process start.
    FileMarker(PathBuf),
}

/// Readiness probe configuration for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSpec {
    /// What to probe.
    #[serde(flatten)]
    pub probe: ProbeTarget,

    /// Delay between probe attempts.
    #[serde(with = "crate::duration", default = "default_interval")]
    pub interval: Duration,

    /// Overall deadline for the wait.
    #[serde(with = "crate::duration", default = "default_timeout")]
    pub timeout: Duration,

    /// Upper bound on probe attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// What a readiness failure means for the rest of the session.
    #[serde(default)]
    pub on_failure: OnFailure,
}

/// Propagation policy for a service that failed to start or become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnFailure {
    /// Tear down everything already running and fail the session.
    #[default]
    Abort,
    /// Record the failure and keep starting the remaining services.
    Continue,
}

/// How a service is stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSpec {
    /// Stop method.
    #[serde(flatten)]
    pub method: StopMethod,

    /// Time allotted for a graceful stop before a forced kill.
    #[serde(with = "crate::duration", default = "default_grace_period")]
    pub grace_period: Duration,
}

impl Default for StopSpec {
    fn default() -> Self {
        Self {
            method: StopMethod::Signal,
            grace_period: default_grace_period(),
        }
    }
}

/// Stop method for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum StopMethod {
    /// Signal the process handle tracked by this session.
    Signal,
    /// Discover processes by image name and stop every match.
    ImageName {
        /// Process image name to match.
        image: String,
    },
    /// Discover the process bound to a listening port and stop it.
    PortOwner {
        /// The listening port to inspect.
        port: u16,
    },
}

const fn default_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_attempts() -> u32 {
    30
}

const fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}
