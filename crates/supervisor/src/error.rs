use thiserror::Error;

/// Errors that can occur while spawning or observing a service process.
#[derive(Debug, Error)]
pub enum Error {
    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The spawned process reported no pid.
    #[error("no pid available for spawned service {0}")]
    MissingPid(String),

    /// The command could not be launched.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// The command that failed to launch.
        command: String,
        /// The underlying launch failure.
        #[source]
        source: std::io::Error,
    },
}
