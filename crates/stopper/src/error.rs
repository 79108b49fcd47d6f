use thiserror::Error;

/// Errors that can occur while stopping a service.
///
/// These never abort an overall teardown; the orchestrator logs them and
/// keeps stopping the remaining services.
#[derive(Debug, Error)]
pub enum Error {
    /// The tracked process had already exited before the stop.
    #[error("process {0} already exited")]
    AlreadyExited(u32),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Not allowed to signal another owner's process.
    #[error("insufficient privilege to signal process {0}")]
    Privilege(u32),

    /// Sending a signal failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// The target process.
        pid: u32,
        /// The underlying errno.
        #[source]
        source: nix::Error,
    },
}
