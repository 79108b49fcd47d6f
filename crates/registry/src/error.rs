use thiserror::Error;

/// Errors that can occur while loading or validating the service registry.
///
/// All of these are configuration errors: they are raised before any process
/// is spawned.
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency graph contains a cycle.
    #[error("dependency cycle involving: {0}")]
    DependencyCycle(String),

    /// Two services share the same name.
    #[error("duplicate service name: {0}")]
    DuplicateName(String),

    /// Invalid duration string in a definition.
    #[error("invalid duration {0:?}: {1}")]
    InvalidDuration(String, &'static str),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Failed to parse the stack file.
    #[error("failed to parse stack file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A `dependsOn` entry names a service that does not exist.
    #[error("service {service} depends on unknown service {dependency}")]
    UnknownDependency {
        /// The service carrying the bad edge.
        service: String,
        /// The name that could not be resolved.
        dependency: String,
    },

    /// A service name given on the command line does not exist.
    #[error("unknown service: {0}")]
    UnknownService(String),
}
