use thiserror::Error;

/// Configuration-class failures that end a session before or instead of
/// normal service handling. Per-service failures are not errors; they are
/// recorded in the session report.
#[derive(Debug, Error)]
pub enum Error {
    /// A mandatory environment variable could not be resolved.
    #[error(transparent)]
    Environment(#[from] geostack_environment::Error),

    /// The registry or a command-line service selection is invalid.
    #[error(transparent)]
    Registry(#[from] geostack_registry::Error),
}
