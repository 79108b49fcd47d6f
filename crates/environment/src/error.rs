use thiserror::Error;

/// Errors that can occur while resolving environment variables.
#[derive(Debug, Error)]
pub enum Error {
    /// No candidate carried the marker file and the policy is strict.
    #[error("no candidate of {variable} carries marker {marker_file} ({candidates} tried)")]
    Unresolved {
        /// The variable that could not be resolved.
        variable: String,
        /// The marker file that was searched for.
        marker_file: String,
        /// Number of candidates tried.
        candidates: usize,
    },
}
