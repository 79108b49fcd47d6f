//! Resolves environment variables to filesystem locations chosen from an
//! ordered candidate list, each candidate validated by a marker file.
//!
//! Resolution is a pure function of the candidate list and the current
//! filesystem state. Nothing is cached across invocations: the filesystem
//! may change between orchestrator runs, and the next run should see it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::path::PathBuf;

use geostack_registry::{EnvFallbackSpec, FallbackPolicy};
use tracing::{debug, warn};

/// Outcome of resolving one environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The variable that was resolved.
    pub variable: String,

    /// The chosen location.
    pub path: PathBuf,

    /// Set when no candidate validated and the best-effort policy kept the
    /// first candidate anyway.
    pub degraded: bool,
}

/// Resolves a single fallback spec against the current filesystem.
///
/// Candidates are tried in declared order and the first one carrying the
/// marker file wins; order is significant, there is no notion of a closest
/// or best match.
///
/// # Errors
///
/// Returns [`Error::Unresolved`] when no candidate validates and the spec's
/// policy is [`FallbackPolicy::Strict`].
pub fn resolve(spec: &EnvFallbackSpec) -> Result<ResolvedPath, Error> {
    for candidate in &spec.candidates {
        let path = PathBuf::from(expand(candidate));
        if path.join(&spec.marker_file).exists() {
            debug!(
                variable = %spec.variable,
                path = %path.display(),
                "resolved via marker file"
            );
            return Ok(ResolvedPath {
                variable: spec.variable.clone(),
                path,
                degraded: false,
            });
        }
    }

    match spec.policy {
        FallbackPolicy::Strict => Err(Error::Unresolved {
            variable: spec.variable.clone(),
            marker_file: spec.marker_file.clone(),
            candidates: spec.candidates.len(),
        }),
        FallbackPolicy::BestEffort => {
            let first = spec.candidates.first().map(String::as_str).unwrap_or("");
            let path = PathBuf::from(expand(first));
            warn!(
                variable = %spec.variable,
                path = %path.display(),
                marker = %spec.marker_file,
                "no candidate carries the marker file, continuing with the first candidate"
            );
            Ok(ResolvedPath {
                variable: spec.variable.clone(),
                path,
                degraded: true,
            })
        }
    }
}

/// Resolves every spec of a service, in declared order.
///
/// # Errors
///
/// Returns the first [`Error::Unresolved`] hit under a strict policy.
pub fn resolve_all(specs: &[EnvFallbackSpec]) -> Result<Vec<ResolvedPath>, Error> {
    specs.iter().map(resolve).collect()
}

/// Expands `${NAME}` references against the orchestrator's own environment.
/// Unset variables expand to the empty string, mirroring how the launch
/// scripts this replaces behaved.
fn expand(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => debug!(variable = name, "unset variable in candidate template"),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(candidates: &[&str], policy: FallbackPolicy) -> EnvFallbackSpec {
        EnvFallbackSpec {
            variable: "GEOSTACK_DATA_DIR".to_string(),
            candidates: candidates.iter().map(ToString::to_string).collect(),
            marker_file: ".geostack".to_string(),
            policy,
        }
    }

    #[test]
    fn first_candidate_with_marker_wins() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        let c = root.path().join("c");
        for dir in [&a, &b, &c] {
            std::fs::create_dir(dir).unwrap();
        }
        // Only B carries the marker.
        std::fs::write(b.join(".geostack"), "").unwrap();

        let resolved = resolve(&spec(
            &[
                a.to_str().unwrap(),
                b.to_str().unwrap(),
                c.to_str().unwrap(),
            ],
            FallbackPolicy::Strict,
        ))
        .unwrap();

        assert_eq!(resolved.path, b);
        assert!(!resolved.degraded);
    }

    #[test]
    fn declaration_order_beats_later_matches() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        for dir in [&a, &b] {
            std::fs::create_dir(dir).unwrap();
            std::fs::write(dir.join(".geostack"), "").unwrap();
        }

        let resolved = resolve(&spec(
            &[a.to_str().unwrap(), b.to_str().unwrap()],
            FallbackPolicy::Strict,
        ))
        .unwrap();

        assert_eq!(resolved.path, a);
    }

    #[test]
    fn strict_policy_fails_without_marker() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        std::fs::create_dir(&a).unwrap();

        let err = resolve(&spec(&[a.to_str().unwrap()], FallbackPolicy::Strict)).unwrap_err();
        assert!(matches!(err, Error::Unresolved { .. }));
    }

    #[test]
    fn best_effort_returns_first_candidate_degraded() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");

        let resolved = resolve(&spec(
            &[a.to_str().unwrap(), b.to_str().unwrap()],
            FallbackPolicy::BestEffort,
        ))
        .unwrap();

        assert_eq!(resolved.path, a);
        assert!(resolved.degraded);
    }

    #[test]
    fn expands_variable_references() {
        // SAFETY: test-local variable, no concurrent reader depends on it.
        unsafe { std::env::set_var("GEOSTACK_TEST_BASE", "/srv") };
        assert_eq!(expand("${GEOSTACK_TEST_BASE}/data"), "/srv/data");
        assert_eq!(expand("/plain/path"), "/plain/path");
        assert_eq!(expand("${GEOSTACK_TEST_UNSET_VAR}/data"), "/data");
    }
}
