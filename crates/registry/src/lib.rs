//! Declarative definitions of the managed service stack and the dependency
//! graph between them.
//!
//! Definitions are loaded once, validated (unique names, known dependencies,
//! no cycles) and immutable afterwards; the registry hands out a start order
//! consistent with a topological sort of the `dependsOn` edges, and its
//! reverse for teardown.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod definition;
mod duration;
mod error;
mod graph;

pub use definition::{
    EnvFallbackSpec, FallbackPolicy, OnFailure, ProbeTarget, ReadinessSpec, ServiceDefinition,
    StopMethod, StopSpec,
};
pub use duration::parse_duration;
pub use error::Error;
pub use graph::ServiceRegistry;
