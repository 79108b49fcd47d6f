use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use tracing::debug;

use crate::definition::ServiceDefinition;
use crate::error::Error;

/// Immutable set of service definitions plus their dependency graph.
///
/// Validation happens once at construction: names must be unique, every
/// `dependsOn` edge must resolve, and the graph must be acyclic. A start
/// order consistent with a topological sort is computed at the same time,
/// so no process is ever spawned from an invalid graph.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceDefinition>,
    index: HashMap<String, usize>,
    start_order: Vec<usize>,
}

impl ServiceRegistry {
    /// Builds a registry from definitions, validating the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`], [`Error::UnknownDependency`] or
    /// [`Error::DependencyCycle`] if the definitions do not form a valid
    /// acyclic graph.
    pub fn from_definitions(services: Vec<ServiceDefinition>) -> Result<Self, Error> {
        let mut index = HashMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            if index.insert(service.name.clone(), i).is_some() {
                return Err(Error::DuplicateName(service.name.clone()));
            }
        }

        for service in &services {
            for dependency in &service.depends_on {
                if !index.contains_key(dependency) {
                    return Err(Error::UnknownDependency {
                        service: service.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let start_order = topological_order(&services, &index)?;
        debug!(
            order = ?start_order.iter().map(|&i| services[i].name.as_str()).collect::<Vec<_>>(),
            "validated service graph"
        );

        Ok(Self {
            services,
            index,
            start_order,
        })
    }

    /// Loads and validates a registry from a JSON stack file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::Parse`] if
    /// it is not valid JSON, or any of the graph validation errors.
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| Error::Io("failed to read stack file", e))?;
        let services: Vec<ServiceDefinition> = serde_json::from_str(&raw)?;
        Self::from_definitions(services)
    }

    /// Looks up a service by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    /// All definitions in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    /// Definitions in a dependency-respecting start order.
    pub fn start_order(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.start_order.iter().map(|&i| &self.services[i])
    }

    /// Definitions in reverse start order, for teardown.
    pub fn stop_order(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.start_order.iter().rev().map(|&i| &self.services[i])
    }

    /// The named services plus everything they transitively depend on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownService`] if a name does not exist.
    pub fn dependency_closure(&self, names: &[String]) -> Result<HashSet<String>, Error> {
        let mut queue: VecDeque<&str> = VecDeque::new();
        for name in names {
            if !self.index.contains_key(name) {
                return Err(Error::UnknownService(name.clone()));
            }
            queue.push_back(name);
        }

        let mut closure = HashSet::new();
        while let Some(name) = queue.pop_front() {
            if !closure.insert(name.to_string()) {
                continue;
            }
            if let Some(service) = self.get(name) {
                for dependency in &service.depends_on {
                    queue.push_back(dependency);
                }
            }
        }

        Ok(closure)
    }

    /// Validates that every name exists, returning the set unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownService`] if a name does not exist.
    pub fn validate_names(&self, names: &[String]) -> Result<HashSet<String>, Error> {
        for name in names {
            if !self.index.contains_key(name) {
                return Err(Error::UnknownService(name.clone()));
            }
        }
        Ok(names.iter().cloned().collect())
    }
}

/// Kahn's algorithm over the `dependsOn` edges. Ties resolve in declaration
/// order so the start order is deterministic for a given stack file.
fn topological_order(
    services: &[ServiceDefinition],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, Error> {
    let n = services.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, service) in services.iter().enumerate() {
        for dependency in &service.depends_on {
            let d = index[dependency];
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() < n {
        let stuck: Vec<&str> = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| services[i].name.as_str())
            .collect();
        return Err(Error::DependencyCycle(stuck.join(", ")));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, depends_on: &[&str]) -> ServiceDefinition {
        serde_json::from_str(&format!(
            r#"{{"name": "{name}", "command": "true", "dependsOn": [{}]}}"#,
            depends_on
                .iter()
                .map(|d| format!("\"{d}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .unwrap()
    }

    fn position(registry: &ServiceRegistry, name: &str) -> usize {
        registry
            .start_order()
            .position(|s| s.name == name)
            .unwrap_or_else(|| panic!("{name} missing from start order"))
    }

    #[test]
    fn start_order_respects_dependencies() {
        // database -> store -> tiles, app depends on store and database.
        let registry = ServiceRegistry::from_definitions(vec![
            def("app", &["store", "database"]),
            def("tiles", &["store"]),
            def("store", &[]),
            def("database", &[]),
        ])
        .unwrap();

        assert!(position(&registry, "store") < position(&registry, "tiles"));
        assert!(position(&registry, "store") < position(&registry, "app"));
        assert!(position(&registry, "database") < position(&registry, "app"));
    }

    #[test]
    fn stop_order_is_reversed_start_order() {
        let registry =
            ServiceRegistry::from_definitions(vec![def("a", &[]), def("b", &["a"])]).unwrap();

        let starts: Vec<_> = registry.start_order().map(|s| s.name.clone()).collect();
        let mut stops: Vec<_> = registry.stop_order().map(|s| s.name.clone()).collect();
        stops.reverse();
        assert_eq!(starts, stops);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = ServiceRegistry::from_definitions(vec![def("a", &[]), def("a", &[])])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = ServiceRegistry::from_definitions(vec![def("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_cycles() {
        let err = ServiceRegistry::from_definitions(vec![
            def("a", &["b"]),
            def("b", &["c"]),
            def("c", &["a"]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DependencyCycle(_)));
    }

    #[test]
    fn closure_pulls_in_transitive_dependencies() {
        let registry = ServiceRegistry::from_definitions(vec![
            def("a", &[]),
            def("b", &["a"]),
            def("c", &["b"]),
            def("d", &[]),
        ])
        .unwrap();

        let closure = registry.dependency_closure(&["c".to_string()]).unwrap();
        assert_eq!(closure.len(), 3);
        assert!(closure.contains("a") && closure.contains("b") && closure.contains("c"));
        assert!(!closure.contains("d"));
    }

    #[test]
    fn closure_rejects_unknown_names() {
        let registry = ServiceRegistry::from_definitions(vec![def("a", &[])]).unwrap();
        assert!(matches!(
            registry.dependency_closure(&["ghost".to_string()]),
            Err(Error::UnknownService(_))
        ));
    }
}
