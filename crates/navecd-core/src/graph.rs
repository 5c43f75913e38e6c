//! Component dependency graph
//!
//! A DAG of components keyed by identifier. Edges point from a component to
//! each of its declared dependencies. The graph offers a deterministic
//! topological sort and a layering that exposes all legal parallelism:
//! components within a layer are mutually independent.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::component::Component;
use crate::error::{CoreError, Result};

/// A directed acyclic graph of components.
///
/// Insertion only validates identifier uniqueness; dependency existence and
/// acyclicity are checked by [`DependencyGraph::topological_sort`].
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Component>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts components in arbitrary order, refusing duplicate ids.
    pub fn insert(&mut self, components: impl IntoIterator<Item = Component>) -> Result<()> {
        for component in components {
            let id = component.id().to_string();
            if self.nodes.contains_key(&id) {
                return Err(CoreError::DuplicateComponent { id });
            }
            self.nodes.insert(id, component);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Component> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All component ids currently inserted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Kahn-style topological sort.
    ///
    /// Dependencies come before their dependents. Among equally-ready nodes
    /// the smaller identifier is dequeued first, making the order
    /// deterministic. Fails with [`CoreError::UnknownDependency`] when an
    /// edge references an absent id and with [`CoreError::CycleDetected`]
    /// when nodes remain after the queue drains.
    pub fn topological_sort(&self) -> Result<Vec<Component>> {
        let mut remaining_deps: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (id, component) in &self.nodes {
            remaining_deps.entry(id.as_str()).or_insert(0);
            for dependency in component.dependencies() {
                if !self.nodes.contains_key(dependency) {
                    return Err(CoreError::UnknownDependency {
                        id: id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                *remaining_deps.entry(id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining_deps
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            sorted.push(self.nodes[id].clone());

            for dependent in dependents.get(id).into_iter().flatten().copied() {
                let count = remaining_deps
                    .get_mut(dependent)
                    .unwrap_or_else(|| unreachable!("dependent was registered above"));
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            return Err(CoreError::CycleDetected {
                cycle: self.find_cycle(&remaining_deps),
            });
        }

        Ok(sorted)
    }

    /// Walks the unsatisfied remainder of the graph to name one offending
    /// cycle for the error message.
    fn find_cycle(&self, remaining_deps: &BTreeMap<&str, usize>) -> Vec<String> {
        let stuck: BTreeSet<&str> = remaining_deps
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| *id)
            .collect();

        let start = match stuck.first() {
            Some(id) => *id,
            None => return Vec::new(),
        };

        let mut path = vec![start];
        let mut seen: BTreeSet<&str> = BTreeSet::from([start]);
        let mut current = start;

        loop {
            let next = self.nodes[current]
                .dependencies()
                .iter()
                .map(String::as_str)
                .find(|dep| stuck.contains(dep));

            let Some(next) = next else {
                return path.iter().map(|id| id.to_string()).collect();
            };

            if seen.contains(next) {
                let cycle_start = path.iter().position(|id| *id == next).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[cycle_start..].iter().map(|id| id.to_string()).collect();
                cycle.push(next.to_string());
                return cycle;
            }

            path.push(next);
            seen.insert(next);
            current = next;
        }
    }
}

/// A maximal set of mutually independent components.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    pub components: Vec<Component>,
}

impl Layer {
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Packs a topologically sorted component slice into layers.
///
/// Every component is assigned `layer = 1 + max(layer(dep))`, components
/// without dependencies land in layer 0. The internal order of a layer is
/// unspecified; the reconciler treats it as a set.
pub fn layer(sorted: Vec<Component>) -> Vec<Layer> {
    let mut assignments: HashMap<String, usize> = HashMap::with_capacity(sorted.len());
    let mut layers: Vec<Layer> = Vec::new();

    for component in sorted {
        let layer_number = component
            .dependencies()
            .iter()
            .filter_map(|dep| assignments.get(dep))
            .max()
            .map(|deepest| deepest + 1)
            .unwrap_or(0);

        if layer_number >= layers.len() {
            layers.resize_with(layer_number + 1, Layer::default);
        }

        assignments.insert(component.id().to_string(), layer_number);
        layers[layer_number].components.push(component);
    }

    layers
}
