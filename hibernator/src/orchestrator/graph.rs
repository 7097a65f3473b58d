use std::collections::{HashMap, HashSet};

use crate::errors::ConfigurationError;
use crate::plan::{Dependency, Operation, Target};

/// Target dependency graph indexed by declaration order.
///
/// Edges point from a dependency to its dependent for wake-up (`from` wakes first);
/// shutdown walks them backwards.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    edges: Vec<(usize, usize)>,
}

impl DependencyGraph {
    pub fn build(
        targets: &[Target],
        dependencies: &[Dependency],
    ) -> Result<Self, ConfigurationError> {
        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let lookup = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| ConfigurationError::UnknownTarget {
                    target: name.to_string(),
                })
        };

        let mut seen = HashSet::new();
        let mut edges = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let from = lookup(&dependency.from)?;
            let to = lookup(&dependency.to)?;
            if from == to {
                return Err(ConfigurationError::DependencyCycle {
                    targets: vec![dependency.from.clone()],
                });
            }
            if seen.insert((from, to)) {
                edges.push((from, to));
            }
        }

        let graph = Self { names, edges };
        let (_, stuck) = kahn_layers(graph.len(), &graph.edges);
        if !stuck.is_empty() {
            return Err(ConfigurationError::DependencyCycle {
                targets: stuck.into_iter().map(|i| graph.names[i].clone()).collect(),
            });
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    /// Targets grouped into layers; every target's predecessors sit in earlier layers
    pub fn layers(&self, operation: Operation) -> Vec<Vec<usize>> {
        let edges = self.oriented_edges(operation);
        kahn_layers(self.len(), &edges).0
    }

    /// Targets that must finish before `index` may run under `operation`
    pub fn predecessors(&self, index: usize, operation: Operation) -> Vec<usize> {
        self.oriented_edges(operation)
            .into_iter()
            .filter(|&(_, to)| to == index)
            .map(|(from, _)| from)
            .collect()
    }

    fn oriented_edges(&self, operation: Operation) -> Vec<(usize, usize)> {
        match operation {
            Operation::WakeUp => self.edges.clone(),
            Operation::Shutdown => self.edges.iter().map(|&(from, to)| (to, from)).collect(),
        }
    }
}

/// Kahn's algorithm, one layer per round. Returns the layers and any nodes left on a
/// cycle.
fn kahn_layers(count: usize, edges: &[(usize, usize)]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut in_degree = vec![0usize; count];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(from, to) in edges {
        in_degree[to] += 1;
        outgoing[from].push(to);
    }

    let mut layers = Vec::new();
    let mut current: Vec<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &node in &current {
            for &succ in &outgoing[node] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    next.push(succ);
                }
            }
        }
        next.sort_unstable();
        layers.push(current);
        current = next;
    }

    let stuck = if placed < count {
        (0..count).filter(|&i| in_degree[i] > 0).collect()
    } else {
        Vec::new()
    };
    (layers, stuck)
}
