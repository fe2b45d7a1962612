//! Import ordering from template linkage.
//!
//! Templates can only be imported once every template they link to exists.
//! The resolver turns a name → dependencies map into waves: each wave only
//! depends on earlier ones, members of a wave are independent of each other.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::errors::CycleError;

/// Name → names it depends on. Dependencies need not be keys.
pub type DependencyGraph = BTreeMap<String, BTreeSet<String>>;

/// Names that can be applied together.
pub type Wave = BTreeSet<String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Every key exactly once, in dependency order.
    pub waves: Vec<Wave>,
    /// Dependencies that are not keys, assumed to exist already.
    pub external: BTreeSet<String>,
}

impl Resolution {
    pub fn len(&self) -> usize {
        self.waves.iter().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

pub struct DependencyResolver;

impl DependencyResolver {
    /// Compute the waves for `graph`.
    ///
    /// Each round takes every key whose remaining dependencies are all
    /// satisfied. A round that takes nothing while keys remain means the
    /// rest of the graph is stuck behind a cycle.
    pub fn resolve(graph: &DependencyGraph) -> Result<Resolution, CycleError> {
        let external: BTreeSet<String> = graph
            .values()
            .flatten()
            .filter(|dep| !graph.contains_key(*dep))
            .cloned()
            .collect();
        if !external.is_empty() {
            debug!(count = external.len(), "dependencies outside the batch");
        }

        let mut remaining: DependencyGraph = graph
            .iter()
            .map(|(name, deps)| {
                let internal = deps
                    .iter()
                    .filter(|dep| graph.contains_key(*dep))
                    .cloned()
                    .collect();
                (name.clone(), internal)
            })
            .collect();

        let mut waves = Vec::new();
        while !remaining.is_empty() {
            let ready: Wave = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| name.clone())
                .collect();
            if ready.is_empty() {
                let err = cycle_error(&remaining);
                warn!(
                    cyclic = err.cyclic.len(),
                    blocked = err.blocked.len(),
                    "dependency cycle detected"
                );
                return Err(err);
            }

            remaining.retain(|name, _| !ready.contains(name));
            for deps in remaining.values_mut() {
                deps.retain(|dep| !ready.contains(dep));
            }
            debug!(wave = waves.len(), size = ready.len(), "resolved wave");
            waves.push(ready);
        }

        Ok(Resolution { waves, external })
    }
}

/// Split the stuck keys into those on a cycle and those merely waiting.
fn cycle_error(remaining: &DependencyGraph) -> CycleError {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: BTreeMap<&str, NodeIndex> = remaining
        .keys()
        .map(|name| (name.as_str(), graph.add_node(name.as_str())))
        .collect();
    for (name, deps) in remaining {
        let from = nodes[name.as_str()];
        for dep in deps {
            if let Some(&to) = nodes.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut cyclic = BTreeSet::new();
    for component in tarjan_scc(&graph) {
        let on_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&node| graph.contains_edge(node, node));
        if on_cycle {
            cyclic.extend(component.iter().map(|&node| graph[node].to_string()));
        }
    }

    let blocked = remaining
        .keys()
        .filter(|name| !cyclic.contains(*name))
        .cloned()
        .collect();
    CycleError { cyclic, blocked }
}
