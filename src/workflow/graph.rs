//! Task dependency graph.
//!
//! Edges point from a dependency to its dependent, so a topological
//! order is also a valid execution order.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;

use crate::error::{Error, Result};

pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build from `(task id, dependency ids)` pairs. Every dependency must
    /// name a task in the same input.
    pub fn build<'a, I>(tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a BTreeSet<String>)>,
    {
        let tasks: Vec<_> = tasks.into_iter().collect();
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut index = HashMap::with_capacity(tasks.len());

        for (id, _) in &tasks {
            let node = graph.add_node(id.to_string());
            index.insert(id.to_string(), node);
        }

        for (id, deps) in &tasks {
            let dependent = index[*id];
            for dep in deps.iter() {
                let Some(&dependency) = index.get(dep) else {
                    return Err(Error::validation(
                        *id,
                        format!("depends on unknown task '{}'", dep),
                    ));
                };
                graph.add_edge(dependency, dependent, ());
            }
        }

        Ok(Self { graph, index })
    }

    /// A concrete cycle, if any, as a closed path of task ids
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let component = tarjan_scc(&self.graph).into_iter().find(|scc| {
            scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
        })?;
        let members: BTreeSet<NodeIndex> = component.into_iter().collect();

        // Walk inside the component until a node repeats
        let start = *members
            .iter()
            .min_by(|a, b| self.graph[**a].cmp(&self.graph[**b]))?;
        let mut path = vec![start];
        let mut current = start;
        loop {
            let next = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .min_by(|a, b| self.graph[*a].cmp(&self.graph[*b]))?;
            if let Some(pos) = path.iter().position(|n| *n == next) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|n| self.graph[*n].clone()).collect();
                cycle.push(self.graph[next].clone());
                return Some(cycle);
            }
            path.push(next);
            current = next;
        }
    }

    /// Task ids in dependency order, ties resolved by insertion order
    pub fn topological_order(&self) -> Vec<String> {
        match toposort(&self.graph, None) {
            Ok(order) => order.into_iter().map(|n| self.graph[n].clone()).collect(),
            Err(_) => {
                let mut ids: Vec<String> = self.index.keys().cloned().collect();
                ids.sort();
                ids
            }
        }
    }

    /// Every task that directly or transitively depends on `id`
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(id) else {
            return BTreeSet::new();
        };
        let mut found = BTreeSet::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(node) = bfs.next(&self.graph) {
            if node != start {
                found.insert(self.graph[node].clone());
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_topological_order() {
        let a = deps(&[]);
        let b = deps(&["a"]);
        let c = deps(&["b", "a"]);
        let graph = TaskGraph::build([("c", &c), ("a", &a), ("b", &b)]).unwrap();

        let order = graph.topological_order();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_cycle_reported_as_path() {
        let a = deps(&["c"]);
        let b = deps(&["a"]);
        let c = deps(&["b"]);
        let d = deps(&[]);
        let graph = TaskGraph::build([("a", &a), ("b", &b), ("c", &c), ("d", &d)]).unwrap();

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let a = deps(&["a"]);
        let graph = TaskGraph::build([("a", &a)]).unwrap();
        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let a = deps(&["ghost"]);
        let err = TaskGraph::build([("a", &a)]).err().unwrap();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_transitive_dependents() {
        let a = deps(&[]);
        let b = deps(&["a"]);
        let c = deps(&["b"]);
        let d = deps(&[]);
        let graph = TaskGraph::build([("a", &a), ("b", &b), ("c", &c), ("d", &d)]).unwrap();

        assert_eq!(graph.transitive_dependents("a"), deps(&["b", "c"]));
        assert!(graph.transitive_dependents("d").is_empty());
    }
}
