//! Dependency resolution — deterministic topological order over an action graph.
//!
//! Uses Kahn's algorithm. Actions with no relative ordering constraint are
//! emitted in declaration order, so an unchanged graph always yields the same
//! sequence. On failure a concrete cycle is extracted from the leftover nodes.

use super::graph::ActionGraph;
use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Build the execution order (action ids) for a graph.
pub fn build_execution_order(graph: &ActionGraph) -> Result<Vec<String>> {
    let ids: Vec<&str> = graph.actions().map(|a| a.id.as_str()).collect();
    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut in_degree = vec![0usize; ids.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];

    for (i, action) in graph.actions().enumerate() {
        for dep in action.dependencies() {
            let &d = position.get(dep).ok_or_else(|| Error::MalformedGraph {
                action: action.id.clone(),
                reason: format!("reference to undeclared action '{}'", dep),
            })?;
            dependents[d].push(i);
            depends_on[i].push(d);
            in_degree[i] += 1;
        }
    }

    // Min-heap on declaration position for the tie-break
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(ids[current].to_string());
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != ids.len() {
        let cycle = find_cycle(&in_degree, &depends_on)
            .into_iter()
            .map(|i| ids[i].to_string())
            .collect();
        return Err(Error::CyclicDependency { cycle });
    }

    Ok(order)
}

/// Walk unresolved dependency edges from the first leftover node until a node
/// repeats. Every leftover node has at least one leftover dependency, so the
/// walk always closes. Each returned id depends on the next one.
fn find_cycle(in_degree: &[usize], depends_on: &[Vec<usize>]) -> Vec<usize> {
    let Some(start) = in_degree.iter().position(|&d| d > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut seen_at: HashMap<usize, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&at) = seen_at.get(&current) {
            return path.split_off(at);
        }
        seen_at.insert(current, path.len());
        path.push(current);

        match depends_on[current]
            .iter()
            .copied()
            .filter(|&d| in_degree[d] > 0)
            .min()
        {
            Some(next) => current = next,
            None => return path,
        }
    }
}
