//! Stable topological ordering of named hooks.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, SendError};

/// Ordering constraints of a single hook, by name.
///
/// Names that are not registered on the same hook point are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookConstraints {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl HookConstraints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn before<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            before: names.into_iter().map(Into::into).collect(),
            after: Vec::new(),
        }
    }

    pub fn after<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            before: Vec::new(),
            after: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and_before(mut self, name: impl Into<String>) -> Self {
        self.before.push(name.into());
        self
    }

    pub fn and_after(mut self, name: impl Into<String>) -> Self {
        self.after.push(name.into());
        self
    }
}

/// Resolve an execution order for `nodes` (listed in registration order).
///
/// Kahn's algorithm; among hooks that are ready at the same time the one
/// registered first wins, so unconstrained hooks keep registration order.
/// Returns indices into `nodes`.
pub(crate) fn resolve_order(nodes: &[(&str, &HookConstraints)]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (*name, i))
        .collect();

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    for (i, (_, constraints)) in nodes.iter().enumerate() {
        for target in &constraints.before {
            if let Some(&j) = index.get(target.as_str()) {
                successors[i].insert(j);
            }
        }
        for source in &constraints.after {
            if let Some(&j) = index.get(source.as_str()) {
                successors[j].insert(i);
            }
        }
    }

    let mut in_degree = vec![0usize; nodes.len()];
    for edges in &successors {
        for &j in edges {
            in_degree[j] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &j in &successors[next] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = (0..nodes.len())
            .filter(|i| !order.contains(i))
            .map(|i| nodes[i].0)
            .collect();
        return Err(SendError::ConfigurationError(format!(
            "hook ordering cycle between: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
