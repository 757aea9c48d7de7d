//! Stage dependency graph and execution levels.
//!
//! Edges are derived from paths: a stage depends on every stage whose
//! output equals one of its dependencies or contains it as a directory.
//! Explicit `after` links add edges regardless of paths.

mod export;
pub mod paths;

use crate::errors::{ConfigurationError, CycleDetectedError};
use crate::pipeline::StageSpec;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

/// Stage names partitioned into ordered execution levels.
///
/// Every stage of a level depends only on stages in strictly lower levels.
/// Names inside a level are sorted for display; execution does not rely on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Levels(Vec<Vec<String>>);

impl Levels {
    /// Returns the number of levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the total number of stages across all levels.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// Iterates over levels in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &[String]> {
        self.0.iter().map(Vec::as_slice)
    }

    /// Returns the level index holding a stage.
    #[must_use]
    pub fn level_of(&self, stage: &str) -> Option<usize> {
        self.0.iter().position(|level| level.iter().any(|s| s == stage))
    }

    /// Returns the levels as nested slices.
    #[must_use]
    pub fn as_slice(&self) -> &[Vec<String>] {
        &self.0
    }
}

impl From<Vec<Vec<String>>> for Levels {
    fn from(levels: Vec<Vec<String>>) -> Self {
        Self(levels)
    }
}

/// An immutable directed graph of stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Stage specifications by name.
    stages: HashMap<String, StageSpec>,
    /// Declaration order, for deterministic traversal.
    order: Vec<String>,
    /// Stage -> stages it depends on.
    dependencies: HashMap<String, BTreeSet<String>>,
    /// Stage -> stages that depend on it.
    dependents: HashMap<String, BTreeSet<String>>,
    /// Stage -> dependency paths no stage produces.
    static_inputs: HashMap<String, Vec<String>>,
}

impl StageGraph {
    /// Builds a graph from stage specifications.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate stage names, two stages declaring the
    /// same output, an invalid stage, or an `after` link to an unknown stage.
    pub fn build(specs: Vec<StageSpec>) -> Result<Self, ConfigurationError> {
        let mut stages = HashMap::with_capacity(specs.len());
        let mut order = Vec::with_capacity(specs.len());

        for spec in specs {
            spec.validate()?;
            if stages.contains_key(&spec.name) {
                return Err(ConfigurationError::duplicate_stage(&spec.name));
            }
            order.push(spec.name.clone());
            stages.insert(spec.name.clone(), spec);
        }

        // Output path -> producing stage
        let mut producers: HashMap<String, String> = HashMap::new();
        for name in &order {
            for out in &stages[name].outs {
                let out = paths::normalize(out);
                if let Some(first) = producers.get(&out) {
                    if first != name {
                        return Err(ConfigurationError::duplicate_output(&out, first, name));
                    }
                    continue;
                }
                producers.insert(out, name.clone());
            }
        }

        let mut dependencies: HashMap<String, BTreeSet<String>> =
            order.iter().map(|n| (n.clone(), BTreeSet::new())).collect();
        let mut dependents: HashMap<String, BTreeSet<String>> =
            order.iter().map(|n| (n.clone(), BTreeSet::new())).collect();
        let mut static_inputs: HashMap<String, Vec<String>> = HashMap::new();

        for name in &order {
            let spec = &stages[name];
            for dep in &spec.deps {
                let normalized = paths::normalize(dep);
                let producer = paths::self_and_ancestors(&normalized)
                    .find_map(|candidate| producers.get(candidate));
                match producer {
                    Some(producer) => {
                        dependencies.entry(name.clone()).or_default().insert(producer.clone());
                        dependents.entry(producer.clone()).or_default().insert(name.clone());
                    }
                    None => static_inputs.entry(name.clone()).or_default().push(dep.clone()),
                }
            }
            for upstream in &spec.after {
                if !stages.contains_key(upstream) {
                    return Err(ConfigurationError::new(format!(
                        "Stage '{name}' runs after unknown stage '{upstream}'"
                    ))
                    .with_stages(vec![name.clone(), upstream.clone()]));
                }
                dependencies.entry(name.clone()).or_default().insert(upstream.clone());
                dependents.entry(upstream.clone()).or_default().insert(name.clone());
            }
        }

        Ok(Self {
            stages,
            order,
            dependencies,
            dependents,
            static_inputs,
        })
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns a stage specification by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Returns stage names in declaration order.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.order
    }

    /// Returns the stages that `name` depends on.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        self.dependencies.get(name).cloned().unwrap_or_default()
    }

    /// Returns the stages that depend on `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        self.dependents.get(name).cloned().unwrap_or_default()
    }

    /// Returns the dependency paths of `name` that no stage produces.
    #[must_use]
    pub fn static_inputs(&self, name: &str) -> &[String] {
        self.static_inputs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Checks that every dependency no stage produces exists under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first stage with a dangling dependency.
    pub fn check_static_inputs(&self, root: &Path) -> Result<(), ConfigurationError> {
        for name in &self.order {
            for dep in self.static_inputs(name) {
                if !root.join(dep).exists() {
                    return Err(ConfigurationError::dangling_dependency(name, dep));
                }
            }
        }
        Ok(())
    }

    /// Restricts the graph to `targets` and their transitive dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if any target is not a known stage.
    pub fn select(&self, targets: &[String]) -> Result<Self, ConfigurationError> {
        let missing: BTreeSet<&str> = targets
            .iter()
            .filter(|t| !self.stages.contains_key(*t))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.into_iter().collect();
            return Err(ConfigurationError::new(format!(
                "Stage(s) not found: {}",
                names.join(", ")
            ))
            .with_stages(names.iter().map(ToString::to_string).collect()));
        }

        let mut needed: HashSet<&str> = HashSet::new();
        let mut to_process: Vec<&str> = targets.iter().map(String::as_str).collect();
        while let Some(name) = to_process.pop() {
            if !needed.insert(name) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(name) {
                to_process.extend(deps.iter().map(String::as_str));
            }
        }

        let specs = self
            .order
            .iter()
            .filter(|n| needed.contains(n.as_str()))
            .map(|n| self.stages[n].clone())
            .collect();
        Self::build(specs)
    }

    /// Finds a dependency cycle, if any.
    ///
    /// The returned path starts and ends with the same stage.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.order {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        if let Some(children) = self.dependents.get(node) {
            for child in children {
                if !visited.contains(child.as_str()) {
                    if let Some(cycle) = self.dfs_cycle(child, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(child.as_str()) {
                    let start = path.iter().position(|n| *n == child).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
                    cycle.push(child.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    /// Partitions the graph into execution levels.
    ///
    /// Cycle detection runs first, so no level is produced for a cyclic graph.
    ///
    /// # Errors
    ///
    /// Returns an error naming the cycle if the graph is not acyclic.
    pub fn levels(&self) -> Result<Levels, CycleDetectedError> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CycleDetectedError::new(cycle));
        }

        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|n| (n.as_str(), self.dependencies.get(n).map_or(0, BTreeSet::len)))
            .collect();

        let mut levels = Vec::new();
        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree[n] == 0)
            .collect();

        while !queue.is_empty() {
            let mut current: Vec<&str> = queue.drain(..).collect();
            current.sort_unstable();

            for name in &current {
                for dependent in self.dependents.get(*name).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
            levels.push(current.into_iter().map(ToString::to_string).collect());
        }

        let placed: usize = levels.iter().map(Vec::len).sum();
        if placed != self.stages.len() {
            // Only reachable if cycle detection missed an edge.
            let remaining = self
                .order
                .iter()
                .filter(|n| in_degree[n.as_str()] > 0)
                .cloned()
                .collect();
            return Err(CycleDetectedError::new(remaining));
        }

        Ok(Levels(levels))
    }
}
