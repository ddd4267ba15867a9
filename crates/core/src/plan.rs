// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validator and execution-plan compiler. Turns a frozen [`Registry`] into
//! an immutable [`ExecutionPlan`] once validation passes.

use crate::error::DefinitionError;
use crate::registry::{BarrierKind, Registry, StepDef};
use crate::step::StepKind;
use std::collections::{HashMap, HashSet, VecDeque};

/// Read-only introspection record for one compiled step, returned by
/// `Pipe::describe()` so a caller can render a pipeline's shape without
/// re-deriving it from the registration calls.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub name: String,
    pub kind: StepKind,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub barrier: BarrierKind,
    pub barrier_timeout_ms: Option<u64>,
    pub has_error_handler: bool,
    pub targets: Vec<String>,
}

/// Validation strictness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions<'a> {
    pub start: Option<&'a str>,
    pub strict: bool,
    pub allow_multi_root: bool,
}

/// A group of parents that are mutually-exclusive targets of the same
/// SWITCH step: only one fires per execution, so an ALL barrier must not
/// wait on its siblings.
#[derive(Debug, Clone)]
pub struct SwitchSiblingGroup {
    pub members: HashSet<String>,
}

/// Immutable snapshot produced once validation passes. Shared (read-only)
/// across the whole run.
pub struct ExecutionPlan<S, C> {
    pub steps: HashMap<String, StepDef<S, C>>,
    pub topology: HashMap<String, Vec<String>>,
    pub parents: HashMap<String, HashSet<String>>,
    pub roots: Vec<String>,
    pub switch_sibling_groups: HashMap<String, Vec<SwitchSiblingGroup>>,
}

impl<S, C> ExecutionPlan<S, C> {
    pub fn successors(&self, node: &str) -> &[String] {
        self.topology.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn parents_of(&self, node: &str) -> HashSet<String> {
        self.parents.get(node).cloned().unwrap_or_default()
    }

    pub fn barrier_kind(&self, node: &str) -> BarrierKind {
        self.steps
            .get(node)
            .map(|s| s.barrier)
            .unwrap_or(BarrierKind::All)
    }

    pub fn get(&self, node: &str) -> Option<&StepDef<S, C>> {
        self.steps.get(node)
    }

    /// Every step in alphabetical order, as read-only introspection records.
    pub fn describe(&self) -> Vec<StepInfo> {
        let mut names: Vec<&String> = self.steps.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let step = &self.steps[name];
                StepInfo {
                    name: step.name.clone(),
                    kind: step.kind,
                    timeout_ms: step.timeout.map(|d| d.as_millis() as u64),
                    max_retries: step.retry.map(|r| r.max_attempts),
                    barrier: step.barrier,
                    barrier_timeout_ms: step.barrier_timeout.map(|d| d.as_millis() as u64),
                    has_error_handler: step.error_handler.is_some(),
                    targets: step.static_targets(),
                }
            })
            .collect()
    }
}

/// Entry points: steps that are not the target of any other step.
fn compute_roots<S, C>(
    steps: &HashMap<String, StepDef<S, C>>,
    topology: &HashMap<String, Vec<String>>,
) -> HashSet<String> {
    let mut targets: HashSet<String> = HashSet::new();
    for children in topology.values() {
        targets.extend(children.iter().cloned());
    }
    steps.keys().filter(|n| !targets.contains(*n)).cloned().collect()
}

fn compute_parents(topology: &HashMap<String, Vec<String>>) -> HashMap<String, HashSet<String>> {
    let mut parents: HashMap<String, HashSet<String>> = HashMap::new();
    for (parent, children) in topology {
        for child in children {
            parents.entry(child.clone()).or_default().insert(parent.clone());
        }
    }
    parents
}

fn compute_switch_sibling_groups<S, C>(
    steps: &HashMap<String, StepDef<S, C>>,
    parents: &HashMap<String, HashSet<String>>,
) -> HashMap<String, Vec<SwitchSiblingGroup>> {
    let mut groups: HashMap<String, Vec<SwitchSiblingGroup>> = HashMap::new();
    for step in steps.values() {
        if step.kind != StepKind::Switch {
            continue;
        }
        let targets: HashSet<String> = step.static_targets().into_iter().collect();
        for (child, child_parents) in parents {
            let overlap: HashSet<String> = targets.intersection(child_parents).cloned().collect();
            if overlap.len() > 1 {
                groups
                    .entry(child.clone())
                    .or_default()
                    .push(SwitchSiblingGroup { members: overlap });
            }
        }
    }
    groups
}

/// Levenshtein edit distance, used only to produce "did you mean" hints on
/// an unknown-target error.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

fn closest_name<'a>(target: &str, candidates: impl Iterator<Item = &'a String>) -> Option<&'a str> {
    candidates
        .map(|c| (edit_distance(target, c), c.as_str()))
        .filter(|(d, _)| *d <= 3)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

fn suggestion_suffix(target: &str, known: &HashSet<String>) -> String {
    match closest_name(target, known.iter()) {
        Some(name) => format!(" (did you mean '{name}'?)"),
        None => String::new(),
    }
}

/// Validates the frozen registry and compiles an [`ExecutionPlan`]. Check
/// order is load-bearing: it determines which error surfaces first when a
/// graph has multiple problems (unknown targets, then MAP/SWITCH
/// configuration, then worker-trap, then entry points, then cycles, then
/// reachability).
pub fn compile<S, C>(
    registry: Registry<S, C>,
    opts: ValidateOptions<'_>,
) -> Result<ExecutionPlan<S, C>, DefinitionError> {
    let Registry { steps, topology, .. } = registry;

    if steps.is_empty() {
        return Err(DefinitionError::NoEntryPoint);
    }

    let known: HashSet<String> = steps.keys().cloned().collect();

    // 1. Every topology edge must target a registered step.
    for (parent, children) in &topology {
        for child in children {
            if !known.contains(child) {
                return Err(DefinitionError::UnknownTarget {
                    step: parent.clone(),
                    target: child.clone(),
                    suggestion: suggestion_suffix(child, &known),
                });
            }
        }
    }

    // 2. MAP worker targets and SWITCH targets/default must exist (already
    // enforced not-empty at registration; here we check the names resolve).
    for step in steps.values() {
        if let Some(map) = &step.map {
            if !known.contains(&map.each) {
                return Err(DefinitionError::UnknownTarget {
                    step: step.name.clone(),
                    target: map.each.clone(),
                    suggestion: suggestion_suffix(&map.each, &known),
                });
            }
        }
        if let Some(switch) = &step.switch {
            for target in switch.targets() {
                if !known.contains(&target) {
                    return Err(DefinitionError::UnknownTarget {
                        step: step.name.clone(),
                        target: target.clone(),
                        suggestion: suggestion_suffix(&target, &known),
                    });
                }
            }
        }
    }

    // 3. Worker trap: a MAP worker target must not also declare a static
    // `to` — that edge would silently never fire.
    let worker_targets: HashSet<String> = steps
        .values()
        .filter_map(|s| s.map.as_ref().map(|m| m.each.clone()))
        .collect();
    for worker in &worker_targets {
        if let Some(step) = steps.get(worker) {
            if !step.to.is_empty() {
                return Err(DefinitionError::WorkerTrap {
                    owner: steps
                        .values()
                        .find(|s| s.map.as_ref().map(|m| &m.each) == Some(worker))
                        .map(|s| s.name.clone())
                        .unwrap_or_default(),
                    worker: worker.clone(),
                });
            }
        }
    }

    let roots_set = compute_roots(&steps, &topology);
    let effective_roots: Vec<String> = match opts.start {
        Some(start) => {
            if !known.contains(start) {
                return Err(DefinitionError::UnknownTarget {
                    step: "<start>".to_string(),
                    target: start.to_string(),
                    suggestion: suggestion_suffix(start, &known),
                });
            }
            vec![start.to_string()]
        }
        None => {
            if roots_set.is_empty() {
                return Err(DefinitionError::NoEntryPoint);
            }
            let mut roots: Vec<String> = roots_set.iter().cloned().collect();
            roots.sort();
            if roots.len() > 1 && !opts.allow_multi_root {
                if opts.strict {
                    return Err(DefinitionError::MultipleRoots(roots));
                }
                tracing::warn!(
                    roots = ?roots,
                    "multiple root steps found; allow_multi_root is false and strict mode is off, proceeding with non-deterministic root order"
                );
            }
            roots
        }
    };

    // 4. Cycle detection via DFS from the effective roots.
    if let Some(cycle) = find_cycle(&topology, &effective_roots) {
        return Err(DefinitionError::Cycle(cycle));
    }

    // 5. Full reachability from the effective roots.
    let reachable = reachable_from(&topology, &effective_roots);
    let unreachable: Vec<&String> = known.iter().filter(|n| !reachable.contains(*n)).collect();
    if !unreachable.is_empty() {
        let mut unreachable: Vec<String> = unreachable.into_iter().cloned().collect();
        unreachable.sort();
        if opts.strict || opts.start.is_some() {
            return Err(DefinitionError::Unreachable(unreachable.join(", ")));
        }
        tracing::warn!(steps = ?unreachable, "steps unreachable from computed roots");
    }

    let parents = compute_parents(&topology);

    // 6. When `start` restricts the reachable set, every ALL-barrier step
    // reachable from start must have all its parents reachable too.
    if opts.start.is_some() {
        for node in &reachable {
            let Some(step) = steps.get(node) else { continue };
            if step.barrier != BarrierKind::All {
                continue;
            }
            let Some(node_parents) = parents.get(node) else { continue };
            if node_parents.len() <= 1 {
                continue;
            }
            for parent in node_parents {
                if !reachable.contains(parent) {
                    return Err(DefinitionError::UnreachableAllBarrierParent {
                        step: node.clone(),
                        missing_parent: parent.clone(),
                    });
                }
            }
        }
    }

    let switch_sibling_groups = compute_switch_sibling_groups(&steps, &parents);

    Ok(ExecutionPlan {
        steps,
        topology,
        parents,
        roots: effective_roots,
        switch_sibling_groups,
    })
}

fn reachable_from(topology: &HashMap<String, Vec<String>>, roots: &[String]) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = roots.iter().cloned().collect();
    for r in roots {
        seen.insert(r.clone());
    }
    while let Some(node) = queue.pop_front() {
        if let Some(children) = topology.get(&node) {
            for child in children {
                if seen.insert(child.clone()) {
                    queue.push_back(child.clone());
                }
            }
        }
    }
    seen
}

fn find_cycle(topology: &HashMap<String, Vec<String>>, roots: &[String]) -> Option<Vec<String>> {
    #[derive(PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();

    fn visit(
        node: &str,
        topology: &HashMap<String, Vec<String>>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(Mark::InProgress) = marks.get(node) {
            let start = stack.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if marks.get(node) == Some(&Mark::Done) {
            return None;
        }
        marks.insert(node.to_string(), Mark::InProgress);
        stack.push(node.to_string());
        if let Some(children) = topology.get(node) {
            for child in children {
                if let Some(cycle) = visit(child, topology, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node.to_string(), Mark::Done);
        None
    }

    for root in roots {
        if let Some(cycle) = visit(root, topology, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
