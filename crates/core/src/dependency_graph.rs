// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime barrier state. A pure function of prior state and the current
//! completion event — kept state-machine-shaped so it can be exercised with
//! synthetic completion sequences, independent of the async runtime that
//! drives it.

use crate::plan::ExecutionPlan;
use crate::registry::BarrierKind;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// What the caller should do after feeding a completion into the graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transition {
    pub steps_to_start: Vec<String>,
    pub barriers_to_schedule: Vec<(String, Duration)>,
    pub barriers_to_cancel: Vec<String>,
}

/// Per-run mutable barrier-tracking state.
pub struct DependencyGraph {
    parents: HashMap<String, HashSet<String>>,
    switch_sibling_groups: HashMap<String, Vec<HashSet<String>>>,
    completed_parents: HashMap<String, HashSet<String>>,
    /// ANY-barrier nodes whose barrier has already fired in the current wave.
    satisfied: HashSet<String>,
}

impl DependencyGraph {
    pub fn new<S, C>(plan: &ExecutionPlan<S, C>) -> Self {
        let switch_sibling_groups = plan
            .switch_sibling_groups
            .iter()
            .map(|(k, groups)| (k.clone(), groups.iter().map(|g| g.members.clone()).collect()))
            .collect();
        Self {
            parents: plan.parents.clone(),
            switch_sibling_groups,
            completed_parents: HashMap::new(),
            satisfied: HashSet::new(),
        }
    }

    fn required_parents(&self, node: &str) -> HashSet<String> {
        let mut required = self.parents.get(node).cloned().unwrap_or_default();
        let completed = self.completed_parents.get(node).cloned().unwrap_or_default();
        if let Some(groups) = self.switch_sibling_groups.get(node) {
            for group in groups {
                if !completed.is_disjoint(group) {
                    for sibling in group.difference(&completed) {
                        required.remove(sibling);
                    }
                }
            }
        }
        required
    }

    fn is_satisfied(&self, node: &str) -> bool {
        let completed = self.completed_parents.get(node).cloned().unwrap_or_default();
        let required = self.required_parents(node);
        required.is_subset(&completed)
    }

    /// Required parents of `node` that have not yet completed, for
    /// `BARRIER_WAIT`'s `waiting_for` payload.
    pub fn pending_parents(&self, node: &str) -> HashSet<String> {
        let completed = self.completed_parents.get(node).cloned().unwrap_or_default();
        self.required_parents(node).difference(&completed).cloned().collect()
    }

    /// How many of `node`'s required parents have completed so far.
    pub fn completed_parent_count(&self, node: &str) -> usize {
        self.completed_parents.get(node).map(|s| s.len()).unwrap_or(0)
    }

    /// Processes the completion of `completed_node`, returning the
    /// transition instructions for every successor.
    pub fn transition<S, C>(
        &mut self,
        plan: &ExecutionPlan<S, C>,
        completed_node: &str,
    ) -> Transition {
        let mut result = Transition::default();

        for succ in plan.successors(completed_node).to_vec() {
            let barrier = plan.barrier_kind(&succ);
            let parents_needed = self.parents.get(&succ).cloned().unwrap_or_default();
            let is_first = self
                .completed_parents
                .get(&succ)
                .map(|s| s.is_empty())
                .unwrap_or(true);

            // Barrier timeouts are only meaningful for ALL barriers with
            // more than one parent; ANY never schedules one since its first
            // completion already satisfies it.
            if is_first && parents_needed.len() > 1 && barrier == BarrierKind::All {
                if let Some(step) = plan.get(&succ) {
                    if let Some(timeout) = step.barrier_timeout {
                        result.barriers_to_schedule.push((succ.clone(), timeout));
                    }
                }
            }

            let should_start = match barrier {
                BarrierKind::Any => self.handle_any(&succ, completed_node),
                BarrierKind::All => self.handle_all(&succ, completed_node),
            };

            if should_start {
                if parents_needed.len() > 1 {
                    result.barriers_to_cancel.push(succ.clone());
                }
                result.steps_to_start.push(succ.clone());
            }
        }

        result
    }

    fn mark_completed(&mut self, node: &str, parent: &str) {
        self.completed_parents
            .entry(node.to_string())
            .or_default()
            .insert(parent.to_string());
    }

    fn reset(&mut self, node: &str) {
        self.completed_parents.remove(node);
    }

    fn handle_all(&mut self, node: &str, parent: &str) -> bool {
        self.mark_completed(node, parent);
        if self.is_satisfied(node) {
            self.reset(node);
            true
        } else {
            false
        }
    }

    /// ANY fires on the first completion per wave; later completions in the
    /// same wave are tracked only so the wave can reset once every required
    /// parent has reported at least once.
    fn handle_any(&mut self, node: &str, parent: &str) -> bool {
        if self.satisfied.contains(node) {
            self.mark_completed(node, parent);
            if self.is_satisfied(node) {
                self.reset(node);
                self.satisfied.remove(node);
            }
            return false;
        }

        self.mark_completed(node, parent);
        self.satisfied.insert(node.to_string());

        if self.is_satisfied(node) {
            self.reset(node);
            self.satisfied.remove(node);
        }
        true
    }
}

#[cfg(test)]
#[path = "dependency_graph_tests.rs"]
mod tests;
