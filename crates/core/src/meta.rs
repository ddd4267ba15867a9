// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured metadata scopes: pipeline-definition metadata is read-only,
//! run-scoped metadata snapshots onto FINISH, step-scoped metadata snapshots
//! onto that invocation's STEP_END/STEP_ERROR.
//!
//! A dynamic language can detect a `Meta` parameter by inspecting a step's
//! type hints and thread it through a context-local variable so concurrent
//! invocations don't cross-contaminate. Rust has neither reflection nor an
//! implicit per-task local by default, so `StepMeta` is instead constructed
//! fresh per invocation and handed to the step explicitly alongside
//! [`crate::step::StepCx`] — ordinary ownership already gives the same
//! isolation a dynamic scope would.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only pipeline-definition metadata (`meta.pipeline`), supplied once
/// via `PipeConfig::metadata`.
#[derive(Clone, Default)]
pub struct PipelineMeta {
    values: Arc<HashMap<String, serde_json::Value>>,
}

impl PipelineMeta {
    pub fn new(values: HashMap<String, serde_json::Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// Shared mutable bag backing both run- and step-scoped metadata. The
/// difference between the two scopes is lifetime and snapshot point, not
/// representation.
#[derive(Default)]
struct MetaBag {
    values: HashMap<String, serde_json::Value>,
    tags: Vec<String>,
    metrics: HashMap<String, f64>,
}

impl MetaBag {
    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "values": self.values,
            "tags": self.tags,
            "metrics": self.metrics,
        })
    }
}

/// Run-scoped metadata (`meta.run`), alive for the whole run and attached
/// to FINISH.
#[derive(Clone, Default)]
pub struct RunMeta {
    bag: Arc<Mutex<MetaBag>>,
}

impl RunMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.bag.lock().values.insert(key.into(), value);
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        let mut bag = self.bag.lock();
        if !bag.tags.contains(&tag) {
            bag.tags.push(tag);
        }
    }

    pub fn record_metric(&self, key: impl Into<String>, value: f64) {
        self.bag.lock().metrics.insert(key.into(), value);
    }

    pub fn increment(&self, key: impl Into<String>, by: f64) {
        let mut bag = self.bag.lock();
        let entry = bag.metrics.entry(key.into()).or_insert(0.0);
        *entry += by;
    }

    pub fn snapshot(&self) -> serde_json::Value {
        self.bag.lock().snapshot()
    }
}

/// Step-scoped metadata (`meta.step`), fresh per invocation and attached
/// only to that invocation's STEP_END/STEP_ERROR — never shared across
/// concurrent map workers or retries.
#[derive(Clone, Default)]
pub struct StepMeta {
    bag: Arc<Mutex<MetaBag>>,
}

impl StepMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.bag.lock().values.insert(key.into(), value);
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        let mut bag = self.bag.lock();
        if !bag.tags.contains(&tag) {
            bag.tags.push(tag);
        }
    }

    pub fn record_metric(&self, key: impl Into<String>, value: f64) {
        self.bag.lock().metrics.insert(key.into(), value);
    }

    pub fn increment(&self, key: impl Into<String>, by: f64) {
        let mut bag = self.bag.lock();
        let entry = bag.metrics.entry(key.into()).or_insert(0.0);
        *entry += by;
    }

    pub fn snapshot(&self) -> Option<serde_json::Value> {
        let bag = self.bag.lock();
        if bag.values.is_empty() && bag.tags.is_empty() && bag.metrics.is_empty() {
            None
        } else {
            Some(bag.snapshot())
        }
    }
}

/// The three scopes bundled together, handed to a step through
/// [`crate::step::StepCx`] when the pipeline carries any metadata.
#[derive(Clone, Default)]
pub struct Meta {
    pub pipeline: PipelineMeta,
    pub run: RunMeta,
    pub step: StepMeta,
}

impl Meta {
    pub fn new(pipeline: PipelineMeta, run: RunMeta) -> Self {
        Self {
            pipeline,
            run,
            step: StepMeta::new(),
        }
    }

    /// A fresh copy sharing `pipeline`/`run` but with an isolated `step`
    /// scope, for a new invocation.
    pub fn for_invocation(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            run: self.run.clone(),
            step: StepMeta::new(),
        }
    }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
