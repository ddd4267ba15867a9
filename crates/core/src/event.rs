// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The run's lifecycle event stream: a totally-ordered sequence of typed
//! events, each carrying invocation identity so a consumer can reconstruct
//! the run's call tree.

use crate::error::{FailureRecord, TerminalStatus};
use crate::id::{InvocationId, RunId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classifies which kind of node in the execution plan produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    System,
    Step,
    MapOwner,
    MapWorker,
    Switch,
    Sub,
}

/// Per-invocation identity attached to every event and completion
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub invocation_id: InvocationId,
    pub parent_invocation_id: Option<InvocationId>,
    pub owner_invocation_id: InvocationId,
    pub attempt: u32,
    pub scope: Vec<String>,
    pub node_kind: NodeKind,
}

impl InvocationContext {
    pub fn orphan(step_name: &str, node_kind: NodeKind) -> Self {
        let id = InvocationId::orphan(step_name);
        Self {
            invocation_id: id.clone(),
            parent_invocation_id: None,
            owner_invocation_id: id,
            attempt: 1,
            scope: Vec::new(),
            node_kind,
        }
    }
}

/// `BARRIER_WAIT` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierWaitPayload {
    pub timeout: Option<f64>,
    pub dependencies: Vec<String>,
    pub expected_count: usize,
    pub completed_count: usize,
    pub waiting_for: Vec<String>,
}

/// `BARRIER_RELEASE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarrierReleasePayload {
    pub duration: f64,
}

/// `MAP_START` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapStartPayload {
    pub target: String,
    pub item_count: usize,
}

/// `MAP_WORKER` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapWorkerPayload {
    pub index: usize,
    pub total: usize,
    pub target: String,
    pub owner: String,
}

/// `MAP_COMPLETE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapCompletePayload {
    pub target: String,
    pub item_count: usize,
    pub owner_invocation_id: String,
    pub owner_scope: Vec<String>,
}

/// Runtime metrics accumulated over a run, attached to `FINISH`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub steps_started: u64,
    pub steps_completed: u64,
    pub steps_failed: u64,
    pub events_emitted: u64,
    pub map_workers_peak_concurrency: HashMap<String, usize>,
    pub step_latency_ms: HashMap<String, Vec<f64>>,
    pub barrier_wait_ms: HashMap<String, Vec<f64>>,
}

/// `FINISH` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEndData {
    pub status: TerminalStatus,
    pub duration_s: f64,
    pub failures: Vec<FailureRecord>,
    pub metrics: RuntimeMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Lifecycle events emitted by a run. Serializes with
/// `{"type": "step_start", ...}` — a stable wire shape for consumers that
/// persist or render the stream outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Start {
        state: serde_json::Value,
    },
    StepStart,
    Token {
        value: serde_json::Value,
    },
    StepEnd {
        state: Option<serde_json::Value>,
    },
    StepError {
        message: String,
    },
    BarrierWait(BarrierWaitPayload),
    BarrierRelease(BarrierReleasePayload),
    MapStart(MapStartPayload),
    MapWorker(MapWorkerPayload),
    MapComplete(MapCompletePayload),
    Suspend {
        reason: String,
    },
    Timeout {
        message: String,
    },
    Cancelled {
        message: String,
    },
    Finish(PipelineEndData),
}

/// One record in the output stream. `seq` is assigned by the event
/// publisher at the moment the event leaves the run, not at construction
/// time — see `justpipe-engine`'s publication pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<RunId>,
    pub stage: String,
    pub node_kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_invocation_id: Option<InvocationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_invocation_id: Option<InvocationId>,
    pub attempt: u32,
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(flatten)]
    pub body: EventBody,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
