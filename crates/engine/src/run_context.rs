// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run state: no state lives anywhere global, it's all scoped to one
//! call to `Pipe::run`. Everything a spawned task needs to act on behalf
//! of a run is reachable from one `Arc<RunContext<S, C>>`.

use crate::config::PipeConfig;
use crate::kernel::RuntimeKernel;
use crate::publisher::EventPublisher;
use justpipe_core::{
    AttemptTracker, CancellationToken, Clock, DependencyGraph, ExecutionPlan, FailureJournal,
    Hooks, InvocationContext, InvocationId, InvocationIdGen, Meta, RunId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

/// Which MAP batch (if any) an owner invocation is waiting on, for the
/// `MAP_COMPLETE` payload emitted once every worker reports back.
pub struct MapBatchInfo {
    pub target: String,
    pub item_count: usize,
}

/// Tracks, for one owner invocation, which step's successors to fire once
/// [`RuntimeKernel::record_logical_completion`] reports it fully realized,
/// and (for a MAP owner) the batch metadata `MAP_COMPLETE` needs. Plain
/// steps never appear here — their owner is themselves, and the scheduler
/// already knows their own name.
pub struct OwnerRecord {
    pub step_name: String,
    pub owner_invctx: InvocationContext,
    pub map_batch: Option<MapBatchInfo>,
}

/// Shared state for one call to `Pipe::run`. `state`/`context` are wrapped
/// for shared access because multiple map workers or barrier-fed branches
/// may hold an invocation concurrently — state and context are shared by
/// reference with no engine-level locking; the engine itself only ever
/// serializes access to `state` for the duration of one invocation,
/// leaving cross-invocation synchronization to the user.
pub struct RunContext<S, C> {
    pub plan: Arc<ExecutionPlan<S, C>>,
    pub hooks: Arc<Hooks<S, C>>,
    pub config: Arc<PipeConfig>,
    pub state: Arc<AsyncMutex<S>>,
    pub context: Arc<C>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
    pub kernel: Arc<RuntimeKernel>,
    pub publisher: Arc<EventPublisher<S, C>>,
    pub dep_graph: Arc<parking_lot::Mutex<DependencyGraph>>,
    pub journal: Arc<parking_lot::Mutex<FailureJournal>>,
    pub id_gen: Arc<InvocationIdGen>,
    pub attempts: Arc<AttemptTracker>,
    pub meta: Meta,
    pub started_at: Instant,
    /// Barrier steps currently mid-wait, stamped when the first parent
    /// completes, used to compute `BARRIER_RELEASE`'s duration.
    pub barrier_started_at: Arc<parking_lot::Mutex<HashMap<String, Instant>>>,
    /// Barrier steps whose watcher already fired a timeout error — later
    /// parent completions must not re-trigger the child.
    pub failed_barriers: Arc<parking_lot::Mutex<HashSet<String>>>,
    /// Owners marked `Skip` or dynamically rerouted, whose static
    /// successors must not fire.
    pub skipped_owners: Arc<parking_lot::Mutex<HashSet<InvocationId>>>,
    /// Per-step retry counts this run, separate from `attempts` which hands
    /// out attempt numbers; this one enforces `max_retries`.
    pub retry_counts: Arc<parking_lot::Mutex<HashMap<String, u32>>>,
    /// Cancellation handle for each step's in-flight barrier-timeout
    /// watcher, so a successful release can wake it early.
    pub barrier_watchers: Arc<parking_lot::Mutex<HashMap<String, CancellationToken>>>,
    /// Owner invocations mid-flight on a MAP batch or sub-pipeline forward,
    /// keyed by `owner_invocation_id`.
    pub owner_step: Arc<parking_lot::Mutex<HashMap<InvocationId, OwnerRecord>>>,
}

impl<S, C> RunContext<S, C> {
    /// Assembles a fresh per-run context from a compiled plan and a run's
    /// initial state/context. Test code still builds the struct literal
    /// directly when it needs a bare-bones fixture; this constructor is for
    /// `Pipe::run`'s real orchestration path.
    pub fn new(
        plan: Arc<ExecutionPlan<S, C>>,
        hooks: Arc<Hooks<S, C>>,
        config: Arc<PipeConfig>,
        state: S,
        context: Arc<C>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
        publisher: Arc<EventPublisher<S, C>>,
        meta: Meta,
    ) -> Arc<Self> {
        let dep_graph = DependencyGraph::new(&plan);
        let started_at = clock.now();
        let run_id = publisher.run_id().clone();
        Arc::new(Self {
            plan,
            hooks,
            config,
            state: Arc::new(AsyncMutex::new(state)),
            context,
            clock,
            cancel,
            kernel: RuntimeKernel::new(),
            publisher,
            dep_graph: Arc::new(parking_lot::Mutex::new(dep_graph)),
            journal: Arc::new(parking_lot::Mutex::new(FailureJournal::new())),
            id_gen: Arc::new(InvocationIdGen::new(run_id)),
            attempts: Arc::new(AttemptTracker::new()),
            meta,
            started_at,
            barrier_started_at: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            failed_barriers: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            skipped_owners: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            retry_counts: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            barrier_watchers: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            owner_step: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        })
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.clock.now().saturating_duration_since(self.started_at)
    }

    pub fn mark_barrier_waiting(&self, step: &str) {
        self.barrier_started_at
            .lock()
            .entry(step.to_string())
            .or_insert_with(|| self.clock.now());
    }

    /// Takes and clears the recorded barrier-wait start, returning the
    /// elapsed duration for `BARRIER_RELEASE`'s `duration` field.
    pub fn take_barrier_duration(&self, step: &str) -> Option<std::time::Duration> {
        self.barrier_started_at
            .lock()
            .remove(step)
            .map(|start| self.clock.now().saturating_duration_since(start))
    }

    pub fn mark_owner_skipped(&self, owner: InvocationId) {
        self.skipped_owners.lock().insert(owner);
    }

    pub fn is_owner_skipped(&self, owner: &InvocationId) -> bool {
        self.skipped_owners.lock().contains(owner)
    }

    pub fn next_retry_count(&self, step: &str) -> u32 {
        let mut counts = self.retry_counts.lock();
        let entry = counts.entry(step.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn mark_barrier_failed(&self, step: &str) {
        self.failed_barriers.lock().insert(step.to_string());
    }

    pub fn is_barrier_failed(&self, step: &str) -> bool {
        self.failed_barriers.lock().contains(step)
    }

    pub fn register_barrier_watcher(&self, step: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.barrier_watchers.lock().insert(step.to_string(), token.clone());
        token
    }

    /// Cancels and forgets `step`'s watcher, if one is registered.
    pub fn cancel_barrier_watcher(&self, step: &str) {
        if let Some(token) = self.barrier_watchers.lock().remove(step) {
            token.cancel();
        }
    }
}

#[cfg(test)]
#[path = "run_context_tests.rs"]
mod tests;
