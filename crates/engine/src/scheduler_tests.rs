// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::PipeConfig;
use crate::kernel::RuntimeKernel;
use crate::publisher::EventPublisher;
use justpipe_core::{
    AttemptTracker, BarrierKind, BoxFuture, CancellationToken, Clock, DependencyGraph,
    ExecutionPlan, FailureJournal, FailureReason, FakeClock, Hooks, InjectionMetadata,
    InvocationIdGen, MapConfig, Meta, StepCx, StepDef, StepFn, StepOutcome,
};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

struct Increment;
impl StepFn<i32, ()> for Increment {
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, i32, ()>) -> BoxFuture<'a, StepOutcome<()>> {
        Box::pin(async move {
            *cx.state += 1;
            StepOutcome::Continue
        })
    }
}

struct Unused;
impl StepFn<i32, ()> for Unused {
    fn call<'a>(&'a self, _cx: &'a mut StepCx<'_, i32, ()>) -> BoxFuture<'a, StepOutcome<()>> {
        Box::pin(async move { StepOutcome::Continue })
    }
}

fn base_step(name: &str, body: impl StepFn<i32, ()> + 'static) -> StepDef<i32, ()> {
    StepDef {
        name: name.to_string(),
        kind: StepKind::Plain,
        body: StepBody::Plain(Arc::new(body)),
        timeout: None,
        retry: None,
        barrier: BarrierKind::All,
        barrier_timeout: None,
        error_handler: None,
        extra: HashMap::new(),
        to: Vec::new(),
        map: None,
        switch: None,
        injection: InjectionMetadata::default(),
    }
}

fn map_owner_step(name: &str, each: &str, max_concurrency: Option<usize>) -> StepDef<i32, ()> {
    let mut def = base_step(name, Unused);
    def.kind = StepKind::Map;
    def.map = Some(MapConfig {
        each: each.to_string(),
        max_concurrency,
    });
    def
}

fn fixture(
    steps: HashMap<String, StepDef<i32, ()>>,
    topology: HashMap<String, Vec<String>>,
    parents: HashMap<String, HashSet<String>>,
) -> (Arc<RunContext<i32, ()>>, mpsc::Receiver<Event>) {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
    let (tx, rx) = mpsc::channel(128);
    let plan = Arc::new(ExecutionPlan {
        steps,
        topology,
        parents,
        roots: Vec::new(),
        switch_sibling_groups: HashMap::new(),
    });
    let dep_graph = DependencyGraph::new(&*plan);
    let rc = RunContext {
        plan,
        hooks: Arc::new(Hooks::default()),
        config: Arc::new(PipeConfig::default()),
        state: Arc::new(AsyncMutex::new(0)),
        context: Arc::new(()),
        clock: Arc::clone(&clock),
        cancel: CancellationToken::new(),
        kernel: RuntimeKernel::new(),
        publisher: Arc::new(EventPublisher::new(RunId::new("run"), tx, Vec::new(), Vec::new())),
        dep_graph: Arc::new(parking_lot::Mutex::new(dep_graph)),
        journal: Arc::new(parking_lot::Mutex::new(FailureJournal::new())),
        id_gen: Arc::new(InvocationIdGen::new(RunId::new("run"))),
        attempts: Arc::new(AttemptTracker::new()),
        meta: Meta::default(),
        started_at: clock.now(),
        barrier_started_at: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        failed_barriers: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        skipped_owners: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        retry_counts: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        barrier_watchers: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        owner_step: Arc::new(parking_lot::Mutex::new(HashMap::new())),
    };
    (Arc::new(rc), rx)
}

fn invctx(step: &str) -> InvocationContext {
    InvocationContext::orphan(step, NodeKind::Step)
}

async fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn all_barrier_successor_waits_for_every_parent() {
    let mut steps = HashMap::new();
    steps.insert("a".to_string(), base_step("a", Increment));
    steps.insert("c".to_string(), base_step("c", Increment));
    steps.insert("b".to_string(), base_step("b", Increment));
    let mut topology = HashMap::new();
    topology.insert("a".to_string(), vec!["b".to_string()]);
    topology.insert("c".to_string(), vec!["b".to_string()]);
    let mut parents = HashMap::new();
    parents.insert("b".to_string(), HashSet::from(["a".to_string(), "c".to_string()]));
    let (rc, mut rx) = fixture(steps, topology, parents);

    fire_successors(&rc, "a").await;
    assert!(rx.try_recv().is_err(), "b must not start before its second parent completes");

    fire_successors(&rc, "c").await;
    rc.kernel.drain().await;

    let events = drain_events(&mut rx).await;
    assert!(events.iter().any(|e| matches!(e.body, EventBody::StepStart)));
    assert!(events.iter().any(|e| matches!(&e.body, EventBody::StepEnd { state } if *state == Some(serde_json::json!(1)))));
}

#[tokio::test]
async fn retry_beyond_max_retries_escalates_as_internal_failure() {
    let mut steps = HashMap::new();
    steps.insert("flaky".to_string(), base_step("flaky", Increment));
    let (rc, mut rx) = fixture_with_config(steps, HashMap::new(), HashMap::new(), {
        let mut c = PipeConfig::default();
        c.max_retries = 0;
        c
    });
    let invctx = invctx("flaky");

    dispatch(rc.clone(), "flaky".to_string(), invctx, None, ResultAction::Retry).await;

    let records = rc.journal.lock().records().to_vec();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FailureReason::InternalError);
    assert!(rx.try_recv().is_ok(), "a STEP_ERROR event should have been published");
    let _ = rx.try_recv();
}

fn fixture_with_config(
    steps: HashMap<String, StepDef<i32, ()>>,
    topology: HashMap<String, Vec<String>>,
    parents: HashMap<String, HashSet<String>>,
    config: PipeConfig,
) -> (Arc<RunContext<i32, ()>>, mpsc::Receiver<Event>) {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
    let (tx, rx) = mpsc::channel(128);
    let plan = Arc::new(ExecutionPlan {
        steps,
        topology,
        parents,
        roots: Vec::new(),
        switch_sibling_groups: HashMap::new(),
    });
    let dep_graph = DependencyGraph::new(&*plan);
    let rc = RunContext {
        plan,
        hooks: Arc::new(Hooks::default()),
        config: Arc::new(config),
        state: Arc::new(AsyncMutex::new(0)),
        context: Arc::new(()),
        clock: Arc::clone(&clock),
        cancel: CancellationToken::new(),
        kernel: RuntimeKernel::new(),
        publisher: Arc::new(EventPublisher::new(RunId::new("run"), tx, Vec::new(), Vec::new())),
        dep_graph: Arc::new(parking_lot::Mutex::new(dep_graph)),
        journal: Arc::new(parking_lot::Mutex::new(FailureJournal::new())),
        id_gen: Arc::new(InvocationIdGen::new(RunId::new("run"))),
        attempts: Arc::new(AttemptTracker::new()),
        meta: Meta::default(),
        started_at: clock.now(),
        barrier_started_at: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        failed_barriers: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        skipped_owners: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        retry_counts: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        barrier_watchers: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        owner_step: Arc::new(parking_lot::Mutex::new(HashMap::new())),
    };
    (Arc::new(rc), rx)
}

#[tokio::test]
async fn reroute_skips_static_successor_and_starts_dynamic_target() {
    let mut steps = HashMap::new();
    let mut a = base_step("a", Increment);
    a.to = Some("z".to_string());
    steps.insert("a".to_string(), a);
    steps.insert("b".to_string(), base_step("b", Increment));
    steps.insert("z".to_string(), base_step("z", Increment));
    let mut topology = HashMap::new();
    topology.insert("a".to_string(), vec!["z".to_string()]);
    let mut parents = HashMap::new();
    parents.insert("z".to_string(), HashSet::from(["a".to_string()]));
    let (rc, mut rx) = fixture(steps, topology, parents);

    let invctx = invctx("a");
    dispatch(rc.clone(), "a".to_string(), invctx, None, ResultAction::Reroute("b".to_string())).await;
    rc.kernel.drain().await;

    let events = drain_events(&mut rx).await;
    let starts = events.iter().filter(|e| matches!(e.body, EventBody::StepStart)).count();
    assert_eq!(starts, 1, "only the rerouted target should have run, never the static successor");
}

#[tokio::test]
async fn map_fan_out_runs_every_worker_and_emits_map_complete() {
    let mut steps = HashMap::new();
    steps.insert("fanout".to_string(), map_owner_step("fanout", "worker", Some(2)));
    steps.insert("worker".to_string(), base_step("worker", Increment));
    let (rc, mut rx) = fixture(steps, HashMap::new(), HashMap::new());

    let invctx = invctx("fanout");
    // In the real run loop, `start_step` pre-registers this owner's own
    // logical unit via `kernel.spawn` before `dispatch` ever runs; simulate
    // that here since this test calls `dispatch` directly.
    rc.kernel.track_additional(&invctx.invocation_id);
    let items: Vec<Arc<dyn Any + Send + Sync>> = vec![Arc::new(1i32), Arc::new(2i32), Arc::new(3i32)];
    dispatch(rc.clone(), "fanout".to_string(), invctx, None, ResultAction::Map(items, "worker".to_string())).await;
    rc.kernel.drain().await;

    let events = drain_events(&mut rx).await;
    let map_start = events
        .iter()
        .find_map(|e| match &e.body {
            EventBody::MapStart(payload) => Some(payload.item_count),
            _ => None,
        })
        .expect("MAP_START not published");
    assert_eq!(map_start, 3);

    let worker_events = events.iter().filter(|e| matches!(e.body, EventBody::MapWorker(_))).count();
    assert_eq!(worker_events, 3);

    let step_starts = events.iter().filter(|e| matches!(e.body, EventBody::StepStart)).count();
    assert_eq!(step_starts, 3);

    assert!(events.iter().any(|e| matches!(&e.body, EventBody::MapComplete(payload) if payload.item_count == 3)));

    let state = *rc.state.lock().await;
    assert_eq!(state, 3);
}
