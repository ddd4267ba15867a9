// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler: turns a completed invocation into the next wave of
//! invocations. Drives the Step Invoker and Result Handler for
//! one invocation, escalates a failure through the Failure Handler, walks
//! the Dependency Graph to fire barrier-gated successors, and implements
//! MAP fan-out and sub-pipeline forwarding.
//!
//! Every step that follows another is started as a *new* spawned task
//! (never called inline), so this module has no recursive async fns: the
//! only cycle an async-fn call graph could form — `run_cycle` -> `dispatch`
//! -> (schedule another invocation) -> `run_cycle` — is broken by boxing
//! the future handed to [`RuntimeKernel::spawn`].

use crate::events::new_event;
use crate::failure::{self, Cause, Escalation};
use crate::invoker::{self, InvokeFailure, InvokeResult};
use crate::result_handler::{self, ResultAction};
use crate::run_context::{MapBatchInfo, OwnerRecord, RunContext};
use futures::StreamExt;
use justpipe_core::{
    BarrierReleasePayload, BarrierWaitPayload, Event, EventBody, InvocationContext,
    MapCompletePayload, MapStartPayload, MapWorkerPayload, NodeKind, PipelineEndData, StepKind,
    TerminalStatus,
};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Starts a step as a freshly spawned, kernel-tracked invocation. Used both
/// for the run's root step(s) and for every successor the scheduler fires.
pub async fn start_step<S, C>(
    rc: Arc<RunContext<S, C>>,
    step_name: String,
    invctx: InvocationContext,
    item: Option<Arc<dyn Any + Send + Sync>>,
) -> bool
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let owner = invctx.owner_invocation_id.clone();
    let fut: Pin<Box<dyn Future<Output = ()> + Send>> =
        Box::pin(run_cycle(rc.clone(), step_name, invctx, item));
    rc.kernel.spawn(Some(owner), fut).await
}

fn node_kind_for<S, C>(rc: &RunContext<S, C>, step_name: &str) -> NodeKind {
    match rc.plan.get(step_name).map(|s| s.kind) {
        Some(StepKind::Map) => NodeKind::MapOwner,
        Some(StepKind::Switch) => NodeKind::Switch,
        Some(StepKind::Sub) => NodeKind::Sub,
        _ => NodeKind::Step,
    }
}

/// Builds the [`InvocationContext`] for a new invocation of `step_name`.
/// `owner` defaults to the invocation's own id when `None` (every plain,
/// switch, and sub step owns itself; only a MAP worker's owner is the MAP
/// step's invocation).
pub(crate) fn child_invctx<S, C>(
    rc: &RunContext<S, C>,
    step_name: &str,
    parent: Option<justpipe_core::InvocationId>,
    owner: Option<justpipe_core::InvocationId>,
    scope: Vec<String>,
) -> InvocationContext {
    let id = rc.id_gen.next_id();
    InvocationContext {
        owner_invocation_id: owner.unwrap_or_else(|| id.clone()),
        invocation_id: id,
        parent_invocation_id: parent,
        attempt: rc.attempts.next_attempt(step_name),
        scope,
        node_kind: node_kind_for(rc, step_name),
    }
}

/// One full invocation cycle: invoke the step, then either escalate a
/// failure or dispatch the returned outcome.
async fn run_cycle<S, C>(
    rc: Arc<RunContext<S, C>>,
    step_name: String,
    invctx: InvocationContext,
    item: Option<Arc<dyn Any + Send + Sync>>,
) where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    // Fresh per-invocation step-scoped metadata: isolated from
    // every other concurrent invocation, shared with the escalation path
    // below so a local/global error handler and the STEP_ERROR it produces
    // see the same bag the failing call itself wrote to.
    let invocation_meta = rc.meta.for_invocation();
    let result = invoker::invoke(&rc, &step_name, invctx.clone(), item.clone(), None, &invocation_meta).await;
    match result {
        InvokeResult::Outcome(justpipe_core::StepOutcome::Raise(err)) => {
            let error = err.unwrap_or_else(|| "step raised with no error".into());
            escalate(rc, step_name, invctx, error, Cause::Raised, invocation_meta).await;
        }
        InvokeResult::Outcome(outcome) => {
            let action = result_handler::classify(outcome);
            dispatch(rc, step_name, invctx, item, action).await;
        }
        InvokeResult::Failed(InvokeFailure::Timeout(d)) => {
            let error: Box<dyn std::error::Error + Send + Sync> =
                format!("step '{step_name}' timed out after {d:?}").into();
            escalate(rc, step_name, invctx, error, Cause::Timeout, invocation_meta).await;
        }
        InvokeResult::Failed(InvokeFailure::UnknownStep(name)) => {
            let error: Box<dyn std::error::Error + Send + Sync> =
                format!("no step registered named '{name}'").into();
            escalate(rc, step_name, invctx, error, Cause::Internal, invocation_meta).await;
        }
    }
}

async fn escalate<S, C>(
    rc: Arc<RunContext<S, C>>,
    step_name: String,
    invctx: InvocationContext,
    error: Box<dyn std::error::Error + Send + Sync>,
    cause: Cause,
    meta: justpipe_core::Meta,
) where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    match failure::handle_with_cause(&rc, &step_name, &invctx, error.as_ref(), cause, &meta).await {
        Escalation::Recovered(outcome) => {
            let action = result_handler::classify(outcome);
            dispatch(rc, step_name, invctx, None, action).await;
        }
        Escalation::Terminal => {
            complete_logical_unit(&rc, &step_name, &invctx).await;
        }
    }
}

/// Acts on a [`ResultAction`], then — for every variant except `Run`, whose
/// completion is deferred to the sub-pipeline forwarder — retires this
/// invocation's logical unit.
async fn dispatch<S, C>(
    rc: Arc<RunContext<S, C>>,
    step_name: String,
    invctx: InvocationContext,
    item: Option<Arc<dyn Any + Send + Sync>>,
    action: ResultAction<C>,
) where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    match action {
        ResultAction::FireSuccessors => {}
        ResultAction::Skip => {
            rc.mark_owner_skipped(invctx.owner_invocation_id.clone());
        }
        ResultAction::Stop => {
            rc.kernel.request_stop();
        }
        ResultAction::Suspend(reason) => {
            publish_event(&rc, &invctx, &step_name, EventBody::Suspend { reason }).await;
            rc.kernel.request_stop();
        }
        ResultAction::Retry => {
            let count = rc.next_retry_count(&step_name);
            if count > rc.config.max_retries {
                let error: Box<dyn std::error::Error + Send + Sync> = format!(
                    "step '{step_name}' exceeded max_retries ({})",
                    rc.config.max_retries
                )
                .into();
                let meta = rc.meta.for_invocation();
                escalate(rc, step_name, invctx, error, Cause::Internal, meta).await;
                return;
            }
            let next = child_invctx(
                &rc,
                &step_name,
                invctx.parent_invocation_id.clone(),
                Some(invctx.owner_invocation_id.clone()),
                invctx.scope.clone(),
            );
            start_step(rc.clone(), step_name.clone(), next, item).await;
            rc.kernel.record_logical_completion(&invctx.owner_invocation_id);
            return;
        }
        ResultAction::Raise(err) => {
            let error = err.unwrap_or_else(|| "step raised with no error".into());
            let meta = rc.meta.for_invocation();
            escalate(rc, step_name, invctx, error, Cause::Raised, meta).await;
            return;
        }
        ResultAction::Reroute(target) => {
            rc.mark_owner_skipped(invctx.owner_invocation_id.clone());
            let next = child_invctx(
                &rc,
                &target,
                Some(invctx.invocation_id.clone()),
                None,
                invctx.scope.clone(),
            );
            start_step(rc.clone(), target, next, item).await;
            complete_logical_unit(&rc, &step_name, &invctx).await;
            return;
        }
        ResultAction::Map(items, target) => {
            // `start_map` already retires the owner's own pre-registered unit
            // as its last step; calling `complete_logical_unit` again here
            // would retire it a second time and could fire the owner's
            // successors before any worker has actually reported back.
            start_map(&rc, &step_name, &invctx, items, target).await;
            return;
        }
        ResultAction::Run(sub) => {
            run_sub_pipeline(rc, step_name, invctx, sub).await;
            return;
        }
    }
    complete_logical_unit(&rc, &step_name, &invctx).await;
}

/// Retires one logical unit belonging to `invctx`'s owner. Once the owner
/// hits zero (every worker of a MAP batch reported in, or a plain/switch/
/// sub step's single unit completed), emits `MAP_COMPLETE` if this was a
/// batch, then fires the owner's static successors unless it was marked
/// skipped.
async fn complete_logical_unit<S, C>(rc: &Arc<RunContext<S, C>>, step_name: &str, invctx: &InvocationContext)
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    if !rc.kernel.record_logical_completion(&invctx.owner_invocation_id) {
        return;
    }

    let record = rc.owner_step.lock().remove(&invctx.owner_invocation_id);
    let fire_step: String = match &record {
        Some(r) => r.step_name.clone(),
        None => step_name.to_string(),
    };

    if let Some(r) = &record {
        if let Some(batch) = &r.map_batch {
            let payload = MapCompletePayload {
                target: batch.target.clone(),
                item_count: batch.item_count,
                owner_invocation_id: invctx.owner_invocation_id.as_str().to_string(),
                owner_scope: r.owner_invctx.scope.clone(),
            };
            publish_event(rc, &r.owner_invctx, &fire_step, EventBody::MapComplete(payload)).await;
        }
    }

    if rc.is_owner_skipped(&invctx.owner_invocation_id) {
        return;
    }
    fire_successors(rc, &fire_step).await;
}

/// Walks the dependency graph from `completed_step`, scheduling/cancelling
/// barrier-timeout watchers and starting every successor whose barrier is
/// now satisfied.
async fn fire_successors<S, C>(rc: &Arc<RunContext<S, C>>, completed_step: &str)
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let transition = {
        let mut graph = rc.dep_graph.lock();
        graph.transition(&rc.plan, completed_step)
    };

    for (step, timeout) in &transition.barriers_to_schedule {
        rc.mark_barrier_waiting(step);
        publish_barrier_wait(rc, step, *timeout).await;
        spawn_barrier_watcher(rc.clone(), step.clone(), *timeout);
    }

    for step in &transition.barriers_to_cancel {
        rc.cancel_barrier_watcher(step);
        if let Some(duration) = rc.take_barrier_duration(step) {
            rc.publisher.record_barrier_wait(step, duration.as_secs_f64() * 1000.0);
            publish_event(
                rc,
                &InvocationContext::orphan(step, NodeKind::Step),
                step,
                EventBody::BarrierRelease(BarrierReleasePayload { duration: duration.as_secs_f64() }),
            )
            .await;
        }
    }

    for step in &transition.steps_to_start {
        if rc.is_barrier_failed(step) {
            continue;
        }
        let invctx = child_invctx(rc, step, None, None, Vec::new());
        start_step(rc.clone(), step.clone(), invctx, None).await;
    }
}

async fn publish_barrier_wait<S, C>(rc: &Arc<RunContext<S, C>>, step: &str, timeout: Duration)
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let (dependencies, waiting_for, completed_count) = {
        let graph = rc.dep_graph.lock();
        let dependencies: Vec<String> = rc.plan.parents_of(step).into_iter().collect();
        let waiting_for: Vec<String> = graph.pending_parents(step).into_iter().collect();
        let completed_count = graph.completed_parent_count(step);
        (dependencies, waiting_for, completed_count)
    };
    let payload = BarrierWaitPayload {
        timeout: Some(timeout.as_secs_f64()),
        expected_count: dependencies.len(),
        dependencies,
        completed_count,
        waiting_for,
    };
    publish_event(
        rc,
        &InvocationContext::orphan(step, NodeKind::Step),
        step,
        EventBody::BarrierWait(payload),
    )
    .await;
}

/// Spawns the cooperative barrier-timeout watcher: sleeps up to `timeout`,
/// waking early if the barrier is released first. Detached from the
/// kernel's task scope — it either
/// self-cancels quickly or fires a bounded number of times; it never keeps
/// a stopped run's kernel scope open (`RuntimeKernel::drain` only waits on
/// physical task count, not on these).
fn spawn_barrier_watcher<S, C>(rc: Arc<RunContext<S, C>>, step: String, timeout: Duration)
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let token = rc.register_barrier_watcher(&step);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                rc.mark_barrier_failed(&step);
                rc.take_barrier_duration(&step);
                let message = format!("Barrier timeout on step '{step}' after {timeout:?}");
                tracing::warn!(step = %step, "barrier timed out");
                rc.journal.lock().record(justpipe_core::FailureRecord::timeout(step.clone(), message.clone()));
                publish_event(
                    &rc,
                    &InvocationContext::orphan(&step, NodeKind::Step),
                    &step,
                    EventBody::StepError { message },
                )
                .await;
            }
            _ = token.cancelled() => {}
        }
    });
}

/// MAP fan-out: emits `MAP_START`, registers the owner's batch record,
/// spawns every worker gated by `max_concurrency`, then retires the
/// owner's own pre-registered unit so completion resolves once every
/// worker has reported back.
async fn start_map<S, C>(
    rc: &Arc<RunContext<S, C>>,
    step_name: &str,
    invctx: &InvocationContext,
    items: Vec<Arc<dyn Any + Send + Sync>>,
    target: String,
) where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let mut items = items;
    if items.len() > rc.config.max_map_items {
        tracing::warn!(
            step = step_name,
            requested = items.len(),
            cap = rc.config.max_map_items,
            "map item count exceeds max_map_items; truncating"
        );
        items.truncate(rc.config.max_map_items);
    }
    let item_count = items.len();

    publish_event(
        rc,
        invctx,
        step_name,
        EventBody::MapStart(MapStartPayload { target: target.clone(), item_count }),
    )
    .await;

    rc.owner_step.lock().insert(
        invctx.invocation_id.clone(),
        OwnerRecord {
            step_name: step_name.to_string(),
            owner_invctx: invctx.clone(),
            map_batch: Some(MapBatchInfo { target: target.clone(), item_count }),
        },
    );

    let max_concurrency = rc
        .plan
        .get(step_name)
        .and_then(|s| s.map.as_ref())
        .and_then(|m| m.max_concurrency)
        .unwrap_or(item_count.max(1));
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrency));
    let running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let owner = invctx.invocation_id.clone();

    for (index, value) in items.into_iter().enumerate() {
        let mut scope = invctx.scope.clone();
        scope.push(format!("{step_name}[{index}]"));
        let worker_invctx = child_invctx(
            rc,
            &target,
            Some(invctx.invocation_id.clone()),
            Some(invctx.invocation_id.clone()),
            scope,
        );
        publish_event(
            rc,
            &worker_invctx,
            &target,
            EventBody::MapWorker(MapWorkerPayload {
                index,
                total: item_count,
                target: target.clone(),
                owner: invctx.invocation_id.as_str().to_string(),
            }),
        )
        .await;

        // The permit wait runs *inside* the kernel-tracked task (not a
        // detached gate in front of it), so `physical_active` already
        // reflects every worker the moment this loop returns control to the
        // caller — `RuntimeKernel::drain` never observes a quiet window
        // before a throttled worker has even been registered.
        let rc_task = rc.clone();
        let target = target.clone();
        let permit_gate = semaphore.clone();
        let running = running.clone();
        let step_name_owned = step_name.to_string();
        let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            let _permit = permit_gate.acquire_owned().await;
            let concurrency = running.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            rc_task.publisher.record_map_peak(&step_name_owned, concurrency);
            run_cycle(rc_task.clone(), target, worker_invctx, Some(value)).await;
            running.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        });
        // `track_additional` already registered this worker's pending
        // completion under `owner`; passing `None` here avoids double-
        // counting it a second time through `spawn`'s own owner tracking.
        rc.kernel.track_additional(&owner);
        rc.kernel.spawn(None, fut).await;
    }

    rc.kernel.record_logical_completion(&invctx.invocation_id);
}

/// Sub-pipeline forwarding: runs the nested pipeline to completion,
/// rewriting every forwarded event's `stage`/`scope` with the
/// owning step's prefix and preserving `origin_run_id` across nesting. The
/// owning step's own `STEP_END` was already emitted by the invoker when its
/// body returned `Run(...)`, so a successful sub-run here only fires
/// successors; a failed sub-run routes to the Failure Handler instead.
async fn run_sub_pipeline<S, C>(
    rc: Arc<RunContext<S, C>>,
    step_name: String,
    invctx: InvocationContext,
    sub: Box<dyn justpipe_core::ErasedSubPipelineRun<C>>,
) where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let owner = invctx.owner_invocation_id.clone();
    let rc_for_task = rc.clone();
    let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
        let context = Some(rc_for_task.context.clone());
        let mut stream = sub.run_boxed(context);
        let mut failed = false;
        while let Some(event) = stream.next().await {
            if let EventBody::Finish(PipelineEndData { status, .. }) = &event.body {
                failed = *status != TerminalStatus::Success;
            }
            forward_event(&rc_for_task, event, &step_name, &invctx).await;
        }
        if failed {
            let error: Box<dyn std::error::Error + Send + Sync> =
                format!("sub-pipeline step '{step_name}' failed").into();
            let meta = rc_for_task.meta.for_invocation();
            escalate(rc_for_task, step_name, invctx, error, Cause::Raised, meta).await;
        } else {
            complete_logical_unit(&rc_for_task, &step_name, &invctx).await;
        }
    });
    let spawned = rc.kernel.spawn(Some(owner.clone()), fut).await;
    if spawned {
        rc.kernel.record_logical_completion(&owner);
    }
}

async fn forward_event<S, C>(
    rc: &Arc<RunContext<S, C>>,
    mut event: Event,
    step_name: &str,
    invctx: &InvocationContext,
) -> bool
where
    S: Send + 'static,
    C: Send + Sync + 'static,
{
    let origin = event.origin_run_id.clone().unwrap_or_else(|| event.run_id.clone());
    event.origin_run_id = Some(origin);
    event.parent_run_id = Some(rc.publisher.run_id().clone());
    event.stage = format!("{step_name}:{}", event.stage);
    let mut scope = invctx.scope.clone();
    scope.push(step_name.to_string());
    scope.append(&mut event.scope);
    event.scope = scope;

    let meta = rc.meta.step.snapshot().unwrap_or(serde_json::Value::Null);
    let guard = rc.state.lock().await;
    rc.publisher.publish(&*guard, &rc.context, &meta, event).await
}

pub(crate) async fn publish_event<S, C>(rc: &Arc<RunContext<S, C>>, invctx: &InvocationContext, stage: &str, body: EventBody)
where
    S: Send + 'static,
    C: Send + Sync + 'static,
{
    let event = new_event(rc.publisher.run_id(), invctx, stage, body);
    let meta = rc.meta.step.snapshot().unwrap_or(serde_json::Value::Null);
    let guard = rc.state.lock().await;
    rc.publisher.publish(&*guard, &rc.context, &meta, event).await;
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
