// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The top-level pipeline handle: collects steps and hooks while building,
//! compiles and freezes itself on first `run()`, and drives one end-to-end
//! execution per call. A frozen `Pipe` can be run any number of times
//! concurrently — each call gets its own `RunContext` and event stream.

use crate::config::PipeConfig;
use crate::middleware::{self, Middleware};
use crate::publisher::EventPublisher;
use crate::run_context::RunContext;
use crate::scheduler;
use futures::Stream;
use justpipe_core::plan::{compile, StepInfo};
use justpipe_core::{
    CancellationToken, Clock, DefinitionError, ErasedSubPipelineRun, ErrorHandlerFn, Event,
    EventBody, EventHook, FailureRecord, Hooks, InvocationContext, Meta, NodeKind, Observer,
    PipelineMeta, Registry, RunMeta, ShutdownHook, StartupHook, StepBody, SystemClock,
    TerminalStatus, ValidateOptions,
};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Per-run overrides to `start`/`timeout`/`cancel`.
#[derive(Default, Clone)]
pub struct RunOptions {
    /// Runs from this single step instead of the plan's computed root(s).
    pub start: Option<String>,
    /// Overrides `PipeConfig::run_timeout` for this call only.
    pub timeout: Option<Duration>,
    /// A caller-owned token; cancelling it stops this run early. A fresh
    /// token is created when omitted.
    pub cancel: Option<CancellationToken>,
}

/// The event stream handed back by `Pipe::run`. Dropping it early closes the
/// receiving end, which the run's client-close watcher observes the same way
/// as an explicit cancel.
pub struct PipelineRun {
    receiver: mpsc::Receiver<Event>,
}

impl Stream for PipelineRun {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

struct Building<S, C> {
    config: PipeConfig,
    registry: Registry<S, C>,
    middlewares: Vec<Middleware<S, C>>,
    observers: Vec<Arc<dyn Observer<S, C>>>,
    clock: Arc<dyn Clock>,
}

struct Frozen<S, C> {
    config: Arc<PipeConfig>,
    plan: Arc<justpipe_core::ExecutionPlan<S, C>>,
    hooks: Arc<Hooks<S, C>>,
    observers: Vec<Arc<dyn Observer<S, C>>>,
    event_hooks: Vec<EventHook>,
    clock: Arc<dyn Clock>,
}

/// A declarative pipeline: steps and hooks registered while building, then
/// validated and frozen on first `run()`/`describe()`. Builder methods take
/// `&self` and return `Result<&Self, DefinitionError>` so registration reads
/// as a chain without needing a `mut` binding.
pub struct Pipe<S, C> {
    building: parking_lot::Mutex<Option<Building<S, C>>>,
    frozen: parking_lot::Mutex<Option<Arc<Frozen<S, C>>>>,
}

impl<S, C> Pipe<S, C>
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    pub fn new(config: PipeConfig) -> Self {
        Self {
            building: parking_lot::Mutex::new(Some(Building {
                config,
                registry: Registry::new(),
                middlewares: Vec::new(),
                observers: Vec::new(),
                clock: Arc::new(SystemClock),
            })),
            frozen: parking_lot::Mutex::new(None),
        }
    }

    fn with_building<F>(&self, f: F) -> Result<(), DefinitionError>
    where
        F: FnOnce(&mut Building<S, C>) -> Result<(), DefinitionError>,
    {
        let mut guard = self.building.lock();
        match guard.as_mut() {
            Some(building) => f(building),
            None => Err(DefinitionError::Frozen("modify a frozen pipeline")),
        }
    }

    pub fn add_step(&self, spec: crate::step_spec::StepSpec<S, C>) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| b.registry.add_step(spec.into_def()))?;
        Ok(self)
    }

    pub fn add_startup_hook(&self, hook: impl StartupHook<S, C> + 'static) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| b.registry.add_startup_hook(Arc::new(hook)))?;
        Ok(self)
    }

    pub fn add_shutdown_hook(&self, hook: impl ShutdownHook<S, C> + 'static) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| b.registry.add_shutdown_hook(Arc::new(hook)))?;
        Ok(self)
    }

    pub fn set_on_error(&self, handler: impl ErrorHandlerFn<S, C> + 'static) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| b.registry.set_on_error(Arc::new(handler)))?;
        Ok(self)
    }

    pub fn add_event_hook(&self, hook: EventHook) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| b.registry.add_event_hook(hook))?;
        Ok(self)
    }

    /// Registers one more middleware layer. Applied outermost-first in
    /// registration order at freeze time (see [`middleware::wrap`]).
    pub fn add_middleware(&self, mw: Middleware<S, C>) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| {
            b.middlewares.push(mw);
            Ok(())
        })?;
        Ok(self)
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer<S, C>>) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| {
            b.observers.push(observer);
            Ok(())
        })?;
        Ok(self)
    }

    /// Overrides the run's time source. Exists for deterministic tests; a
    /// production pipeline never needs to call this.
    pub fn with_clock(&self, clock: Arc<dyn Clock>) -> Result<&Self, DefinitionError> {
        self.with_building(move |b| {
            b.clock = clock;
            Ok(())
        })?;
        Ok(self)
    }

    /// Validates and compiles the registry exactly once, on first call;
    /// later calls return the same frozen plan. Uses double-checked locking
    /// so concurrent callers (e.g. two `run()`s racing on an unfrozen pipe)
    /// never compile twice.
    fn freeze(&self) -> Result<Arc<Frozen<S, C>>, DefinitionError> {
        if let Some(frozen) = self.frozen.lock().clone() {
            return Ok(frozen);
        }
        let mut building_guard = self.building.lock();
        if let Some(frozen) = self.frozen.lock().clone() {
            return Ok(frozen);
        }
        let building = building_guard
            .take()
            .ok_or(DefinitionError::Frozen("freeze a pipeline with no pending definition"))?;
        let frozen = Arc::new(build_frozen(building)?);
        *self.frozen.lock() = Some(frozen.clone());
        Ok(frozen)
    }

    /// Read-only introspection of the compiled plan, in step-name order.
    /// Freezes the pipeline if it hasn't run yet.
    pub fn describe(&self) -> Result<Vec<StepInfo>, DefinitionError> {
        Ok(self.freeze()?.plan.describe())
    }

    /// Runs the pipeline to completion, returning immediately with a live
    /// event stream. The actual orchestration happens in a spawned task;
    /// this call itself only freezes (if needed) and sets up the run.
    pub fn run(&self, state: S, context: Arc<C>, opts: RunOptions) -> Result<PipelineRun, DefinitionError> {
        let frozen = self.freeze()?;

        let roots: Vec<String> = match &opts.start {
            Some(start) => {
                if !frozen.plan.steps.contains_key(start) {
                    return Err(DefinitionError::UnknownTarget {
                        step: "<start>".to_string(),
                        target: start.clone(),
                        suggestion: String::new(),
                    });
                }
                vec![start.clone()]
            }
            None => frozen.plan.roots.clone(),
        };

        let run_id = justpipe_core::RunId::new(uuid::Uuid::new_v4().to_string());
        let (sender, receiver) = mpsc::channel(frozen.config.queue_size);
        let publisher = Arc::new(EventPublisher::new(
            run_id,
            sender,
            frozen.event_hooks.clone(),
            frozen.observers.clone(),
        ));
        let cancel = opts.cancel.clone().unwrap_or_default();
        let meta = Meta::new(PipelineMeta::new(frozen.config.metadata.clone()), RunMeta::new());

        let rc = RunContext::new(
            frozen.plan.clone(),
            frozen.hooks.clone(),
            frozen.config.clone(),
            state,
            context,
            frozen.clock.clone(),
            cancel,
            publisher,
            meta,
        );

        let timeout = opts.timeout.or(frozen.config.run_timeout);
        tokio::spawn(drive(rc, roots, timeout));

        Ok(PipelineRun { receiver })
    }

    /// Builds a handle to a nested run of this pipeline, for a step body
    /// returning `StepOutcome::Run(...)`. Freezes (and so validates) eagerly
    /// here, at the point the parent step constructs the outcome, rather
    /// than deferring validation errors to the moment the scheduler forwards
    /// the sub-run.
    pub fn into_sub_run(
        self: &Arc<Self>,
        state: S,
        opts: RunOptions,
    ) -> Result<Box<dyn ErasedSubPipelineRun<C>>, DefinitionError> {
        self.freeze()?;
        Ok(Box::new(SubPipelineRun {
            pipe: self.clone(),
            state,
            opts,
        }))
    }
}

fn build_frozen<S, C>(building: Building<S, C>) -> Result<Frozen<S, C>, DefinitionError> {
    let Building {
        config,
        mut registry,
        middlewares,
        observers,
        clock,
    } = building;

    for step in registry.steps.values_mut() {
        if let StepBody::Plain(body) = &step.body {
            let wrapped = middleware::wrap(body.clone(), &middlewares);
            step.body = StepBody::Plain(wrapped);
        }
    }

    let hooks = Hooks {
        startup: registry.hooks.startup.clone(),
        shutdown: registry.hooks.shutdown.clone(),
        on_error: registry.hooks.on_error.clone(),
    };
    let event_hooks = registry.event_hooks.clone();

    registry.freeze();
    let opts = ValidateOptions {
        start: None,
        strict: config.strict,
        allow_multi_root: config.allow_multi_root,
    };
    let plan = compile(registry, opts)?;

    Ok(Frozen {
        config: Arc::new(config),
        plan: Arc::new(plan),
        hooks: Arc::new(hooks),
        observers,
        event_hooks,
        clock,
    })
}

/// One full run, from `START` to `FINISH`. Spawned detached from `run()`;
/// its only externally visible effects are the events it publishes and the
/// terminal state of the run's `FailureJournal`.
async fn drive<S, C>(rc: Arc<RunContext<S, C>>, roots: Vec<String>, timeout: Option<Duration>)
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let state_snapshot = {
        let guard = rc.state.lock().await;
        serde_json::to_value(&*guard).unwrap_or(serde_json::Value::Null)
    };
    let meta_snapshot = rc.meta.run.snapshot();

    {
        let guard = rc.state.lock().await;
        for observer in rc.publisher.observers() {
            observer.on_pipeline_start(&*guard, &rc.context, &meta_snapshot).await;
        }
    }

    let start_invctx = InvocationContext::orphan("START", NodeKind::System);
    scheduler::publish_event(&rc, &start_invctx, "START", EventBody::Start { state: state_snapshot }).await;

    let cancel_handle = tokio::spawn(cancel_watcher(rc.clone()));
    let timeout_handle = timeout.map(|d| tokio::spawn(timeout_watcher(rc.clone(), d)));
    let close_handle = tokio::spawn(client_close_watcher(rc.clone()));

    let mut startup_failed = false;
    for hook in &rc.hooks.startup {
        if rc.kernel.is_stopped() {
            break;
        }
        let message = {
            let mut guard = rc.state.lock().await;
            hook.call(&mut *guard, &rc.context).await.err()
        };
        if let Some(message) = message {
            rc.journal.lock().record(FailureRecord::startup_hook_error(message));
            rc.kernel.request_stop();
            startup_failed = true;
            break;
        }
    }

    if !startup_failed && !rc.kernel.is_stopped() {
        for root in &roots {
            let invctx = scheduler::child_invctx(&rc, root, None, None, Vec::new());
            scheduler::start_step(rc.clone(), root.clone(), invctx, None).await;
        }
    }

    rc.kernel.drain().await;

    cancel_handle.abort();
    if let Some(handle) = &timeout_handle {
        handle.abort();
    }
    close_handle.abort();

    for hook in &rc.hooks.shutdown {
        let message = {
            let mut guard = rc.state.lock().await;
            hook.call(&mut *guard, &rc.context).await.err()
        };
        if let Some(message) = message {
            rc.journal.lock().record(FailureRecord::shutdown_hook_error(message));
        }
    }

    let status = rc.journal.lock().resolve();
    let duration_s = rc.elapsed().as_secs_f64();
    let end_data = justpipe_core::PipelineEndData {
        status,
        duration_s,
        failures: rc.journal.lock().records().to_vec(),
        metrics: rc.publisher.metrics_snapshot(),
        meta: Some(rc.meta.run.snapshot()),
    };

    let finish_invctx = InvocationContext::orphan("FINISH", NodeKind::System);
    scheduler::publish_event(&rc, &finish_invctx, "FINISH", EventBody::Finish(end_data.clone())).await;

    let guard = rc.state.lock().await;
    match status {
        TerminalStatus::Success => {
            for observer in rc.publisher.observers() {
                observer.on_pipeline_end(&*guard, &rc.context, &meta_snapshot, duration_s).await;
            }
        }
        _ => {
            let message = end_data
                .failures
                .last()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| format!("run ended with status {status:?}"));
            for observer in rc.publisher.observers() {
                observer.on_pipeline_error(&*guard, &rc.context, &meta_snapshot, &message).await;
            }
        }
    }
}

async fn cancel_watcher<S, C>(rc: Arc<RunContext<S, C>>)
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    rc.cancel.cancelled().await;
    rc.kernel.request_stop();
    rc.journal.lock().record(FailureRecord::cancelled("run cancelled"));
    let invctx = InvocationContext::orphan("CANCEL", NodeKind::System);
    scheduler::publish_event(
        &rc,
        &invctx,
        "CANCELLED",
        EventBody::Cancelled {
            message: "run cancelled".to_string(),
        },
    )
    .await;
}

async fn timeout_watcher<S, C>(rc: Arc<RunContext<S, C>>, timeout: Duration)
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    tokio::time::sleep(timeout).await;
    rc.kernel.request_stop();
    let message = format!("run timed out after {timeout:?}");
    rc.journal.lock().record(FailureRecord::run_timeout(message.clone()));
    let invctx = InvocationContext::orphan("TIMEOUT", NodeKind::System);
    scheduler::publish_event(&rc, &invctx, "TIMEOUT", EventBody::Timeout { message }).await;
}

/// Stops the run as soon as the consumer drops the receiving end of the
/// event stream, so an abandoned run doesn't keep driving steps no one is
/// listening to.
async fn client_close_watcher<S, C>(rc: Arc<RunContext<S, C>>)
where
    S: Send + 'static,
    C: Send + Sync + 'static,
{
    rc.publisher.closed().await;
    rc.kernel.request_stop();
    rc.journal.lock().record(FailureRecord::client_closed());
}

struct SubPipelineRun<S, C> {
    pipe: Arc<Pipe<S, C>>,
    state: S,
    opts: RunOptions,
}

impl<S, C> ErasedSubPipelineRun<C> for SubPipelineRun<S, C>
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    fn run_boxed(self: Box<Self>, context: Option<Arc<C>>) -> Pin<Box<dyn Stream<Item = Event> + Send>> {
        let Some(context) = context else {
            return Box::pin(futures::stream::empty());
        };
        match self.pipe.run(self.state, context, self.opts) {
            Ok(pipeline_run) => Box::pin(pipeline_run),
            Err(err) => Box::pin(futures::stream::once(async move { sub_pipeline_error_event(err.to_string()) })),
        }
    }
}

/// Synthesizes a degenerate error event for a sub-pipeline that failed to
/// freeze. This should never actually happen — `into_sub_run` already froze
/// (and so validated) the sub-pipeline eagerly — but `run` is still fallible
/// by signature, and a forwarding stream has no other channel to report it
/// through.
fn sub_pipeline_error_event(message: String) -> Event {
    Event {
        seq: 0,
        run_id: justpipe_core::RunId::new("sub-pipeline"),
        origin_run_id: None,
        parent_run_id: None,
        stage: "SUB_PIPELINE_ERROR".to_string(),
        node_kind: NodeKind::System,
        invocation_id: None,
        parent_invocation_id: None,
        owner_invocation_id: None,
        attempt: 1,
        scope: Vec::new(),
        meta: None,
        body: EventBody::StepError { message },
    }
}

#[cfg(test)]
#[path = "pipe_tests.rs"]
mod tests;
