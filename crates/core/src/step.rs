// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step shapes, the parameter-injection surface, and the return-value
//! directive enum.
//!
//! A dynamic language can classify a step's parameters by reflecting on
//! its signature. Rust has no such reflection over closures, so injection
//! becomes explicit: every step body receives one [`StepCx`] and reads
//! only the fields its role needs — a plain struct field access standing
//! in for what a reflective dispatch would resolve dynamically.

use crate::cancel::CancellationToken;
use crate::event::Event;
use crate::meta::Meta;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kind of a registered step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Plain,
    Map,
    Switch,
    Sub,
}

/// Declared parameter role for introspection and validation. Not used to
/// drive dispatch — dispatch is ordinary field access on [`StepCx`] — only
/// to answer `describe()` and to police how many UNKNOWN/ITEM parameters a
/// step may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    State,
    Context,
    Error,
    StepName,
    Cancel,
    Item,
}

/// Per-step declared parameter schema.
#[derive(Debug, Clone, Default)]
pub struct InjectionMetadata {
    pub roles: Vec<ParamRole>,
}

impl InjectionMetadata {
    pub fn new(roles: Vec<ParamRole>) -> Self {
        Self { roles }
    }

    pub fn item_count(&self) -> usize {
        self.roles.iter().filter(|r| **r == ParamRole::Item).count()
    }
}

/// The context handed to every step invocation. Replaces the reference
/// implementation's reflective kwargs resolution: state/context/step
/// name/attempt/cancellation are always present; `item` is populated only
/// for a map worker invocation, `error` only for a local/global error
/// handler invocation.
pub struct StepCx<'a, S, C> {
    pub state: &'a mut S,
    pub context: &'a C,
    pub step_name: &'a str,
    pub attempt: u32,
    pub cancel: &'a CancellationToken,
    pub item: Option<&'a (dyn Any + Send + Sync)>,
    pub error: Option<&'a (dyn std::error::Error + Send + Sync)>,
    /// Structured metadata: `meta.pipeline` is read-only, `meta.run` is
    /// shared for the whole run, `meta.step` is fresh per invocation so
    /// concurrent invocations never cross-contaminate.
    pub meta: &'a Meta,
}

impl<'a, S, C> StepCx<'a, S, C> {
    /// Downcasts the map-item payload to its concrete type. Panics only if
    /// a worker step is invoked outside a map fan-out, which is a
    /// registration bug the validator is responsible for catching before
    /// this ever runs (worker-trap / missing `each` validation).
    pub fn item<T: 'static>(&self) -> Option<&T> {
        self.item.and_then(|item| item.downcast_ref::<T>())
    }
}

/// A type-erased handle to a nested pipeline run, used by
/// [`StepOutcome::Run`]. `C` is the *parent's* context type — sub-pipelines
/// share their parent's context but may declare their own, independent
/// state type, so the state is erased here and reconstituted by
/// `justpipe-engine`'s scheduler.
pub trait ErasedSubPipelineRun<C>: Send {
    fn run_boxed(
        self: Box<Self>,
        context: Option<Arc<C>>,
    ) -> Pin<Box<dyn futures::Stream<Item = Event> + Send>>;
}

/// Return value of a user step. Constructed explicitly by user code; the
/// engine dispatches on the variant.
pub enum StepOutcome<C> {
    /// Equivalent to returning nothing: fire static successors.
    Continue,
    /// `Next(target)` or a bare string: dynamic reroute.
    Next(String),
    /// Mark owner as skipped; do not fire successors.
    Skip,
    /// Request kernel stop.
    Stop,
    /// Emit `SUSPEND`; request stop.
    Suspend(String),
    /// Reschedule the same step with `attempt + 1`.
    Retry,
    /// Route through the Failure Handler. `None` becomes a generic error.
    Raise(Option<Box<dyn std::error::Error + Send + Sync>>),
    /// Fan out `items` to the named worker step.
    Map(Vec<Arc<dyn Any + Send + Sync>>, String),
    /// Spawn a nested pipeline run and forward its events.
    Run(Box<dyn ErasedSubPipelineRun<C>>),
}

impl<C> std::fmt::Debug for StepOutcome<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Continue => write!(f, "Continue"),
            StepOutcome::Next(t) => write!(f, "Next({t:?})"),
            StepOutcome::Skip => write!(f, "Skip"),
            StepOutcome::Stop => write!(f, "Stop"),
            StepOutcome::Suspend(r) => write!(f, "Suspend({r:?})"),
            StepOutcome::Retry => write!(f, "Retry"),
            StepOutcome::Raise(e) => write!(f, "Raise({:?})", e.as_ref().map(|e| e.to_string())),
            StepOutcome::Map(items, target) => {
                write!(f, "Map(<{} items>, {target:?})", items.len())
            }
            StepOutcome::Run(_) => write!(f, "Run(<sub-pipeline>)"),
        }
    }
}

/// A step body: plain async function of the step's context. Implemented
/// either by hand on a reusable type, or picked up automatically by the
/// blanket impl below for a boxed-future-returning closure — the
/// idiomatic shape for "async closure as a trait object" in a language
/// without native async closures.
pub trait StepFn<S, C>: Send + Sync {
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, S, C>) -> BoxFuture<'a, StepOutcome<C>>;
}

impl<S, C, F> StepFn<S, C> for F
where
    F: for<'a> Fn(&'a mut StepCx<'_, S, C>) -> BoxFuture<'a, StepOutcome<C>> + Send + Sync,
{
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, S, C>) -> BoxFuture<'a, StepOutcome<C>> {
        (self)(cx)
    }
}

/// A local error handler: same injection surface as a step, plus `error`.
/// Its return value is itself a [`StepOutcome`], treated like any other
/// step return.
pub trait ErrorHandlerFn<S, C>: Send + Sync {
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, S, C>) -> BoxFuture<'a, StepOutcome<C>>;
}

impl<S, C, F> ErrorHandlerFn<S, C> for F
where
    F: for<'a> Fn(&'a mut StepCx<'_, S, C>) -> BoxFuture<'a, StepOutcome<C>> + Send + Sync,
{
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, S, C>) -> BoxFuture<'a, StepOutcome<C>> {
        (self)(cx)
    }
}

/// Where a streaming step's `TOKEN` events go. The invoker hands the body a
/// concrete sink wired to the run's event publisher, so calling `emit` is
/// indistinguishable from any other event publication: it awaits the same
/// bounded queue, so a slow consumer backpressures the step body exactly
/// the way a plain step's own `.await` points would.
///
/// `state` is reborrowed from the step's own [`StepCx`] at each call — the
/// body still owns `cx` for its whole execution, it just hands out a
/// temporary shared borrow for the moment the event is built and
/// published, then gets exclusive access back once the call returns.
pub trait TokenSink<S, C>: Send {
    fn emit<'a>(&'a mut self, state: &'a S, value: serde_json::Value) -> BoxFuture<'a, ()>;
}

/// A streaming step body: same shape as [`StepFn`], plus a [`TokenSink`]
/// the body calls once per value it wants to emit as a `TOKEN` event before
/// returning its final [`StepOutcome`]. Replaces an earlier design that
/// returned a pull-based `Stream` of tokens for the invoker to drain — that
/// shape forced tokens to buffer until the whole stream was exhausted,
/// since draining it required holding the body's `&mut StepCx` borrow for
/// the stream's entire lifetime, which left no way to interleave a
/// publish between items.
pub trait StreamingStepFn<S, C>: Send + Sync {
    fn call<'a>(
        &'a self,
        cx: &'a mut StepCx<'_, S, C>,
        sink: &'a mut dyn TokenSink<S, C>,
    ) -> BoxFuture<'a, StepOutcome<C>>;
}

/// A registered step's callable body: the common case is a single `async
/// fn`-shaped [`StepFn`]; a step that needs to emit TOKEN events along the
/// way implements [`StreamingStepFn`] instead. Stored once per
/// [`crate::registry::StepDef`] and dispatched on by the invoker.
pub enum StepBody<S, C> {
    Plain(Arc<dyn StepFn<S, C>>),
    Streaming(Arc<dyn StreamingStepFn<S, C>>),
}

impl<S, C> Clone for StepBody<S, C> {
    fn clone(&self) -> Self {
        match self {
            StepBody::Plain(f) => StepBody::Plain(Arc::clone(f)),
            StepBody::Streaming(f) => StepBody::Streaming(Arc::clone(f)),
        }
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
