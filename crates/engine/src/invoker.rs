// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step Invoker: resolves a step's [`StepCx`], calls its body under the
//! step's timeout if any, publishes a streaming body's tokens as they're
//! produced, and emits STEP_START/STEP_END. STEP_ERROR is deliberately not
//! this module's job — a failing invocation is handed, unresolved, to
//! [`crate::failure::FailureHandler`], which alone decides whether a local
//! or global error handler recovers it before any STEP_ERROR is emitted.

use crate::events::new_event;
use crate::run_context::RunContext;
use justpipe_core::{
    BoxFuture, Event, EventBody, InvocationContext, Meta, StepBody, StepCx, StepOutcome, TokenSink,
};
use std::sync::Arc;
use std::time::Duration;

/// Why a step invocation did not produce a [`StepOutcome`]. Carries enough
/// detail for the failure handler to build a [`justpipe_core::FailureRecord`]
/// without the invoker needing to know the journal's shape.
pub enum InvokeFailure {
    /// The step's own future resolved to an error via `?`/panic-free
    /// reporting is not representable here; user code signals failure only
    /// through `StepOutcome::Raise`, handled as a success path. This variant
    /// exists for invoker-internal failures: an unknown step name or a step
    /// whose timeout elapsed.
    Timeout(Duration),
    UnknownStep(String),
}

impl std::fmt::Display for InvokeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeFailure::Timeout(d) => write!(f, "step timed out after {d:?}"),
            InvokeFailure::UnknownStep(name) => write!(f, "unknown step '{name}'"),
        }
    }
}

pub enum InvokeResult<C> {
    Outcome(StepOutcome<C>),
    Failed(InvokeFailure),
}

/// Invokes `step_name`, emitting STEP_START and, on success, STEP_END.
/// `item` carries a MAP worker's payload; `error` carries the triggering
/// error when this invocation is itself a local/global error handler call.
pub async fn invoke<S, C>(
    rc: &Arc<RunContext<S, C>>,
    step_name: &str,
    invctx: InvocationContext,
    item: Option<Arc<dyn std::any::Any + Send + Sync>>,
    error: Option<&(dyn std::error::Error + Send + Sync)>,
    meta: &Meta,
) -> InvokeResult<C>
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let Some(step) = rc.plan.get(step_name) else {
        return InvokeResult::Failed(InvokeFailure::UnknownStep(step_name.to_string()));
    };

    publish(rc, &invctx, step_name, EventBody::StepStart, None, meta).await;

    let started = rc.clock.now();
    let mut state_guard = rc.state.lock().await;
    let mut cx = StepCx {
        state: &mut *state_guard,
        context: &rc.context,
        step_name,
        attempt: invctx.attempt,
        cancel: &rc.cancel,
        item: item.as_deref(),
        error,
        meta,
    };

    let invocation = async {
        match &step.body {
            StepBody::Plain(body) => body.call(&mut cx).await,
            StepBody::Streaming(body) => {
                let mut sink = PublishingTokenSink {
                    rc,
                    invctx: &invctx,
                    step_name,
                    meta,
                };
                body.call(&mut cx, &mut sink).await
            }
        }
    };

    let outcome = if let Some(timeout) = step.timeout {
        match tokio::time::timeout(timeout, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                drop(state_guard);
                return InvokeResult::Failed(InvokeFailure::Timeout(timeout));
            }
        }
    } else {
        invocation.await
    };

    rc.publisher
        .record_step_latency(step_name, rc.clock.now().saturating_duration_since(started).as_secs_f64() * 1000.0);

    if matches!(outcome, StepOutcome::Raise(_)) {
        drop(state_guard);
        return InvokeResult::Outcome(outcome);
    }

    let snapshot = serde_json::to_value(&*state_guard).ok();
    drop(state_guard);
    publish(rc, &invctx, step_name, EventBody::StepEnd { state: snapshot }, None, meta).await;

    InvokeResult::Outcome(outcome)
}

/// Wires a streaming step's [`TokenSink`] to this invocation's event
/// publisher: each `emit` call publishes a `TOKEN` event immediately,
/// awaiting the same bounded queue as every other event, so a slow
/// consumer backpressures the step body between tokens rather than after
/// all of them are produced.
struct PublishingTokenSink<'r, S, C> {
    rc: &'r Arc<RunContext<S, C>>,
    invctx: &'r InvocationContext,
    step_name: &'r str,
    meta: &'r Meta,
}

impl<'r, S, C> TokenSink<S, C> for PublishingTokenSink<'r, S, C>
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    fn emit<'a>(&'a mut self, state: &'a S, value: serde_json::Value) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            publish(
                self.rc,
                self.invctx,
                self.step_name,
                EventBody::Token { value },
                Some(state),
                self.meta,
            )
            .await;
        })
    }
}

async fn publish<S, C>(
    rc: &Arc<RunContext<S, C>>,
    invctx: &InvocationContext,
    stage: &str,
    body: EventBody,
    state_override: Option<&S>,
    meta: &Meta,
) where
    S: Send + 'static,
    C: Send + Sync + 'static,
{
    let mut event: Event = new_event(rc.publisher.run_id(), invctx, stage, body);
    let step_meta = meta.step.snapshot();
    if matches!(event.body, EventBody::StepEnd { .. } | EventBody::StepError { .. }) {
        event.meta = step_meta.clone();
    }
    let meta_json = step_meta.unwrap_or(serde_json::Value::Null);
    match state_override {
        Some(state) => {
            rc.publisher.publish(state, &rc.context, &meta_json, event).await;
        }
        None => {
            let guard = rc.state.lock().await;
            rc.publisher.publish(&*guard, &rc.context, &meta_json, event).await;
        }
    }
}

#[cfg(test)]
#[path = "invoker_tests.rs"]
mod tests;
