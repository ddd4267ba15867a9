// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure Handler: local error handler, then global `onError`, then
//! terminal. Each step is tried as an ordinary step invocation so its
//! return value flows back through the same [`crate::result_handler`] path
//! as any other step's outcome.

use crate::events::new_event;
use crate::run_context::RunContext;
use justpipe_core::{
    Event, EventBody, FailureRecord, InvocationContext, Meta, StepOutcome,
};
use std::sync::Arc;

/// What the caller (the result handler, on `Raise`, or the invoker, on an
/// invoker-internal failure) should do next.
pub enum Escalation<C> {
    /// A local or global handler recovered with this outcome; dispatch it
    /// like any other step return.
    Recovered(StepOutcome<C>),
    /// Nothing recovered the error; it is now terminal for this invocation.
    Terminal,
}

/// Distinguishes the wire event and journal entry a terminal failure
/// produces. A user `Raise` and a timed-out invocation both flow through
/// the same local/global handler chain, but timeouts get their own
/// `TIMEOUT` event and `FailureReason` so a consumer can tell "the step
/// raised" from "the step never returned".
#[derive(Clone, Copy)]
pub enum Cause {
    Raised,
    Timeout,
    Internal,
}

/// Runs the escalation order for a step failure: local handler, then
/// global, then terminal. Records `cause`'s specific event/reason once
/// nothing recovers — a plain `Raise` and a timeout/scheduler-internal
/// error get different terminal shapes even though they share this same
/// handler chain.
pub async fn handle_with_cause<S, C>(
    rc: &Arc<RunContext<S, C>>,
    step_name: &str,
    invctx: &InvocationContext,
    error: &(dyn std::error::Error + Send + Sync),
    cause: Cause,
    meta: &Meta,
) -> Escalation<C>
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let local_handler = rc.plan.get(step_name).and_then(|step| step.error_handler.clone());
    if let Some(handler) = local_handler {
        if let Some(outcome) = try_handler(rc, &handler, step_name, invctx, error, meta).await {
            return Escalation::Recovered(outcome);
        }
    }

    if let Some(handler) = rc.hooks.on_error.clone() {
        if let Some(outcome) = try_handler(rc, &handler, step_name, invctx, error, meta).await {
            return Escalation::Recovered(outcome);
        }
    }

    terminal(rc, step_name, invctx, error, cause, meta).await
}

/// Invokes one escalation-order handler. Returns `None` when the handler
/// itself raises, signalling the caller to capture that and escalate
/// further.
async fn try_handler<S, C>(
    rc: &Arc<RunContext<S, C>>,
    handler: &Arc<dyn justpipe_core::ErrorHandlerFn<S, C>>,
    step_name: &str,
    invctx: &InvocationContext,
    error: &(dyn std::error::Error + Send + Sync),
    meta: &Meta,
) -> Option<StepOutcome<C>>
where
    S: Send + 'static,
    C: Send + Sync + 'static,
{
    let mut state = rc.state.lock().await;
    let mut cx = justpipe_core::StepCx {
        state: &mut *state,
        context: &rc.context,
        step_name,
        attempt: invctx.attempt,
        cancel: &rc.cancel,
        item: None,
        error: Some(error),
        meta,
    };
    let outcome = handler.call(&mut cx).await;
    drop(state);
    if matches!(outcome, StepOutcome::Raise(_)) {
        None
    } else {
        Some(outcome)
    }
}

async fn terminal<S, C>(
    rc: &Arc<RunContext<S, C>>,
    step_name: &str,
    invctx: &InvocationContext,
    error: &(dyn std::error::Error + Send + Sync),
    cause: Cause,
    meta: &Meta,
) -> Escalation<C>
where
    S: serde::Serialize + Send + 'static,
    C: Send + Sync + 'static,
{
    let message = error.to_string();
    tracing::error!(step = step_name, error = %message, "step failed; no handler recovered");

    let (record, body) = match cause {
        Cause::Raised => (
            FailureRecord::step_error(step_name, message.clone()),
            EventBody::StepError { message },
        ),
        Cause::Timeout => (
            FailureRecord::timeout(step_name, message.clone()),
            EventBody::Timeout { message },
        ),
        Cause::Internal => (
            FailureRecord::internal(message.clone()),
            EventBody::StepError { message },
        ),
    };
    rc.journal.lock().record(record);

    let mut event: Event = new_event(rc.publisher.run_id(), invctx, step_name, body);
    let step_meta = meta.step.snapshot();
    event.meta = step_meta.clone();
    let meta_json = step_meta.unwrap_or(serde_json::Value::Null);
    let state = rc.state.lock().await;
    rc.publisher.publish(&*state, &rc.context, &meta_json, event).await;
    drop(state);

    Escalation::Terminal
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
