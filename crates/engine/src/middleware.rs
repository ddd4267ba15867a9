// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Middleware: a one-time decorator chain wrapped around each plain step's
//! body at freeze time, not a per-invocation dynamic chain — middleware
//! composition is a property of the frozen plan, same as the rest of
//! [`justpipe_core::ExecutionPlan`]. Streaming steps are not wrapped: a
//! middleware author expects to call the wrapped [`StepFn`] once and get
//! one [`StepOutcome`] back, which a streaming step's token sink doesn't
//! fit.

use justpipe_core::StepFn;
use std::sync::Arc;

/// Wraps a step's body, returning a new body that runs its own logic around
/// a call to `next`. Registered in the order middleware is added; applied
/// outermost-first so the first-registered middleware sees the call before
/// any other.
pub type Middleware<S, C> =
    Arc<dyn Fn(Arc<dyn StepFn<S, C>>) -> Arc<dyn StepFn<S, C>> + Send + Sync>;

/// Applies every middleware in registration order to `body`, each wrapping
/// the previous result so the first-registered middleware ends up
/// outermost.
pub fn wrap<S, C>(mut body: Arc<dyn StepFn<S, C>>, middlewares: &[Middleware<S, C>]) -> Arc<dyn StepFn<S, C>> {
    for mw in middlewares.iter().rev() {
        body = mw(body);
    }
    body
}

#[cfg(test)]
#[path = "middleware_tests.rs"]
mod tests;
