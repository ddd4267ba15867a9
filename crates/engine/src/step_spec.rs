// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ergonomic step construction. [`StepDef`] is the data the registry and
//! compiler operate on; building one by hand means naming every field,
//! including the ones that rarely change (`extra`, `injection`). [`StepSpec`]
//! is a small owned builder that assembles a [`StepDef`] from the handful of
//! things a caller actually varies per step, then hands it to
//! [`crate::pipe::Pipe::add_step`].

use justpipe_core::{
    BarrierKind, BoxFuture, InjectionMetadata, MapConfig, ParamRole, RetryPolicy, StepBody,
    StepCx, StepDef, StepExtra, StepFn, StepKind, StepOutcome, StreamingStepFn, SwitchConfig,
    SwitchTarget,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A SWITCH step's routing decision: inspects the invocation and returns the
/// key to look up in the step's routing table (the `SwitchConfig` built
/// separately and handed to [`StepSpec::switch`]).
pub trait RouteFn<S, C>: Send + Sync {
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, S, C>) -> BoxFuture<'a, String>;
}

impl<S, C, F> RouteFn<S, C> for F
where
    F: for<'a> Fn(&'a mut StepCx<'_, S, C>) -> BoxFuture<'a, String> + Send + Sync,
{
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, S, C>) -> BoxFuture<'a, String> {
        (self)(cx)
    }
}

struct SwitchBody<S, C> {
    routes: HashMap<String, SwitchTarget>,
    default: Option<SwitchTarget>,
    route: Arc<dyn RouteFn<S, C>>,
}

impl<S, C> StepFn<S, C> for SwitchBody<S, C>
where
    S: Send,
    C: Send + Sync,
{
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, S, C>) -> BoxFuture<'a, StepOutcome<C>> {
        Box::pin(async move {
            let key = self.route.call(cx).await;
            match self.routes.get(&key).cloned().or_else(|| self.default.clone()) {
                Some(SwitchTarget::Step(target)) => StepOutcome::Next(target),
                Some(SwitchTarget::Stop) => StepOutcome::Stop,
                None => StepOutcome::Raise(Some(
                    format!(
                        "switch '{}' has no route for key '{key}' and no default",
                        cx.step_name
                    )
                    .into(),
                )),
            }
        })
    }
}

/// Builder for one [`StepDef`]. Constructed via [`StepSpec::plain`],
/// [`StepSpec::map`], [`StepSpec::switch`], or [`StepSpec::sub`], then
/// refined with chained setters before being handed to
/// [`crate::pipe::Pipe::add_step`].
pub struct StepSpec<S, C> {
    name: String,
    kind: StepKind,
    body: StepBody<S, C>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    barrier: BarrierKind,
    barrier_timeout: Option<Duration>,
    error_handler: Option<Arc<dyn justpipe_core::ErrorHandlerFn<S, C>>>,
    extra: StepExtra,
    to: Vec<String>,
    map: Option<MapConfig>,
    switch: Option<SwitchConfig>,
    roles: Vec<ParamRole>,
}

impl<S, C> StepSpec<S, C>
where
    S: Send + 'static,
    C: Send + Sync + 'static,
{
    fn new(name: impl Into<String>, kind: StepKind, body: StepBody<S, C>) -> Self {
        Self {
            name: name.into(),
            kind,
            body,
            timeout: None,
            retry: None,
            barrier: BarrierKind::All,
            barrier_timeout: None,
            error_handler: None,
            extra: StepExtra::new(),
            to: Vec::new(),
            map: None,
            switch: None,
            roles: Vec::new(),
        }
    }

    /// A plain step: one `StepFn`, zero or more static successors.
    pub fn plain(name: impl Into<String>, body: impl StepFn<S, C> + 'static) -> Self {
        Self::new(name, StepKind::Plain, StepBody::Plain(Arc::new(body)))
    }

    /// A streaming plain step: yields TOKEN events before its final
    /// `StepOutcome`.
    pub fn streaming(name: impl Into<String>, body: impl StreamingStepFn<S, C> + 'static) -> Self {
        Self::new(name, StepKind::Plain, StepBody::Streaming(Arc::new(body)))
    }

    /// A MAP owner step: `body` returns `StepOutcome::Map(items, each)` to
    /// fan out; `each` is the worker step's name.
    pub fn map(name: impl Into<String>, each: impl Into<String>, body: impl StepFn<S, C> + 'static) -> Self {
        let mut spec = Self::new(name, StepKind::Map, StepBody::Plain(Arc::new(body)));
        spec.map = Some(MapConfig {
            each: each.into(),
            max_concurrency: None,
        });
        spec
    }

    /// A SWITCH step built from a routing table plus a decision function:
    /// `route` inspects the invocation and returns a key, looked up in
    /// `routes` (falling back to `default`) to decide the next step or stop.
    pub fn switch(
        name: impl Into<String>,
        routes: HashMap<String, SwitchTarget>,
        default: Option<SwitchTarget>,
        route: impl RouteFn<S, C> + 'static,
    ) -> Self {
        let switch = SwitchConfig {
            routes: routes.clone(),
            default: default.clone(),
        };
        let body = SwitchBody {
            routes,
            default,
            route: Arc::new(route),
        };
        let mut spec = Self::new(name, StepKind::Switch, StepBody::Plain(Arc::new(body)));
        spec.switch = Some(switch);
        spec
    }

    /// A sub-pipeline step: `body` returns `StepOutcome::Run(sub)`, built via
    /// `Pipe::into_sub_run`.
    pub fn sub(name: impl Into<String>, body: impl StepFn<S, C> + 'static) -> Self {
        Self::new(name, StepKind::Sub, StepBody::Plain(Arc::new(body)))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, max_attempts: u32) -> Self {
        self.retry = Some(RetryPolicy { max_attempts });
        self
    }

    pub fn any_barrier(mut self) -> Self {
        self.barrier = BarrierKind::Any;
        self
    }

    pub fn barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = Some(timeout);
        self
    }

    pub fn error_handler(mut self, handler: impl justpipe_core::ErrorHandlerFn<S, C> + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Adds one unconditional successor, for PLAIN/MAP/SUB steps. Call
    /// repeatedly to fan out to several successors at once; all of them
    /// start as soon as this step completes. SWITCH routing is declared
    /// entirely through [`StepSpec::switch`]'s table instead.
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.to.push(target.into());
        self
    }

    /// Caps concurrent workers for a MAP step; no-op on any other kind.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        if let Some(map) = &mut self.map {
            map.max_concurrency = Some(limit);
        }
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Declares this step's worker parameter role for `describe()` and the
    /// item-arity check — a MAP worker body reads `cx.item()`, and declaring
    /// it here is what a generic introspection consumer sees.
    pub fn expects_item(mut self) -> Self {
        self.roles.push(ParamRole::Item);
        self
    }

    pub(crate) fn into_def(self) -> StepDef<S, C> {
        StepDef {
            name: self.name,
            kind: self.kind,
            body: self.body,
            timeout: self.timeout,
            retry: self.retry,
            barrier: self.barrier,
            barrier_timeout: self.barrier_timeout,
            error_handler: self.error_handler,
            extra: self.extra,
            to: self.to,
            map: self.map,
            switch: self.switch,
            injection: InjectionMetadata::new(self.roles),
        }
    }
}

#[cfg(test)]
#[path = "step_spec_tests.rs"]
mod tests;
