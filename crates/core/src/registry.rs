// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step/hook registration. Collects step definitions during the setup
//! phase; validation and freezing happen once, at first `run()`.

use crate::error::DefinitionError;
use crate::step::{ErrorHandlerFn, InjectionMetadata, StepBody, StepKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// ALL requires every parent to complete; ANY fires on the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    All,
    Any,
}

impl Default for BarrierKind {
    fn default() -> Self {
        BarrierKind::All
    }
}

/// Retry policy cap. Backoff middleware lives outside the engine; this only
/// bounds the `Retry` loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

/// Static or dynamic routing target of a SWITCH step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchTarget {
    Step(String),
    Stop,
}

/// A SWITCH step's routing table, keyed by the switch's own return key.
#[derive(Debug, Clone, Default)]
pub struct SwitchConfig {
    pub routes: HashMap<String, SwitchTarget>,
    pub default: Option<SwitchTarget>,
}

impl SwitchConfig {
    /// Every distinct step-name target this switch can route to, used by the
    /// execution plan compiler to build sibling-exclusivity groups.
    pub fn targets(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .routes
            .values()
            .filter_map(|t| match t {
                SwitchTarget::Step(s) => Some(s.clone()),
                SwitchTarget::Stop => None,
            })
            .collect();
        if let Some(SwitchTarget::Step(s)) = &self.default {
            out.push(s.clone());
        }
        out.sort();
        out.dedup();
        out
    }
}

/// A MAP step's worker config: the worker step to fan out to, and an
/// optional cap on how many workers run concurrently.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub each: String,
    pub max_concurrency: Option<usize>,
}

/// Opaque per-step options forwarded to middleware.
pub type StepExtra = HashMap<String, serde_json::Value>;

/// A registered step. Frozen after the first `run()`; never deleted.
pub struct StepDef<S, C> {
    pub name: String,
    pub kind: StepKind,
    pub body: StepBody<S, C>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub barrier: BarrierKind,
    pub barrier_timeout: Option<Duration>,
    pub error_handler: Option<Arc<dyn ErrorHandlerFn<S, C>>>,
    pub extra: StepExtra,
    pub to: Vec<String>,
    pub map: Option<MapConfig>,
    pub switch: Option<SwitchConfig>,
    pub injection: InjectionMetadata,
}

impl<S, C> StepDef<S, C> {
    /// Every step name this node can hand control to statically: `to` for a
    /// PLAIN/SUB/MAP-owner step (an ordered list, so one step may fan out to
    /// several unconditional successors), or every switch target for a
    /// SWITCH step. Dynamic `Next`/`Map`/`Run` reroutes are resolved at
    /// runtime and are not part of the static topology.
    pub fn static_targets(&self) -> Vec<String> {
        if let Some(switch) = &self.switch {
            return switch.targets();
        }
        self.to.clone()
    }
}

/// Lifecycle hook slots: ordered startup/shutdown lists, one global error
/// handler.
pub struct Hooks<S, C> {
    pub startup: Vec<Arc<dyn StartupHook<S, C>>>,
    pub shutdown: Vec<Arc<dyn ShutdownHook<S, C>>>,
    pub on_error: Option<Arc<dyn ErrorHandlerFn<S, C>>>,
}

impl<S, C> Default for Hooks<S, C> {
    fn default() -> Self {
        Self {
            startup: Vec::new(),
            shutdown: Vec::new(),
            on_error: None,
        }
    }
}

use async_trait::async_trait;

/// Runs before the root step(s) are scheduled. A failing startup hook is
/// terminal for the run.
#[async_trait]
pub trait StartupHook<S, C>: Send + Sync {
    async fn call(&self, state: &mut S, context: &C) -> Result<(), String>;
}

/// Runs after the run's last task completes, before FINISH. Failures are
/// recorded but never flip an otherwise-successful status to `failed`.
#[async_trait]
pub trait ShutdownHook<S, C>: Send + Sync {
    async fn call(&self, state: &mut S, context: &C) -> Result<(), String>;
}

#[async_trait]
impl<S, C, F> StartupHook<S, C> for F
where
    F: for<'a> Fn(&'a mut S, &'a C) -> crate::step::BoxFuture<'a, Result<(), String>>
        + Send
        + Sync,
    S: Send,
    C: Send + Sync,
{
    async fn call(&self, state: &mut S, context: &C) -> Result<(), String> {
        (self)(state, context).await
    }
}

#[async_trait]
impl<S, C, F> ShutdownHook<S, C> for F
where
    F: for<'a> Fn(&'a mut S, &'a C) -> crate::step::BoxFuture<'a, Result<(), String>>
        + Send
        + Sync,
    S: Send,
    C: Send + Sync,
{
    async fn call(&self, state: &mut S, context: &C) -> Result<(), String> {
        (self)(state, context).await
    }
}

/// An event hook transforms a published event in place, e.g. to enrich
/// `meta`. Registration is rejected after freeze.
pub type EventHook = Arc<dyn Fn(&mut crate::event::Event) + Send + Sync>;

/// Collects step/hook definitions before the graph is validated and frozen.
/// `freeze()` happens automatically on first `run()`, not as a method
/// callers must remember to invoke.
pub struct Registry<S, C> {
    pub steps: HashMap<String, StepDef<S, C>>,
    pub topology: HashMap<String, Vec<String>>,
    pub hooks: Hooks<S, C>,
    pub event_hooks: Vec<EventHook>,
    pub metadata: HashMap<String, serde_json::Value>,
    frozen: bool,
}

impl<S, C> Default for Registry<S, C> {
    fn default() -> Self {
        Self {
            steps: HashMap::new(),
            topology: HashMap::new(),
            hooks: Hooks::default(),
            event_hooks: Vec::new(),
            metadata: HashMap::new(),
            frozen: false,
        }
    }
}

impl<S, C> Registry<S, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn ensure_mutable(&self, action: &'static str) -> Result<(), DefinitionError> {
        if self.frozen {
            return Err(DefinitionError::Frozen(action));
        }
        Ok(())
    }

    /// Registers a step, wiring its static successor(s) into the topology.
    /// Fails if the name is taken or the kind-specific configuration is
    /// internally inconsistent.
    pub fn add_step(&mut self, def: StepDef<S, C>) -> Result<(), DefinitionError> {
        self.ensure_mutable("add a step")?;
        if self.steps.contains_key(&def.name) {
            return Err(DefinitionError::DuplicateStep(def.name));
        }
        match def.kind {
            StepKind::Map => {
                if def.map.is_none() {
                    return Err(DefinitionError::MapMissingEach(def.name));
                }
            }
            StepKind::Switch => {
                let empty = def
                    .switch
                    .as_ref()
                    .map(|s| s.routes.is_empty() && s.default.is_none())
                    .unwrap_or(true);
                if empty {
                    return Err(DefinitionError::SwitchMissingRoutes(def.name));
                }
            }
            StepKind::Sub => {
                // Sub-pipeline steps delegate via `StepOutcome::Run`
                // produced by their own `func`; the registration-time
                // requirement is just that a func was supplied, which the
                // type system already guarantees.
            }
            StepKind::Plain => {}
        }
        let targets = def.static_targets();
        self.topology.entry(def.name.clone()).or_default();
        for target in targets {
            self.topology.entry(def.name.clone()).or_default().push(target);
        }
        self.steps.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn add_startup_hook(
        &mut self,
        hook: Arc<dyn StartupHook<S, C>>,
    ) -> Result<(), DefinitionError> {
        self.ensure_mutable("add a startup hook")?;
        self.hooks.startup.push(hook);
        Ok(())
    }

    pub fn add_shutdown_hook(
        &mut self,
        hook: Arc<dyn ShutdownHook<S, C>>,
    ) -> Result<(), DefinitionError> {
        self.ensure_mutable("add a shutdown hook")?;
        self.hooks.shutdown.push(hook);
        Ok(())
    }

    pub fn set_on_error(
        &mut self,
        hook: Arc<dyn ErrorHandlerFn<S, C>>,
    ) -> Result<(), DefinitionError> {
        self.ensure_mutable("set the global error handler")?;
        self.hooks.on_error = Some(hook);
        Ok(())
    }

    pub fn add_event_hook(&mut self, hook: EventHook) -> Result<(), DefinitionError> {
        self.ensure_mutable("add an event hook")?;
        self.event_hooks.push(hook);
        Ok(())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
