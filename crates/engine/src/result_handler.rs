// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result Handler: a pure classification from a step's [`StepOutcome`] to
//! the action the scheduler must take. Kept free of I/O so the
//! return-value table is exercised directly, without spinning up a run.

use justpipe_core::StepOutcome;
use std::any::Any;
use std::sync::Arc;

pub enum ResultAction<C> {
    /// `Continue`: fire the step's static successors.
    FireSuccessors,
    /// `Skip`: mark owner skipped, do not fire successors.
    Skip,
    /// `Stop`: request kernel stop.
    Stop,
    /// `Suspend(reason)`: emit SUSPEND, request stop.
    Suspend(String),
    /// `Retry`: reschedule with `attempt + 1`, subject to `max_retries`.
    Retry,
    /// `Raise(exc?)`: route through the Failure Handler.
    Raise(Option<Box<dyn std::error::Error + Send + Sync>>),
    /// `Next(target)` / bare string: dynamic reroute; owner is marked
    /// skipped so its static successors do not also fire.
    Reroute(String),
    /// `Map(items, target)`: handled by the map fan-out path.
    Map(Vec<Arc<dyn Any + Send + Sync>>, String),
    /// `Run(subPipe)`: spawn a sub-pipeline runner and forward its events.
    Run(Box<dyn justpipe_core::ErasedSubPipelineRun<C>>),
}

pub fn classify<C>(outcome: StepOutcome<C>) -> ResultAction<C> {
    match outcome {
        StepOutcome::Continue => ResultAction::FireSuccessors,
        StepOutcome::Skip => ResultAction::Skip,
        StepOutcome::Stop => ResultAction::Stop,
        StepOutcome::Suspend(reason) => ResultAction::Suspend(reason),
        StepOutcome::Retry => ResultAction::Retry,
        StepOutcome::Raise(err) => ResultAction::Raise(err),
        StepOutcome::Next(target) => ResultAction::Reroute(target),
        StepOutcome::Map(items, target) => ResultAction::Map(items, target),
        StepOutcome::Run(sub) => ResultAction::Run(sub),
    }
}

#[cfg(test)]
#[path = "result_handler_tests.rs"]
mod tests;
