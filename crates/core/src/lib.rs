// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! justpipe-core: data model, graph compiler & validator, and runtime
//! barrier state shared by the JustPipe execution engine. The task
//! orchestrator, step invoker, scheduler, and failure/event-publication
//! pipeline that consume these types live in `justpipe-engine`.

pub mod cancel;
pub mod clock;
pub mod dependency_graph;
pub mod error;
pub mod event;
pub mod id;
pub mod meta;
pub mod observer;
pub mod plan;
pub mod registry;
pub mod step;

pub use cancel::CancellationToken;
pub use clock::{Clock, FakeClock, SystemClock};
pub use dependency_graph::{DependencyGraph, Transition};
pub use error::{
    DefinitionError, FailureJournal, FailureKind, FailureRecord, FailureReason, FailureSource,
    RunError, TerminalStatus,
};
pub use event::{
    BarrierReleasePayload, BarrierWaitPayload, Event, EventBody, InvocationContext,
    MapCompletePayload, MapStartPayload, MapWorkerPayload, NodeKind, PipelineEndData,
    RuntimeMetrics,
};
pub use id::{AttemptTracker, IdGen, InvocationId, InvocationIdGen, RunId, UuidIdGen};
pub use meta::{Meta, PipelineMeta, RunMeta, StepMeta};
pub use observer::Observer;
pub use plan::{ExecutionPlan, SwitchSiblingGroup, ValidateOptions};
pub use registry::{
    BarrierKind, EventHook, Hooks, MapConfig, Registry, RetryPolicy, ShutdownHook, StartupHook,
    StepDef, StepExtra, SwitchConfig, SwitchTarget,
};
pub use step::{
    BoxFuture, ErasedSubPipelineRun, ErrorHandlerFn, InjectionMetadata, ParamRole, StepBody,
    StepCx, StepFn, StepKind, StepOutcome, StreamingStepFn, TokenSink,
};
