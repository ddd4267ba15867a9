// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! justpipe: structured-concurrency execution for declarative DAG
//! pipelines. This crate is a thin facade: the data model, graph compiler,
//! and runtime barrier state live in `justpipe-core`; the task
//! orchestrator, step invoker, scheduler, and event publication pipeline
//! live in `justpipe-engine`. Most applications only need this crate.

pub use justpipe_core::{
    AttemptTracker, BarrierKind, BarrierReleasePayload, BarrierWaitPayload, BoxFuture,
    CancellationToken, Clock, DefinitionError, ErasedSubPipelineRun, ErrorHandlerFn, Event,
    EventBody, EventHook, FailureJournal, FailureKind, FailureRecord, FailureReason,
    FailureSource, Hooks, InjectionMetadata, InvocationContext, InvocationId, MapCompletePayload,
    MapConfig, MapStartPayload, MapWorkerPayload, Meta, NodeKind, Observer, ParamRole,
    PipelineEndData, PipelineMeta, Registry, RetryPolicy, RunError, RunId, RunMeta,
    RuntimeMetrics, ShutdownHook, StartupHook, StepBody, StepCx, StepDef, StepExtra, StepFn,
    StepKind, StepMeta, StepOutcome, StreamingStepFn, SwitchConfig, SwitchTarget, SystemClock,
    TerminalStatus, TokenSink,
};

pub use justpipe_engine::{Middleware, Pipe, PipeConfig, PipelineRun, RouteFn, RunOptions, StepSpec};
