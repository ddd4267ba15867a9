// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error and failure taxonomy. Registration/validation failures are a
//! distinct type from the per-run failure journal: the former aborts
//! `Pipe::run` before a run ever starts, the latter classifies failures
//! that occur once a run is underway.

use thiserror::Error;

/// Raised while registering steps/hooks or validating the graph, before a
/// run ever starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("step '{0}' is already registered; each step name must be unique within a pipeline")]
    DuplicateStep(String),

    #[error("step '{step}' targets unknown step '{target}'{suggestion}")]
    UnknownTarget {
        step: String,
        target: String,
        suggestion: String,
    },

    #[error("map step '{0}' requires an 'each' worker target")]
    MapMissingEach(String),

    #[error("map worker '{worker}' is targeted by map step '{owner}' but also declares a static 'to'; workers never fire their own successors (worker trap)")]
    WorkerTrap { owner: String, worker: String },

    #[error("switch step '{0}' requires at least one route or a default")]
    SwitchMissingRoutes(String),

    #[error("sub-pipeline step '{0}' requires a nested pipeline")]
    SubMissingPipeline(String),

    #[error("no entry point: every step has an incoming edge and no `start` was given")]
    NoEntryPoint,

    #[error("multiple root steps found ({0:?}) and allow_multi_root is false")]
    MultipleRoots(Vec<String>),

    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("step '{0}' is unreachable from the configured start node(s)")]
    Unreachable(String),

    #[error("step '{step}' has an ALL barrier but parent '{missing_parent}' is unreachable from the configured start")]
    UnreachableAllBarrierParent { step: String, missing_parent: String },

    #[error("pipeline definition is frozen after first run; cannot {0}")]
    Frozen(&'static str),

    #[error("observer does not implement the required hooks: {0}")]
    InvalidObserver(String),
}

/// Failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Startup,
    Step,
    Shutdown,
    Infra,
}

/// Failure source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    UserCode,
    Framework,
}

/// Failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoSteps,
    StartupHookError,
    StepError,
    ShutdownHookError,
    Timeout,
    Cancelled,
    ClientClosed,
    InternalError,
}

/// One entry in the failure journal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub source: FailureSource,
    pub reason: FailureReason,
    pub message: String,
    pub step: Option<String>,
}

impl FailureRecord {
    pub fn step_error(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Step,
            source: FailureSource::UserCode,
            reason: FailureReason::StepError,
            message: message.into(),
            step: Some(step.into()),
        }
    }

    pub fn timeout(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Step,
            source: FailureSource::Framework,
            reason: FailureReason::Timeout,
            message: message.into(),
            step: Some(step.into()),
        }
    }

    pub fn startup_hook_error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Startup,
            source: FailureSource::UserCode,
            reason: FailureReason::StartupHookError,
            message: message.into(),
            step: None,
        }
    }

    pub fn shutdown_hook_error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Shutdown,
            source: FailureSource::UserCode,
            reason: FailureReason::ShutdownHookError,
            message: message.into(),
            step: None,
        }
    }

    /// A run-level timeout with no single offending step, distinct from a
    /// per-step [`FailureRecord::timeout`] (which still resolves to `Failed`,
    /// not `Timeout` — see [`FailureJournal::resolve`]).
    pub fn run_timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Step,
            source: FailureSource::Framework,
            reason: FailureReason::Timeout,
            message: message.into(),
            step: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Step,
            source: FailureSource::Framework,
            reason: FailureReason::Cancelled,
            message: message.into(),
            step: None,
        }
    }

    pub fn client_closed() -> Self {
        Self {
            kind: FailureKind::Shutdown,
            source: FailureSource::Framework,
            reason: FailureReason::ClientClosed,
            message: "consumer closed the event stream".to_string(),
            step: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Infra,
            source: FailureSource::Framework,
            reason: FailureReason::InternalError,
            message: message.into(),
            step: None,
        }
    }

    pub fn no_steps() -> Self {
        Self {
            kind: FailureKind::Validation,
            source: FailureSource::Framework,
            reason: FailureReason::NoSteps,
            message: "pipeline has no registered steps".to_string(),
            step: None,
        }
    }
}

/// Terminal status of a run, resolved by the failure journal at shutdown
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
    ClientClosed,
}

/// The failure journal: accumulates [`FailureRecord`]s during a run and
/// resolves the terminal status once the run ends.
#[derive(Debug, Default)]
pub struct FailureJournal {
    records: Vec<FailureRecord>,
}

impl FailureJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    /// Resolves the terminal status: any unrecovered step failure ->
    /// failed; global timeout -> timeout; cancellation -> cancelled;
    /// consumer close -> client_closed; otherwise success. Priority order
    /// matters: a cancellation that raced with a step failure still
    /// reports as cancelled, since cancellation is always the more
    /// specific explanation for why the run ended early.
    pub fn resolve(&self) -> TerminalStatus {
        if self
            .records
            .iter()
            .any(|r| r.reason == FailureReason::ClientClosed)
        {
            return TerminalStatus::ClientClosed;
        }
        if self
            .records
            .iter()
            .any(|r| r.reason == FailureReason::Cancelled)
        {
            return TerminalStatus::Cancelled;
        }
        if self
            .records
            .iter()
            .any(|r| r.reason == FailureReason::Timeout && r.step.is_none())
        {
            return TerminalStatus::Timeout;
        }
        if self.records.iter().any(|r| {
            matches!(
                r.reason,
                FailureReason::StepError
                    | FailureReason::StartupHookError
                    | FailureReason::Timeout
                    | FailureReason::InternalError
            )
        }) {
            return TerminalStatus::Failed;
        }
        TerminalStatus::Success
    }
}

/// Surfaced to the caller of `Pipe::run` when the run itself fails outside
/// the ordinary event-stream/FINISH path (e.g. an unexpected framework
/// error that gets recorded as infra/internal and re-raised).
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("pipeline run ended with status {status:?}: {message}")]
    Failed {
        status: TerminalStatus,
        message: String,
    },

    #[error("internal framework error: {0}")]
    Internal(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
