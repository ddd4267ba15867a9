// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifiers used to thread run, invocation and step identity through
//! events and completion records.

use std::sync::atomic::{AtomicU64, Ordering};

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `Display`, `From<String>`, `From<&str>`,
/// `PartialEq<str>`, `PartialEq<&str>`, and `Borrow<str>` implementations.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifies a single end-to-end run (one call to `Pipe::run`).
    pub struct RunId;
}

define_id! {
    /// Identifies a single invocation of a step: one plain call, one map
    /// worker, or one retry attempt.
    pub struct InvocationId;
}

impl InvocationId {
    /// An invocation id for a step scheduled without an owning invocation
    /// (e.g. a root step at `START`).
    pub fn orphan(step_name: &str) -> Self {
        Self(format!("orphan:{step_name}"))
    }
}

/// Generates run and invocation identifiers.
pub trait IdGen: Send + Sync {
    fn next_run_id(&self) -> RunId;
    fn next_invocation_id(&self, run_id: &RunId, seq: u64) -> InvocationId;
}

/// UUID-based run ids, monotone-counter invocation ids scoped to the run —
/// short and readable in logs, still unique once paired with the run id.
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next_run_id(&self) -> RunId {
        RunId::new(uuid::Uuid::new_v4().to_string())
    }

    fn next_invocation_id(&self, run_id: &RunId, seq: u64) -> InvocationId {
        InvocationId::new(format!("{run_id}:{seq}"))
    }
}

/// Monotone invocation-id generator, scoped to one run.
pub struct InvocationIdGen {
    run_id: RunId,
    next: AtomicU64,
}

impl InvocationIdGen {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> InvocationId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        InvocationId::new(format!("{}:{n}", self.run_id))
    }
}

/// Per-step retry-attempt counters, scoped to one run.
#[derive(Default)]
pub struct AttemptTracker {
    counts: parking_lot::Mutex<std::collections::HashMap<String, u32>>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next attempt number for `step_name`, starting at 1.
    pub fn next_attempt(&self, step_name: &str) -> u32 {
        let mut counts = self.counts.lock();
        let entry = counts.entry(step_name.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
