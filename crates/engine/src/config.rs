// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline configuration: the options a `Pipe` is built with.

use std::collections::HashMap;
use std::time::Duration;

/// Options recognized by a [`crate::pipe::Pipe`]. Constructed via builder
/// methods on `Pipe`, not by parsing a file/env format; registration here
/// is purely programmatic.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Label used in metrics and logs.
    pub name: String,
    /// Whether the validator treats reachability/multi-root issues as
    /// errors rather than warnings.
    pub strict: bool,
    /// Explicit opt-in to non-deterministic root order when more than one
    /// entry point exists.
    pub allow_multi_root: bool,
    /// Bounded event queue capacity.
    pub queue_size: usize,
    /// Safety cap on a MAP step's item count.
    pub max_map_items: usize,
    /// Hard cap on `Retry` loops per step.
    pub max_retries: u32,
    /// Read-only pipeline metadata exposed via `meta.pipeline`.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Overall run timeout. `None` means no timeout is enforced.
    pub run_timeout: Option<Duration>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            strict: false,
            allow_multi_root: false,
            queue_size: 1000,
            max_map_items: 100_000,
            max_retries: 100,
            metadata: HashMap::new(),
            run_timeout: None,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
