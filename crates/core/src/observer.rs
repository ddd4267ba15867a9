// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The observer contract. Persistence, dashboards, and timeline rendering
//! are external collaborators; this crate only defines the interface they
//! implement against and the raw event stream they consume.
//!
//! A dynamic language can validate an observer's shape reflectively at
//! registration time, rejecting one that is missing a hook. A Rust trait
//! with four required async methods makes that check unnecessary: a type
//! that doesn't implement all four simply doesn't implement `Observer`, so
//! the "setup fails when the shape is wrong" requirement is satisfied at
//! compile time instead.

use crate::event::Event;
use async_trait::async_trait;

/// A registered consumer of lifecycle callbacks. Does not influence control
/// flow.
#[async_trait]
pub trait Observer<S, C>: Send + Sync {
    async fn on_pipeline_start(&self, state: &S, context: &C, meta: &serde_json::Value);

    async fn on_event(&self, state: &S, context: &C, meta: &serde_json::Value, event: &Event);

    async fn on_pipeline_end(
        &self,
        state: &S,
        context: &C,
        meta: &serde_json::Value,
        duration_seconds: f64,
    );

    async fn on_pipeline_error(
        &self,
        state: &S,
        context: &C,
        meta: &serde_json::Value,
        error: &str,
    );
}
