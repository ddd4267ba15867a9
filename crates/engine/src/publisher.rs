// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event publication pipeline: prepare (assign `run_id`/`seq`), run event
//! hooks, dispatch to observers, update runtime metrics, then hand the
//! event to the bounded queue that is the run's only output. A
//! multi-producer publication pipeline with observer fan-out, built around
//! a tagged-serde `Event` for a stable wire shape.

use justpipe_core::{Event, EventBody, Observer, RunId, RuntimeMetrics};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Accumulates the per-run counters attached to `FINISH`. A thin wrapper so
/// the hot path (`record_event`) never needs to reach into the `Mutex`
/// more than once.
#[derive(Default)]
struct MetricsState {
    metrics: RuntimeMetrics,
}

impl MetricsState {
    fn observe(&mut self, body: &EventBody) {
        self.metrics.events_emitted += 1;
        match body {
            EventBody::StepStart => self.metrics.steps_started += 1,
            EventBody::StepEnd { .. } => self.metrics.steps_completed += 1,
            EventBody::StepError { .. } => self.metrics.steps_failed += 1,
            EventBody::MapWorker { .. } => {}
            _ => {}
        }
    }

    fn record_step_latency(&mut self, step: &str, millis: f64) {
        self.metrics
            .step_latency_ms
            .entry(step.to_string())
            .or_default()
            .push(millis);
    }

    fn record_barrier_wait(&mut self, step: &str, millis: f64) {
        self.metrics
            .barrier_wait_ms
            .entry(step.to_string())
            .or_default()
            .push(millis);
    }

    fn record_map_peak(&mut self, owner: &str, concurrency: usize) {
        let entry = self
            .metrics
            .map_workers_peak_concurrency
            .entry(owner.to_string())
            .or_insert(0);
        if concurrency > *entry {
            *entry = concurrency;
        }
    }
}

/// Every event, before it leaves the run, passes through `prepare` (assign
/// identity/seq), the registered event hooks (enrich `meta`), and observer
/// dispatch, in that order. Constructed once per run.
pub struct EventPublisher<S, C> {
    run_id: RunId,
    seq: AtomicU64,
    sender: mpsc::Sender<Event>,
    event_hooks: Vec<justpipe_core::EventHook>,
    observers: Vec<Arc<dyn Observer<S, C>>>,
    metrics: parking_lot::Mutex<MetricsState>,
    client_closed: std::sync::atomic::AtomicBool,
}

impl<S, C> EventPublisher<S, C> {
    pub fn new(
        run_id: RunId,
        sender: mpsc::Sender<Event>,
        event_hooks: Vec<justpipe_core::EventHook>,
        observers: Vec<Arc<dyn Observer<S, C>>>,
    ) -> Self {
        Self {
            run_id,
            seq: AtomicU64::new(0),
            sender,
            event_hooks,
            observers,
            metrics: parking_lot::Mutex::new(MetricsState::default()),
            client_closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// `true` once the consumer has dropped the receiving end of the event
    /// stream — closing the stream early is treated as the client having
    /// closed it.
    pub fn is_client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    /// Resolves once the consumer drops the receiving end of the event
    /// stream, letting the run react to a closed consumer without polling
    /// [`Self::is_client_closed`].
    pub async fn closed(&self) {
        self.sender.closed().await;
    }

    pub fn observers(&self) -> &[Arc<dyn Observer<S, C>>] {
        &self.observers
    }

    pub fn metrics_snapshot(&self) -> RuntimeMetrics {
        self.metrics.lock().metrics.clone()
    }

    pub fn record_step_latency(&self, step: &str, millis: f64) {
        self.metrics.lock().record_step_latency(step, millis);
    }

    pub fn record_barrier_wait(&self, step: &str, millis: f64) {
        self.metrics.lock().record_barrier_wait(step, millis);
    }

    pub fn record_map_peak(&self, owner: &str, concurrency: usize) {
        self.metrics.lock().record_map_peak(owner, concurrency);
    }

    /// Publishes `event`, returning `false` once the client has closed the
    /// stream — subsequent publications become silent no-ops.
    /// `state`/`context` are handed to observers unmodified; the publisher
    /// never inspects them.
    pub async fn publish(&self, state: &S, context: &C, meta: &serde_json::Value, mut event: Event) -> bool {
        if self.client_closed.load(Ordering::SeqCst) {
            return false;
        }

        event.run_id = self.run_id.clone();
        event.seq = self.seq.fetch_add(1, Ordering::SeqCst);

        for hook in &self.event_hooks {
            hook(&mut event);
        }

        self.metrics.lock().observe(&event.body);

        for observer in &self.observers {
            observer.on_event(state, context, meta, &event).await;
        }

        if self.sender.send(event).await.is_err() {
            self.client_closed.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
