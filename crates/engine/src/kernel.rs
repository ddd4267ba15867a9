// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime kernel: the structured-concurrency scope, the task tracker
//! distinguishing physical from logical task counts, and the stop flag
//! every scheduling decision checks. Built over a `tokio::task::JoinSet`,
//! the idiomatic primitive for "children scoped to one owner, joined
//! before the scope closes".

use justpipe_core::InvocationId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

/// Owns the structured-concurrency scope, the stop flag, and the task
/// tracker. One kernel per run.
pub struct RuntimeKernel {
    stop: std::sync::atomic::AtomicBool,
    physical_active: AtomicI64,
    logical_active: parking_lot::Mutex<HashMap<InvocationId, i64>>,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl RuntimeKernel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stop: std::sync::atomic::AtomicBool::new(false),
            physical_active: AtomicI64::new(0),
            logical_active: parking_lot::Mutex::new(HashMap::new()),
            tasks: AsyncMutex::new(JoinSet::new()),
        })
    }

    /// Sets the stop flag. No new tasks may be spawned afterwards.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// A run is "active" while any physical task is still live.
    pub fn is_active(&self) -> bool {
        self.physical_active.load(Ordering::SeqCst) > 0
    }

    /// Atomically checks the stop flag and, if clear, records the spawn and
    /// submits `fut` to the scope. `owner` is `Some` for
    /// every task whose completion should count towards that owner's
    /// logical-completion tally; barrier watchers pass `None` so they don't
    /// affect logical completion counts (`trackOwner=false`).
    pub async fn spawn<F>(self: &Arc<Self>, owner: Option<InvocationId>, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return false;
        }
        self.physical_active.fetch_add(1, Ordering::SeqCst);
        if let Some(owner) = &owner {
            *self.logical_active.lock().entry(owner.clone()).or_insert(0) += 1;
        }
        let kernel = Arc::clone(self);
        let wrapped = async move {
            fut.await;
            kernel.physical_active.fetch_sub(1, Ordering::SeqCst);
        };
        self.tasks.lock().await.spawn(wrapped);
        true
    }

    /// Decrements `owner`'s logical count, returning `true` when it reaches
    /// zero — i.e. when the owner (a plain step, or a map owner once every
    /// worker has finished) is fully realized. An owner never tracked (e.g.
    /// it was spawned with `track_owner=false`) is reported complete
    /// immediately.
    pub fn record_logical_completion(&self, owner: &InvocationId) -> bool {
        let mut logical = self.logical_active.lock();
        match logical.get_mut(owner) {
            Some(count) => {
                *count -= 1;
                let done = *count <= 0;
                if done {
                    logical.remove(owner);
                }
                done
            }
            None => true,
        }
    }

    /// Registers one more outstanding completion under `owner` without
    /// spawning a task — used by the MAP scheduler, which spawns all workers
    /// up front and wants the owner's logical tally to reflect the full
    /// batch size before any worker reports back.
    pub fn track_additional(&self, owner: &InvocationId) {
        *self
            .logical_active
            .lock()
            .entry(owner.clone())
            .or_insert(0) += 1;
    }

    /// Drains the scope until every spawned task has been joined — the run
    /// closes only after all children finish. Panics inside a spawned task
    /// propagate as a `JoinError`, which is logged and otherwise ignored —
    /// the kernel itself never panics.
    pub async fn drain(&self) {
        loop {
            if !self.is_active() {
                let mut tasks = self.tasks.lock().await;
                if tasks.is_empty() {
                    return;
                }
            }
            let mut tasks = self.tasks.lock().await;
            match tasks.join_next().await {
                Some(Err(join_err)) if join_err.is_panic() => {
                    tracing::error!(error = %join_err, "task panicked inside the runtime kernel scope");
                }
                Some(_) => {}
                None => {
                    drop(tasks);
                    if !self.is_active() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
