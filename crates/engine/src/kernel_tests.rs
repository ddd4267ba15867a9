// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use justpipe_core::InvocationId;
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::test]
async fn spawn_refuses_after_stop() {
    let kernel = RuntimeKernel::new();
    kernel.request_stop();
    let spawned = kernel.spawn(None, async {}).await;
    assert!(!spawned);
}

#[tokio::test]
async fn drain_waits_for_all_physical_tasks() {
    let kernel = RuntimeKernel::new();
    let counter = Arc::new(AtomicU32::new(0));
    for _ in 0..5 {
        let counter = Arc::clone(&counter);
        kernel
            .spawn(None, async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
    }
    kernel.drain().await;
    assert_eq!(counter.load(Ordering::SeqCst), 5);
    assert!(!kernel.is_active());
}

#[tokio::test]
async fn logical_completion_reaches_zero_only_after_every_worker() {
    let kernel = RuntimeKernel::new();
    let owner = InvocationId::new("owner-1");
    kernel.track_additional(&owner);
    kernel.track_additional(&owner);
    kernel.track_additional(&owner);
    assert!(!kernel.record_logical_completion(&owner));
    assert!(!kernel.record_logical_completion(&owner));
    assert!(kernel.record_logical_completion(&owner));
}

#[tokio::test]
async fn untracked_owner_completes_immediately() {
    let kernel = RuntimeKernel::new();
    let owner = InvocationId::new("never-spawned");
    assert!(kernel.record_logical_completion(&owner));
}
