// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use justpipe_core::{NodeKind, RunId};

fn sample_event(stage: &str) -> Event {
    Event {
        seq: 0,
        run_id: RunId::new("placeholder"),
        origin_run_id: None,
        parent_run_id: None,
        stage: stage.to_string(),
        node_kind: NodeKind::Step,
        invocation_id: None,
        parent_invocation_id: None,
        owner_invocation_id: None,
        attempt: 1,
        scope: Vec::new(),
        meta: None,
        body: EventBody::StepStart,
    }
}

#[tokio::test]
async fn assigns_monotone_sequence_numbers() {
    let (tx, mut rx) = mpsc::channel(8);
    let publisher: EventPublisher<(), ()> =
        EventPublisher::new(RunId::new("run-1"), tx, Vec::new(), Vec::new());

    for i in 0..3 {
        publisher
            .publish(&(), &(), &serde_json::Value::Null, sample_event(&format!("s{i}")))
            .await;
    }
    drop(publisher);

    let mut seqs = Vec::new();
    while let Some(evt) = rx.recv().await {
        seqs.push(evt.seq);
    }
    assert_eq!(seqs, vec![0, 1, 2]);
}

#[tokio::test]
async fn event_hooks_run_in_registration_order() {
    let (tx, mut rx) = mpsc::channel(8);
    let hooks: Vec<justpipe_core::EventHook> = vec![
        Arc::new(|e: &mut Event| {
            e.meta = Some(serde_json::json!({"order": ["a"]}));
        }),
        Arc::new(|e: &mut Event| {
            if let Some(meta) = e.meta.as_mut() {
                meta["order"].as_array_mut().unwrap().push(serde_json::json!("b"));
            }
        }),
    ];
    let publisher: EventPublisher<(), ()> =
        EventPublisher::new(RunId::new("run-1"), tx, hooks, Vec::new());
    publisher
        .publish(&(), &(), &serde_json::Value::Null, sample_event("s"))
        .await;
    drop(publisher);

    let evt = rx.recv().await.unwrap();
    assert_eq!(evt.meta.unwrap()["order"], serde_json::json!(["a", "b"]));
}

#[tokio::test]
async fn detects_client_closed_once_receiver_dropped() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let publisher: EventPublisher<(), ()> =
        EventPublisher::new(RunId::new("run-1"), tx, Vec::new(), Vec::new());

    let sent = publisher
        .publish(&(), &(), &serde_json::Value::Null, sample_event("s"))
        .await;
    assert!(!sent);
    assert!(publisher.is_client_closed());
}

#[tokio::test]
async fn metrics_count_step_lifecycle_events() {
    let (tx, _rx) = mpsc::channel(8);
    let publisher: EventPublisher<(), ()> =
        EventPublisher::new(RunId::new("run-1"), tx, Vec::new(), Vec::new());
    publisher
        .publish(&(), &(), &serde_json::Value::Null, sample_event("s"))
        .await;
    let mut end = sample_event("s");
    end.body = EventBody::StepEnd { state: None };
    publisher.publish(&(), &(), &serde_json::Value::Null, end).await;

    let snap = publisher.metrics_snapshot();
    assert_eq!(snap.steps_started, 1);
    assert_eq!(snap.steps_completed, 1);
    assert_eq!(snap.events_emitted, 2);
}
