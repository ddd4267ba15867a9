// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::step_spec::StepSpec;
use async_trait::async_trait;
use futures::StreamExt;
use justpipe_core::{BoxFuture, StepCx, StepFn, StepOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

struct Increment;
impl StepFn<i32, ()> for Increment {
    fn call<'a>(&'a self, cx: &'a mut StepCx<'_, i32, ()>) -> BoxFuture<'a, StepOutcome<()>> {
        Box::pin(async move {
            *cx.state += 1;
            StepOutcome::Continue
        })
    }
}

struct Raises;
impl StepFn<i32, ()> for Raises {
    fn call<'a>(&'a self, _cx: &'a mut StepCx<'_, i32, ()>) -> BoxFuture<'a, StepOutcome<()>> {
        Box::pin(async move { StepOutcome::Raise(Some("boom".into())) })
    }
}

struct SleepThenContinue(u64);
impl StepFn<i32, ()> for SleepThenContinue {
    fn call<'a>(&'a self, _cx: &'a mut StepCx<'_, i32, ()>) -> BoxFuture<'a, StepOutcome<()>> {
        let millis = self.0;
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            StepOutcome::Continue
        })
    }
}

#[derive(Default)]
struct RecordingObserver {
    errors: StdMutex<Vec<String>>,
    ended: AtomicBool,
}

#[async_trait]
impl Observer<i32, ()> for RecordingObserver {
    async fn on_pipeline_start(&self, _state: &i32, _context: &(), _meta: &serde_json::Value) {}

    async fn on_event(&self, _state: &i32, _context: &(), _meta: &serde_json::Value, _event: &Event) {}

    async fn on_pipeline_end(&self, _state: &i32, _context: &(), _meta: &serde_json::Value, _duration_seconds: f64) {
        self.ended.store(true, Ordering::SeqCst);
    }

    async fn on_pipeline_error(&self, _state: &i32, _context: &(), _meta: &serde_json::Value, error: &str) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

fn linear_pipe() -> Pipe<i32, ()> {
    let pipe = Pipe::new(PipeConfig::default());
    pipe.add_step(StepSpec::plain("a", Increment).to("b")).unwrap();
    pipe.add_step(StepSpec::plain("b", Increment)).unwrap();
    pipe
}

async fn drain(mut run: PipelineRun) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = run.next().await {
        events.push(event);
    }
    events
}

fn finish_status(events: &[Event]) -> TerminalStatus {
    events
        .iter()
        .find_map(|e| match &e.body {
            EventBody::Finish(data) => Some(data.status),
            _ => None,
        })
        .expect("no FINISH event observed")
}

#[test]
fn add_step_after_freeze_is_rejected() {
    let pipe = linear_pipe();
    pipe.describe().unwrap();
    let err = pipe.add_step(StepSpec::plain("c", Increment)).unwrap_err();
    assert!(matches!(err, DefinitionError::Frozen(_)));
}

#[test]
fn describe_lists_steps_alphabetically() {
    let pipe = Pipe::<i32, ()>::new(PipeConfig::default());
    pipe.add_step(StepSpec::plain("b", Increment)).unwrap();
    pipe.add_step(StepSpec::plain("a", Increment).to("b")).unwrap();
    let steps = pipe.describe().unwrap();
    let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
async fn linear_pipeline_runs_to_success() {
    let pipe = linear_pipe();
    let run = pipe.run(0, Arc::new(()), RunOptions::default()).unwrap();
    let events = drain(run).await;

    assert!(matches!(events.first().unwrap().body, EventBody::Start { .. }));
    assert_eq!(finish_status(&events), TerminalStatus::Success);

    let step_starts: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e.body, EventBody::StepStart))
        .collect();
    assert_eq!(step_starts.len(), 2);
}

#[tokio::test]
async fn failing_step_resolves_to_failed_with_step_error_event() {
    let pipe = Pipe::new(PipeConfig::default());
    pipe.add_step(StepSpec::plain("boom", Raises)).unwrap();
    let run = pipe.run(0, Arc::new(()), RunOptions::default()).unwrap();
    let events = drain(run).await;

    assert_eq!(finish_status(&events), TerminalStatus::Failed);
    let message = events.iter().find_map(|e| match &e.body {
        EventBody::StepError { message } => Some(message.clone()),
        _ => None,
    });
    assert_eq!(message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn cancelling_the_token_resolves_to_cancelled() {
    let pipe = Pipe::new(PipeConfig::default());
    pipe.add_step(StepSpec::plain("slow", SleepThenContinue(150))).unwrap();
    let cancel = CancellationToken::new();
    let opts = RunOptions {
        cancel: Some(cancel.clone()),
        ..Default::default()
    };
    let run = pipe.run(0, Arc::new(()), opts).unwrap();
    cancel.cancel();
    let events = drain(run).await;

    assert_eq!(finish_status(&events), TerminalStatus::Cancelled);
    assert!(events.iter().any(|e| matches!(e.body, EventBody::Cancelled { .. })));
}

#[tokio::test(start_paused = true)]
async fn run_timeout_resolves_to_timeout() {
    let pipe = Pipe::new(PipeConfig::default());
    pipe.add_step(StepSpec::plain("slow", SleepThenContinue(10_000))).unwrap();
    let opts = RunOptions {
        timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let run = pipe.run(0, Arc::new(()), opts).unwrap();
    let events = drain(run).await;

    assert_eq!(finish_status(&events), TerminalStatus::Timeout);
    assert!(events.iter().any(|e| matches!(e.body, EventBody::Timeout { .. })));
}

#[tokio::test]
async fn dropping_the_stream_early_resolves_to_client_closed() {
    let pipe = Pipe::new(PipeConfig::default());
    pipe.add_step(StepSpec::plain("slow", SleepThenContinue(150))).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    pipe.add_observer(observer.clone()).unwrap();
    let run = pipe.run(0, Arc::new(()), RunOptions::default()).unwrap();
    drop(run);

    tokio::time::sleep(Duration::from_millis(350)).await;
    let errors = observer.errors.lock().unwrap();
    assert!(errors.iter().any(|m| m.contains("closed")));
}

#[tokio::test]
async fn observers_see_pipeline_start_and_end() {
    let pipe = linear_pipe();
    let observer = Arc::new(RecordingObserver::default());
    pipe.add_observer(observer.clone()).unwrap();
    let run = pipe.run(0, Arc::new(()), RunOptions::default()).unwrap();
    let _events = drain(run).await;
    assert!(observer.ended.load(Ordering::SeqCst));
}

#[tokio::test]
async fn sub_pipeline_step_forwards_child_events_and_succeeds() {
    let inner = Arc::new(Pipe::<i32, ()>::new(PipeConfig::default()));
    inner.add_step(StepSpec::plain("inner_a", Increment)).unwrap();

    let outer = Pipe::new(PipeConfig::default());
    let inner_for_step = inner.clone();
    outer
        .add_step(StepSpec::plain("outer_a", move |_cx: &mut StepCx<'_, i32, ()>| {
            let inner = inner_for_step.clone();
            Box::pin(async move {
                match inner.into_sub_run(0, RunOptions::default()) {
                    Ok(sub) => StepOutcome::Run(sub),
                    Err(err) => StepOutcome::Raise(Some(err.to_string().into())),
                }
            }) as BoxFuture<'_, StepOutcome<()>>
        }))
        .unwrap();

    let run = outer.run(0, Arc::new(()), RunOptions::default()).unwrap();
    let events = drain(run).await;

    assert_eq!(finish_status(&events), TerminalStatus::Success);
    assert!(events.iter().any(|e| e.stage.starts_with("outer_a:")));
}

#[tokio::test]
async fn describe_freezes_the_pipeline_without_running() {
    let pipe = linear_pipe();
    let steps = pipe.describe().unwrap();
    assert_eq!(steps.len(), 2);
    let err = pipe.add_startup_hook(|_s: &mut i32, _c: &()| Box::pin(async { Ok(()) }) as BoxFuture<'_, Result<(), String>>);
    assert!(err.is_err());
}
