// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn pipeline_meta_is_read_only_lookup() {
    let mut values = std::collections::HashMap::new();
    values.insert("env".to_string(), serde_json::json!("prod"));
    let pipeline = PipelineMeta::new(values);
    assert_eq!(pipeline.get("env"), Some(&serde_json::json!("prod")));
    assert_eq!(pipeline.get("missing"), None);
}

#[test]
fn run_meta_accumulates_across_clones() {
    let run = RunMeta::new();
    let run2 = run.clone();
    run.set("k", serde_json::json!(1));
    run2.add_tag("slow");
    run.increment("count", 1.0);
    run.increment("count", 2.0);

    let snap = run.snapshot();
    assert_eq!(snap["values"]["k"], 1);
    assert_eq!(snap["tags"][0], "slow");
    assert_eq!(snap["metrics"]["count"], 3.0);
}

#[test]
fn step_meta_snapshot_is_none_when_untouched() {
    let step = StepMeta::new();
    assert_eq!(step.snapshot(), None);
    step.set("k", serde_json::json!(true));
    assert!(step.snapshot().is_some());
}

#[test]
fn for_invocation_isolates_step_scope_but_shares_run_scope() {
    let run = RunMeta::new();
    let meta = Meta::new(PipelineMeta::default(), run.clone());
    meta.step.set("a", serde_json::json!(1));

    let other = meta.for_invocation();
    assert_eq!(other.step.snapshot(), None);
    other.run.set("shared", serde_json::json!(true));
    assert_eq!(run.snapshot()["values"]["shared"], true);
}
