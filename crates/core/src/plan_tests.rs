// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::registry::{BarrierKind, Registry, StepExtra, SwitchConfig, SwitchTarget};
use crate::step::{BoxFuture, InjectionMetadata, StepBody, StepCx, StepKind, StepOutcome};
use std::collections::HashMap;
use std::sync::Arc;

struct St;

fn noop() -> StepBody<St, ()> {
    StepBody::Plain(Arc::new(|_cx: &mut StepCx<'_, St, ()>| {
        Box::pin(async move { StepOutcome::Continue }) as BoxFuture<'_, StepOutcome<()>>
    }))
}

fn step(name: &str, to: Option<&str>) -> StepDef<St, ()> {
    StepDef {
        name: name.to_string(),
        kind: StepKind::Plain,
        body: noop(),
        timeout: None,
        retry: None,
        barrier: BarrierKind::All,
        barrier_timeout: None,
        error_handler: None,
        extra: StepExtra::new(),
        to: to.map(|s| s.to_string()),
        map: None,
        switch: None,
        injection: InjectionMetadata::default(),
    }
}

#[test]
fn linear_chain_compiles_with_single_root() {
    let mut reg: Registry<St, ()> = Registry::new();
    reg.add_step(step("a", Some("b"))).unwrap();
    reg.add_step(step("b", Some("c"))).unwrap();
    reg.add_step(step("c", None)).unwrap();

    let plan = compile(reg, ValidateOptions::default()).unwrap();
    assert_eq!(plan.roots, vec!["a".to_string()]);
    assert_eq!(plan.successors("a"), &["b".to_string()]);
}

#[test]
fn unknown_target_is_rejected_with_suggestion() {
    let mut reg: Registry<St, ()> = Registry::new();
    reg.add_step(step("a", Some("bb"))).unwrap();
    reg.add_step(step("b", None)).unwrap();

    let err = compile(reg, ValidateOptions::default()).unwrap_err();
    match err {
        DefinitionError::UnknownTarget { target, suggestion, .. } => {
            assert_eq!(target, "bb");
            assert!(suggestion.contains('b'));
        }
        other => panic!("expected UnknownTarget, got {other:?}"),
    }
}

#[test]
fn cycle_is_detected_and_reports_the_full_path() {
    let mut reg: Registry<St, ()> = Registry::new();
    reg.add_step(step("a", Some("b"))).unwrap();
    reg.add_step(step("b", Some("a"))).unwrap();

    // No entry point exists at all (every step has an incoming edge), so
    // this rejects as NoEntryPoint before cycle detection even runs,
    // matching the reference validator's stated order.
    let err = compile(reg, ValidateOptions::default()).unwrap_err();
    assert_eq!(err, DefinitionError::NoEntryPoint);
}

#[test]
fn cycle_reachable_from_an_explicit_start_is_detected() {
    let mut reg: Registry<St, ()> = Registry::new();
    reg.add_step(step("a", Some("b"))).unwrap();
    reg.add_step(step("b", Some("a"))).unwrap();

    let opts = ValidateOptions {
        start: Some("a"),
        ..Default::default()
    };
    let err = compile(reg, opts).unwrap_err();
    assert!(matches!(err, DefinitionError::Cycle(_)));
}

#[test]
fn worker_trap_is_rejected() {
    let mut reg: Registry<St, ()> = Registry::new();
    let mut producer = step("producer", None);
    producer.kind = StepKind::Map;
    producer.map = Some(MapConfig {
        each: "worker".to_string(),
        max_concurrency: None,
    });
    reg.add_step(producer).unwrap();
    // worker incorrectly declares a static `to`
    reg.add_step(step("worker", Some("reporter"))).unwrap();
    reg.add_step(step("reporter", None)).unwrap();

    let err = compile(reg, ValidateOptions::default()).unwrap_err();
    assert!(matches!(err, DefinitionError::WorkerTrap { .. }));
}

#[test]
fn switch_siblings_collapse_an_all_barrier_to_one_required_parent() {
    let mut reg: Registry<St, ()> = Registry::new();
    let mut routes = HashMap::new();
    routes.insert("even".to_string(), SwitchTarget::Step("even_h".to_string()));
    routes.insert("odd".to_string(), SwitchTarget::Step("odd_h".to_string()));
    let mut detector = step("detector", None);
    detector.kind = StepKind::Switch;
    detector.switch = Some(SwitchConfig {
        routes,
        default: None,
    });
    reg.add_step(detector).unwrap();
    reg.add_step(step("even_h", Some("result_log"))).unwrap();
    reg.add_step(step("odd_h", Some("result_log"))).unwrap();
    reg.add_step(step("result_log", None)).unwrap();

    let plan = compile(reg, ValidateOptions::default()).unwrap();
    let groups = plan.switch_sibling_groups.get("result_log").unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members.len(), 2);
}

#[test]
fn unreachable_all_barrier_parent_from_explicit_start_is_rejected() {
    let mut reg: Registry<St, ()> = Registry::new();
    reg.add_step(step("root", Some("left"))).unwrap();
    reg.add_step(step("left", Some("join"))).unwrap();
    reg.add_step(step("right", Some("join"))).unwrap();
    reg.add_step(step("join", None)).unwrap();

    let opts = ValidateOptions {
        start: Some("root"),
        ..Default::default()
    };
    let err = compile(reg, opts).unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::UnreachableAllBarrierParent { .. }
    ));
}
