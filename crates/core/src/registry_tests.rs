// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::step::{BoxFuture, StepBody, StepCx, StepKind, StepOutcome};
use std::sync::Arc;

struct St {
    n: i64,
}

fn noop_step() -> StepBody<St, ()> {
    StepBody::Plain(Arc::new(|_cx: &mut StepCx<'_, St, ()>| {
        Box::pin(async move { StepOutcome::Continue }) as BoxFuture<'_, StepOutcome<()>>
    }))
}

fn plain(name: &str, to: Option<&str>) -> StepDef<St, ()> {
    StepDef {
        name: name.to_string(),
        kind: StepKind::Plain,
        body: noop_step(),
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
fn duplicate_step_name_is_rejected() {
    let mut reg: Registry<St, ()> = Registry::new();
    reg.add_step(plain("a", None)).unwrap();
    let err = reg.add_step(plain("a", None)).unwrap_err();
    assert_eq!(err, DefinitionError::DuplicateStep("a".to_string()));
}

#[test]
fn map_step_without_each_is_rejected() {
    let mut reg: Registry<St, ()> = Registry::new();
    let mut def = plain("fanout", None);
    def.kind = StepKind::Map;
    let err = reg.add_step(def).unwrap_err();
    assert_eq!(err, DefinitionError::MapMissingEach("fanout".to_string()));
}

#[test]
fn switch_step_without_routes_is_rejected() {
    let mut reg: Registry<St, ()> = Registry::new();
    let mut def = plain("detector", None);
    def.kind = StepKind::Switch;
    let err = reg.add_step(def).unwrap_err();
    assert_eq!(
        err,
        DefinitionError::SwitchMissingRoutes("detector".to_string())
    );
}

#[test]
fn registration_after_freeze_fails_deterministically() {
    let mut reg: Registry<St, ()> = Registry::new();
    reg.add_step(plain("a", None)).unwrap();
    reg.freeze();
    let err = reg.add_step(plain("b", None)).unwrap_err();
    assert_eq!(err, DefinitionError::Frozen("add a step"));
}

#[test]
fn static_targets_picks_up_to_for_plain_steps() {
    let def = plain("a", Some("b"));
    assert_eq!(def.static_targets(), vec!["b".to_string()]);
}

#[test]
fn switch_targets_are_deduped_and_sorted() {
    let mut routes = HashMap::new();
    routes.insert("even".to_string(), SwitchTarget::Step("handler".to_string()));
    routes.insert("odd".to_string(), SwitchTarget::Step("other".to_string()));
    let switch = SwitchConfig {
        routes,
        default: Some(SwitchTarget::Step("other".to_string())),
    };
    assert_eq!(switch.targets(), vec!["handler".to_string(), "other".to_string()]);
}
