// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Small helper to stamp an [`Event`] with invocation identity before it
//! reaches the publisher, which fills in `run_id`/`seq`.

use justpipe_core::{Event, EventBody, InvocationContext, RunId};

pub fn new_event(run_id: &RunId, invctx: &InvocationContext, stage: &str, body: EventBody) -> Event {
    Event {
        seq: 0,
        run_id: run_id.clone(),
        origin_run_id: None,
        parent_run_id: None,
        stage: stage.to_string(),
        node_kind: invctx.node_kind,
        invocation_id: Some(invctx.invocation_id.clone()),
        parent_invocation_id: invctx.parent_invocation_id.clone(),
        owner_invocation_id: Some(invctx.owner_invocation_id.clone()),
        attempt: invctx.attempt,
        scope: invctx.scope.clone(),
        meta: None,
        body,
    }
}
