// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults_match_spec_table() {
    let cfg = PipeConfig::default();
    assert_eq!(cfg.queue_size, 1000);
    assert_eq!(cfg.max_map_items, 100_000);
    assert_eq!(cfg.max_retries, 100);
    assert!(!cfg.strict);
    assert!(!cfg.allow_multi_root);
    assert!(cfg.metadata.is_empty());
    assert!(cfg.run_timeout.is_none());
}
