// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::clock::FakeClock;
use crate::id::{short, PlanId};
use crate::run::RunId;

#[test]
fn plan_id_has_prefix_and_random_suffix() {
    let id = PlanId::new();
    assert!(id.as_str().starts_with("plan-"));
    assert_eq!(id.suffix().len(), 12);
    assert_ne!(PlanId::new(), PlanId::new());
}

#[test]
fn id_round_trips_through_serde_as_plain_string() {
    let id = PlanId::from_string("plan-abc123");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"plan-abc123\"");
    let back: PlanId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn run_id_embeds_epoch_millis() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_123);
    let id = RunId::generate(&clock);
    assert!(id.as_str().starts_with("run-1700000000123-"));
}

#[test]
fn run_ids_are_unique_for_same_millisecond() {
    let clock = FakeClock::new();
    let a = RunId::generate(&clock);
    let b = RunId::generate(&clock);
    assert_ne!(a, b);
}

#[test]
fn short_truncates() {
    assert_eq!(short("abcdef", 3), "abc");
    assert_eq!(short("ab", 3), "ab");
}
