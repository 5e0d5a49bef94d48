// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use serde_json::json;
use serde_json::Value as Json;

use crate::{diff, merge, MergeError, Object, Value};

fn s(value: impl Into<Json>) -> Value {
    Value::scalar(value)
}

fn list(elements: Vec<Value>) -> Value {
    Value::List(elements)
}

fn keyed(key: u64) -> Value {
    Object::keyed(key).into()
}

///
/// Asserts both directions: the computed delta matches, and applying it to the old value's JSON
/// reconstructs the new value's JSON.
///
fn assert_delta(old: &Value, new: &Value, expected: Json) {
    let delta = diff(old, new).expect("expected a delta");
    assert_eq!(delta, expected);
    let merged = merge(&old.to_json(), &delta).expect("delta must merge");
    assert_eq!(merged, new.to_json());
}

#[test]
fn identical_values_are_unchanged() {
    let values = vec![
        s("hello"),
        s(42),
        Value::null(),
        list(vec![s(1), s(2), s(3)]),
        Object::keyed(7).field("name", s("alice")).into(),
        Object::new()
            .field("inner", list(vec![s(true), s(false)]))
            .into(),
    ];
    for value in &values {
        assert_eq!(diff(value, value), None, "{value:?}");
    }
}

#[test]
fn scalar_replacement_passes_through_untagged() {
    assert_delta(&s(1), &s(2), json!(2));
    assert_delta(&s("old"), &s("new"), json!("new"));
    assert_delta(&s(1), &Value::null(), json!(null));
}

#[test]
fn kind_change_replaces_with_tagging() {
    // A list replacing a scalar must be tagged so the client does not read it as a reorder.
    assert_delta(&s(1), &list(vec![s(1)]), json!([[1]]));
    assert_delta(
        &s(1),
        &Object::new().field("a", s(1)).into(),
        json!([{"a": 1}]),
    );
}

#[test]
fn reorder_only() {
    let old = list(vec![s("0"), s("1"), s("2"), s("3")]);
    let new = list(vec![s("3"), s("-1"), s("0"), s("1"), s("4")]);
    assert_delta(
        &old,
        &new,
        json!({"$": [3, -1, [0, 2], -1], "1": "-1", "4": "4"}),
    );
}

#[test]
fn deletion_in_map() {
    let old: Value = Object::new()
        .field("changed", s(0))
        .field("removed", s("foo"))
        .field("same", s("bar"))
        .into();
    let new: Value = Object::new()
        .field("changed", s(1))
        .field("same", s("bar"))
        .into();
    assert_delta(&old, &new, json!({"changed": 1, "removed": []}));
}

#[test]
fn added_field_is_a_replacement() {
    let old: Value = Object::new().field("a", s(1)).into();
    let new: Value = Object::new()
        .field("a", s(1))
        .field("b", list(vec![s(2)]))
        .into();
    assert_delta(&old, &new, json!({"b": [[2]]}));
}

#[test]
fn keyed_truncation() {
    let old = list(vec![keyed(0), keyed(1), keyed(2), keyed(3)]);
    let new = list(vec![keyed(0), keyed(1)]);
    assert_delta(&old, &new, json!({"$": [[0, 2]]}));
}

#[test]
fn keyed_append() {
    let old = list(vec![keyed(0), keyed(1)]);
    let new = list(vec![keyed(0), keyed(1), keyed(2)]);
    assert_delta(&old, &new, json!({"$": [[0, 2], -1], "2": [{}]}));
}

#[test]
fn scalar_append() {
    let old = list(vec![s("a")]);
    let new = list(vec![s("a"), s("b")]);
    assert_delta(&old, &new, json!({"$": [[0, 1], -1], "1": "b"}));
}

#[test]
fn key_change_replaces_the_whole_object() {
    let old: Value = Object::keyed("a").field("foo", s("bar")).into();
    let new: Value = Object::keyed("b").field("foo", s("bar")).into();
    assert_delta(&old, &new, json!([{"foo": "bar"}]));
}

#[test]
fn reorder_compression_boundaries() {
    // An isolated index stays a number, a run of two compresses, and an isolated zero is
    // written as a run of one.
    let old = list(vec![s("0"), s("1"), s("2"), s("3"), s("4"), s("5")]);
    let new = list(vec![s("5"), s("3"), s("4"), s("0")]);
    assert_delta(&old, &new, json!({"$": [5, [3, 2], [0, 1]]}));
}

#[test]
fn changed_field_within_keyed_list_element() {
    let old = list(vec![
        Object::keyed(1).field("n", s(1)).into(),
        Object::keyed(2).field("n", s(2)).into(),
    ]);
    let new = list(vec![
        Object::keyed(1).field("n", s(10)).into(),
        Object::keyed(2).field("n", s(2)).into(),
    ]);
    // Order is unchanged, so there is no reorder entry, only the per-index delta.
    assert_delta(&old, &new, json!({"0": {"n": 10}}));
}

#[test]
fn unkeyed_objects_never_match_in_lists() {
    let old = list(vec![Object::new().field("a", s(1)).into()]);
    let new = list(vec![Object::new().field("a", s(1)).into()]);
    assert_delta(&old, &new, json!({"$": [-1], "0": [{"a": 1}]}));
}

#[test]
fn nested_deltas_compose() {
    let old: Value = Object::keyed(1)
        .field(
            "user",
            Object::new()
                .field("name", s("alice"))
                .field("age", s(30))
                .into(),
        )
        .field("tags", list(vec![s("x")]))
        .into();
    let new: Value = Object::keyed(1)
        .field(
            "user",
            Object::new()
                .field("name", s("bob"))
                .field("age", s(30))
                .into(),
        )
        .field("tags", list(vec![s("x"), s("y")]))
        .into();
    assert_delta(
        &old,
        &new,
        json!({
            "user": {"name": "bob"},
            "tags": {"$": [[0, 1], -1], "1": "y"},
        }),
    );
}

#[test]
fn merge_applies_deletion_markers() {
    let merged = merge(&json!({"a": 1, "b": 2}), &json!({"b": []})).unwrap();
    assert_eq!(merged, json!({"a": 1}));
}

#[test]
fn merge_rejects_malformed_deltas() {
    // A deletion marker is only meaningful inside an update map.
    assert!(matches!(merge(&json!(1), &json!([])), Err(MergeError(_))));
    // An update map cannot apply to a scalar.
    assert!(matches!(
        merge(&json!(1), &json!({"a": 1})),
        Err(MergeError(_))
    ));
    // Out-of-bounds list updates and reorders are rejected.
    assert!(matches!(
        merge(&json!([1]), &json!({"5": 2})),
        Err(MergeError(_))
    ));
    assert!(matches!(
        merge(&json!([1]), &json!({"$": [7]})),
        Err(MergeError(_))
    ));
    // A gap with no replacement delta leaves a hole.
    assert!(matches!(
        merge(&json!([1]), &json!({"$": [-1]})),
        Err(MergeError(_))
    ));
}

#[test]
fn merge_round_trips_a_complex_history() {
    // Apply a chain of diffs and confirm the merged state tracks the source of truth.
    let versions = vec![
        list(vec![
            Object::keyed(1).field("n", s(1)).into(),
            Object::keyed(2).field("n", s(2)).into(),
            Object::keyed(3).field("n", s(3)).into(),
        ]),
        // Reorder and drop one element.
        list(vec![
            Object::keyed(3).field("n", s(3)).into(),
            Object::keyed(1).field("n", s(1)).into(),
        ]),
        // Mutate within an element and append.
        list(vec![
            Object::keyed(3).field("n", s(30)).into(),
            Object::keyed(1).field("n", s(1)).into(),
            Object::keyed(4).field("n", s(4)).into(),
        ]),
        // Replace everything with a scalar.
        s("done"),
    ];

    let mut state = versions[0].to_json();
    for window in versions.windows(2) {
        let (old, new) = (&window[0], &window[1]);
        if let Some(delta) = diff(old, new) {
            state = merge(&state, &delta).expect("delta must merge");
        }
        assert_eq!(state, new.to_json());
    }
}
