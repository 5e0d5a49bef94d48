// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.

// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//!
//! Structural diffing of result trees.
//!
//! [`diff`] computes a compact delta between two [`Value`] trees, and [`merge`] applies a delta
//! to the JSON form of the previous tree to reconstruct the new one. The delta wire format is:
//!
//! - a scalar: replacement by that value;
//! - an update map `{alias: delta, ...}`, optionally with a `"$"` list-reorder entry;
//! - the empty array `[]`: a deletion marker within an update map;
//! - a one-element array `[v]`: "v replaces whatever was here", distinguishing a replacement
//!   object or list from a sub-delta.
//!

use std::fmt;

use indexmap::IndexMap;
use serde_json::json;
use serde_json::Value as Json;

///
/// One position in a result tree: a scalar, a list of values, or an object with ordered fields
/// and an optional identity key. Keys make list elements matchable across versions of a list
/// even when their contents changed.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(Json),
    List(Vec<Value>),
    Object(Object),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub key: Option<Json>,
    pub fields: IndexMap<String, Value>,
}

impl Value {
    pub fn scalar(value: impl Into<Json>) -> Value {
        Value::Scalar(value.into())
    }

    pub fn null() -> Value {
        Value::Scalar(Json::Null)
    }

    ///
    /// Lowers the tree to plain JSON: the form sent to clients, and the form `merge` operates
    /// on. Object keys are not represented separately (keyed objects carry their key as a
    /// regular field when one should be visible).
    ///
    pub fn to_json(&self) -> Json {
        match self {
            Value::Scalar(value) => value.clone(),
            Value::List(elements) => Json::Array(elements.iter().map(Value::to_json).collect()),
            Value::Object(object) => Json::Object(
                object
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Object {
    pub fn new() -> Object {
        Object {
            key: None,
            fields: IndexMap::new(),
        }
    }

    pub fn keyed(key: impl Into<Json>) -> Object {
        Object {
            key: Some(key.into()),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Object {
        self.fields.insert(name.into(), value);
        self
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Value {
        Value::Object(object)
    }
}

///
/// Computes the delta from `old` to `new`. `None` means unchanged.
///
pub fn diff(old: &Value, new: &Value) -> Option<Json> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) if old.key == new.key => diff_objects(old, new),
        (Value::List(old), Value::List(new)) => diff_lists(old, new),
        (Value::Scalar(old), Value::Scalar(new)) if old == new => None,
        (_, new) => Some(replacement(new)),
    }
}

///
/// A value standing in for itself rather than describing a change. Scalars pass through; any
/// value that could be confused with an update map or a structural marker is wrapped in a
/// one-element array.
///
fn replacement(new: &Value) -> Json {
    let json = new.to_json();
    match json {
        Json::Array(_) | Json::Object(_) => Json::Array(vec![json]),
        scalar => scalar,
    }
}

fn diff_objects(old: &Object, new: &Object) -> Option<Json> {
    let mut delta = serde_json::Map::new();
    for name in old.fields.keys() {
        if !new.fields.contains_key(name) {
            delta.insert(name.clone(), Json::Array(Vec::new()));
        }
    }
    for (name, new_value) in &new.fields {
        match old.fields.get(name) {
            Some(old_value) => {
                if let Some(field_delta) = diff(old_value, new_value) {
                    delta.insert(name.clone(), field_delta);
                }
            }
            None => {
                delta.insert(name.clone(), replacement(new_value));
            }
        }
    }
    if delta.is_empty() {
        None
    } else {
        Some(Json::Object(delta))
    }
}

fn diff_lists(old: &[Value], new: &[Value]) -> Option<Json> {
    // For each new element, the position of its equal in the old list: keyed objects match by
    // key, scalars by value, anything else never matches.
    let matches: Vec<Option<usize>> = new
        .iter()
        .map(|new_element| {
            old.iter()
                .position(|old_element| elements_match(old_element, new_element))
        })
        .collect();

    let identity = old.len() == new.len()
        && matches
            .iter()
            .enumerate()
            .all(|(position, matched)| *matched == Some(position));

    let mut delta = serde_json::Map::new();
    if !identity {
        delta.insert("$".to_string(), compress_reorder(&matches));
    }
    for (position, new_element) in new.iter().enumerate() {
        let element_delta = match matches[position] {
            Some(old_position) => diff(&old[old_position], new_element),
            None => Some(replacement(new_element)),
        };
        if let Some(element_delta) = element_delta {
            delta.insert(position.to_string(), element_delta);
        }
    }
    if delta.is_empty() {
        None
    } else {
        Some(Json::Object(delta))
    }
}

fn elements_match(old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => match (&old.key, &new.key) {
            (Some(old_key), Some(new_key)) => old_key == new_key,
            _ => false,
        },
        (Value::Scalar(old), Value::Scalar(new)) => old == new,
        _ => false,
    }
}

///
/// Compresses reorder indices: a gap becomes `-1`, and a run of consecutive ascending indices
/// becomes `[start, length]`. An isolated index stays a bare number, except an isolated `0`,
/// which is written as `[0, 1]`.
///
fn compress_reorder(matches: &[Option<usize>]) -> Json {
    let mut compressed: Vec<Json> = Vec::new();
    let mut position = 0;
    while position < matches.len() {
        match matches[position] {
            None => {
                compressed.push(json!(-1));
                position += 1;
            }
            Some(start) => {
                let mut length = 1;
                while matches.get(position + length) == Some(&Some(start + length)) {
                    length += 1;
                }
                if length >= 2 || start == 0 {
                    compressed.push(json!([start, length]));
                } else {
                    compressed.push(json!(start));
                }
                position += length;
            }
        }
    }
    Json::Array(compressed)
}

///
/// A delta that does not describe a change to the value it was applied to.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeError(pub String);

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad delta: {}", self.0)
    }
}

impl std::error::Error for MergeError {}

///
/// Applies a delta to the JSON form of the previous value, reconstructing the new value.
///
pub fn merge(previous: &Json, delta: &Json) -> Result<Json, MergeError> {
    match delta {
        Json::Array(tagged) if tagged.len() == 1 => Ok(tagged[0].clone()),
        Json::Array(_) => Err(MergeError(
            "deletion marker outside of an update map".to_string(),
        )),
        Json::Object(update) => match previous {
            Json::Object(fields) => merge_objects(fields, update),
            Json::Array(elements) => merge_list(elements, update),
            other => Err(MergeError(format!(
                "update map applied to non-container {other}"
            ))),
        },
        scalar => Ok(scalar.clone()),
    }
}

fn is_delete_marker(delta: &Json) -> bool {
    matches!(delta, Json::Array(elements) if elements.is_empty())
}

///
/// Unwraps a delta standing for a whole value: the form emitted by `replacement`.
///
fn unwrap_replacement(delta: &Json) -> Result<Json, MergeError> {
    match delta {
        Json::Array(tagged) if tagged.len() == 1 => Ok(tagged[0].clone()),
        Json::Array(_) | Json::Object(_) => Err(MergeError(format!(
            "expected a replacement value, got {delta}"
        ))),
        scalar => Ok(scalar.clone()),
    }
}

fn merge_objects(
    previous: &serde_json::Map<String, Json>,
    update: &serde_json::Map<String, Json>,
) -> Result<Json, MergeError> {
    let mut merged = previous.clone();
    for (name, field_delta) in update {
        if is_delete_marker(field_delta) {
            merged.remove(name);
        } else if let Some(previous_field) = previous.get(name) {
            merged.insert(name.clone(), merge(previous_field, field_delta)?);
        } else {
            merged.insert(name.clone(), unwrap_replacement(field_delta)?);
        }
    }
    Ok(Json::Object(merged))
}

fn merge_list(
    previous: &[Json],
    update: &serde_json::Map<String, Json>,
) -> Result<Json, MergeError> {
    // Reorder first; positions introduced by a `-1` gap hold no previous value, and their delta
    // must be a replacement.
    let mut merged: Vec<Option<Json>> = match update.get("$") {
        Some(Json::Array(reorder)) => expand_reorder(previous, reorder)?,
        Some(other) => {
            return Err(MergeError(format!("malformed reorder {other}")));
        }
        None => previous.iter().cloned().map(Some).collect(),
    };

    for (name, element_delta) in update {
        if name == "$" {
            continue;
        }
        let position: usize = name
            .parse()
            .map_err(|_| MergeError(format!("non-numeric list update key {name:?}")))?;
        if position >= merged.len() {
            return Err(MergeError(format!(
                "list update index {position} out of bounds for length {}",
                merged.len()
            )));
        }
        let next = match &merged[position] {
            Some(previous_element) => merge(previous_element, element_delta)?,
            None => unwrap_replacement(element_delta)?,
        };
        merged[position] = Some(next);
    }

    merged
        .into_iter()
        .enumerate()
        .map(|(position, element)| {
            element.ok_or_else(|| MergeError(format!("no delta for new list element {position}")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Json::Array)
}

fn expand_reorder(previous: &[Json], reorder: &[Json]) -> Result<Vec<Option<Json>>, MergeError> {
    let mut expanded = Vec::new();
    for entry in reorder {
        match entry {
            Json::Number(index) => match index.as_i64() {
                Some(-1) => expanded.push(None),
                Some(index) if index >= 0 && (index as usize) < previous.len() => {
                    expanded.push(Some(previous[index as usize].clone()));
                }
                _ => {
                    return Err(MergeError(format!("reorder index {index} out of bounds")));
                }
            },
            Json::Array(run) if run.len() == 2 => {
                let (start, length) = match (run[0].as_u64(), run[1].as_u64()) {
                    (Some(start), Some(length)) => (start as usize, length as usize),
                    _ => {
                        return Err(MergeError(format!("malformed reorder run {entry}")));
                    }
                };
                if start + length > previous.len() {
                    return Err(MergeError(format!(
                        "reorder run {entry} out of bounds for length {}",
                        previous.len()
                    )));
                }
                for position in start..start + length {
                    expanded.push(Some(previous[position].clone()));
                }
            }
            other => {
                return Err(MergeError(format!("malformed reorder entry {other}")));
            }
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests;
