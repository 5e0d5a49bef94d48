// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::error::Error;
use crate::query::KEY_ALIAS;

///
/// One step of an output path, used to qualify errors: `users.2.address.city`.
///
#[derive(Clone, Debug)]
pub enum PathSegment {
    Root,
    Field(String),
    Index(usize),
}

///
/// The value filled into an output node. Each node is filled at most once, by the single work
/// unit that owns it.
///
pub enum OutputValue {
    Null,
    Scalar(Json),
    List(Vec<Arc<OutputNode>>),
    Object(IndexMap<String, Arc<OutputNode>>),
    /// A fully materialized sub-tree, replayed from the computation cache.
    Complete(diff::Value),
}

///
/// A writable slot in the skeletal result tree. The parent pointer and path segment exist to
/// build error paths; the error recorder is shared by the whole tree, and only its first error
/// survives.
///
pub struct OutputNode {
    // Weak: the parent's slot owns its children, so an upward strong reference would cycle.
    // The chain stays upgradable for as long as the execution holds the root.
    parent: Option<Weak<OutputNode>>,
    segment: PathSegment,
    errors: Arc<FirstError>,
    slot: Mutex<Option<OutputValue>>,
}

impl OutputNode {
    pub fn root(errors: Arc<FirstError>) -> Arc<OutputNode> {
        Arc::new(OutputNode {
            parent: None,
            segment: PathSegment::Root,
            errors,
            slot: Mutex::new(None),
        })
    }

    ///
    /// A node at the same position as `node`, but recording errors elsewhere. Expensive fields
    /// execute their sub-tree under a recorder of their own (so the result can be cached as a
    /// whole), while error paths still read as if the sub-tree sat in the outer result.
    ///
    pub fn mirror(node: &Arc<OutputNode>, errors: Arc<FirstError>) -> Arc<OutputNode> {
        Arc::new(OutputNode {
            parent: node.parent.clone(),
            segment: node.segment.clone(),
            errors,
            slot: Mutex::new(None),
        })
    }

    pub fn child(self: &Arc<Self>, segment: PathSegment) -> Arc<OutputNode> {
        Arc::new(OutputNode {
            parent: Some(Arc::downgrade(self)),
            segment,
            errors: self.errors.clone(),
            slot: Mutex::new(None),
        })
    }

    ///
    /// Fills the node. Filling twice is a bug in the executor; the first value wins.
    ///
    pub fn fill(&self, value: OutputValue) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "output node filled twice");
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    ///
    /// Records a failure of this node's sub-tree, qualified by the node's full path unless the
    /// error bypasses path nesting (client, sanitized, control-flow, or already qualified).
    ///
    pub fn fail(&self, error: Error) {
        let error = if error.bypasses_paths() {
            error
        } else {
            error.at_path(self.path())
        };
        self.errors.record(error);
    }

    pub fn path(&self) -> String {
        fn push(segment: &PathSegment, segments: &mut Vec<String>) {
            match segment {
                PathSegment::Root => {}
                PathSegment::Field(name) => segments.push(name.clone()),
                PathSegment::Index(index) => segments.push(index.to_string()),
            }
        }
        let mut segments = Vec::new();
        push(&self.segment, &mut segments);
        let mut ancestor = self.parent.as_ref().and_then(Weak::upgrade);
        while let Some(node) = ancestor {
            push(&node.segment, &mut segments);
            ancestor = node.parent.as_ref().and_then(Weak::upgrade);
        }
        segments.reverse();
        segments.join(".")
    }

    ///
    /// Recursively unwraps the filled tree into a plain result value. An object that resolved a
    /// key field carries it as its identity for diffing. Unfilled nodes (only possible under a
    /// recorded error) read as null.
    ///
    pub fn materialize(&self) -> diff::Value {
        match &*self.slot.lock() {
            None | Some(OutputValue::Null) => diff::Value::Scalar(Json::Null),
            Some(OutputValue::Scalar(value)) => diff::Value::Scalar(value.clone()),
            Some(OutputValue::List(children)) => {
                diff::Value::List(children.iter().map(|child| child.materialize()).collect())
            }
            Some(OutputValue::Object(children)) => {
                let mut object = diff::Object::new();
                for (alias, child) in children {
                    object.fields.insert(alias.clone(), child.materialize());
                }
                object.key = children
                    .get(KEY_ALIAS)
                    .map(|child| child.materialize().to_json());
                diff::Value::Object(object)
            }
            Some(OutputValue::Complete(value)) => value.clone(),
        }
    }
}

///
/// The shared first-error recorder: a once-guard over one error slot. The first recorded error
/// wins and later ones are dropped, which makes "which error does a failed execution report"
/// deterministic for sequentially resolved fields.
///
pub struct FirstError {
    slot: Mutex<Option<Error>>,
}

impl FirstError {
    pub fn new() -> FirstError {
        FirstError {
            slot: Mutex::new(None),
        }
    }

    pub fn record(&self, error: Error) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub fn get(&self) -> Option<Error> {
        self.slot.lock().clone()
    }
}
