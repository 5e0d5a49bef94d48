// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

///
/// A one-shot callback, fired outside of any node lock.
///
pub type Listener = Box<dyn FnOnce() + Send>;

struct NodeState {
    // Consumer edges: nodes computed from this one, notified on invalidation.
    out: Vec<Node>,
    // Provider back-references: each edge in `out` of a provider is mirrored here, so that
    // releasing this node can drop its hold on the providers.
    providers: Vec<Weak<Mutex<NodeState>>>,
    // Count of references to this node: one for its creator, plus one per consumer edge.
    refs: usize,
    invalidated: bool,
    released: bool,
    on_invalidate: Vec<Listener>,
    on_release: Vec<Listener>,
}

///
/// A shared handle to one vertex of the dependency graph.
///
/// Edges run from a provider to each of its consumers. Invalidation propagates provider to
/// consumer through the current edges, exactly once per node. Release is refcounted: a node is
/// released when its creator and every consumer edge have let go of it, at which point its
/// cleanup listeners run exactly once and its hold on its own providers is dropped.
///
/// Node operations cannot fail, and every operation serializes on the node's own lock. Listeners
/// run after the lock is dropped.
///
#[derive(Clone)]
pub struct Node {
    state: Arc<Mutex<NodeState>>,
}

impl Node {
    ///
    /// Creates a node holding one reference for the creator; `release` drops it.
    ///
    pub fn new() -> Node {
        Node {
            state: Arc::new(Mutex::new(NodeState {
                out: Vec::new(),
                providers: Vec::new(),
                refs: 1,
                invalidated: false,
                released: false,
                on_invalidate: Vec::new(),
                on_release: Vec::new(),
            })),
        }
    }

    ///
    /// Adds an edge from this node (the provider) to the given consumer.
    ///
    /// A released provider refuses the edge and immediately releases the consumer instead. An
    /// invalidated provider accepts the edge and immediately invalidates the consumer.
    ///
    pub fn add_out(&self, consumer: &Node) {
        let fire_invalidate = {
            let mut state = self.state.lock();
            if state.released {
                drop(state);
                consumer.release();
                return;
            }
            state.out.push(consumer.clone());
            // The edge is the consumer's hold on this provider.
            state.refs += 1;
            state.invalidated
        };
        consumer
            .state
            .lock()
            .providers
            .push(Arc::downgrade(&self.state));
        if fire_invalidate {
            consumer.invalidate();
        }
    }

    ///
    /// Marks this node invalid, firing its invalidation listeners exactly once and propagating
    /// through the current consumer edges. Idempotent; a no-op on released nodes.
    ///
    pub fn invalidate(&self) {
        let (listeners, consumers) = {
            let mut state = self.state.lock();
            if state.invalidated || state.released {
                return;
            }
            state.invalidated = true;
            // The edges have served their purpose: consumers added from now on are invalidated
            // directly by add_out.
            (
                mem::take(&mut state.on_invalidate),
                mem::take(&mut state.out),
            )
        };
        for listener in listeners {
            listener();
        }
        for consumer in consumers {
            consumer.invalidate();
        }
    }

    ///
    /// Invalidates all current consumers of this node, leaving the node itself valid for new
    /// consumers. Used by resources whose external state has changed.
    ///
    pub fn strobe(&self) {
        let consumers = {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            mem::take(&mut state.out)
        };
        for consumer in consumers {
            consumer.invalidate();
        }
    }

    ///
    /// Drops one reference to this node. When the last reference goes, the node's release
    /// listeners run exactly once and the node's hold on its providers is dropped in turn.
    ///
    pub fn release(&self) {
        let (listeners, providers) = {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            debug_assert!(state.refs > 0, "released more often than retained");
            state.refs -= 1;
            if state.refs > 0 {
                return;
            }
            state.released = true;
            state.out.clear();
            state.on_invalidate.clear();
            (
                mem::take(&mut state.on_release),
                mem::take(&mut state.providers),
            )
        };
        for listener in listeners {
            listener();
        }
        for provider in providers {
            if let Some(provider) = provider.upgrade() {
                let provider = Node { state: provider };
                // Leave no dangling consumer edge behind before dropping the reference.
                provider
                    .state
                    .lock()
                    .out
                    .retain(|consumer| !Arc::ptr_eq(&consumer.state, &self.state));
                provider.release();
            }
        }
    }

    ///
    /// Registers a listener for invalidation of this node. If the node is already invalidated the
    /// listener fires immediately; if the node is released it will never fire.
    ///
    pub fn on_invalidate(&self, listener: Listener) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        if state.invalidated {
            drop(state);
            listener();
            return;
        }
        state.on_invalidate.push(listener);
    }

    ///
    /// Registers a cleanup listener. If the node is already released the listener fires
    /// immediately.
    ///
    pub fn on_release(&self, listener: Listener) {
        let mut state = self.state.lock();
        if state.released {
            drop(state);
            listener();
            return;
        }
        state.on_release.push(listener);
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.lock().invalidated
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

///
/// A leaf node of the dependency graph, owned by the application and outliving any individual
/// computation. External code calls `strobe` when the underlying state changes, or `invalidate`
/// when the resource becomes permanently unusable.
///
/// A resource may carry a descriptor, an opaque serializable value recorded into the dependency
/// set of every computation that depends on it.
///
#[derive(Clone)]
pub struct Resource {
    node: Node,
    descriptor: Option<serde_json::Value>,
}

impl Resource {
    pub fn new() -> Resource {
        Resource {
            node: Node::new(),
            descriptor: None,
        }
    }

    pub fn with_descriptor(descriptor: serde_json::Value) -> Resource {
        Resource {
            node: Node::new(),
            descriptor: Some(descriptor),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn descriptor(&self) -> Option<&serde_json::Value> {
        self.descriptor.as_ref()
    }

    /// Invalidates current dependents; the resource remains usable for new ones.
    pub fn strobe(&self) {
        self.node.strobe();
    }

    /// Permanently invalidates the resource and everything computed from it.
    pub fn invalidate(&self) {
        self.node.invalidate();
    }

    /// Drops the application's reference.
    pub fn release(&self) {
        self.node.release();
    }

    /// Registers cleanup to run when the resource is fully released.
    pub fn on_cleanup(&self, listener: Listener) {
        self.node.on_release(listener);
    }
}
