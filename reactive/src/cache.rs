// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::collections::hash_map;
use std::hash::Hash;
use std::sync::Arc;

use fnv::FnvHashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::latch::Latch;
use crate::node::Node;
use crate::rerunner::{ComputeError, Context};

struct CacheEntry<V, E> {
    // Triggered once the result slot is populated; readers other than the producer wait on it.
    done: Latch,
    // The computation node owning this entry: consumers of the cached value link to it, and its
    // invalidation marks the entry for collection.
    node: Node,
    result: Mutex<Option<Result<V, E>>>,
}

///
/// A memo table for one rerunner, keyed by arbitrary comparable keys.
///
/// At most one producer runs per key per cycle: concurrent callers for the same key wait on the
/// winner's done latch and then observe the same result. Every reader links the entry's node as a
/// provider of its own computation, so invalidating the entry invalidates everything that
/// consumed it. Stale entries are swept at the start of each rerun via `clean_invalidated`.
///
pub struct Cache<K, V, E> {
    entries: Mutex<FnvHashMap<K, Arc<CacheEntry<V, E>>>>,
}

impl<K, V, E> Cache<K, V, E>
where
    K: Eq + Hash,
    V: Clone + Send,
    E: ComputeError,
{
    pub fn new() -> Cache<K, V, E> {
        Cache {
            entries: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    ///
    /// Returns the cached value for `key`, computing it with `f` on a miss.
    ///
    /// `f` runs in a fresh child computation whose node owns the entry; dependencies it adds
    /// attach there, so their invalidation invalidates the entry and its consumers. Callers that
    /// lose the per-key race wait for the winner (or for cancellation of their own run).
    ///
    pub async fn get_or_compute<F>(&self, ctx: &Context, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce(Context) -> BoxFuture<'static, Result<V, E>>,
    {
        let (entry, created) = {
            let mut entries = self.entries.lock();
            match entries.entry(key) {
                hash_map::Entry::Occupied(occupied) => (occupied.get().clone(), false),
                hash_map::Entry::Vacant(vacant) => {
                    let entry = Arc::new(CacheEntry {
                        done: Latch::new(),
                        node: Node::new(),
                        result: Mutex::new(None),
                    });
                    vacant.insert(entry.clone());
                    (entry, true)
                }
            }
        };

        if created {
            let result = f(ctx.child(entry.node.clone())).await;
            *entry.result.lock() = Some(result.clone());
            entry.done.trigger();
            entry.node.add_out(ctx.computation());
            result
        } else {
            tokio::select! {
                _ = entry.done.triggered() => {}
                _ = ctx.canceled().triggered() => return Err(E::canceled()),
            }
            entry.node.add_out(ctx.computation());
            // A triggered latch with an empty slot means the producer died without storing; the
            // entry will be swept on the next cycle, and this read gives up.
            let result = entry.result.lock().clone();
            result.unwrap_or_else(|| Err(E::canceled()))
        }
    }
}

///
/// The slice of a cache that a Rerunner drives between cycles, without knowing the cache's key
/// and value types.
///
pub trait InvalidationSweep: Send + Sync {
    ///
    /// Drops entries whose owner node has been invalidated, and entries whose done latch never
    /// triggered (orphaned by a producer that died mid-computation).
    ///
    fn clean_invalidated(&self);
}

impl<K, V, E> InvalidationSweep for Cache<K, V, E>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
    E: ComputeError,
{
    fn clean_invalidated(&self) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            let stale = entry.node.is_invalidated() || !entry.done.poll_triggered();
            if stale {
                // Drop the entry's creation reference; consumer edges unwind as the computations
                // holding them are released.
                entry.node.release();
            }
            !stale
        });
        let swept = before - entries.len();
        if swept > 0 {
            log::debug!("Swept {swept} invalidated cache entries");
        }
    }
}
