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
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

///
/// A thin handle to the tokio Runtime that spawned work runs on.
///
/// The Executor has a lifecycle independent of the Runtime: dropping all clones of the Executor
/// will not shut the Runtime down, and the owner of the Runtime must keep it alive for longer
/// than all Executor instances. This is guaranteed by the scope of the `tokio::{test, main}`
/// macros.
///
#[derive(Debug, Clone)]
pub struct Executor {
    handle: Handle,
}

impl Executor {
    ///
    /// Creates an Executor for the Runtime of the calling context.
    ///
    /// Panics if called outside of a Runtime: construct the Executor from an async context, or
    /// after entering a Runtime.
    ///
    pub fn new() -> Executor {
        Executor {
            handle: Handle::current(),
        }
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

///
/// One unit of schedulable work. Units are opaque to the scheduler: the code that builds a unit
/// is responsible for routing its outcome (the scheduler only guarantees that it runs).
///
pub type Work = BoxFuture<'static, ()>;

///
/// A sink for work units, consumed by the executor.
///
/// Units may schedule further units: `run` returns only once the transitive closure of scheduled
/// work has drained. No ordering is guaranteed between units.
///
#[async_trait]
pub trait WorkScheduler: Send + Sync {
    /// Enqueue a unit for eventual execution.
    fn schedule(&self, work: Work);

    /// Block until no further work is pending.
    async fn run(&self);
}

///
/// A counter of in-flight units, with an async wait for the count to reach zero.
///
struct WaitGroup {
    pending: Mutex<usize>,
    notify: Notify,
}

impl WaitGroup {
    fn new() -> WaitGroup {
        WaitGroup {
            pending: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    fn add(&self) {
        *self.pending.lock() += 1;
    }

    fn done(&self) {
        let mut pending = self.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            // Register for wakeup before checking the count, to avoid missing a notification
            // between the check and the await.
            let notified = self.notify.notified();
            if *self.pending.lock() == 0 {
                return;
            }
            notified.await;
        }
    }
}

///
/// Marks one unit complete when dropped, so that a unit which panics still drains.
///
struct CompletionGuard {
    wait_group: Arc<WaitGroup>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.wait_group.done();
    }
}

///
/// The default WorkScheduler: forks one task per unit and joins on a wait-group.
///
pub struct SpawningScheduler {
    executor: Executor,
    wait_group: Arc<WaitGroup>,
}

impl SpawningScheduler {
    pub fn new(executor: Executor) -> SpawningScheduler {
        SpawningScheduler {
            executor,
            wait_group: Arc::new(WaitGroup::new()),
        }
    }
}

#[async_trait]
impl WorkScheduler for SpawningScheduler {
    fn schedule(&self, work: Work) {
        // The increment must happen before this method returns: a unit scheduling more units does
        // so before it completes, so the pending count never touches zero while work remains.
        self.wait_group.add();
        let wait_group = self.wait_group.clone();
        self.executor.spawn(async move {
            let _guard = CompletionGuard { wait_group };
            work.await;
        });
    }

    async fn run(&self) {
        self.wait_group.wait().await;
    }
}

///
/// A WorkScheduler which bounds the number of units running at once. Units beyond the bound are
/// all spawned, but wait for a semaphore permit before executing.
///
pub struct BoundedScheduler {
    executor: Executor,
    wait_group: Arc<WaitGroup>,
    permits: Arc<Semaphore>,
}

impl BoundedScheduler {
    pub fn new(executor: Executor, bound: usize) -> BoundedScheduler {
        BoundedScheduler {
            executor,
            wait_group: Arc::new(WaitGroup::new()),
            permits: Arc::new(Semaphore::new(bound)),
        }
    }
}

#[async_trait]
impl WorkScheduler for BoundedScheduler {
    fn schedule(&self, work: Work) {
        self.wait_group.add();
        let wait_group = self.wait_group.clone();
        let permits = self.permits.clone();
        self.executor.spawn(async move {
            let _guard = CompletionGuard { wait_group };
            // The semaphore is never closed; if acquisition fails anyway, run unbounded rather
            // than dropping the unit, because `run` must still drain.
            let _permit = permits.acquire_owned().await.ok();
            work.await;
        });
    }

    async fn run(&self) {
        self.wait_group.wait().await;
    }
}

#[cfg(test)]
mod tests;
