// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::cmp;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::cache::InvalidationSweep;
use crate::latch::Latch;
use crate::node::{Node, Resource};

///
/// The error contract between a rerunner and its compute function, mirrored by whatever error
/// type the application runs under.
///
pub trait ComputeError: Clone + Send + Sync + 'static {
    ///
    /// Creates an instance representing that the surrounding run was canceled.
    ///
    fn canceled() -> Self;

    ///
    /// True for the sentinel that asks the rerunner to run again with backoff instead of
    /// stopping.
    ///
    fn is_retry_sentinel(&self) -> bool;
}

///
/// The dependencies recorded during one run, as the descriptors of the resources it consumed.
///
#[derive(Default)]
struct DependencySet {
    values: Vec<serde_json::Value>,
}

///
/// The context of one computation: the computation's node, the cancellation signal of the
/// surrounding rerunner, and the run's dependency-set accumulator.
///
#[derive(Clone)]
pub struct Context {
    computation: Node,
    canceled: Latch,
    dependencies: Arc<Mutex<DependencySet>>,
}

impl Context {
    pub fn new(computation: Node, canceled: Latch) -> Context {
        Context {
            computation,
            canceled,
            dependencies: Arc::default(),
        }
    }

    pub fn computation(&self) -> &Node {
        &self.computation
    }

    pub fn canceled(&self) -> &Latch {
        &self.canceled
    }

    ///
    /// Creates a Context for a child computation of the same run.
    ///
    pub fn child(&self, computation: Node) -> Context {
        Context {
            computation,
            canceled: self.canceled.clone(),
            dependencies: self.dependencies.clone(),
        }
    }

    ///
    /// Makes this computation depend on the given resource: strobing or invalidating the
    /// resource invalidates the computation. The resource's descriptor, if any, is recorded in
    /// the run's dependency set.
    ///
    pub fn add_dependency(&self, resource: &Resource) {
        resource.node().add_out(&self.computation);
        if let Some(descriptor) = resource.descriptor() {
            self.dependencies.lock().values.push(descriptor.clone());
        }
    }

    ///
    /// The descriptors of every dependency recorded so far in this run.
    ///
    pub fn dependencies(&self) -> Vec<serde_json::Value> {
        self.dependencies.lock().values.clone()
    }
}

#[derive(Clone, Debug)]
pub struct RerunnerOptions {
    /// Minimum time between the starts of two consecutive runs.
    pub min_rerun_interval: Duration,
    /// Settling delay before each rerun, so that a flurry of dependent writes is observed by one
    /// run rather than several.
    pub settle_delay: Duration,
    /// Upper bound for the doubling retry delay.
    pub max_retry_delay: Duration,
}

impl RerunnerOptions {
    pub fn new(min_rerun_interval: Duration) -> RerunnerOptions {
        RerunnerOptions {
            min_rerun_interval,
            settle_delay: Duration::from_millis(200),
            max_retry_delay: Duration::from_secs(60),
        }
    }
}

struct RerunnerState {
    flush: Mutex<Latch>,
    canceled: Latch,
    current: Mutex<Option<Node>>,
}

///
/// Drives one top-level computation: runs it, waits for any of its dependencies to invalidate,
/// and runs it again no sooner than the configured interval. A compute function signals a
/// transient failure with its error type's retry sentinel, which doubles the delay before the
/// next attempt; any other error stops the rerunner.
///
pub struct Rerunner {
    state: Arc<RerunnerState>,
}

impl Rerunner {
    ///
    /// Spawns the rerun loop for `compute` onto the given executor. The caches are swept for
    /// invalidated entries at the start of every cycle.
    ///
    pub fn new<E, F>(
        executor: scheduler::Executor,
        compute: F,
        options: RerunnerOptions,
        caches: Vec<Arc<dyn InvalidationSweep>>,
    ) -> Rerunner
    where
        E: ComputeError,
        F: Fn(Context) -> BoxFuture<'static, Result<(), E>> + Send + Sync + 'static,
    {
        let state = Arc::new(RerunnerState {
            flush: Mutex::new(Latch::new()),
            canceled: Latch::new(),
            current: Mutex::new(None),
        });
        let loop_state = state.clone();
        executor.spawn(async move {
            Self::run_loop(loop_state, compute, options, caches).await;
        });
        Rerunner { state }
    }

    async fn run_loop<E, F>(
        state: Arc<RerunnerState>,
        compute: F,
        options: RerunnerOptions,
        caches: Vec<Arc<dyn InvalidationSweep>>,
    ) where
        E: ComputeError,
        F: Fn(Context) -> BoxFuture<'static, Result<(), E>> + Send + Sync + 'static,
    {
        let mut retry_delay = options.min_rerun_interval;
        let mut last_run: Option<Instant> = None;
        loop {
            // Rate-limit the next run, unless a flush arrives first.
            let flush = state.flush.lock().clone();
            let wait = match last_run {
                Some(at) => retry_delay.saturating_sub(at.elapsed()),
                None => Duration::ZERO,
            };
            tokio::select! {
                _ = sleep(wait) => {}
                _ = flush.triggered() => {
                    *state.flush.lock() = Latch::new();
                }
                _ = state.canceled.triggered() => return,
            }

            // Let dependent writes settle so one run observes them all.
            if last_run.is_some() && !options.settle_delay.is_zero() {
                tokio::select! {
                    _ = sleep(options.settle_delay) => {}
                    _ = state.canceled.triggered() => return,
                }
            }

            for cache in &caches {
                cache.clean_invalidated();
            }

            let computation = Node::new();
            let ctx = Context::new(computation.clone(), state.canceled.clone());
            last_run = Some(Instant::now());
            match compute(ctx).await {
                Ok(()) => {
                    // The new computation supersedes the previous one.
                    let previous = state.current.lock().replace(computation.clone());
                    if let Some(previous) = previous {
                        previous.release();
                    }
                    retry_delay = options.min_rerun_interval;

                    // Wait for the new computation to be invalidated; this can have happened
                    // already, in which case the latch fires immediately.
                    let invalidated = Latch::new();
                    {
                        let invalidated = invalidated.clone();
                        computation.on_invalidate(Box::new(move || invalidated.trigger()));
                    }
                    tokio::select! {
                        _ = invalidated.triggered() => {}
                        _ = state.canceled.triggered() => return,
                    }
                }
                Err(err) if err.is_retry_sentinel() => {
                    computation.release();
                    retry_delay = cmp::min(
                        cmp::max(retry_delay.saturating_mul(2), Duration::from_millis(1)),
                        options.max_retry_delay,
                    );
                    log::debug!("Retry sentinel: backing off for {retry_delay:?}");
                }
                Err(_) => {
                    computation.release();
                    log::debug!("Compute function failed; stopping rerunner");
                    return;
                }
            }
        }
    }

    ///
    /// Cancels any pending rate-limit wait, making the next run start immediately.
    ///
    pub fn rerun_immediately(&self) {
        self.state.flush.lock().trigger();
    }

    ///
    /// Stops the rerun loop and releases the current computation.
    ///
    pub fn stop(&self) {
        self.state.canceled.trigger();
        let current = self.state.current.lock().take();
        if let Some(current) = current {
            current.release();
        }
    }
}

impl Drop for Rerunner {
    fn drop(&mut self) {
        self.stop();
    }
}
