// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::Arc;

use futures::future::FutureExt;
use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::mpsc;

use reactive::{InvalidationSweep, Rerunner, RerunnerOptions};

use crate::error::Error;
use crate::execute::{ExecContext, Executor, ExpensiveCache};
use crate::query::PreparedQuery;
use crate::schema::Object;

///
/// One update delivered to a live-query consumer. Transports forward these on the wire however
/// they like; the engine's contract ends at the channel.
///
#[derive(Clone, Debug, PartialEq)]
pub enum LiveUpdate {
    /// The first result, as a complete value.
    Snapshot(Json),
    /// A delta against the previously delivered state, in the diff wire format.
    Delta(Json),
}

///
/// A query kept running under a rerunner. Every cycle executes the prepared query, diffs the
/// materialized result against the previous cycle's, and delivers the change to the consumer;
/// cycles whose result is unchanged deliver nothing. Invalidation of any dependency recorded
/// during a cycle (resources, cached expensive fields) triggers the next cycle.
///
pub struct LiveQuery {
    rerunner: Rerunner,
}

impl LiveQuery {
    ///
    /// Spawns the query under a rerunner. The first delivery is a snapshot, every later one a
    /// delta. Dropping the receiver stops the rerunner on its next delivery.
    ///
    pub fn spawn(
        executor: scheduler::Executor,
        engine: Arc<Executor>,
        root: Arc<Object>,
        source: Json,
        query: Arc<PreparedQuery>,
        options: RerunnerOptions,
    ) -> (LiveQuery, mpsc::Receiver<LiveUpdate>) {
        let (sender, receiver) = mpsc::channel(16);
        let cache: Arc<ExpensiveCache> = Arc::new(ExpensiveCache::new());
        let previous: Arc<Mutex<Option<diff::Value>>> = Arc::default();

        let compute_cache = cache.clone();
        let rerunner = Rerunner::new::<Error, _>(
            executor,
            move |reactive_ctx| {
                let engine = engine.clone();
                let root = root.clone();
                let source = source.clone();
                let query = query.clone();
                let cache = compute_cache.clone();
                let previous = previous.clone();
                let sender = sender.clone();
                async move {
                    let ctx = ExecContext::live(reactive_ctx, cache);
                    let result = engine.execute(&ctx, &root, source, &query).await?;
                    let update = {
                        let mut previous = previous.lock();
                        let update = match previous.as_ref() {
                            None => Some(LiveUpdate::Snapshot(result.to_json())),
                            Some(old) => diff::diff(old, &result).map(LiveUpdate::Delta),
                        };
                        *previous = Some(result);
                        update
                    };
                    if let Some(update) = update {
                        log::trace!("Delivering {update:?}");
                        // A consumer that went away stops the rerunner.
                        sender.send(update).await.map_err(|_| Error::Canceled)?;
                    }
                    Ok(())
                }
                .boxed()
            },
            options,
            vec![cache as Arc<dyn InvalidationSweep>],
        );
        (LiveQuery { rerunner }, receiver)
    }

    /// Skips any pending rate-limit wait, so the next cycle starts immediately.
    pub fn flush(&self) {
        self.rerunner.rerun_immediately();
    }

    pub fn stop(&self) {
        self.rerunner.stop();
    }
}
