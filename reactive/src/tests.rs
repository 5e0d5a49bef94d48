// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use crate::{
    Cache, ComputeError, Context, InvalidationSweep, Latch, Node, Rerunner, RerunnerOptions,
    Resource,
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum TestError {
    Canceled,
    Retry,
    Fatal,
}

impl ComputeError for TestError {
    fn canceled() -> Self {
        TestError::Canceled
    }

    fn is_retry_sentinel(&self) -> bool {
        matches!(self, TestError::Retry)
    }
}

fn counting_listener(counter: &Arc<AtomicUsize>) -> Box<dyn FnOnce() + Send> {
    let counter = counter.clone();
    Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn test_context() -> Context {
    Context::new(Node::new(), Latch::new())
}

#[test]
fn invalidate_fires_listeners_exactly_once() {
    let node = Node::new();
    let fired = Arc::new(AtomicUsize::new(0));
    node.on_invalidate(counting_listener(&fired));
    node.invalidate();
    node.invalidate();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(node.is_invalidated());
}

#[test]
fn invalidation_propagates_to_consumers() {
    let provider = Node::new();
    let consumer = Node::new();
    provider.add_out(&consumer);
    let fired = Arc::new(AtomicUsize::new(0));
    consumer.on_invalidate(counting_listener(&fired));
    provider.invalidate();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(consumer.is_invalidated());
}

#[test]
fn listener_on_invalidated_node_fires_immediately() {
    let node = Node::new();
    node.invalidate();
    let fired = Arc::new(AtomicUsize::new(0));
    node.on_invalidate(counting_listener(&fired));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn strobe_invalidates_current_consumers_only() {
    let resource = Node::new();
    let first = Node::new();
    resource.add_out(&first);
    resource.strobe();
    assert!(first.is_invalidated());
    assert!(!resource.is_invalidated());

    // The strobed node accepts and notifies new consumers as usual.
    let second = Node::new();
    resource.add_out(&second);
    assert!(!second.is_invalidated());
    resource.strobe();
    assert!(second.is_invalidated());
}

#[test]
fn add_out_to_invalidated_provider_fires_consumer() {
    let provider = Node::new();
    provider.invalidate();
    let consumer = Node::new();
    provider.add_out(&consumer);
    assert!(consumer.is_invalidated());
}

#[test]
fn add_out_to_released_provider_releases_consumer() {
    let provider = Node::new();
    provider.release();
    let consumer = Node::new();
    let cleaned = Arc::new(AtomicUsize::new(0));
    consumer.on_release(counting_listener(&cleaned));
    provider.add_out(&consumer);
    assert!(consumer.is_released());
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn release_is_refcounted_by_edges() {
    let provider = Node::new();
    let first = Node::new();
    let second = Node::new();
    provider.add_out(&first);
    provider.add_out(&second);
    let cleaned = Arc::new(AtomicUsize::new(0));
    provider.on_release(counting_listener(&cleaned));

    // Creator reference dropped; two consumer edges still hold the provider.
    provider.release();
    assert!(!provider.is_released());

    first.release();
    assert!(!provider.is_released());

    second.release();
    assert!(provider.is_released());
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn cleanup_runs_exactly_once() {
    let node = Node::new();
    let cleaned = Arc::new(AtomicUsize::new(0));
    node.on_release(counting_listener(&cleaned));
    node.release();
    node.release();
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn cleanup_after_release_fires_immediately() {
    let node = Node::new();
    node.release();
    let cleaned = Arc::new(AtomicUsize::new(0));
    node.on_release(counting_listener(&cleaned));
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn latch_triggers_once() {
    let latch = Latch::new();
    assert!(!latch.poll_triggered());
    latch.trigger();
    latch.trigger();
    assert!(latch.poll_triggered());
    latch.triggered().await;
}

#[tokio::test]
async fn latch_releases_waiters() {
    let latch = Latch::new();
    let waiter = {
        let latch = latch.clone();
        tokio::spawn(async move { latch.triggered().await })
    };
    sleep(Duration::from_millis(10)).await;
    latch.trigger();
    waiter.await.unwrap();
}

#[tokio::test]
async fn cache_computes_each_key_once() {
    let cache: Cache<u32, String, TestError> = Cache::new();
    let ctx = test_context();
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let runs = runs.clone();
        let value = cache
            .get_or_compute(&ctx, 7, move |_child| {
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok("seven".to_string())
                })
            })
            .await;
        assert_eq!(value, Ok("seven".to_string()));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_readers_share_one_producer() {
    let cache: Arc<Cache<u32, u64, TestError>> = Arc::new(Cache::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                let ctx = test_context();
                cache
                    .get_or_compute(&ctx, 1, move |_child| {
                        Box::pin(async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_millis(20)).await;
                            Ok(42)
                        })
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(42));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn strobed_dependency_invalidates_entry_and_consumers() {
    let cache: Cache<&'static str, u64, TestError> = Cache::new();
    let resource = Resource::new();
    let ctx = test_context();

    let value = {
        let resource = resource.clone();
        cache
            .get_or_compute(&ctx, "entry", move |child| {
                Box::pin(async move {
                    child.add_dependency(&resource);
                    Ok(1)
                })
            })
            .await
    };
    assert_eq!(value, Ok(1));

    // The caller's computation observes invalidation of the cached entry.
    let fired = Arc::new(AtomicUsize::new(0));
    ctx.computation().on_invalidate(counting_listener(&fired));
    resource.strobe();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // The sweep collects the invalidated entry.
    cache.clean_invalidated();
    assert_eq!(cache.len(), 0);
}

#[tokio::test]
async fn sweep_keeps_valid_entries() {
    let cache: Cache<u32, u64, TestError> = Cache::new();
    let ctx = test_context();
    for key in 0..4 {
        let value = cache
            .get_or_compute(&ctx, key, move |_child| {
                Box::pin(async move { Ok(u64::from(key)) })
            })
            .await;
        assert_eq!(value, Ok(u64::from(key)));
    }
    cache.clean_invalidated();
    assert_eq!(cache.len(), 4);
}

#[tokio::test]
async fn canceled_reader_stops_waiting() {
    let cache: Arc<Cache<u32, u64, TestError>> = Arc::new(Cache::new());
    let stall = Latch::new();

    // The producer holds the entry open indefinitely.
    {
        let cache = cache.clone();
        let stall = stall.clone();
        tokio::spawn(async move {
            let ctx = test_context();
            cache
                .get_or_compute(&ctx, 1, move |_child| {
                    Box::pin(async move {
                        stall.triggered().await;
                        Ok(0)
                    })
                })
                .await
        });
    }
    sleep(Duration::from_millis(10)).await;

    let reader_ctx = test_context();
    let canceled = reader_ctx.canceled().clone();
    let reader = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(&reader_ctx, 1, move |_child| {
                    Box::pin(async move { Ok(0) })
                })
                .await
        })
    };
    sleep(Duration::from_millis(10)).await;
    canceled.trigger();
    assert_eq!(reader.await.unwrap(), Err(TestError::Canceled));
    stall.trigger();
}

#[test]
fn dependency_descriptors_accumulate() {
    let ctx = test_context();
    let table = Resource::with_descriptor(json!({"table": "users"}));
    let anonymous = Resource::new();
    ctx.add_dependency(&table);
    ctx.add_dependency(&anonymous);
    assert_eq!(ctx.dependencies(), vec![json!({"table": "users"})]);
}

fn fast_options() -> RerunnerOptions {
    RerunnerOptions {
        min_rerun_interval: Duration::from_millis(5),
        settle_delay: Duration::ZERO,
        max_retry_delay: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn rerunner_reruns_when_dependencies_invalidate() {
    let resource = Resource::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let rerunner = {
        let resource = resource.clone();
        let runs = runs.clone();
        Rerunner::new::<TestError, _>(
            scheduler::Executor::new(),
            move |ctx| {
                let resource = resource.clone();
                let runs = runs.clone();
                Box::pin(async move {
                    ctx.add_dependency(&resource);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
            fast_options(),
            vec![],
        )
    };

    sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    resource.strobe();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    resource.strobe();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    rerunner.stop();
}

#[tokio::test]
async fn rerunner_flush_skips_the_interval_wait() {
    let resource = Resource::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let options = RerunnerOptions {
        min_rerun_interval: Duration::from_secs(600),
        settle_delay: Duration::ZERO,
        max_retry_delay: Duration::from_secs(600),
    };
    let rerunner = {
        let resource = resource.clone();
        let runs = runs.clone();
        Rerunner::new::<TestError, _>(
            scheduler::Executor::new(),
            move |ctx| {
                let resource = resource.clone();
                let runs = runs.clone();
                Box::pin(async move {
                    ctx.add_dependency(&resource);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
            options,
            vec![],
        )
    };

    sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Invalidated, but rate-limited for ten minutes: no rerun yet.
    resource.strobe();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    rerunner.rerun_immediately();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    rerunner.stop();
}

#[tokio::test]
async fn rerunner_retries_on_sentinel() {
    let runs = Arc::new(AtomicUsize::new(0));
    let rerunner = {
        let runs = runs.clone();
        Rerunner::new::<TestError, _>(
            scheduler::Executor::new(),
            move |_ctx| {
                let runs = runs.clone();
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Retry)
                })
            },
            fast_options(),
            vec![],
        )
    };

    sleep(Duration::from_millis(150)).await;
    // Doubling backoff: a handful of attempts, not hundreds.
    let attempts = runs.load(Ordering::SeqCst);
    assert!(attempts >= 2, "expected retries, got {attempts}");
    assert!(attempts < 20, "expected backoff, got {attempts}");
    rerunner.stop();
}

#[tokio::test]
async fn rerunner_stops_on_fatal_error() {
    let resource = Resource::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let rerunner = {
        let resource = resource.clone();
        let runs = runs.clone();
        Rerunner::new::<TestError, _>(
            scheduler::Executor::new(),
            move |ctx| {
                let resource = resource.clone();
                let runs = runs.clone();
                Box::pin(async move {
                    ctx.add_dependency(&resource);
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(())
                    } else {
                        Err(TestError::Fatal)
                    }
                })
            },
            fast_options(),
            vec![],
        )
    };

    sleep(Duration::from_millis(50)).await;
    resource.strobe();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // The loop has stopped: further invalidation is ignored.
    resource.strobe();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    rerunner.stop();
}

#[tokio::test]
async fn stopped_rerunner_ignores_invalidation() {
    let resource = Resource::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let rerunner = {
        let resource = resource.clone();
        let runs = runs.clone();
        Rerunner::new::<TestError, _>(
            scheduler::Executor::new(),
            move |ctx| {
                let resource = resource.clone();
                let runs = runs.clone();
                Box::pin(async move {
                    ctx.add_dependency(&resource);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
            fast_options(),
            vec![],
        )
    };

    sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    rerunner.stop();
    resource.strobe();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
