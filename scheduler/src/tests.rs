// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::{BoundedScheduler, Executor, SpawningScheduler, WorkScheduler};

#[tokio::test]
async fn run_with_no_work_returns_immediately() {
    let scheduler = SpawningScheduler::new(Executor::new());
    scheduler.run().await;
}

#[tokio::test]
async fn drains_scheduled_units() {
    let scheduler = SpawningScheduler::new(Executor::new());
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..16 {
        let ran = ran.clone();
        scheduler.schedule(Box::pin(async move {
            ran.fetch_add(1, Ordering::SeqCst);
        }));
    }
    scheduler.run().await;
    assert_eq!(ran.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn units_may_schedule_more_units() {
    let scheduler = Arc::new(SpawningScheduler::new(Executor::new()));
    let ran = Arc::new(AtomicUsize::new(0));

    // Each unit spawns two children until a depth limit: run must drain the transitive closure.
    fn fanout(scheduler: Arc<SpawningScheduler>, ran: Arc<AtomicUsize>, depth: usize) {
        scheduler.clone().schedule(Box::pin(async move {
            ran.fetch_add(1, Ordering::SeqCst);
            if depth > 0 {
                fanout(scheduler.clone(), ran.clone(), depth - 1);
                fanout(scheduler, ran, depth - 1);
            }
        }));
    }

    fanout(scheduler.clone(), ran.clone(), 4);
    scheduler.run().await;
    // 2^5 - 1 units in the tree.
    assert_eq!(ran.load(Ordering::SeqCst), 31);
}

#[tokio::test(flavor = "multi_thread")]
async fn spawning_scheduler_runs_units_concurrently() {
    let scheduler = SpawningScheduler::new(Executor::new());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let running = running.clone();
        let peak = peak.clone();
        scheduler.schedule(Box::pin(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(50)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    scheduler.run().await;
    assert!(peak.load(Ordering::SeqCst) > 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn bounded_scheduler_limits_parallelism() {
    let scheduler = BoundedScheduler::new(Executor::new(), 2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let running = running.clone();
        let peak = peak.clone();
        scheduler.schedule(Box::pin(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    scheduler.run().await;
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn panicking_unit_still_drains() {
    let scheduler = SpawningScheduler::new(Executor::new());
    scheduler.schedule(Box::pin(async move {
        panic!("unit failure");
    }));
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = ran.clone();
        scheduler.schedule(Box::pin(async move {
            ran.fetch_add(1, Ordering::SeqCst);
        }));
    }
    scheduler.run().await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
