// Copyright 2026 Liveql project contributors.
// Licensed under the Apache License, Version 2.0.
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

///
/// A single-fire condition: triggering it once releases every task waiting on it, and all later
/// triggers are no-ops. Cache entries use one as their "done" signal; rerunners use one each for
/// their flush and cancellation signals.
///
#[derive(Clone)]
pub struct Latch {
    sender: Arc<Mutex<Option<watch::Sender<()>>>>,
    receiver: watch::Receiver<()>,
}

impl Latch {
    pub fn new() -> Latch {
        let (sender, receiver) = watch::channel(());
        Latch {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    ///
    /// Trigger the latch. The latch is triggered by dropping the sender, which wakes all waiting
    /// receivers.
    ///
    pub fn trigger(&self) {
        self.sender.lock().take();
    }

    ///
    /// Wait for the latch to be triggered.
    ///
    pub async fn triggered(&self) {
        // A clone of the receiver errors from `changed` once the sender is dropped.
        let mut receiver = self.receiver.clone();
        while receiver.changed().await.is_ok() {}
    }

    pub fn poll_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }
}
