// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded pool for change-notification delivery.
///
/// Jobs are routed by key hash, so delivery for one `(group, service)` stays
/// serial while distinct keys proceed on distinct workers. `submit` never
/// blocks: it is invoked from the backend scheduler thread.
pub(crate) struct NotifyPool {
    senders: Vec<SyncSender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl NotifyPool {
    pub(crate) fn new(size: usize, queue_depth: usize) -> Self {
        let mut senders = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let (tx, rx) = sync_channel::<Job>(queue_depth);
            senders.push(tx);
            let handle = thread::Builder::new()
                .name(format!("fit-notify-{index}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .expect("spawn notify worker");
            workers.push(handle);
        }
        NotifyPool { senders, workers }
    }

    pub(crate) fn submit(&self, key: &(String, String), job: Job) {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.senders.len() as u64) as usize;
        match self.senders[index].try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::increment_counter!("fit_registry_notifications_dropped_total");
                log::warn!(
                    "change-notification queue {index} is full; dropping an event for {}/{}",
                    key.0,
                    key.1
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for NotifyPool {
    fn drop(&mut self) {
        self.senders.clear();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // A worker can run the pool's own drop if it releases the last
            // reference to the owner; it must not join itself.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}
