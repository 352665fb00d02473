// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The heartbeat agent: periodically renews this Runtime's lease with the
//! heartbeat server, re-registers everything after an outage, and escalates
//! its own death to a Runtime shutdown.
//!
//! The beat loop runs on a dedicated OS thread (there is no cheap
//! fork-without-exec to give it its own process, so the thread branch of the
//! design applies). A supervisor thread joins the worker: any termination
//! without a prior clean `offline` sets the exited flag and shuts the
//! Runtime down.

#![deny(warnings)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;

#[cfg(test)]
mod tests;

/// Parameters sent to the heartbeat server with every beat, milliseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatInfo {
    pub scene_type: String,
    pub alive_time: u64,
    pub init_delay: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatAddress {
    pub worker_id: String,
}

/// Heartbeat client settings, spelled the way the platform spells them under
/// the `heart-beat.client.` configuration prefix. Durations in milliseconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    #[serde(default = "default_scene_type")]
    pub scene_type: String,

    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_alive_time")]
    pub alive_time: u64,

    #[serde(default = "default_init_delay")]
    pub init_delay: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            scene_type: default_scene_type(),
            interval: default_interval(),
            alive_time: default_alive_time(),
            init_delay: default_init_delay(),
        }
    }
}

fn default_scene_type() -> String {
    "fit-registry".to_owned()
}

fn default_interval() -> u64 {
    3000
}

fn default_alive_time() -> u64 {
    10_000
}

fn default_init_delay() -> u64 {
    3000
}

/// What the agent needs from the hosting Runtime.
pub trait RuntimeHandle: Send + Sync + 'static {
    fn worker_id(&self) -> String;

    /// The heartbeat server RPC (distinct from the registry backend).
    /// Returns whether the lease was renewed.
    fn heartbeat(&self, infos: &[HeartbeatInfo], address: &HeartbeatAddress) -> bool;

    /// Re-publishes every fitable this Runtime hosts. Invoked when the
    /// heartbeat recovers after an outage: the backend may have expired this
    /// Runtime's registrations in the meantime.
    fn register_all_services(&self);

    /// Begins Runtime shutdown.
    fn runtime_shutdown(&self);
}

/// One online/offline cycle. The stopping flag is per-session so a fresh
/// `online` cannot be confused with a prior session's clean exit.
struct Session {
    cancel: Sender<()>,
    stopping: Arc<AtomicBool>,
}

pub struct HeartbeatAgent {
    runtime: Arc<dyn RuntimeHandle>,
    config: HeartbeatConfig,
    session: Mutex<Option<Session>>,
    exited_unexpectedly: Arc<AtomicBool>,
}

impl HeartbeatAgent {
    pub fn new(config: HeartbeatConfig, runtime: Arc<dyn RuntimeHandle>) -> HeartbeatAgent {
        HeartbeatAgent {
            runtime,
            config,
            session: Mutex::new(None),
            exited_unexpectedly: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the beat worker and its supervisor. A no-op while online.
    pub fn online(&self) {
        let mut session = self.session.lock();
        if session.is_some() {
            log::warn!("heartbeat agent is already online");
            return;
        }

        let (cancel_tx, cancel_rx) = channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let worker = {
            let runtime = self.runtime.clone();
            let config = self.config.clone();
            thread::Builder::new()
                .name("fit-heartbeat".to_owned())
                .spawn(move || beat_loop(runtime, config, cancel_rx))
                .expect("spawn heartbeat worker")
        };

        let _ = {
            let runtime = self.runtime.clone();
            let stopping = stopping.clone();
            let exited = self.exited_unexpectedly.clone();
            thread::Builder::new()
                .name("fit-heartbeat-supervisor".to_owned())
                .spawn(move || {
                    let result = worker.join();
                    if stopping.load(Ordering::SeqCst) && result.is_ok() {
                        log::info!("heartbeat agent went offline");
                        return;
                    }
                    exited.store(true, Ordering::SeqCst);
                    metrics::increment_counter!("fit_heartbeat_unexpected_exits_total");
                    log::error!(
                        "the heartbeat worker exited unexpectedly; shutting the runtime down"
                    );
                    runtime.runtime_shutdown();
                })
                .expect("spawn heartbeat supervisor")
        };

        *session = Some(Session {
            cancel: cancel_tx,
            stopping,
        });
    }

    /// Places the offline sentinel on the cancellation channel and returns
    /// immediately. Invoked from the framework-stopping lifecycle event.
    pub fn offline(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.stopping.store(true, Ordering::SeqCst);
        let _ = session.cancel.send(());
    }

    /// Whether the heartbeat worker has died without a clean `offline`.
    pub fn exited_unexpectedly(&self) -> bool {
        self.exited_unexpectedly.load(Ordering::SeqCst)
    }
}

fn beat_loop(runtime: Arc<dyn RuntimeHandle>, config: HeartbeatConfig, cancel: Receiver<()>) {
    let interval = Duration::from_millis(config.interval);
    let infos = vec![HeartbeatInfo {
        scene_type: config.scene_type.clone(),
        alive_time: config.alive_time,
        init_delay: config.init_delay,
    }];
    let address = HeartbeatAddress {
        worker_id: runtime.worker_id(),
    };

    let mut failures: u32 = 0;
    let mut last_success: Option<Instant> = None;

    loop {
        match cancel.recv_timeout(interval) {
            // The sentinel, or the agent itself going away.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if runtime.heartbeat(&infos, &address) {
            if failures > 0 {
                log::info!(
                    "heartbeat recovered after {failures} failed attempt(s); re-registering all services"
                );
                runtime.register_all_services();
            }
            failures = 0;
            if let Some(previous) = last_success {
                let gap = previous.elapsed();
                if gap > interval * 2 {
                    log::warn!(
                        "heartbeat is unstable: {}ms since the previous successful beat",
                        gap.as_millis()
                    );
                }
            }
            last_success = Some(Instant::now());
        } else {
            failures += 1;
            metrics::increment_counter!("fit_heartbeat_failures_total");
            log::warn!("heartbeat attempt failed ({failures} consecutive)");
            // The next tick is the retry.
        }
    }
}
