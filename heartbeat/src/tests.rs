// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{HeartbeatAddress, HeartbeatAgent, HeartbeatConfig, HeartbeatInfo, RuntimeHandle};

#[derive(Default)]
struct ScriptedRuntime {
    /// Outcomes for successive beats; once exhausted every beat succeeds.
    beats: Mutex<VecDeque<bool>>,
    heartbeat_calls: AtomicUsize,
    register_all_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    panic_on_beat: AtomicBool,
}

impl ScriptedRuntime {
    fn with_beats(beats: &[bool]) -> Arc<Self> {
        let runtime = Self::default();
        *runtime.beats.lock() = beats.iter().copied().collect();
        Arc::new(runtime)
    }
}

impl RuntimeHandle for ScriptedRuntime {
    fn worker_id(&self) -> String {
        "w1".to_owned()
    }

    fn heartbeat(&self, infos: &[HeartbeatInfo], address: &HeartbeatAddress) -> bool {
        assert_eq!(address.worker_id, "w1");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].scene_type, "fit-registry");
        if self.panic_on_beat.load(Ordering::SeqCst) {
            panic!("heartbeat worker killed");
        }
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        self.beats.lock().pop_front().unwrap_or(true)
    }

    fn register_all_services(&self) {
        self.register_all_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn runtime_shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_config() -> HeartbeatConfig {
    HeartbeatConfig {
        interval: 20,
        ..HeartbeatConfig::default()
    }
}

fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn config_defaults() {
    let config = HeartbeatConfig::default();
    assert_eq!(config.scene_type, "fit-registry");
    assert_eq!(config.interval, 3000);
    assert_eq!(config.alive_time, 10_000);
    assert_eq!(config.init_delay, 3000);
}

#[test]
fn reconnect_reregisters_all_services_once_per_outage() {
    // Three failures, then recovery.
    let runtime = ScriptedRuntime::with_beats(&[false, false, false, true]);
    let agent = HeartbeatAgent::new(fast_config(), runtime.clone());
    agent.online();

    // The recovery triggers exactly one re-registration.
    assert!(wait_until(Duration::from_secs(2), || {
        runtime.register_all_calls.load(Ordering::SeqCst) == 1
    }));

    // The fail counter was reset: stable beats trigger no further ones.
    let calls = runtime.heartbeat_calls.load(Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        runtime.heartbeat_calls.load(Ordering::SeqCst) >= calls + 3
    }));
    assert_eq!(runtime.register_all_calls.load(Ordering::SeqCst), 1);

    // A second outage's recovery triggers the second one.
    runtime.beats.lock().extend([false, true]);
    assert!(wait_until(Duration::from_secs(2), || {
        runtime.register_all_calls.load(Ordering::SeqCst) == 2
    }));

    agent.offline();
    assert!(!agent.exited_unexpectedly());
    assert_eq!(runtime.shutdown_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn supervisor_escalates_when_the_worker_dies() {
    let runtime = ScriptedRuntime::default();
    runtime.panic_on_beat.store(true, Ordering::SeqCst);
    let runtime = Arc::new(runtime);

    let agent = HeartbeatAgent::new(fast_config(), runtime.clone());
    agent.online();

    assert!(wait_until(Duration::from_secs(2), || {
        agent.exited_unexpectedly()
    }));
    assert!(wait_until(Duration::from_secs(1), || {
        runtime.shutdown_calls.load(Ordering::SeqCst) == 1
    }));

    // Exactly once.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(runtime.shutdown_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn offline_stops_the_loop_cleanly() {
    let runtime = ScriptedRuntime::with_beats(&[]);
    let agent = HeartbeatAgent::new(fast_config(), runtime.clone());
    agent.online();

    assert!(wait_until(Duration::from_secs(2), || {
        runtime.heartbeat_calls.load(Ordering::SeqCst) >= 2
    }));
    agent.offline();

    // The loop observed the sentinel: no further beats, no escalation.
    thread::sleep(Duration::from_millis(100));
    let calls = runtime.heartbeat_calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(runtime.heartbeat_calls.load(Ordering::SeqCst), calls);
    assert!(!agent.exited_unexpectedly());
    assert_eq!(runtime.shutdown_calls.load(Ordering::SeqCst), 0);

    // Offline again is a no-op; online after offline works.
    agent.offline();
    agent.online();
    assert!(wait_until(Duration::from_secs(2), || {
        runtime.heartbeat_calls.load(Ordering::SeqCst) > calls
    }));
    agent.offline();
}

#[test]
fn online_is_idempotent_while_online() {
    let runtime = ScriptedRuntime::with_beats(&[]);
    let agent = HeartbeatAgent::new(fast_config(), runtime.clone());
    agent.online();
    agent.online();

    assert!(wait_until(Duration::from_secs(2), || {
        runtime.heartbeat_calls.load(Ordering::SeqCst) >= 1
    }));
    agent.offline();
    thread::sleep(Duration::from_millis(100));
    assert!(!agent.exited_unexpectedly());
    assert_eq!(runtime.shutdown_calls.load(Ordering::SeqCst), 0);
}
