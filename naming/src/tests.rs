// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::backend::{ChangeListener, Instance, NamingBackend};
use crate::config::AdapterOptions;
use crate::error::NamingError;
use crate::testutil::MemoryNaming;
use crate::NamingAdapter;

fn fast_options() -> AdapterOptions {
    AdapterOptions {
        call_timeout: 200,
        init_timeout: 1000,
    }
}

fn start_memory_adapter(backend: MemoryNaming, options: AdapterOptions) -> NamingAdapter {
    NamingAdapter::start(options, move || async move {
        let backend: Arc<dyn NamingBackend> = Arc::new(backend);
        Ok::<_, NamingError>(backend)
    })
}

struct CountingListener {
    events: AtomicUsize,
}

impl ChangeListener for CountingListener {
    fn changed(&self, _group: &str, _service: &str) {
        self.events.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn default_timeouts() {
    let options = AdapterOptions::default();
    assert_eq!(options.call_timeout(), Duration::from_secs(30));
    assert_eq!(options.init_timeout(), Duration::from_secs(10));
}

#[test]
fn register_and_list_roundtrip() {
    let backend = MemoryNaming::new();
    let adapter = start_memory_adapter(backend.clone(), fast_options());

    let instance = Instance {
        ip: "10.0.0.5".to_owned(),
        port: 8080,
        ..Instance::default()
    };
    adapter
        .register_instance("g::1", "f::1", instance.clone())
        .expect("register");

    let listed = adapter
        .list_instances("g::1", "f::1", true)
        .expect("list instances");
    assert_eq!(listed, vec![instance.clone()]);

    adapter
        .deregister_instance("g::1", "f::1", instance)
        .expect("deregister");
    assert!(adapter
        .list_instances("g::1", "f::1", true)
        .expect("list instances")
        .is_empty());
}

#[test]
fn call_timeout_surfaces_and_does_not_wedge_the_adapter() {
    let backend = MemoryNaming::new();
    let adapter = start_memory_adapter(backend.clone(), fast_options());

    backend.set_hanging(true);
    let err = adapter
        .list_instances("g::1", "f::1", true)
        .expect_err("hung backend must time out");
    assert_eq!(err, NamingError::Timeout(Duration::from_millis(200)));

    // The timed-out task was dropped, not leaked: the adapter keeps serving.
    backend.set_hanging(false);
    assert!(adapter
        .list_instances("g::1", "f::1", true)
        .expect("list instances after recovery")
        .is_empty());
}

#[test]
fn initialization_failure_is_not_retried() {
    let adapter = NamingAdapter::start(fast_options(), move || async move {
        let refused: Result<Arc<dyn NamingBackend>, NamingError> =
            Err(NamingError::Unavailable("connection refused".to_owned()));
        refused
    });

    for _ in 0..2 {
        match adapter.list_instances("g::1", "f::1", true) {
            Err(NamingError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}

#[test]
fn initialization_timeout_makes_calls_unavailable() {
    let options = AdapterOptions {
        call_timeout: 200,
        init_timeout: 100,
    };
    let adapter = NamingAdapter::start(options, move || async move {
        std::future::pending::<Result<Arc<dyn NamingBackend>, NamingError>>().await
    });

    match adapter.list_instances("g::1", "f::1", true) {
        Err(NamingError::Unavailable(_)) => {}
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[test]
fn stop_unblocks_pending_calls_with_shutdown() {
    let backend = MemoryNaming::new();
    let options = AdapterOptions {
        call_timeout: 10_000,
        init_timeout: 1000,
    };
    let adapter = Arc::new(start_memory_adapter(backend.clone(), options));

    backend.set_hanging(true);
    let pending = {
        let adapter = adapter.clone();
        thread::spawn(move || adapter.list_instances("g::1", "f::1", true))
    };

    // Give the call time to reach the scheduler before tearing down.
    thread::sleep(Duration::from_millis(100));
    adapter.stop();

    let result = pending.join().expect("join pending call");
    assert_eq!(result, Err(NamingError::Shutdown));
}

#[test]
fn subscribed_listeners_observe_mutations() {
    let backend = MemoryNaming::new();
    let adapter = start_memory_adapter(backend.clone(), fast_options());

    let listener = Arc::new(CountingListener {
        events: AtomicUsize::new(0),
    });
    adapter
        .subscribe("g::1", "f::1", listener.clone())
        .expect("subscribe");
    assert_eq!(backend.listener_count("g::1", "f::1"), 1);

    adapter
        .register_instance(
            "g::1",
            "f::1",
            Instance {
                ip: "10.0.0.5".to_owned(),
                port: 8080,
                ..Instance::default()
            },
        )
        .expect("register");
    assert_eq!(listener.events.load(Ordering::SeqCst), 1);

    adapter
        .unsubscribe("g::1", "f::1", listener.clone())
        .expect("unsubscribe");
    assert_eq!(backend.listener_count("g::1", "f::1"), 0);
}
