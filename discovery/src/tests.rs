// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fitable::{
    Address, Application, Endpoint, Fitable, FitableAddressInstance, FitableMeta, Protocol, Worker,
};
use heartbeat::{HeartbeatAddress, HeartbeatInfo, RuntimeHandle};
use naming::testutil::MemoryNaming;
use naming::{NamingBackend, NamingError};
use registry::ChangeNotifier;

use crate::{Config, Discovery};

struct FakeRuntime {
    beats: AtomicUsize,
}

impl RuntimeHandle for FakeRuntime {
    fn worker_id(&self) -> String {
        "w1".to_owned()
    }

    fn heartbeat(&self, _infos: &[HeartbeatInfo], _address: &HeartbeatAddress) -> bool {
        self.beats.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn register_all_services(&self) {}

    fn runtime_shutdown(&self) {}
}

struct NullNotifier;

impl ChangeNotifier for NullNotifier {
    fn notify(&self, _callback_fitable_id: &str, _instance: &FitableAddressInstance) {}
}

#[test]
fn config_parses_the_platform_key_spellings() {
    let raw = r#"
nacos:
  serverAddr: "nacos.example.com:8848"
  username: "fit"
  password: "secret"
  namespace: "staging"
  isEphemeral: false
  heartBeatInterval: 4000
  heartBeatTimeout: 12000
  weight: 2.5
adapter:
  callTimeout: 5000
  initTimeout: 2000
heart-beat:
  client:
    sceneType: "custom-scene"
    interval: 1000
    aliveTime: 5000
    initDelay: 500
"#;
    let config = Config::from_str(raw).expect("parse config");
    assert_eq!(config.nacos.server_addr, "nacos.example.com:8848");
    assert_eq!(config.nacos.username.as_deref(), Some("fit"));
    assert_eq!(config.nacos.password.as_deref(), Some("secret"));
    assert_eq!(config.nacos.effective_namespace(), "staging");
    assert!(!config.nacos.is_ephemeral);
    assert_eq!(config.nacos.heart_beat_interval, 4000);
    assert_eq!(config.nacos.heart_beat_timeout, 12000);
    assert_eq!(config.nacos.weight, 2.5);
    assert_eq!(config.adapter.call_timeout, 5000);
    assert_eq!(config.adapter.init_timeout, 2000);
    assert_eq!(config.heart_beat.client.scene_type, "custom-scene");
    assert_eq!(config.heart_beat.client.interval, 1000);
    assert_eq!(config.heart_beat.client.alive_time, 5000);
    assert_eq!(config.heart_beat.client.init_delay, 500);
}

#[test]
fn config_defaults_apply() {
    let config = Config::from_str("nacos:\n  serverAddr: \"127.0.0.1:8848\"\n")
        .expect("parse minimal config");
    assert_eq!(config.nacos.namespace, "");
    assert_eq!(config.nacos.effective_namespace(), "local");
    assert!(config.nacos.is_ephemeral);
    assert_eq!(config.nacos.heart_beat_interval, 5000);
    assert_eq!(config.nacos.heart_beat_timeout, 15000);
    assert_eq!(config.nacos.weight, 1.0);
    assert_eq!(config.adapter.call_timeout, 30_000);
    assert_eq!(config.adapter.init_timeout, 10_000);
    assert_eq!(config.heart_beat.client.scene_type, "fit-registry");
    assert_eq!(config.heart_beat.client.interval, 3000);
}

#[test]
fn config_without_server_addr_is_rejected() {
    assert!(Config::from_str("nacos: {}\n").is_err());
}

#[test]
fn the_entry_points_are_wired_through() {
    let mut config = Config::from_str("nacos:\n  serverAddr: \"127.0.0.1:8848\"\n")
        .expect("parse minimal config");
    config.heart_beat.client.interval = 20;

    let backend = MemoryNaming::new();
    let runtime = Arc::new(FakeRuntime {
        beats: AtomicUsize::new(0),
    });
    let discovery = {
        let backend = backend.clone();
        Discovery::start_with(config, runtime.clone(), Arc::new(NullNotifier), move || {
            async move {
                let backend: Arc<dyn NamingBackend> = Arc::new(backend);
                Ok::<_, NamingError>(backend)
            }
        })
    };

    let fitable = Fitable {
        genericable_id: "g".to_owned(),
        genericable_version: "1".to_owned(),
        fitable_id: "f".to_owned(),
        fitable_version: "1".to_owned(),
    };
    let meta = FitableMeta {
        fitable: fitable.clone(),
        aliases: Vec::new(),
        formats: vec![1],
    };
    let worker = Worker {
        addresses: vec![Address {
            host: "10.0.0.5".to_owned(),
            endpoints: vec![Endpoint {
                port: 8080,
                protocol: Protocol::Http.code(),
            }],
        }],
        id: "w1".to_owned(),
        environment: "dev".to_owned(),
        extensions: HashMap::new(),
    };
    let application = Application {
        name: "app".to_owned(),
        name_version: "1.0".to_owned(),
    };

    discovery
        .register_fitables(&[meta], &worker, &application)
        .expect("register");
    assert_eq!(backend.stored_instances("g::1", "f::1").len(), 1);

    let subscribed = discovery
        .subscribe_fit_service(&[fitable.clone()], "w1", "cb")
        .expect("subscribe");
    let queried = discovery
        .query_fitable_addresses(&[fitable.clone()], "w1")
        .expect("query");
    assert_eq!(subscribed, queried);
    assert_eq!(queried.len(), 1);

    discovery
        .unsubscribe_fitables(&[fitable.clone()], "w1", "cb")
        .expect("unsubscribe");
    discovery
        .unregister_fitables(&[fitable.clone()], "w1")
        .expect("unregister");
    assert!(discovery
        .query_fitable_addresses(&[fitable], "w1")
        .expect("query after unregister")
        .is_empty());

    assert!(!discovery.heart_beat_exited_unexpectedly());
    discovery.online();
    discovery.offline();
    discovery.stop();
}
