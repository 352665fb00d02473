// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The discovery subsystem as the hosting Runtime holds it: one backend
//! adapter, the registry client layered over it, and the heartbeat agent.
//! The methods on [`Discovery`] are the nine entry points the Runtime binds
//! to its platform service ids.

#![deny(warnings)]

pub mod config;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::Arc;

use fitable::{
    Application, Fitable, FitableAddressInstance, FitableMeta, FitableMetaInstance, Genericable,
    Worker,
};
use heartbeat::{HeartbeatAgent, RuntimeHandle};
use naming::{nacos, NamingAdapter, NamingBackend, NamingError};
use registry::{ChangeNotifier, InstanceSettings, RegistryClient, RegistryError};

pub use config::Config;

pub struct Discovery {
    adapter: Arc<NamingAdapter>,
    registry: RegistryClient,
    heartbeat: HeartbeatAgent,
}

impl Discovery {
    /// Connects to the Nacos backend named by `config`. If the backend fails
    /// to initialize, the subsystem still starts; registry operations fail
    /// until the Runtime restarts it.
    pub fn start(
        config: Config,
        runtime: Arc<dyn RuntimeHandle>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Discovery {
        log::info!(
            "starting the fit discovery subsystem against {}",
            config.nacos.server_addr
        );
        let nacos_config = config.nacos.clone();
        Self::start_with(config, runtime, notifier, move || {
            nacos::connect(nacos_config)
        })
    }

    /// Starts against an arbitrary backend factory. Tests use this seam to
    /// substitute an in-memory backend.
    pub fn start_with<F, Fut>(
        config: Config,
        runtime: Arc<dyn RuntimeHandle>,
        notifier: Arc<dyn ChangeNotifier>,
        factory: F,
    ) -> Discovery
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn NamingBackend>, NamingError>>,
    {
        let adapter = Arc::new(NamingAdapter::start(config.adapter.clone(), factory));
        let registry = RegistryClient::new(
            adapter.clone(),
            InstanceSettings::from(&config.nacos),
            notifier,
        );
        let heartbeat = HeartbeatAgent::new(config.heart_beat.client.clone(), runtime);
        Discovery {
            adapter,
            registry,
            heartbeat,
        }
    }

    pub fn register_fitables(
        &self,
        metas: &[FitableMeta],
        worker: &Worker,
        application: &Application,
    ) -> Result<(), RegistryError> {
        self.registry.register(metas, worker, application)
    }

    pub fn unregister_fitables(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
    ) -> Result<(), RegistryError> {
        self.registry.unregister(fitables, worker_id)
    }

    pub fn query_fitable_addresses(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
    ) -> Result<Vec<FitableAddressInstance>, RegistryError> {
        self.registry.query(fitables, worker_id)
    }

    pub fn subscribe_fit_service(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
        callback_fitable_id: &str,
    ) -> Result<Vec<FitableAddressInstance>, RegistryError> {
        self.registry
            .subscribe(fitables, worker_id, callback_fitable_id)
    }

    pub fn unsubscribe_fitables(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
        callback_fitable_id: &str,
    ) -> Result<(), RegistryError> {
        self.registry
            .unsubscribe(fitables, worker_id, callback_fitable_id)
    }

    pub fn query_fitable_metas(
        &self,
        genericables: &[Genericable],
    ) -> Result<Vec<FitableMetaInstance>, RegistryError> {
        self.registry.query_fitable_metas(genericables)
    }

    pub fn online(&self) {
        self.heartbeat.online();
    }

    pub fn offline(&self) {
        self.heartbeat.offline();
    }

    pub fn heart_beat_exited_unexpectedly(&self) -> bool {
        self.heartbeat.exited_unexpectedly()
    }

    /// Tears down the backend adapter. In-flight registry calls unblock with
    /// a shutdown error; the heartbeat agent is stopped separately via
    /// [`Discovery::offline`].
    pub fn stop(&self) {
        self.adapter.stop();
    }
}
