// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! An in-memory [`NamingBackend`] for tests: instance storage keyed by
//! `(group, service)`, listeners fired inline on every mutation, call
//! counters for subscription bookkeeping assertions, and a hang switch that
//! makes list operations never respond.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{ChangeListener, Instance, NamingBackend, ServicePage};
use crate::error::NamingError;

#[derive(Default)]
struct Inner {
    instances: HashMap<(String, String), Vec<Instance>>,
    listeners: HashMap<(String, String), Vec<Arc<dyn ChangeListener>>>,
}

#[derive(Clone, Default)]
pub struct MemoryNaming {
    inner: Arc<Mutex<Inner>>,
    pub subscribe_count: Arc<AtomicUsize>,
    pub unsubscribe_count: Arc<AtomicUsize>,
    hanging: Arc<AtomicBool>,
}

impl MemoryNaming {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, list operations never respond.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Seeds instances directly, bypassing the adapter. Listeners are not
    /// fired.
    pub fn put_instances(&self, group: &str, service: &str, instances: Vec<Instance>) {
        self.inner
            .lock()
            .instances
            .insert((group.to_owned(), service.to_owned()), instances);
    }

    pub fn stored_instances(&self, group: &str, service: &str) -> Vec<Instance> {
        self.inner
            .lock()
            .instances
            .get(&(group.to_owned(), service.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn listener_count(&self, group: &str, service: &str) -> usize {
        self.inner
            .lock()
            .listeners
            .get(&(group.to_owned(), service.to_owned()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn fire(&self, group: &str, service: &str) {
        let listeners = self
            .inner
            .lock()
            .listeners
            .get(&(group.to_owned(), service.to_owned()))
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener.changed(group, service);
        }
    }

    async fn hang_if_requested(&self) {
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl NamingBackend for MemoryNaming {
    async fn register_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError> {
        {
            let mut inner = self.inner.lock();
            let instances = inner
                .instances
                .entry((group.to_owned(), service.to_owned()))
                .or_default();
            instances.retain(|i| (i.ip.as_str(), i.port) != (instance.ip.as_str(), instance.port));
            instances.push(instance);
        }
        self.fire(group, service);
        Ok(())
    }

    async fn deregister_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError> {
        {
            let mut inner = self.inner.lock();
            if let Some(instances) = inner
                .instances
                .get_mut(&(group.to_owned(), service.to_owned()))
            {
                instances
                    .retain(|i| (i.ip.as_str(), i.port) != (instance.ip.as_str(), instance.port));
            }
        }
        self.fire(group, service);
        Ok(())
    }

    async fn list_instances(
        &self,
        group: &str,
        service: &str,
        healthy_only: bool,
    ) -> Result<Vec<Instance>, NamingError> {
        self.hang_if_requested().await;
        Ok(self
            .stored_instances(group, service)
            .into_iter()
            .filter(|i| !healthy_only || i.healthy)
            .collect())
    }

    async fn list_services(
        &self,
        group: &str,
        page_no: u32,
        page_size: u32,
    ) -> Result<ServicePage, NamingError> {
        self.hang_if_requested().await;
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .instances
            .iter()
            .filter(|((g, _), instances)| g == group && !instances.is_empty())
            .map(|((_, service), _)| service.clone())
            .collect();
        names.sort();

        let total = names.len() as u32;
        let skip = (page_no.saturating_sub(1) * page_size) as usize;
        let names = names
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect();
        Ok(ServicePage { names, total })
    }

    async fn subscribe(
        &self,
        group: &str,
        service: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError> {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        self.inner
            .lock()
            .listeners
            .entry((group.to_owned(), service.to_owned()))
            .or_default()
            .push(listener);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        group: &str,
        service: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError> {
        self.unsubscribe_count.fetch_add(1, Ordering::SeqCst);
        if let Some(listeners) = self
            .inner
            .lock()
            .listeners
            .get_mut(&(group.to_owned(), service.to_owned()))
        {
            listeners.retain(|l| !Arc::ptr_eq(l, &listener));
        }
        Ok(())
    }
}
