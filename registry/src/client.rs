// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The registry client: bridges the FIT service model onto the discovery
//! backend. All operations are blocking, idempotent for identical inputs,
//! and bulk operations never abort the batch on a single failure.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use fitable::codec;
use fitable::{
    Application, ApplicationInstance, Fitable, FitableAddressInstance, FitableMeta,
    FitableMetaInstance, Genericable, GroupName, ServiceName, Worker, WorkerId,
};
use naming::{ChangeListener, Instance, NacosConfig, NamingAdapter, NamingError};

use crate::error::RegistryError;
use crate::notify::NotifyPool;

const NOTIFY_POOL_SIZE: usize = 10;
const NOTIFY_QUEUE_DEPTH: usize = 128;
const SERVICE_PAGE_SIZE: u32 = 1000;

/// The downstream delivery point for membership changes. Invoked from a
/// notification worker, once per distinct callback fitable id subscribed to
/// the changed fitable, with the current view (no diffing against prior
/// state; consumers de-duplicate if they care).
pub trait ChangeNotifier: Send + Sync + 'static {
    fn notify(&self, callback_fitable_id: &str, instance: &FitableAddressInstance);
}

/// Instance-level settings applied to every registration.
#[derive(Clone, Debug)]
pub struct InstanceSettings {
    pub weight: f64,
    pub ephemeral: bool,
    pub heart_beat_interval: u64,
    pub heart_beat_timeout: u64,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        InstanceSettings {
            weight: 1.0,
            ephemeral: true,
            heart_beat_interval: 5000,
            heart_beat_timeout: 15000,
        }
    }
}

impl From<&NacosConfig> for InstanceSettings {
    fn from(config: &NacosConfig) -> Self {
        InstanceSettings {
            weight: config.weight,
            ephemeral: config.is_ephemeral,
            heart_beat_interval: config.heart_beat_interval,
            heart_beat_timeout: config.heart_beat_timeout,
        }
    }
}

type SubscriptionKey = (GroupName, ServiceName);

/// At most one entry per key. The backend listener is registered on first
/// subscribe and torn down when the interest set empties; teardown must hand
/// the backend the identical listener object, so the entry retains it.
struct Subscription {
    listener: Arc<dyn ChangeListener>,
    interests: HashSet<(WorkerId, String)>,
}

/// One slot per key. The table lock is only ever held to look a slot up or
/// insert/remove one; the slot lock serializes work on that key, including
/// the paired backend call. Operations on distinct keys therefore never
/// block each other on the table.
type SubscriptionSlot = Arc<Mutex<Option<Subscription>>>;

struct ClientInner {
    adapter: Arc<NamingAdapter>,
    settings: InstanceSettings,
    notifier: Arc<dyn ChangeNotifier>,
    subscriptions: Mutex<HashMap<SubscriptionKey, SubscriptionSlot>>,
    pool: NotifyPool,
}

#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<ClientInner>,
}

impl RegistryClient {
    pub fn new(
        adapter: Arc<NamingAdapter>,
        settings: InstanceSettings,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> RegistryClient {
        RegistryClient {
            inner: Arc::new(ClientInner {
                adapter,
                settings,
                notifier,
                subscriptions: Mutex::default(),
                pool: NotifyPool::new(NOTIFY_POOL_SIZE, NOTIFY_QUEUE_DEPTH),
            }),
        }
    }

    /// Registers one backend instance per (address × endpoint) pair of the
    /// worker, for each meta.
    pub fn register(
        &self,
        metas: &[FitableMeta],
        worker: &Worker,
        application: &Application,
    ) -> Result<(), RegistryError> {
        let settings = &self.inner.settings;
        let mut failed = Vec::new();
        for meta in metas {
            let group = meta.fitable.group_name();
            let service = meta.fitable.service_name();
            let metadata = match codec::encode_metadata(
                meta,
                worker,
                application,
                settings.heart_beat_interval,
                settings.heart_beat_timeout,
            ) {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::error!("failed to encode metadata for `{}`: {e}", meta.fitable);
                    failed.push(meta.fitable.clone());
                    continue;
                }
            };

            let mut meta_failed = false;
            for address in &worker.addresses {
                for endpoint in &address.endpoints {
                    let instance = Instance {
                        ip: address.host.clone(),
                        port: endpoint.port,
                        weight: settings.weight,
                        healthy: true,
                        ephemeral: settings.ephemeral,
                        metadata: metadata.clone(),
                    };
                    if let Err(e) =
                        self.inner
                            .adapter
                            .register_instance(&group, &service, instance)
                    {
                        log::error!(
                            "failed to register `{}` at {}:{}: {e}",
                            meta.fitable,
                            address.host,
                            endpoint.port
                        );
                        meta_failed = true;
                    }
                }
            }
            if meta_failed {
                failed.push(meta.fitable.clone());
            }
        }
        finish_bulk(failed)
    }

    /// Deregisters only the instances whose decoded worker id matches
    /// `worker_id`; other workers' instances are untouched.
    pub fn unregister(&self, fitables: &[Fitable], worker_id: &str) -> Result<(), RegistryError> {
        let mut failed = Vec::new();
        for fitable in fitables {
            let group = fitable.group_name();
            let service = fitable.service_name();
            let instances = match self.inner.adapter.list_instances(&group, &service, true) {
                Ok(instances) => instances,
                Err(e) => {
                    log::error!("failed to list instances of `{fitable}` for unregister: {e}");
                    failed.push(fitable.clone());
                    continue;
                }
            };

            let mut any_failed = false;
            for instance in instances {
                if codec::decode_worker(&instance.metadata).id != worker_id {
                    continue;
                }
                if let Err(e) = self
                    .inner
                    .adapter
                    .deregister_instance(&group, &service, instance)
                {
                    log::error!("failed to deregister an instance of `{fitable}`: {e}");
                    any_failed = true;
                }
            }
            if any_failed {
                failed.push(fitable.clone());
            }
        }
        finish_bulk(failed)
    }

    /// Returns the healthy view of each fitable, one [`ApplicationInstance`]
    /// per application hosting it. Fitables with zero instances are omitted;
    /// input order is preserved.
    pub fn query(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
    ) -> Result<Vec<FitableAddressInstance>, RegistryError> {
        self.inner.query(fitables, worker_id)
    }

    /// Installs backend listeners for any keys not yet subscribed, records
    /// the interest, and returns what is there now; subsequent changes flow
    /// through the [`ChangeNotifier`].
    pub fn subscribe(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
        callback_fitable_id: &str,
    ) -> Result<Vec<FitableAddressInstance>, RegistryError> {
        let mut failed = Vec::new();
        for fitable in fitables {
            let key = (fitable.group_name(), fitable.service_name());
            let slot = {
                let mut table = self.inner.subscriptions.lock();
                table.entry(key.clone()).or_default().clone()
            };

            // The backend call below runs under the slot lock only, so a
            // slow subscribe for this key cannot block work on other keys,
            // while concurrent subscribes for the same key still coalesce
            // into one backend subscription.
            let mut entry = slot.lock();
            if let Some(subscription) = entry.as_mut() {
                // Idempotent: the backend subscription already exists, only
                // the interest set grows.
                subscription
                    .interests
                    .insert((worker_id.to_owned(), callback_fitable_id.to_owned()));
                continue;
            }

            let listener: Arc<dyn ChangeListener> = Arc::new(SubscriptionListener {
                client: Arc::downgrade(&self.inner),
                fitable: fitable.clone(),
            });
            match self.inner.adapter.subscribe(&key.0, &key.1, listener.clone()) {
                Ok(()) => {
                    let mut interests = HashSet::new();
                    interests.insert((worker_id.to_owned(), callback_fitable_id.to_owned()));
                    *entry = Some(Subscription {
                        listener,
                        interests,
                    });
                }
                Err(e) => {
                    log::error!("failed to subscribe to `{fitable}`: {e}");
                    failed.push(fitable.clone());
                    drop(entry);
                    self.inner.remove_if_empty(&key, &slot);
                }
            }
        }
        if !failed.is_empty() {
            return Err(RegistryError::PartialFailure(failed));
        }
        self.inner.query(fitables, worker_id)
    }

    /// Removes the interest; the backend subscription is torn down only when
    /// the interest set for a key becomes empty.
    pub fn unsubscribe(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
        callback_fitable_id: &str,
    ) -> Result<(), RegistryError> {
        let mut failed = Vec::new();
        for fitable in fitables {
            let key = (fitable.group_name(), fitable.service_name());
            let slot = {
                let table = self.inner.subscriptions.lock();
                table.get(&key).cloned()
            };
            let Some(slot) = slot else {
                continue;
            };

            let listener = {
                let mut entry = slot.lock();
                let Some(subscription) = entry.as_mut() else {
                    continue;
                };
                subscription
                    .interests
                    .remove(&(worker_id.to_owned(), callback_fitable_id.to_owned()));
                if !subscription.interests.is_empty() {
                    continue;
                }
                // The interest set emptied: take the entry and tear the
                // backend subscription down outside both locks.
                entry.take().map(|subscription| subscription.listener)
            };
            let Some(listener) = listener else {
                continue;
            };
            self.inner.remove_if_empty(&key, &slot);

            if let Err(e) = self.inner.adapter.unsubscribe(&key.0, &key.1, listener) {
                log::error!("failed to tear down the backend subscription for `{fitable}`: {e}");
                failed.push(fitable.clone());
            }
        }
        finish_bulk(failed)
    }

    /// Enumerates every service registered under each genericable's group
    /// and reports one entry per distinct meta, with the sorted set of
    /// environments its workers advertise.
    pub fn query_fitable_metas(
        &self,
        genericables: &[Genericable],
    ) -> Result<Vec<FitableMetaInstance>, RegistryError> {
        let mut collected: Vec<(FitableMeta, BTreeSet<String>)> = Vec::new();
        let mut first_error: Option<NamingError> = None;
        for genericable in genericables {
            let group = genericable.group_name();
            let services = match self.inner.list_all_services(&group) {
                Ok(services) => services,
                Err(e) => {
                    log::error!("failed to list the services under `{group}`: {e}");
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            for service in services {
                let instances = match self.inner.adapter.list_instances(&group, &service, true) {
                    Ok(instances) => instances,
                    Err(e) => {
                        log::error!("failed to list instances of `{group}/{service}`: {e}");
                        first_error.get_or_insert(e);
                        continue;
                    }
                };
                let Some(first) = instances.first() else {
                    continue;
                };

                let meta = codec::decode_fitable_meta(&first.metadata);
                let position = match collected.iter().position(|(m, _)| *m == meta) {
                    Some(position) => position,
                    None => {
                        collected.push((meta, BTreeSet::new()));
                        collected.len() - 1
                    }
                };
                for instance in &instances {
                    let environment = codec::decode_worker(&instance.metadata).environment;
                    if !environment.is_empty() {
                        collected[position].1.insert(environment);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(collected
                .into_iter()
                .map(|(meta, environments)| FitableMetaInstance {
                    meta,
                    environments: environments.into_iter().collect(),
                })
                .collect()),
        }
    }
}

impl ClientInner {
    fn query(
        &self,
        fitables: &[Fitable],
        worker_id: &str,
    ) -> Result<Vec<FitableAddressInstance>, RegistryError> {
        log::debug!("querying {} fitable(s) for worker {worker_id}", fitables.len());
        let mut results = Vec::new();
        let mut first_error: Option<NamingError> = None;
        for fitable in fitables {
            match self.query_one(fitable) {
                Ok(applications) => {
                    if !applications.is_empty() {
                        results.push(FitableAddressInstance {
                            fitable: fitable.clone(),
                            applications,
                        });
                    }
                }
                Err(e) => {
                    log::error!("failed to query `{fitable}`: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(results),
        }
    }

    /// Lists the healthy instances of one fitable and groups them by decoded
    /// application. The meta of the first instance in a group wins; workers
    /// are de-duplicated by full structural equality.
    fn query_one(&self, fitable: &Fitable) -> Result<Vec<ApplicationInstance>, NamingError> {
        let instances =
            self.adapter
                .list_instances(&fitable.group_name(), &fitable.service_name(), true)?;

        let mut groups: Vec<ApplicationInstance> = Vec::new();
        for instance in instances {
            let application = codec::decode_application(&instance.metadata);
            let mut worker = codec::decode_worker(&instance.metadata);
            codec::apply_address_fallback(&mut worker, &instance.ip, instance.port);

            match groups.iter_mut().find(|g| g.application == application) {
                Some(group) => {
                    if !group.workers.contains(&worker) {
                        group.workers.push(worker);
                    }
                }
                None => {
                    let meta = codec::decode_fitable_meta(&instance.metadata);
                    groups.push(ApplicationInstance {
                        application,
                        workers: vec![worker],
                        formats: meta.formats,
                    });
                }
            }
        }
        Ok(groups)
    }

    fn list_all_services(&self, group: &str) -> Result<Vec<String>, NamingError> {
        let mut names: Vec<String> = Vec::new();
        let mut page_no = 1;
        loop {
            let page = self.adapter.list_services(group, page_no, SERVICE_PAGE_SIZE)?;
            let total = page.total as usize;
            let fetched = page.names.len();
            names.extend(page.names);
            if fetched == 0 || names.len() >= total {
                break;
            }
            page_no += 1;
        }
        Ok(names)
    }

    /// Removes a slot that holds no subscription, re-checking identity so a
    /// concurrent subscribe that replaced or repopulated it is left alone.
    fn remove_if_empty(&self, key: &SubscriptionKey, slot: &SubscriptionSlot) {
        let mut table = self.subscriptions.lock();
        let Some(existing) = table.get(key).cloned() else {
            return;
        };
        if !Arc::ptr_eq(&existing, slot) {
            return;
        }
        // try_lock: the table lock must never wait on a busy slot.
        let Some(entry) = existing.try_lock() else {
            return;
        };
        if entry.is_none() {
            drop(entry);
            table.remove(key);
        }
    }

    /// Runs on a notification worker: re-queries the changed fitable and
    /// delivers the current view to every interested callback.
    fn deliver(self: Arc<Self>, fitable: Fitable) {
        let key = (fitable.group_name(), fitable.service_name());
        let slot = {
            let table = self.subscriptions.lock();
            table.get(&key).cloned()
        };
        let Some(slot) = slot else {
            return;
        };
        let callbacks: Vec<String> = {
            let entry = slot.lock();
            let Some(subscription) = entry.as_ref() else {
                return;
            };
            let mut ids: Vec<String> = subscription
                .interests
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };
        if callbacks.is_empty() {
            return;
        }

        let applications = match self.query_one(&fitable) {
            Ok(applications) => applications,
            Err(e) => {
                log::warn!("failed to re-query `{fitable}` after a change event: {e}");
                return;
            }
        };
        let current = FitableAddressInstance {
            fitable,
            applications,
        };

        metrics::increment_counter!("fit_registry_notifications_total");
        for callback in callbacks {
            self.notifier.notify(&callback, &current);
        }
    }
}

/// The listener registered with the backend for one subscription key. Fires
/// on the scheduler thread, so it only enqueues the re-query.
struct SubscriptionListener {
    client: Weak<ClientInner>,
    fitable: Fitable,
}

impl ChangeListener for SubscriptionListener {
    fn changed(&self, group: &str, service: &str) {
        let Some(inner) = self.client.upgrade() else {
            return;
        };
        let key = (group.to_owned(), service.to_owned());
        let fitable = self.fitable.clone();
        // The job holds only a weak reference: a queued notification must
        // not keep a dropped client alive.
        let client = self.client.clone();
        inner.pool.submit(
            &key,
            Box::new(move || {
                if let Some(inner) = client.upgrade() {
                    inner.deliver(fitable);
                }
            }),
        );
    }
}

fn finish_bulk(failed: Vec<Fitable>) -> Result<(), RegistryError> {
    if failed.is_empty() {
        Ok(())
    } else {
        Err(RegistryError::PartialFailure(failed))
    }
}
