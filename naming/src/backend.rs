// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::NamingError;

/// A single instance registered under a `(group, service)` pair. Identity is
/// `(ip, port)`; everything the FIT layer cares about rides in `metadata`.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub healthy: bool,
    pub ephemeral: bool,
    pub metadata: HashMap<String, String>,
}

impl Default for Instance {
    fn default() -> Self {
        Instance {
            ip: String::new(),
            port: 0,
            weight: 1.0,
            healthy: true,
            ephemeral: true,
            metadata: HashMap::new(),
        }
    }
}

/// One page of the service names registered under a group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServicePage {
    pub names: Vec<String>,
    pub total: u32,
}

/// Membership-change callback.
///
/// Invoked on the adapter's scheduler thread: implementations must not block,
/// and should instead hand the event off to their own workers.
pub trait ChangeListener: Send + Sync + 'static {
    fn changed(&self, group: &str, service: &str);
}

/// The seam over the discovery backend. The production implementation is
/// [`crate::nacos`]; tests use [`crate::testutil::MemoryNaming`]. The
/// backend's namespace is fixed when the client is constructed, so it is not
/// a per-call parameter.
#[async_trait]
pub trait NamingBackend: Send + Sync + 'static {
    async fn register_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError>;

    async fn deregister_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError>;

    async fn list_instances(
        &self,
        group: &str,
        service: &str,
        healthy_only: bool,
    ) -> Result<Vec<Instance>, NamingError>;

    async fn list_services(
        &self,
        group: &str,
        page_no: u32,
        page_size: u32,
    ) -> Result<ServicePage, NamingError>;

    /// Tearing the subscription down again requires the same listener object,
    /// so callers must retain the `Arc` they pass here.
    async fn subscribe(
        &self,
        group: &str,
        service: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError>;

    async fn unsubscribe(
        &self,
        group: &str,
        service: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError>;
}
