// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The production [`NamingBackend`] over the Nacos naming client.
//!
//! Everything Nacos-specific stays in this module: the `ServiceInstance`
//! field mapping, the listener bridging, and the client construction. The
//! client must be built on the adapter's scheduler runtime, so
//! [`connect`] is handed to [`crate::NamingAdapter::start`] as the factory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use nacos_sdk::api::naming::{
    NamingChangeEvent, NamingEventListener, NamingService, NamingServiceBuilder, ServiceInstance,
};
use nacos_sdk::api::props::ClientProps;
use parking_lot::Mutex;

use crate::backend::{ChangeListener, Instance, NamingBackend, ServicePage};
use crate::config::NacosConfig;
use crate::error::NamingError;

/// Adapts a [`ChangeListener`] to the Nacos listener shape. Nacos matches
/// listeners by object identity on unsubscribe, so bridges are retained per
/// `(group, service)` until torn down.
struct EventBridge {
    group: String,
    service: String,
    inner: Arc<dyn ChangeListener>,
}

impl NamingEventListener for EventBridge {
    fn event(&self, _event: Arc<NamingChangeEvent>) {
        self.inner.changed(&self.group, &self.service);
    }
}

struct NacosBackend<S> {
    naming: S,
    bridges: Mutex<HashMap<(String, String), Arc<EventBridge>>>,
}

/// Builds the Nacos naming client for `config`.
pub async fn connect(config: NacosConfig) -> Result<Arc<dyn NamingBackend>, NamingError> {
    let mut props = ClientProps::new()
        .server_addr(config.server_addr.clone())
        .namespace(config.effective_namespace().to_owned())
        .app_name("fit-registry".to_owned());
    if let Some(username) = &config.username {
        props = props.auth_username(username.clone());
    }
    if let Some(password) = &config.password {
        props = props.auth_password(password.clone());
    }

    let mut builder = NamingServiceBuilder::new(props);
    if config.username.is_some() || config.password.is_some() {
        builder = builder.enable_auth_plugin_http();
    }
    let naming = builder
        .build()
        .map_err(|e| NamingError::Unavailable(e.to_string()))?;

    Ok(Arc::new(NacosBackend {
        naming,
        bridges: Mutex::default(),
    }))
}

fn to_service_instance(instance: Instance) -> ServiceInstance {
    ServiceInstance {
        ip: instance.ip,
        port: i32::from(instance.port),
        weight: instance.weight,
        healthy: instance.healthy,
        ephemeral: instance.ephemeral,
        metadata: instance.metadata,
        ..Default::default()
    }
}

fn from_service_instance(instance: ServiceInstance) -> Instance {
    Instance {
        ip: instance.ip,
        port: u16::try_from(instance.port).unwrap_or_default(),
        weight: instance.weight,
        healthy: instance.healthy,
        ephemeral: instance.ephemeral,
        metadata: instance.metadata,
    }
}

fn backend_error(e: nacos_sdk::api::error::Error) -> NamingError {
    NamingError::Backend(e.to_string())
}

#[async_trait]
impl<S> NamingBackend for NacosBackend<S>
where
    S: NamingService + Send + Sync + 'static,
{
    async fn register_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError> {
        self.naming
            .register_instance(
                service.to_owned(),
                Some(group.to_owned()),
                to_service_instance(instance),
            )
            .await
            .map_err(backend_error)
    }

    async fn deregister_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError> {
        self.naming
            .deregister_instance(
                service.to_owned(),
                Some(group.to_owned()),
                to_service_instance(instance),
            )
            .await
            .map_err(backend_error)
    }

    async fn list_instances(
        &self,
        group: &str,
        service: &str,
        healthy_only: bool,
    ) -> Result<Vec<Instance>, NamingError> {
        let instances = self
            .naming
            .select_instances(
                service.to_owned(),
                Some(group.to_owned()),
                Vec::new(),
                false,
                healthy_only,
            )
            .await
            .map_err(backend_error)?;
        Ok(instances.into_iter().map(from_service_instance).collect())
    }

    async fn list_services(
        &self,
        group: &str,
        page_no: u32,
        page_size: u32,
    ) -> Result<ServicePage, NamingError> {
        let (names, total) = self
            .naming
            .get_service_list(page_no as i32, page_size as i32, Some(group.to_owned()))
            .await
            .map_err(backend_error)?;
        Ok(ServicePage {
            names,
            total: u32::try_from(total).unwrap_or_default(),
        })
    }

    async fn subscribe(
        &self,
        group: &str,
        service: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError> {
        let bridge = Arc::new(EventBridge {
            group: group.to_owned(),
            service: service.to_owned(),
            inner: listener,
        });
        self.naming
            .subscribe(
                service.to_owned(),
                Some(group.to_owned()),
                Vec::new(),
                bridge.clone(),
            )
            .await
            .map_err(backend_error)?;
        self.bridges
            .lock()
            .insert((group.to_owned(), service.to_owned()), bridge);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        group: &str,
        service: &str,
        _listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError> {
        let bridge = self
            .bridges
            .lock()
            .remove(&(group.to_owned(), service.to_owned()));
        let Some(bridge) = bridge else {
            return Ok(());
        };
        self.naming
            .unsubscribe(
                service.to_owned(),
                Some(group.to_owned()),
                Vec::new(),
                bridge,
            )
            .await
            .map_err(backend_error)
    }
}
