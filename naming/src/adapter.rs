// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The synchronous gateway to the asynchronous discovery backend.
//!
//! One dedicated scheduler thread runs a current-thread tokio runtime; the
//! backend client lives on that runtime and is never touched from anywhere
//! else. Callers on any thread submit operations over a channel and block on
//! a oneshot reply. Operations are spawned as independent tasks, so calls
//! interleave freely and a per-call timeout drops the backend future rather
//! than leaking it.

use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Builder;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};

use crate::backend::{ChangeListener, Instance, NamingBackend, ServicePage};
use crate::config::AdapterOptions;
use crate::error::NamingError;

type Reply<T> = oneshot::Sender<Result<T, NamingError>>;

enum Op {
    Register {
        group: String,
        service: String,
        instance: Instance,
        reply: Reply<()>,
    },
    Deregister {
        group: String,
        service: String,
        instance: Instance,
        reply: Reply<()>,
    },
    ListInstances {
        group: String,
        service: String,
        healthy_only: bool,
        reply: Reply<Vec<Instance>>,
    },
    ListServices {
        group: String,
        page_no: u32,
        page_size: u32,
        reply: Reply<ServicePage>,
    },
    Subscribe {
        group: String,
        service: String,
        listener: Arc<dyn ChangeListener>,
        reply: Reply<()>,
    },
    Unsubscribe {
        group: String,
        service: String,
        listener: Arc<dyn ChangeListener>,
        reply: Reply<()>,
    },
}

impl Op {
    async fn run(self, backend: Arc<dyn NamingBackend>, call_timeout: Duration) {
        match self {
            Op::Register {
                group,
                service,
                instance,
                reply,
            } => {
                let result = bounded(
                    call_timeout,
                    "register_instance",
                    backend.register_instance(&group, &service, instance),
                )
                .await;
                let _ = reply.send(result);
            }
            Op::Deregister {
                group,
                service,
                instance,
                reply,
            } => {
                let result = bounded(
                    call_timeout,
                    "deregister_instance",
                    backend.deregister_instance(&group, &service, instance),
                )
                .await;
                let _ = reply.send(result);
            }
            Op::ListInstances {
                group,
                service,
                healthy_only,
                reply,
            } => {
                let result = bounded(
                    call_timeout,
                    "list_instances",
                    backend.list_instances(&group, &service, healthy_only),
                )
                .await;
                let _ = reply.send(result);
            }
            Op::ListServices {
                group,
                page_no,
                page_size,
                reply,
            } => {
                let result = bounded(
                    call_timeout,
                    "list_services",
                    backend.list_services(&group, page_no, page_size),
                )
                .await;
                let _ = reply.send(result);
            }
            Op::Subscribe {
                group,
                service,
                listener,
                reply,
            } => {
                let result = bounded(
                    call_timeout,
                    "subscribe",
                    backend.subscribe(&group, &service, listener),
                )
                .await;
                let _ = reply.send(result);
            }
            Op::Unsubscribe {
                group,
                service,
                listener,
                reply,
            } => {
                let result = bounded(
                    call_timeout,
                    "unsubscribe",
                    backend.unsubscribe(&group, &service, listener),
                )
                .await;
                let _ = reply.send(result);
            }
        }
    }
}

async fn bounded<T>(
    call_timeout: Duration,
    op: &'static str,
    fut: impl Future<Output = Result<T, NamingError>>,
) -> Result<T, NamingError> {
    let start = Instant::now();
    let result = match timeout(call_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(NamingError::Timeout(call_timeout)),
    };
    metrics::histogram!("fit_naming_call_seconds", start.elapsed(), "op" => op);
    if result.is_err() {
        metrics::increment_counter!("fit_naming_call_failures_total", "op" => op);
    }
    result
}

pub struct NamingAdapter {
    ops: Mutex<Option<mpsc::UnboundedSender<Op>>>,
    scheduler: Mutex<Option<thread::JoinHandle<()>>>,
    initialized: bool,
}

impl NamingAdapter {
    /// Spins up the scheduler, runs `factory` on it under the init timeout,
    /// and returns once the readiness handshake completes. Initialization
    /// failure is not retried: the adapter is returned in an unavailable
    /// state and every call fails with [`NamingError::Unavailable`].
    pub fn start<F, Fut>(options: AdapterOptions, factory: F) -> NamingAdapter
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn NamingBackend>, NamingError>>,
    {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let call_timeout = options.call_timeout();
        let init_timeout = options.init_timeout();

        let scheduler = thread::Builder::new()
            .name("naming-scheduler".to_owned())
            .spawn(move || scheduler_main(factory, init_timeout, call_timeout, op_rx, ready_tx))
            .expect("spawn naming scheduler thread");

        let initialized = match ready_rx.recv() {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("failed to initialize the naming backend: {e}");
                false
            }
            Err(_) => {
                log::error!("the naming scheduler exited before initialization completed");
                false
            }
        };

        NamingAdapter {
            ops: Mutex::new(Some(op_tx)),
            scheduler: Mutex::new(Some(scheduler)),
            initialized,
        }
    }

    pub fn register_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError> {
        let group = group.to_owned();
        let service = service.to_owned();
        self.submit(move |reply| Op::Register {
            group,
            service,
            instance,
            reply,
        })
    }

    pub fn deregister_instance(
        &self,
        group: &str,
        service: &str,
        instance: Instance,
    ) -> Result<(), NamingError> {
        let group = group.to_owned();
        let service = service.to_owned();
        self.submit(move |reply| Op::Deregister {
            group,
            service,
            instance,
            reply,
        })
    }

    pub fn list_instances(
        &self,
        group: &str,
        service: &str,
        healthy_only: bool,
    ) -> Result<Vec<Instance>, NamingError> {
        let group = group.to_owned();
        let service = service.to_owned();
        self.submit(move |reply| Op::ListInstances {
            group,
            service,
            healthy_only,
            reply,
        })
    }

    pub fn list_services(
        &self,
        group: &str,
        page_no: u32,
        page_size: u32,
    ) -> Result<ServicePage, NamingError> {
        let group = group.to_owned();
        self.submit(move |reply| Op::ListServices {
            group,
            page_no,
            page_size,
            reply,
        })
    }

    pub fn subscribe(
        &self,
        group: &str,
        service: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError> {
        let group = group.to_owned();
        let service = service.to_owned();
        self.submit(move |reply| Op::Subscribe {
            group,
            service,
            listener,
            reply,
        })
    }

    pub fn unsubscribe(
        &self,
        group: &str,
        service: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<(), NamingError> {
        let group = group.to_owned();
        let service = service.to_owned();
        self.submit(move |reply| Op::Unsubscribe {
            group,
            service,
            listener,
            reply,
        })
    }

    /// Closes the op channel and joins the scheduler. In-flight calls are
    /// cancelled and unblock with [`NamingError::Shutdown`].
    pub fn stop(&self) {
        let sender = self.ops.lock().take();
        drop(sender);
        let handle = self.scheduler.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Blocks the calling thread until the operation completes, times out,
    /// or the adapter shuts down. Safe to invoke from any thread, but not
    /// from within an async context.
    fn submit<T, B>(&self, build: B) -> Result<T, NamingError>
    where
        B: FnOnce(Reply<T>) -> Op,
    {
        if !self.initialized {
            return Err(NamingError::Unavailable(
                "the naming backend failed to initialize".to_owned(),
            ));
        }
        let sender = self.ops.lock().clone();
        let sender = sender.ok_or(NamingError::Shutdown)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(build(reply_tx))
            .map_err(|_| NamingError::Shutdown)?;
        reply_rx.blocking_recv().unwrap_or(Err(NamingError::Shutdown))
    }
}

impl Drop for NamingAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scheduler_main<F, Fut>(
    factory: F,
    init_timeout: Duration,
    call_timeout: Duration,
    mut ops: mpsc::UnboundedReceiver<Op>,
    ready: std::sync::mpsc::Sender<Result<(), NamingError>>,
) where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<dyn NamingBackend>, NamingError>>,
{
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(NamingError::Unavailable(format!(
                "failed to build the scheduler runtime: {e}"
            ))));
            return;
        }
    };

    runtime.block_on(async move {
        let backend = match timeout(init_timeout, factory()).await {
            Ok(Ok(backend)) => backend,
            Ok(Err(e)) => {
                let _ = ready.send(Err(e));
                return;
            }
            Err(_) => {
                let _ = ready.send(Err(NamingError::Unavailable(format!(
                    "backend initialization did not complete within {}ms",
                    init_timeout.as_millis()
                ))));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }

        // Each op runs as its own task: calls are not serialized against
        // each other, only against the backend's own concurrency rules.
        while let Some(op) = ops.recv().await {
            let backend = backend.clone();
            tokio::spawn(async move { op.run(backend, call_timeout).await });
        }

        // The op channel closed: returning drops the runtime, which cancels
        // in-flight tasks and thereby unblocks their callers with `Shutdown`.
    });
}
