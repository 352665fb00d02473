// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Conversions between the native worker/application/meta records and the
//! string-keyed metadata map carried on each backend instance.
//!
//! Encoding is strict: a worker advertising an unknown endpoint protocol tag
//! is rejected with [`CodecError`]. Decoding never fails: a missing or
//! malformed entry degrades to a documented default and emits one warning,
//! so a query is never failed by one peer's malformed metadata.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Address, Application, Endpoint, Fitable, FitableMeta, Protocol, Worker};

pub const WORKER_KEY: &str = "worker";
pub const APPLICATION_KEY: &str = "application";
pub const FITABLE_META_KEY: &str = "fitable-meta";

// Reserved by the backend: decimal integer milliseconds.
pub const HEART_BEAT_INTERVAL_KEY: &str = "preserved.heart.beat.interval";
pub const HEART_BEAT_TIMEOUT_KEY: &str = "preserved.heart.beat.timeout";

/// Placeholder identity used by every decode default.
pub const UNKNOWN: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecError {
    pub message: String,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metadata encode error: {}", self.message)
    }
}

impl std::error::Error for CodecError {}

impl Worker {
    /// The decode default: no addresses, id `"unknown"`.
    pub fn unknown() -> Self {
        Worker {
            addresses: Vec::new(),
            id: UNKNOWN.to_owned(),
            environment: String::new(),
            extensions: HashMap::new(),
        }
    }
}

impl Application {
    pub fn unknown() -> Self {
        Application {
            name: UNKNOWN.to_owned(),
            name_version: UNKNOWN.to_owned(),
        }
    }
}

impl FitableMeta {
    pub fn unknown() -> Self {
        FitableMeta {
            fitable: Fitable {
                genericable_id: UNKNOWN.to_owned(),
                genericable_version: "1.0".to_owned(),
                fitable_id: UNKNOWN.to_owned(),
                fitable_version: "1.0".to_owned(),
            },
            aliases: Vec::new(),
            formats: Vec::new(),
        }
    }
}

/// Builds the metadata map registered with every backend instance.
pub fn encode_metadata(
    meta: &FitableMeta,
    worker: &Worker,
    application: &Application,
    heart_beat_interval_ms: u64,
    heart_beat_timeout_ms: u64,
) -> Result<HashMap<String, String>, CodecError> {
    for address in &worker.addresses {
        for endpoint in &address.endpoints {
            Protocol::try_from(endpoint.protocol).map_err(|message| CodecError { message })?;
        }
    }

    let mut metadata = HashMap::new();
    metadata.insert(WORKER_KEY.to_owned(), to_json(WORKER_KEY, worker)?);
    metadata.insert(
        APPLICATION_KEY.to_owned(),
        to_json(APPLICATION_KEY, application)?,
    );
    metadata.insert(FITABLE_META_KEY.to_owned(), to_json(FITABLE_META_KEY, meta)?);
    metadata.insert(
        HEART_BEAT_INTERVAL_KEY.to_owned(),
        heart_beat_interval_ms.to_string(),
    );
    metadata.insert(
        HEART_BEAT_TIMEOUT_KEY.to_owned(),
        heart_beat_timeout_ms.to_string(),
    );
    Ok(metadata)
}

pub fn decode_worker(metadata: &HashMap<String, String>) -> Worker {
    decode_entry(metadata, WORKER_KEY).unwrap_or_else(Worker::unknown)
}

pub fn decode_application(metadata: &HashMap<String, String>) -> Application {
    decode_entry(metadata, APPLICATION_KEY).unwrap_or_else(Application::unknown)
}

pub fn decode_fitable_meta(metadata: &HashMap<String, String>) -> FitableMeta {
    decode_entry(metadata, FITABLE_META_KEY).unwrap_or_else(FitableMeta::unknown)
}

/// If worker decoding degraded to the `"unknown"` default but the backend
/// instance itself has a usable ip and port, synthesize a single socket
/// address so the instance remains reachable.
pub fn apply_address_fallback(worker: &mut Worker, host: &str, port: u16) {
    if worker.id != UNKNOWN || !worker.addresses.is_empty() {
        return;
    }
    if host.is_empty() || port == 0 {
        return;
    }
    worker.addresses = vec![Address {
        host: host.to_owned(),
        endpoints: vec![Endpoint {
            port,
            protocol: Protocol::Socket.code(),
        }],
    }];
}

fn to_json<T: Serialize>(key: &str, value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError {
        message: format!("failed to serialize the `{key}` entry: {e}"),
    })
}

fn decode_entry<T: DeserializeOwned>(metadata: &HashMap<String, String>, key: &str) -> Option<T> {
    let raw = match metadata.get(key) {
        Some(raw) => raw,
        None => {
            log::warn!("instance metadata has no `{key}` entry; using the default");
            return None;
        }
    };
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("malformed `{key}` entry in instance metadata ({e}); using the default");
            None
        }
    }
}
