// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use serde::Deserialize;

/// Connection settings for the Nacos backend, spelled the way the platform
/// spells them under the `nacos.` configuration prefix.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NacosConfig {
    /// ADDRESS:PORT of the Nacos server. The only required option.
    pub server_addr: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    /// Empty selects the `"local"` namespace.
    #[serde(default)]
    pub namespace: String,

    #[serde(default = "default_is_ephemeral")]
    pub is_ephemeral: bool,

    /// Server-side beat interval carried in instance metadata, milliseconds.
    #[serde(default = "default_heart_beat_interval")]
    pub heart_beat_interval: u64,

    /// Server-side expiry carried in instance metadata, milliseconds.
    #[serde(default = "default_heart_beat_timeout")]
    pub heart_beat_timeout: u64,

    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl NacosConfig {
    pub fn effective_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            "local"
        } else {
            &self.namespace
        }
    }
}

fn default_is_ephemeral() -> bool {
    true
}

fn default_heart_beat_interval() -> u64 {
    5000
}

fn default_heart_beat_timeout() -> u64 {
    15000
}

fn default_weight() -> f64 {
    1.0
}

/// Timeouts for the adapter's synchronous call surface, milliseconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterOptions {
    #[serde(default = "default_call_timeout")]
    pub call_timeout: u64,

    #[serde(default = "default_init_timeout")]
    pub init_timeout: u64,
}

impl AdapterOptions {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout)
    }
}

impl Default for AdapterOptions {
    fn default() -> Self {
        AdapterOptions {
            call_timeout: default_call_timeout(),
            init_timeout: default_init_timeout(),
        }
    }
}

fn default_call_timeout() -> u64 {
    30_000
}

fn default_init_timeout() -> u64 {
    10_000
}
