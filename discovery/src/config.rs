// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::str::FromStr;

use serde::Deserialize;

use heartbeat::HeartbeatConfig;
use naming::{AdapterOptions, NacosConfig};

/// The subsystem configuration, with the platform's key spellings
/// (`nacos.serverAddr`, `heart-beat.client.sceneType`, ...).
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub nacos: NacosConfig,

    #[serde(default)]
    pub adapter: AdapterOptions,

    #[serde(default, rename = "heart-beat")]
    pub heart_beat: HeartBeatSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HeartBeatSection {
    #[serde(default)]
    pub client: HeartbeatConfig,
}

impl FromStr for Config {
    type Err = String;

    fn from_str(raw_config: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(raw_config).map_err(|e| format!("config parse error: {e}"))
    }
}
