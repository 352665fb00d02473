// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

mod adapter;
mod backend;
pub mod config;
mod error;
pub mod nacos;
pub mod testutil;

#[cfg(test)]
mod tests;

pub use adapter::NamingAdapter;
pub use backend::{ChangeListener, Instance, NamingBackend, ServicePage};
pub use config::{AdapterOptions, NacosConfig};
pub use error::NamingError;
