// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

mod client;
mod error;
mod notify;


pub use client::{ChangeNotifier, InstanceSettings, RegistryClient};
pub use error::RegistryError;
