// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod codec;

pub type WorkerId = String;

pub type GroupName = String;

pub type ServiceName = String;

/// A concrete implementation of a service interface, identified by a 4-tuple.
///
/// The two canonical encodings, [`Fitable::group_name`] and
/// [`Fitable::service_name`], are the keys under which the fitable is known
/// to the discovery backend.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fitable {
    pub genericable_id: String,
    pub genericable_version: String,
    pub fitable_id: String,
    pub fitable_version: String,
}

impl Fitable {
    pub fn group_name(&self) -> GroupName {
        format!("{}::{}", self.genericable_id, self.genericable_version)
    }

    pub fn service_name(&self) -> ServiceName {
        format!("{}::{}", self.fitable_id, self.fitable_version)
    }

    pub fn genericable(&self) -> Genericable {
        Genericable {
            genericable_id: self.genericable_id.clone(),
            genericable_version: self.genericable_version.clone(),
        }
    }
}

impl fmt::Display for Fitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_name(), self.service_name())
    }
}

/// The abstract service interface: the first two fields of a [`Fitable`].
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genericable {
    pub genericable_id: String,
    pub genericable_version: String,
}

impl Genericable {
    pub fn group_name(&self) -> GroupName {
        format!("{}::{}", self.genericable_id, self.genericable_version)
    }
}

/// Describes *what* is registered: a fitable plus its aliases and the wire
/// formats (0 = protobuf, 1 = JSON) its host can serve.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitableMeta {
    pub fitable: Fitable,
    pub aliases: Vec<String>,
    pub formats: Vec<i32>,
}

/// The fixed set of endpoint protocol tags. Tags outside this set are
/// rejected when a worker is encoded into instance metadata.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Rsocket = 0,
    Socket = 1,
    Http = 2,
    Grpc = 3,
    Uc = 10,
    ShareMemory = 11,
}

impl Protocol {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Protocol {
    type Error = String;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Protocol::Rsocket),
            1 => Ok(Protocol::Socket),
            2 => Ok(Protocol::Http),
            3 => Ok(Protocol::Grpc),
            10 => Ok(Protocol::Uc),
            11 => Ok(Protocol::ShareMemory),
            other => Err(format!("unknown endpoint protocol tag {other}")),
        }
    }
}

/// The tag is kept raw so that encode-time validation is the single
/// enforcement point; decoding tolerates tags registered by other runtimes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub port: u16,
    pub protocol: i32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub host: String,
    pub endpoints: Vec<Endpoint>,
}

/// A process hosting zero or more fitables. The `id` is the Runtime's
/// cluster-unique identity and is the sole key by which a worker is matched
/// when unregistering or diffing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub addresses: Vec<Address>,
    pub id: WorkerId,
    pub environment: String,
    pub extensions: HashMap<String, String>,
}

/// A named deployment unit. A worker belongs to exactly one application.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub name: String,
    pub name_version: String,
}

/// The query result type: one entry per application hosting the fitable.
#[derive(Clone, Debug, PartialEq)]
pub struct FitableAddressInstance {
    pub fitable: Fitable,
    pub applications: Vec<ApplicationInstance>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationInstance {
    pub application: Application,
    pub workers: Vec<Worker>,
    pub formats: Vec<i32>,
}

/// A distinct registered meta together with the sorted set of environments
/// its hosting workers advertise.
#[derive(Clone, Debug, PartialEq)]
pub struct FitableMetaInstance {
    pub meta: FitableMeta,
    pub environments: Vec<String>,
}
