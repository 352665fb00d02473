// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamingError {
    /// The adapter never initialized, or client construction failed.
    Unavailable(String),
    /// The per-call timeout elapsed. The outcome at the backend is
    /// indeterminate; callers reconcile via a subsequent query.
    Timeout(Duration),
    /// The adapter was torn down while the call was pending.
    Shutdown,
    /// An error surfaced by the backend itself.
    Backend(String),
}

impl fmt::Display for NamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingError::Unavailable(msg) => write!(f, "naming backend unavailable: {msg}"),
            NamingError::Timeout(timeout) => {
                write!(f, "naming call timed out after {}ms", timeout.as_millis())
            }
            NamingError::Shutdown => write!(f, "naming adapter was shut down"),
            NamingError::Backend(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for NamingError {}
