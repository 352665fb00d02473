// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use fitable::codec::CodecError;
use fitable::Fitable;
use naming::NamingError;

#[derive(Clone, Debug, PartialEq)]
pub enum RegistryError {
    /// A backend failure surfaced by a query-style operation.
    Naming(NamingError),
    /// Metadata produced during encode violated a schema rule.
    Codec(CodecError),
    /// A bulk operation had at least one sub-failure; carries the fitables
    /// whose processing failed. The rest of the batch was applied.
    PartialFailure(Vec<Fitable>),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Naming(e) => write!(f, "{e}"),
            RegistryError::Codec(e) => write!(f, "{e}"),
            RegistryError::PartialFailure(failed) => {
                write!(f, "operation failed for {} fitable(s): ", failed.len())?;
                for (index, fitable) in failed.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{fitable}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<NamingError> for RegistryError {
    fn from(e: NamingError) -> Self {
        RegistryError::Naming(e)
    }
}

impl From<CodecError> for RegistryError {
    fn from(e: CodecError) -> Self {
        RegistryError::Codec(e)
    }
}
