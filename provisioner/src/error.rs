// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types shared by every provisioning pipeline.

use serde::Deserialize;
use serde::Serialize;
use slog_error_chain::SlogInlineError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The kind of remote resource a lookup was looking for.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    SecurityBoundary,
    Image,
    Zone,
    Instance,
    Operation,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityBoundary => "security boundary",
            ResourceKind::Image => "image",
            ResourceKind::Zone => "zone",
            ResourceKind::Instance => "instance",
            ResourceKind::Operation => "operation",
        };
        f.write_str(s)
    }
}

/// Failure of one fan-out index, kept alongside its index so that an
/// aggregate error can say which instances failed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IndexedError {
    pub index: u32,
    pub error: Error,
}

#[derive(
    Clone, Debug, Deserialize, Error, Eq, PartialEq, Serialize, SlogInlineError,
)]
pub enum Error {
    /// A request field could not be interpreted.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// An entry in the disk size list is not a positive size.
    #[error("invalid disk size {entry:?}: {reason}")]
    InvalidSize { entry: String, reason: String },

    /// The naming tables have no cell for this request.
    #[error("unsupported combination: {message}")]
    UnsupportedCombination { message: String },

    /// The image catalog mapping does not know this OS.
    #[error("unsupported operating system {os:?} version {version:?}")]
    UnsupportedOs { os: String, version: String },

    #[error("{kind} not found: {lookup}")]
    ResourceNotFound { kind: ResourceKind, lookup: String },

    /// The cloud API answered and declined the call.
    #[error("{operation} rejected by provider: {message}")]
    RemoteRejected { operation: String, message: String },

    /// The cloud API could not be reached or asked us to come back later.
    #[error("{operation} failed, provider unavailable: {message}")]
    RemoteUnavailable { operation: String, message: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("{failed} of {total} instances failed to provision")]
    PartialFanoutFailure { failed: usize, total: usize },

    #[error("every instance failed to provision: {}", format_failures(.failures))]
    FanoutFailed { failures: Vec<IndexedError> },

    #[error("internal error: {message}")]
    Internal { message: String },
}

fn format_failures(failures: &[IndexedError]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.index, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::RemoteUnavailable { .. } => true,

            Error::InvalidInput { .. }
            | Error::InvalidSize { .. }
            | Error::UnsupportedCombination { .. }
            | Error::UnsupportedOs { .. }
            | Error::ResourceNotFound { .. }
            | Error::RemoteRejected { .. }
            | Error::Timeout { .. }
            | Error::PartialFanoutFailure { .. }
            | Error::FanoutFailed { .. }
            | Error::Internal { .. } => false,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Error {
        Error::InvalidInput { message: message.into() }
    }

    pub fn not_found(kind: ResourceKind, lookup: impl Into<String>) -> Error {
        Error::ResourceNotFound { kind, lookup: lookup.into() }
    }

    pub fn rejected(
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Error {
        Error::RemoteRejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Error {
        Error::RemoteUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Error {
        Error::Internal { message: message.into() }
    }
}
