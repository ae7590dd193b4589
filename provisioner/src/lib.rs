// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-cloud instance provisioning.
//!
//! A [`ProvisionRequest`] names an environment, a network tier, an operating
//! system, a data disk list and a range of instance indices. The
//! [`fanout::Orchestrator`] validates it, resolves the shared prerequisites
//! once through a provider [`fanout::Pipeline`], and then creates one
//! instance per index with bounded parallelism.

pub mod aws;
pub mod azure;
pub mod backoff;
pub mod disk;
mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fakes;
pub mod fanout;
pub mod gcp;
pub mod image;
pub mod instance;
pub mod naming;
pub mod params;
pub mod poll;
mod rest;
pub mod timeout;
pub mod topology;

pub use error::Error;
pub use error::IndexedError;
pub use error::ResourceKind;
pub use params::CountRange;
pub use params::Environment;
pub use params::OsSpec;
pub use params::ProvisionRequest;
pub use params::Provider;
pub use params::Tier;
