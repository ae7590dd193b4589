// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The uniform result of one instance creation.

use crate::Environment;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Primary private address of an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAddress {
    Assigned(String),
    /// The create operation finished but the address is assigned later.
    Pending,
}

impl NetworkAddress {
    pub fn from_optional(address: Option<String>) -> NetworkAddress {
        match address {
            Some(a) if !a.is_empty() => NetworkAddress::Assigned(a),
            _ => NetworkAddress::Pending,
        }
    }

    pub fn as_assigned(&self) -> Option<&str> {
        match self {
            NetworkAddress::Assigned(a) => Some(a),
            NetworkAddress::Pending => None,
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkAddress::Assigned(a) => f.write_str(a),
            NetworkAddress::Pending => f.write_str("pending"),
        }
    }
}

/// Outcome of one successful provisioning attempt. Built once by the
/// pipeline and never modified afterwards.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceRecord {
    pub name: String,
    /// Status string as reported by the provider once the create reached a
    /// terminal state, e.g. `running`, `RUNNING`, `Succeeded`.
    pub status: String,
    pub address: NetworkAddress,
    /// Zone the instance landed in, where the provider has zones.
    pub zone: Option<String>,
    /// Provider identifier (EC2 instance id, GCE numeric id, ARM id).
    pub provider_id: Option<String>,
}

/// The fixed tag set every instance carries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceTags {
    pub environment: Environment,
    pub change_number: String,
    pub name: String,
}

impl InstanceTags {
    /// EC2 tags: `env`, `ChangeNum`, `Name`.
    pub fn aws(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("env"), self.environment.to_string()),
            (String::from("ChangeNum"), self.change_number.clone()),
            (String::from("Name"), self.name.clone()),
        ])
    }

    /// Compute Engine labels, which must be lowercase. `appcode` and `os`
    /// are added by the pipeline.
    pub fn gcp(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("env"), self.environment.to_string()),
            (String::from("change"), label_value(&self.change_number)),
            (String::from("name"), label_value(&self.name)),
        ])
    }

    /// Azure resource tags: `env`, `Request#`, `Name`.
    pub fn azure(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("env"), self.environment.to_string()),
            (String::from("Request#"), self.change_number.clone()),
            (String::from("Name"), self.name.clone()),
        ])
    }
}

/// Coerces a value into Compute Engine's label alphabet: lowercase letters,
/// digits, `-` and `_`, at most 63 characters.
pub fn label_value(value: &str) -> String {
    value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(63)
        .collect()
}
