// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request and response bodies of the HTTP API.

use provisioner::aws::AwsExtras;
use provisioner::azure::AzureExtras;
use provisioner::fanout::ProvisionResult;
use provisioner::fanout::SlotOutcome;
use provisioner::gcp::GcpExtras;
use provisioner::instance::InstanceRecord;
use provisioner::CountRange;
use provisioner::Environment;
use provisioner::Error;
use provisioner::OsSpec;
use provisioner::ProvisionRequest;
use provisioner::Tier;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Fields shared by every provider's create request.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesCreate {
    /// `base`, `prod`, `dev` or `nonprod`.
    pub env: String,
    /// `web`, `app` or `db`.
    pub tier: String,
    /// Operating system name, e.g. `redhat` or `windows`.
    pub os: String,
    /// Operating system version, e.g. `8` or `2019`.
    pub flavor: String,
    /// Comma separated data disk sizes, e.g. `"100GB, 200GB"`.
    #[serde(default)]
    pub disks: String,
    /// Inclusive index range, `"<start>-<end>"`.
    #[serde(default, rename = "countTO")]
    pub count_to: Option<String>,
    /// First index, used together with `max` instead of `countTO`.
    #[serde(default)]
    pub min: Option<u32>,
    /// Last index, used together with `min` instead of `countTO`.
    #[serde(default)]
    pub max: Option<u32>,
    pub app_code: String,
    /// Change request number recorded on every instance.
    pub request_num: String,
}

impl InstancesCreate {
    fn count(&self) -> Result<CountRange, Error> {
        match (&self.count_to, self.min, self.max) {
            (Some(range), None, None) => range.parse(),
            (None, Some(min), Some(max)) => CountRange::new(min, max),
            (Some(_), _, _) => Err(Error::invalid_input(
                "countTO cannot be combined with min/max",
            )),
            (None, _, _) => Err(Error::invalid_input(
                "either countTO or both min and max are required",
            )),
        }
    }

    /// Parses the shared fields into a provisioning request carrying
    /// `extras`.
    pub fn into_request<E>(
        self,
        extras: E,
    ) -> Result<ProvisionRequest<E>, Error> {
        let count = self.count()?;
        Ok(ProvisionRequest {
            environment: self.env.parse::<Environment>()?,
            tier: self.tier.parse::<Tier>()?,
            os: OsSpec::new(&self.os, &self.flavor),
            disk_sizes: self.disks,
            count,
            app_code: self.app_code,
            change_number: self.request_num,
            extras,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsInstancesCreate {
    #[serde(flatten)]
    pub common: InstancesCreate,
    /// Overrides the configured default instance type.
    #[serde(default)]
    pub instance_type: Option<String>,
}

impl AwsInstancesCreate {
    pub fn into_request(self) -> Result<ProvisionRequest<AwsExtras>, Error> {
        let extras =
            AwsExtras { instance_type: non_empty(self.instance_type) };
        self.common.into_request(extras)
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpInstancesCreate {
    #[serde(flatten)]
    pub common: InstancesCreate,
    /// Overrides the configured default machine type.
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl GcpInstancesCreate {
    pub fn into_request(self) -> Result<ProvisionRequest<GcpExtras>, Error> {
        let extras = GcpExtras {
            machine_type: non_empty(self.machine_type),
            description: non_empty(self.description),
        };
        self.common.into_request(extras)
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureInstancesCreate {
    #[serde(flatten)]
    pub common: InstancesCreate,
    /// Resource group the VMs and their NICs are created in.
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Overrides the configured default VM size.
    #[serde(default)]
    pub vm_size: Option<String>,
}

impl AzureInstancesCreate {
    pub fn into_request(
        self,
    ) -> Result<ProvisionRequest<AzureExtras>, Error> {
        let extras = AzureExtras {
            resource_group: non_empty(self.resource_group),
            vm_size: non_empty(self.vm_size),
        };
        self.common.into_request(extras)
    }
}

/// Query of `GET /gcp`.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpInstanceSelector {
    pub instance_name: String,
    pub zone: String,
}

/// Query of `GET /azure`.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureVmSelector {
    pub resource_group: String,
    pub vm_name: String,
}

/// One instance in a response. Failed indices of a create request carry
/// `error` instead of an address.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub instance_name: String,
    pub status: String,
    /// Primary private address, absent while still being assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interfaces: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<InstanceRecord> for InstanceView {
    fn from(record: InstanceRecord) -> Self {
        InstanceView {
            network_interfaces: record
                .address
                .as_assigned()
                .map(str::to_string),
            instance_name: record.name,
            status: record.status,
            zone: record.zone,
            error: None,
        }
    }
}

impl From<SlotOutcome> for InstanceView {
    fn from(outcome: SlotOutcome) -> Self {
        match outcome.result {
            Ok(record) => record.into(),
            Err(error) => InstanceView {
                instance_name: outcome.name,
                status: String::from("failed"),
                network_interfaces: None,
                zone: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Response views in index order.
pub fn result_views(result: ProvisionResult) -> Vec<InstanceView> {
    result.slots.into_iter().map(InstanceView::from).collect()
}
