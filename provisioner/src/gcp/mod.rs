// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compute Engine pipeline.
//!
//! Compute Engine resources carry no structured tags usable for topology, so
//! networks and subnetworks are matched by name. Firewall rules apply to the
//! whole network, which makes the network itself the security boundary.
//! Instance inserts are zone operations and are awaited until `DONE`.

mod sdk;

pub use sdk::SdkCompute;

use crate::backoff::retry_lookup;
use crate::backoff::LookupRetryConfig;
use crate::disk::DiskSpec;
use crate::error::ResourceKind;
use crate::fanout::InstanceSlot;
use crate::fanout::Pipeline;
use crate::fanout::RequestPlan;
use crate::image::select_latest;
use crate::image::CatalogFilter;
use crate::image::ImageCandidate;
use crate::image::ResolvedImage;
use crate::instance::label_value;
use crate::instance::InstanceRecord;
use crate::instance::NetworkAddress;
use crate::topology::require;
use crate::topology::select_by_name;
use crate::topology::SecurityBoundary;
use crate::timeout::Deadline;
use crate::topology::Topology;
use crate::Environment;
use crate::Error;
use crate::Provider;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Scopes granted to the instance's service account.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/devstorage.read_only",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/monitoring.write",
    "https://www.googleapis.com/auth/servicecontrol",
    "https://www.googleapis.com/auth/service.management.readonly",
    "https://www.googleapis.com/auth/trace.append",
];

/// `[gcp]` configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GcpConfig {
    pub project_id: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Service account attached to every instance. Without one the
    /// project's default compute account is used.
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default = "default_machine_type")]
    pub default_machine_type: String,
    #[serde(default = "default_max_data_disks")]
    pub max_data_disks: usize,
    /// Overrides the Compute Engine endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bound on awaiting one insert operation.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_region() -> String {
    String::from("us-east1")
}

fn default_machine_type() -> String {
    String::from("n1-standard-1")
}

fn default_max_data_disks() -> usize {
    8
}

fn default_operation_timeout_secs() -> u64 {
    600
}

impl GcpConfig {
    pub fn new(project_id: impl Into<String>) -> GcpConfig {
        GcpConfig {
            project_id: project_id.into(),
            region: default_region(),
            service_account: None,
            default_machine_type: default_machine_type(),
            max_data_disks: default_max_data_disks(),
            endpoint: None,
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Network {
    pub name: String,
    pub self_link: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subnetwork {
    pub name: String,
    pub self_link: String,
    /// URL of the owning network.
    pub network: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeInstance {
    pub name: String,
    pub zone: String,
    pub status: String,
    pub network_ip: Option<String>,
}

/// Everything `instances.insert` needs for one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub description: Option<String>,
    pub source_image: String,
    pub network: String,
    pub subnetwork: String,
    /// Attached as pd-standard disks that outlive the instance.
    pub data_disks: Vec<DiskSpec>,
    pub labels: BTreeMap<String, String>,
    pub service_account: Option<String>,
}

impl InstanceSpec {
    pub fn boot_disk_name(&self) -> String {
        format!("{}-os-disk", self.name)
    }
}

/// The slice of the Compute Engine API the pipeline consumes.
#[async_trait]
pub trait ComputeApi: Send + Sync + 'static {
    async fn list_networks(&self) -> Result<Vec<Network>, Error>;

    async fn list_subnetworks(
        &self,
        region: &str,
    ) -> Result<Vec<Subnetwork>, Error>;

    /// The newest non-deprecated image in `family`.
    async fn image_from_family(
        &self,
        project: &str,
        family: &str,
    ) -> Result<ImageCandidate, Error>;

    /// Names of the region's zones that are up.
    async fn list_zones(&self, region: &str) -> Result<Vec<String>, Error>;

    /// Inserts the instance and waits for the zone operation to finish. An
    /// operation that finishes in error is [`Error::RemoteRejected`].
    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<(), Error>;

    async fn get_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<ComputeInstance, Error>;
}

/// GCP specific request fields.
#[derive(Clone, Debug, Default)]
pub struct GcpExtras {
    pub machine_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GcpPrepared {
    pub topology: Topology,
    pub image: ResolvedImage,
    /// Zones handed out round-robin by slot ordinal.
    pub zones: Vec<String>,
}

impl GcpPrepared {
    pub fn zone_for(&self, slot: &InstanceSlot) -> &str {
        &self.zones[slot.ordinal % self.zones.len()]
    }
}

fn network_name_token(environment: Environment) -> &'static str {
    match environment {
        Environment::Prod => "-p-vpc",
        Environment::Dev => "dev",
        Environment::Base => "base",
        Environment::Nonprod => "nonprod",
    }
}

fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

pub struct GcpPipeline {
    config: GcpConfig,
    retry: LookupRetryConfig,
    compute: Arc<dyn ComputeApi>,
}

impl GcpPipeline {
    pub fn new(
        config: GcpConfig,
        retry: LookupRetryConfig,
        compute: Arc<dyn ComputeApi>,
    ) -> Self {
        GcpPipeline { config, retry, compute }
    }

    /// Status lookup for a single instance.
    pub async fn instance_status(
        &self,
        log: &Logger,
        zone: &str,
        name: &str,
    ) -> Result<InstanceRecord, Error> {
        let instance = retry_lookup(log, &self.retry, "get instance", || {
            self.compute.get_instance(zone, name)
        })
        .await?;
        Ok(instance.into_record())
    }

    async fn resolve_topology(
        &self,
        log: &Logger,
        environment: Environment,
        tier: crate::Tier,
    ) -> Result<Topology, Error> {
        let networks = retry_lookup(log, &self.retry, "list networks", || {
            self.compute.list_networks()
        })
        .await?;
        let token = network_name_token(environment);
        let network = require(
            select_by_name(&networks, token, |n| n.name.as_str()),
            ResourceKind::Network,
            || format!("no network name contains {token:?}"),
        )?;
        debug!(log, "resolved network"; "network" => &network.name);

        let subnetworks =
            retry_lookup(log, &self.retry, "list subnetworks", || {
                self.compute.list_subnetworks(&self.config.region)
            })
            .await?;
        let in_network: Vec<&Subnetwork> = subnetworks
            .iter()
            .filter(|s| last_segment(&s.network) == network.name)
            .collect();
        let subnet = require(
            select_by_name(&in_network, tier.as_str(), |s| s.name.as_str()),
            ResourceKind::Subnet,
            || {
                format!(
                    "no subnetwork of {} in {} contains {:?}",
                    network.name,
                    self.config.region,
                    tier.as_str()
                )
            },
        )?;
        debug!(log, "resolved subnetwork"; "subnetwork" => &subnet.name);

        Ok(Topology {
            network: network.self_link.clone(),
            subnet: subnet.self_link.clone(),
            security: SecurityBoundary::Inherited(network.name.clone()),
        })
    }

    async fn resolve_image(
        &self,
        log: &Logger,
        filter: &CatalogFilter,
    ) -> Result<ResolvedImage, Error> {
        let CatalogFilter::Family { project, family } = filter else {
            return Err(Error::internal(format!(
                "Compute Engine cannot resolve images by {filter}"
            )));
        };
        let image = retry_lookup(log, &self.retry, "get image family", || {
            self.compute.image_from_family(project, family)
        })
        .await?;
        select_latest(vec![image], filter)
    }
}

impl ComputeInstance {
    fn into_record(self) -> InstanceRecord {
        InstanceRecord {
            provider_id: Some(format!("{}/{}", self.zone, self.name)),
            name: self.name,
            status: self.status,
            address: NetworkAddress::from_optional(self.network_ip),
            zone: Some(self.zone),
        }
    }
}

#[async_trait]
impl Pipeline for GcpPipeline {
    type Extras = GcpExtras;
    type Prepared = GcpPrepared;

    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    fn max_data_disks(&self) -> usize {
        self.config.max_data_disks
    }

    async fn prepare(
        &self,
        log: &Logger,
        plan: &RequestPlan<GcpExtras>,
    ) -> Result<GcpPrepared, Error> {
        let topology = self
            .resolve_topology(log, plan.request.environment, plan.request.tier)
            .await?;
        let image = self.resolve_image(log, &plan.image_filter).await?;

        let mut zones = retry_lookup(log, &self.retry, "list zones", || {
            self.compute.list_zones(&self.config.region)
        })
        .await?;
        zones.sort();
        if zones.is_empty() {
            return Err(Error::not_found(
                ResourceKind::Zone,
                format!("no zone of {} is up", self.config.region),
            ));
        }

        info!(
            log,
            "resolved shared prerequisites";
            "network" => &topology.network,
            "subnetwork" => &topology.subnet,
            "image" => &image.reference,
            "zones" => zones.len(),
        );
        Ok(GcpPrepared { topology, image, zones })
    }

    async fn provision_one(
        &self,
        log: &Logger,
        plan: &RequestPlan<GcpExtras>,
        prepared: &GcpPrepared,
        slot: &InstanceSlot,
    ) -> Result<InstanceRecord, Error> {
        let zone = prepared.zone_for(slot).to_string();
        let mut labels = slot.tags(plan).gcp();
        labels.insert(
            String::from("appcode"),
            label_value(&plan.request.app_code),
        );
        labels.insert(String::from("os"), label_value(&plan.request.os.name));

        let extras = &plan.request.extras;
        let spec = InstanceSpec {
            name: slot.name.clone(),
            zone: zone.clone(),
            machine_type: extras
                .machine_type
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| self.config.default_machine_type.clone()),
            description: extras.description.clone(),
            source_image: prepared.image.reference.clone(),
            network: prepared.topology.network.clone(),
            subnetwork: prepared.topology.subnet.clone(),
            data_disks: plan.disks.disks().to_vec(),
            labels,
            service_account: self.config.service_account.clone(),
        };

        info!(
            log,
            "inserting instance";
            "zone" => &zone,
            "machine_type" => &spec.machine_type,
        );
        Deadline::after(Duration::from_secs(self.config.operation_timeout_secs))
            .bound("insert instance", self.compute.insert_instance(&spec))
            .await??;

        let instance = retry_lookup(log, &self.retry, "get instance", || {
            self.compute.get_instance(&zone, &slot.name)
        })
        .await?;
        Ok(instance.into_record())
    }
}
