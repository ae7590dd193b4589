// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Azure Resource Manager pipeline.
//!
//! Virtual networks and subnets are a small pre-provisioned catalog, so
//! topology comes from static tables; only the subnet's resource id is read
//! remotely. The subnet's network security group is the security boundary.
//! Each VM needs a NIC first, and both are long-running operations that are
//! awaited through their `Azure-AsyncOperation` URL.

mod rest;

pub use rest::ArmRest;

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
use crate::instance::InstanceRecord;
use crate::instance::NetworkAddress;
use crate::naming::OsFamily;
use crate::poll::wait_for_condition;
use crate::poll::CondCheckError;
use crate::topology::SecurityBoundary;
use crate::topology::Topology;
use crate::Environment;
use crate::Error;
use crate::Provider;
use crate::Tier;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// `[azure]` configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AzureConfig {
    pub subscription_id: String,
    #[serde(default = "default_location")]
    pub location: String,
    /// Resource group holding the shared virtual networks.
    #[serde(default = "default_network_resource_group")]
    pub network_resource_group: String,
    /// Used when a request names no resource group.
    #[serde(default)]
    pub default_resource_group: Option<String>,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Environment variable holding the VM admin password.
    #[serde(default = "default_admin_password_env")]
    pub admin_password_env: String,
    /// Environment variable holding the OAuth bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_vm_size")]
    pub default_vm_size: String,
    #[serde(default = "default_max_data_disks")]
    pub max_data_disks: usize,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_location() -> String {
    String::from("eastus")
}

fn default_network_resource_group() -> String {
    String::from("az-nonProd-rg-001")
}

fn default_admin_username() -> String {
    String::from("usertest")
}

fn default_admin_password_env() -> String {
    String::from("AZURE_ADMIN_PASSWORD")
}

fn default_token_env() -> String {
    String::from("AZURE_ACCESS_TOKEN")
}

fn default_vm_size() -> String {
    String::from("Standard_B1s")
}

fn default_max_data_disks() -> usize {
    4
}

fn default_api_base() -> String {
    String::from("https://management.azure.com")
}

fn default_api_version() -> String {
    String::from("2023-09-01")
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_poll_timeout_secs() -> u64 {
    900
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl AzureConfig {
    pub fn new(subscription_id: impl Into<String>) -> AzureConfig {
        AzureConfig {
            subscription_id: subscription_id.into(),
            location: default_location(),
            network_resource_group: default_network_resource_group(),
            default_resource_group: None,
            admin_username: default_admin_username(),
            admin_password_env: default_admin_password_env(),
            token_env: default_token_env(),
            default_vm_size: default_vm_size(),
            max_data_disks: default_max_data_disks(),
            api_base: default_api_base(),
            api_version: default_api_version(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Environment as spelled in the shared network resource names.
fn network_environment(environment: Environment) -> Option<&'static str> {
    match environment {
        Environment::Base => Some("base"),
        Environment::Nonprod => Some("nonProd"),
        Environment::Prod => Some("Prod"),
        Environment::Dev => None,
    }
}

/// Static vnet and subnet catalog.
pub fn network_names(
    environment: Environment,
    tier: Tier,
) -> Result<(String, String), Error> {
    let env = network_environment(environment).ok_or_else(|| {
        Error::not_found(
            ResourceKind::Network,
            format!("no virtual network for environment {environment}"),
        )
    })?;
    let subnet = match tier {
        Tier::Web => format!("az-{env}-sub-001"),
        Tier::App => format!("az-{env}-app-sub-002"),
        Tier::Db => {
            return Err(Error::not_found(
                ResourceKind::Subnet,
                format!("no subnet for tier {tier} in environment {environment}"),
            ))
        }
    };
    Ok((format!("az-{env}-vnet-001"), subnet))
}

pub fn availability_set_name(environment: Environment) -> String {
    format!("az-{environment}-avs-001")
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetInfo {
    pub id: String,
    pub network_security_group: Option<String>,
}

/// A long-running operation accepted by ARM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArmOperation {
    pub resource_id: String,
    /// `Azure-AsyncOperation` URL. Absent when the resource was created
    /// synchronously.
    pub status_url: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub provisioning_state: String,
    pub nic_ids: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NicSpec {
    pub name: String,
    pub location: String,
    pub subnet_id: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

/// Everything the VM PUT needs. The admin password is filled in by the
/// backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmSpec {
    pub name: String,
    pub location: String,
    pub vm_size: String,
    pub availability_set_id: String,
    pub nic_id: String,
    pub image: ImageReference,
    pub os_family: OsFamily,
    pub admin_username: String,
    pub data_disks: Vec<DiskSpec>,
    pub tags: BTreeMap<String, String>,
}

impl VmSpec {
    pub fn os_disk_name(&self) -> String {
        format!("{}-os", self.name)
    }
}

/// The slice of ARM the pipeline consumes.
#[async_trait]
pub trait ArmApi: Send + Sync + 'static {
    async fn get_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        subnet: &str,
    ) -> Result<SubnetInfo, Error>;

    async fn list_image_versions(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
    ) -> Result<Vec<ImageCandidate>, Error>;

    /// Creates or updates an availability set and returns its id.
    async fn put_availability_set(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<String, Error>;

    async fn put_nic(
        &self,
        resource_group: &str,
        spec: &NicSpec,
    ) -> Result<ArmOperation, Error>;

    /// Private IPv4 address of a NIC, once allocated.
    async fn nic_address(&self, nic_id: &str) -> Result<Option<String>, Error>;

    async fn put_vm(
        &self,
        resource_group: &str,
        spec: &VmSpec,
    ) -> Result<ArmOperation, Error>;

    async fn operation_status(
        &self,
        status_url: &str,
    ) -> Result<OperationStatus, Error>;

    async fn get_vm(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualMachine, Error>;
}

/// Azure specific request fields.
#[derive(Clone, Debug, Default)]
pub struct AzureExtras {
    pub resource_group: Option<String>,
    pub vm_size: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AzurePrepared {
    pub resource_group: String,
    pub topology: Topology,
    pub image: ImageReference,
    pub availability_set_id: String,
}

pub struct AzurePipeline {
    config: AzureConfig,
    retry: LookupRetryConfig,
    arm: Arc<dyn ArmApi>,
}

impl AzurePipeline {
    pub fn new(
        config: AzureConfig,
        retry: LookupRetryConfig,
        arm: Arc<dyn ArmApi>,
    ) -> Self {
        AzurePipeline { config, retry, arm }
    }

    fn resource_group(&self, extras: &AzureExtras) -> Result<String, Error> {
        extras
            .resource_group
            .as_deref()
            .map(str::trim)
            .filter(|rg| !rg.is_empty())
            .map(str::to_string)
            .or_else(|| self.config.default_resource_group.clone())
            .ok_or_else(|| {
                Error::invalid_input(
                    "resourceGroup is required when no default is configured",
                )
            })
    }

    /// Status lookup for a single VM.
    pub async fn vm_status(
        &self,
        log: &Logger,
        resource_group: &str,
        name: &str,
    ) -> Result<InstanceRecord, Error> {
        let vm = retry_lookup(log, &self.retry, "get virtual machine", || {
            self.arm.get_vm(resource_group, name)
        })
        .await?;
        self.record_for(log, vm).await
    }

    async fn record_for(
        &self,
        log: &Logger,
        vm: VirtualMachine,
    ) -> Result<InstanceRecord, Error> {
        let address = match vm.nic_ids.first() {
            Some(nic_id) => {
                retry_lookup(log, &self.retry, "get network interface", || {
                    self.arm.nic_address(nic_id)
                })
                .await?
            }
            None => None,
        };
        Ok(InstanceRecord {
            provider_id: Some(vm.id),
            name: vm.name,
            status: vm.provisioning_state,
            address: NetworkAddress::from_optional(address),
            zone: Some(self.config.location.clone()),
        })
    }

    async fn resolve_image(
        &self,
        log: &Logger,
        filter: &CatalogFilter,
    ) -> Result<ImageReference, Error> {
        let CatalogFilter::Sku { publisher, offer, sku } = filter else {
            return Err(Error::internal(format!(
                "ARM cannot resolve images by {filter}"
            )));
        };
        let versions =
            retry_lookup(log, &self.retry, "list image versions", || {
                self.arm.list_image_versions(
                    &self.config.location,
                    publisher,
                    offer,
                    sku,
                )
            })
            .await?;
        let ResolvedImage { reference, version } =
            select_latest(versions, filter)?;
        Ok(ImageReference {
            publisher: publisher.to_string(),
            offer: offer.to_string(),
            sku: sku.clone(),
            version: version.unwrap_or(reference),
        })
    }

    async fn await_operation(
        &self,
        description: &str,
        operation: &ArmOperation,
    ) -> Result<(), Error> {
        let Some(status_url) = &operation.status_url else {
            return Ok(());
        };
        wait_for_condition(
            description,
            || async {
                match self.arm.operation_status(status_url).await? {
                    OperationStatus::InProgress => Err(CondCheckError::NotYet),
                    OperationStatus::Succeeded => Ok(()),
                    OperationStatus::Failed(message) => Err(
                        CondCheckError::Failed(Error::rejected(
                            description,
                            message,
                        )),
                    ),
                }
            },
            &Duration::from_millis(self.config.poll_interval_ms),
            &Duration::from_secs(self.config.poll_timeout_secs),
        )
        .await
    }
}

#[async_trait]
impl Pipeline for AzurePipeline {
    type Extras = AzureExtras;
    type Prepared = AzurePrepared;

    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn max_data_disks(&self) -> usize {
        self.config.max_data_disks
    }

    async fn prepare(
        &self,
        log: &Logger,
        plan: &RequestPlan<AzureExtras>,
    ) -> Result<AzurePrepared, Error> {
        let resource_group = self.resource_group(&plan.request.extras)?;
        let (vnet, subnet_name) =
            network_names(plan.request.environment, plan.request.tier)?;
        let subnet = retry_lookup(log, &self.retry, "get subnet", || {
            self.arm.get_subnet(
                &self.config.network_resource_group,
                &vnet,
                &subnet_name,
            )
        })
        .await?;
        debug!(log, "resolved subnet"; "subnet_id" => &subnet.id);
        let topology = Topology {
            network: vnet,
            security: SecurityBoundary::Inherited(
                subnet
                    .network_security_group
                    .clone()
                    .unwrap_or_else(|| subnet.id.clone()),
            ),
            subnet: subnet.id,
        };

        let image = self.resolve_image(log, &plan.image_filter).await?;

        let avs_name = availability_set_name(plan.request.environment);
        let availability_set_id = self
            .arm
            .put_availability_set(
                &resource_group,
                &avs_name,
                &self.config.location,
            )
            .await?;

        info!(
            log,
            "resolved shared prerequisites";
            "resource_group" => &resource_group,
            "subnet_id" => &topology.subnet,
            "image_version" => &image.version,
            "availability_set" => &avs_name,
        );
        Ok(AzurePrepared {
            resource_group,
            topology,
            image,
            availability_set_id,
        })
    }

    async fn provision_one(
        &self,
        log: &Logger,
        plan: &RequestPlan<AzureExtras>,
        prepared: &AzurePrepared,
        slot: &InstanceSlot,
    ) -> Result<InstanceRecord, Error> {
        let tags = slot.tags(plan).azure();
        let rg = &prepared.resource_group;

        let nic = NicSpec {
            name: format!("{}-nic-01", slot.name),
            location: self.config.location.clone(),
            subnet_id: prepared.topology.subnet.clone(),
            tags: tags.clone(),
        };
        info!(log, "creating network interface"; "nic" => &nic.name);
        let nic_operation = self.arm.put_nic(rg, &nic).await?;
        self.await_operation("create network interface", &nic_operation)
            .await?;

        let os_family = OsFamily::from_os_name(&plan.request.os.name)
            .ok_or_else(|| Error::UnsupportedOs {
                os: plan.request.os.name.clone(),
                version: plan.request.os.version.clone(),
            })?;
        let vm = VmSpec {
            name: slot.name.clone(),
            location: self.config.location.clone(),
            vm_size: plan
                .request
                .extras
                .vm_size
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| self.config.default_vm_size.clone()),
            availability_set_id: prepared.availability_set_id.clone(),
            nic_id: nic_operation.resource_id.clone(),
            image: prepared.image.clone(),
            os_family,
            admin_username: self.config.admin_username.clone(),
            data_disks: plan.disks.disks().to_vec(),
            tags,
        };
        info!(log, "creating virtual machine"; "vm_size" => &vm.vm_size);
        let vm_operation = self.arm.put_vm(rg, &vm).await?;
        self.await_operation("create virtual machine", &vm_operation).await?;

        let created = retry_lookup(log, &self.retry, "get virtual machine", || {
            self.arm.get_vm(rg, &slot.name)
        })
        .await?;
        self.record_for(log, created).await
    }
}
