// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory provider backends.
//!
//! Each fake is seeded with a small fixed inventory, records every create
//! call it receives, and can be told to fail or stall creates for specific
//! instance names.

use crate::aws::Ec2Api;
use crate::aws::Ec2Instance;
use crate::aws::LaunchSpec;
use crate::azure::ArmApi;
use crate::azure::ArmOperation;
use crate::azure::NicSpec;
use crate::azure::OperationStatus;
use crate::azure::SubnetInfo;
use crate::azure::VirtualMachine;
use crate::azure::VmSpec;
use crate::error::ResourceKind;
use crate::gcp::ComputeApi;
use crate::gcp::ComputeInstance;
use crate::gcp::InstanceSpec;
use crate::gcp::Network;
use crate::gcp::Subnetwork;
use crate::image::ImageCandidate;
use crate::topology::TaggedResource;
use crate::topology::NAME_TAG;
use crate::Error;
use async_trait::async_trait;
use chrono::TimeZone;
use chrono::Utc;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

/// How long a stalled create sleeps; far longer than any test deadline.
const STALL: Duration = Duration::from_secs(3600);

fn image(reference: &str, year: i32, product_code: Option<&str>) -> ImageCandidate {
    ImageCandidate {
        reference: reference.to_string(),
        version: Some(reference.to_string()),
        created_at: Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single(),
        product_codes: product_code.into_iter().map(str::to_string).collect(),
    }
}

#[derive(Default)]
struct Ec2State {
    launches: Vec<LaunchSpec>,
    instances: BTreeMap<String, (Ec2Instance, u32)>,
    fail: BTreeSet<String>,
    stall: BTreeSet<String>,
    pending_polls: u32,
}

/// EC2 with one tagged VPC per environment except base, whose VPC is only
/// named.
pub struct FakeEc2 {
    vpcs: Vec<TaggedResource>,
    subnets: Vec<TaggedResource>,
    groups: Vec<TaggedResource>,
    images: BTreeMap<String, Vec<ImageCandidate>>,
    state: Mutex<Ec2State>,
}

impl FakeEc2 {
    pub fn populated() -> FakeEc2 {
        let vpcs = vec![
            TaggedResource::new("vpc-base").with_tag(NAME_TAG, "shared-base-vpc"),
            TaggedResource::new("vpc-nonprod")
                .with_tag("env", "nonprod")
                .with_tag(NAME_TAG, "shared-nonProd-vpc"),
            TaggedResource::new("vpc-prod")
                .with_tag("env", "prod")
                .with_tag(NAME_TAG, "shared-prod-vpc"),
            TaggedResource::new("vpc-dev").with_tag("env", "dev"),
        ];

        let mut subnets = Vec::new();
        let mut groups = Vec::new();
        for (vpc, env) in [("vpc-prod", "prod"), ("vpc-dev", "dev")] {
            for tier in ["web", "app", "db"] {
                subnets.push(
                    TaggedResource::new(format!("subnet-{env}-{tier}"))
                        .in_network(vpc)
                        .with_tag("tier", tier),
                );
                groups.push(
                    TaggedResource::new(format!("sg-{env}-{tier}"))
                        .in_network(vpc)
                        .with_tag("tier", tier)
                        .with_tag(NAME_TAG, format!("{env}-{tier}-sg")),
                );
            }
        }
        // Base predates the tier tags, and has no db tier.
        for tier in ["web", "app"] {
            subnets.push(
                TaggedResource::new(format!("subnet-base-{tier}"))
                    .in_network("vpc-base")
                    .with_tag(NAME_TAG, format!("base-{tier}-subnet")),
            );
            groups.push(
                TaggedResource::new(format!("sg-base-{tier}"))
                    .in_network("vpc-base")
                    .with_tag(NAME_TAG, format!("base-{tier}-sg")),
            );
        }

        let images = BTreeMap::from([
            (
                String::from("RHEL-8_HVM-*"),
                vec![
                    image("ami-rhel-old", 2019, None),
                    image("ami-rhel-new", 2021, None),
                    image("ami-rhel-marketplace", 2023, Some("prod-code-1")),
                ],
            ),
            (
                String::from("Windows_Server-2019-English-Full-Base-*"),
                vec![image("ami-win2019", 2022, None)],
            ),
            (
                String::from("amzn2-ami-hvm-*"),
                vec![image("ami-amzn2", 2022, None)],
            ),
        ]);

        FakeEc2 {
            vpcs,
            subnets,
            groups,
            images,
            state: Mutex::new(Ec2State::default()),
        }
    }

    /// Drops a subnet from the inventory.
    pub fn without_subnet(mut self, id: &str) -> FakeEc2 {
        self.subnets.retain(|s| s.id != id);
        self
    }

    /// Every launch received, in arrival order.
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn fail_launch(&self, name: &str) {
        self.state.lock().unwrap().fail.insert(name.to_string());
    }

    pub fn stall_launch(&self, name: &str) {
        self.state.lock().unwrap().stall.insert(name.to_string());
    }

    /// Instances report `pending` for this many describe calls after launch.
    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().unwrap().pending_polls = polls;
    }

    fn in_vpc(resources: &[TaggedResource], vpc_id: &str) -> Vec<TaggedResource> {
        resources
            .iter()
            .filter(|r| r.network_id.as_deref() == Some(vpc_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Ec2Api for FakeEc2 {
    async fn describe_vpcs(&self) -> Result<Vec<TaggedResource>, Error> {
        Ok(self.vpcs.clone())
    }

    async fn describe_subnets(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<TaggedResource>, Error> {
        Ok(Self::in_vpc(&self.subnets, vpc_id))
    }

    async fn describe_security_groups(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<TaggedResource>, Error> {
        Ok(Self::in_vpc(&self.groups, vpc_id))
    }

    async fn describe_images(
        &self,
        name_pattern: &str,
        _owners: &[String],
    ) -> Result<Vec<ImageCandidate>, Error> {
        Ok(self.images.get(name_pattern).cloned().unwrap_or_default())
    }

    async fn run_instance(
        &self,
        spec: &LaunchSpec,
    ) -> Result<Ec2Instance, Error> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            state.launches.push(spec.clone());
            if state.fail.contains(&spec.name) {
                return Err(Error::rejected(
                    "run instances",
                    "InsufficientInstanceCapacity",
                ));
            }
            state.stall.contains(&spec.name)
        };
        if stall {
            tokio::time::sleep(STALL).await;
        }

        let mut state = self.state.lock().unwrap();
        let n = state.instances.len();
        let instance = Ec2Instance {
            instance_id: format!("i-{n:08x}"),
            state: String::from("pending"),
            private_ip: Some(format!("10.1.0.{}", 10 + n)),
            availability_zone: Some(String::from("us-east-2a")),
        };
        let polls = state.pending_polls;
        state
            .instances
            .insert(instance.instance_id.clone(), (instance.clone(), polls));
        Ok(instance)
    }

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Ec2Instance, Error> {
        let mut state = self.state.lock().unwrap();
        let (instance, polls) =
            state.instances.get_mut(instance_id).ok_or_else(|| {
                Error::not_found(ResourceKind::Instance, instance_id)
            })?;
        if *polls > 0 {
            *polls -= 1;
        } else {
            instance.state = String::from("running");
        }
        Ok(instance.clone())
    }
}

#[derive(Default)]
struct ComputeState {
    inserts: Vec<InstanceSpec>,
    instances: BTreeMap<(String, String), ComputeInstance>,
    fail: BTreeSet<String>,
}

/// Compute Engine with one network per environment.
pub struct FakeCompute {
    networks: Vec<Network>,
    subnetworks: Vec<Subnetwork>,
    zones: Vec<String>,
    state: Mutex<ComputeState>,
}

impl FakeCompute {
    const BASE: &'static str =
        "https://compute.googleapis.com/compute/v1/projects/proj";

    pub fn populated() -> FakeCompute {
        let network = |name: &str| Network {
            name: name.to_string(),
            self_link: format!("{}/global/networks/{name}", Self::BASE),
        };
        let subnetwork = |name: &str, network: &str| Subnetwork {
            name: name.to_string(),
            self_link: format!(
                "{}/regions/us-east1/subnetworks/{name}",
                Self::BASE
            ),
            network: format!("{}/global/networks/{network}", Self::BASE),
        };
        FakeCompute {
            networks: vec![
                network("base-net"),
                network("dev-net"),
                network("shared-p-vpc"),
            ],
            subnetworks: vec![
                subnetwork("prod-web-subnet", "shared-p-vpc"),
                subnetwork("prod-app-subnet", "shared-p-vpc"),
                subnetwork("prod-db-subnet", "shared-p-vpc"),
                subnetwork("dev-web-subnet", "dev-net"),
                subnetwork("dev-app-subnet", "dev-net"),
                // Named for dev but attached to the base network.
                subnetwork("dev-db-subnet", "base-net"),
                subnetwork("base-web-subnet", "base-net"),
                subnetwork("base-app-subnet", "base-net"),
            ],
            zones: vec![String::from("us-east1-c"), String::from("us-east1-b")],
            state: Mutex::new(ComputeState::default()),
        }
    }

    pub fn inserts(&self) -> Vec<InstanceSpec> {
        self.state.lock().unwrap().inserts.clone()
    }

    /// The insert of `name` is accepted but its operation ends in error.
    pub fn fail_insert(&self, name: &str) {
        self.state.lock().unwrap().fail.insert(name.to_string());
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn list_networks(&self) -> Result<Vec<Network>, Error> {
        Ok(self.networks.clone())
    }

    async fn list_subnetworks(
        &self,
        region: &str,
    ) -> Result<Vec<Subnetwork>, Error> {
        let marker = format!("/regions/{region}/");
        Ok(self
            .subnetworks
            .iter()
            .filter(|s| s.self_link.contains(&marker))
            .cloned()
            .collect())
    }

    async fn image_from_family(
        &self,
        _project: &str,
        family: &str,
    ) -> Result<ImageCandidate, Error> {
        Ok(image(&format!("{family}-v20200101"), 2020, None))
    }

    async fn list_zones(&self, region: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .zones
            .iter()
            .filter(|z| z.starts_with(region))
            .cloned()
            .collect())
    }

    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.inserts.push(spec.clone());
        if state.fail.contains(&spec.name) {
            return Err(Error::rejected(
                "insert instance",
                "QUOTA_EXCEEDED: quota 'CPUS' exceeded in region",
            ));
        }
        let n = state.instances.len();
        state.instances.insert(
            (spec.zone.clone(), spec.name.clone()),
            ComputeInstance {
                name: spec.name.clone(),
                zone: spec.zone.clone(),
                status: String::from("RUNNING"),
                network_ip: Some(format!("10.3.0.{}", 2 + n)),
            },
        );
        Ok(())
    }

    async fn get_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<ComputeInstance, Error> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::not_found(
                    ResourceKind::Instance,
                    format!("instance {name} in {zone}"),
                )
            })
    }
}

#[derive(Default)]
struct ArmState {
    availability_sets: Vec<String>,
    nics: Vec<NicSpec>,
    vms: Vec<VmSpec>,
    /// Status polls seen per operation URL.
    polls: BTreeMap<String, u32>,
    fail: BTreeSet<String>,
}

/// ARM with the shared vnets in place and a few marketplace image versions.
pub struct FakeArm {
    subnets: BTreeSet<String>,
    state: Mutex<ArmState>,
}

impl FakeArm {
    const OPERATIONS: &'static str = "https://management.example/operations";

    pub fn populated() -> FakeArm {
        let mut subnets = BTreeSet::new();
        for env in ["base", "nonProd", "Prod"] {
            subnets.insert(format!("az-{env}-vnet-001/az-{env}-sub-001"));
            subnets.insert(format!("az-{env}-vnet-001/az-{env}-app-sub-002"));
        }
        FakeArm { subnets, state: Mutex::new(ArmState::default()) }
    }

    pub fn availability_sets(&self) -> Vec<String> {
        self.state.lock().unwrap().availability_sets.clone()
    }

    pub fn nics(&self) -> Vec<NicSpec> {
        self.state.lock().unwrap().nics.clone()
    }

    pub fn vms(&self) -> Vec<VmSpec> {
        self.state.lock().unwrap().vms.clone()
    }

    /// The create of VM `name` is accepted but its operation fails.
    pub fn fail_vm(&self, name: &str) {
        self.state.lock().unwrap().fail.insert(name.to_string());
    }
}

#[async_trait]
impl ArmApi for FakeArm {
    async fn get_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        subnet: &str,
    ) -> Result<SubnetInfo, Error> {
        if !self.subnets.contains(&format!("{vnet}/{subnet}")) {
            return Err(Error::not_found(
                ResourceKind::Subnet,
                format!("{vnet}/{subnet}"),
            ));
        }
        Ok(SubnetInfo {
            id: format!(
                "/subscriptions/sub-1/resourceGroups/{resource_group}/\
                 providers/Microsoft.Network/virtualNetworks/{vnet}/subnets/\
                 {subnet}"
            ),
            network_security_group: Some(format!("/nsg/{subnet}-nsg")),
        })
    }

    async fn list_image_versions(
        &self,
        _location: &str,
        publisher: &str,
        _offer: &str,
        _sku: &str,
    ) -> Result<Vec<ImageCandidate>, Error> {
        let versions: &[&str] = match publisher {
            "MicrosoftWindowsServer" => {
                &["17763.9.2001", "17763.10.2001", "17763.2.2001"]
            }
            "RedHat" => &["8.0.2020", "8.1.2021"],
            _ => &[],
        };
        Ok(versions
            .iter()
            .map(|v| ImageCandidate {
                reference: format!("/images/{publisher}/{v}"),
                version: Some(v.to_string()),
                ..ImageCandidate::default()
            })
            .collect())
    }

    async fn put_availability_set(
        &self,
        resource_group: &str,
        name: &str,
        _location: &str,
    ) -> Result<String, Error> {
        self.state.lock().unwrap().availability_sets.push(name.to_string());
        Ok(format!("/resourceGroups/{resource_group}/availabilitySets/{name}"))
    }

    async fn put_nic(
        &self,
        resource_group: &str,
        spec: &NicSpec,
    ) -> Result<ArmOperation, Error> {
        self.state.lock().unwrap().nics.push(spec.clone());
        Ok(ArmOperation {
            resource_id: format!(
                "/resourceGroups/{resource_group}/networkInterfaces/{}",
                spec.name
            ),
            status_url: Some(format!("{}/nic-{}", Self::OPERATIONS, spec.name)),
        })
    }

    async fn nic_address(&self, nic_id: &str) -> Result<Option<String>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nics
            .iter()
            .position(|nic| nic_id.ends_with(&format!("/{}", nic.name)))
            .map(|i| format!("10.2.0.{}", 4 + i)))
    }

    async fn put_vm(
        &self,
        resource_group: &str,
        spec: &VmSpec,
    ) -> Result<ArmOperation, Error> {
        self.state.lock().unwrap().vms.push(spec.clone());
        Ok(ArmOperation {
            resource_id: format!(
                "/resourceGroups/{resource_group}/virtualMachines/{}",
                spec.name
            ),
            status_url: Some(format!("{}/vm-{}", Self::OPERATIONS, spec.name)),
        })
    }

    /// Every operation reports `InProgress` once before finishing.
    async fn operation_status(
        &self,
        status_url: &str,
    ) -> Result<OperationStatus, Error> {
        let mut state = self.state.lock().unwrap();
        let seen = state.polls.entry(status_url.to_string()).or_insert(0);
        *seen += 1;
        if *seen == 1 {
            return Ok(OperationStatus::InProgress);
        }
        let failed = status_url
            .rsplit_once("/vm-")
            .is_some_and(|(_, name)| state.fail.contains(name));
        Ok(if failed {
            OperationStatus::Failed(String::from(
                "AllocationFailed: allocation failed in the availability set",
            ))
        } else {
            OperationStatus::Succeeded
        })
    }

    async fn get_vm(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualMachine, Error> {
        let state = self.state.lock().unwrap();
        let vm = state
            .vms
            .iter()
            .find(|vm| vm.name == name && !state.fail.contains(name))
            .ok_or_else(|| {
                Error::not_found(
                    ResourceKind::Instance,
                    format!("virtual machine {resource_group}/{name}"),
                )
            })?;
        Ok(VirtualMachine {
            id: format!(
                "/resourceGroups/{resource_group}/virtualMachines/{name}"
            ),
            name: vm.name.clone(),
            provisioning_state: String::from("Succeeded"),
            nic_ids: vec![vm.nic_id.clone()],
        })
    }
}
