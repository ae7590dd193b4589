// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! EC2 pipeline.
//!
//! Topology comes from enumerating VPCs, subnets and security groups and
//! matching them by tag. The image is the newest unencumbered AMI whose name
//! matches the OS pattern. Every instance is launched with its own
//! `RunInstances` call so that each index gets its own name.

mod sdk;

pub use sdk::SdkEc2;

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
use crate::poll::wait_for_condition;
use crate::poll::CondCheckError;
use crate::topology::require;
use crate::topology::select_tagged;
use crate::topology::SecurityBoundary;
use crate::topology::TagQuery;
use crate::topology::TaggedResource;
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

/// `[aws]` configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    /// Key pair attached to every instance, if any.
    pub key_name: Option<String>,
    pub default_instance_type: String,
    pub max_data_disks: usize,
    /// Structured tag key carrying a VPC's environment.
    pub environment_tag: String,
    /// Structured tag key carrying a subnet's or security group's tier.
    pub tier_tag: String,
    /// Restrict AMI lookups to these owners (account ids or aliases).
    pub image_owners: Vec<String>,
    /// Wait for each instance to leave `pending` before reporting it. When
    /// off, records report `pending` and the address EC2 assigned at launch.
    pub wait_for_running: bool,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    /// Alternate EC2 endpoint, e.g. for a local emulator.
    pub endpoint_url: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        AwsConfig {
            region: String::from("us-east-2"),
            key_name: None,
            default_instance_type: String::from("t2.micro"),
            max_data_disks: 4,
            environment_tag: String::from("env"),
            tier_tag: String::from("tier"),
            image_owners: Vec::new(),
            wait_for_running: true,
            poll_interval_ms: 5000,
            poll_timeout_secs: 600,
            endpoint_url: None,
        }
    }
}

/// An EC2 instance as reported by `RunInstances` or `DescribeInstances`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ec2Instance {
    pub instance_id: String,
    /// Lowercase state name, e.g. `pending`, `running`.
    pub state: String,
    pub private_ip: Option<String>,
    pub availability_zone: Option<String>,
}

/// Everything `RunInstances` needs for one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub key_name: Option<String>,
    /// Attached as encrypted gp2 volumes that survive termination.
    pub data_disks: Vec<DiskSpec>,
    pub tags: BTreeMap<String, String>,
}

/// The slice of the EC2 API the pipeline consumes.
#[async_trait]
pub trait Ec2Api: Send + Sync + 'static {
    async fn describe_vpcs(&self) -> Result<Vec<TaggedResource>, Error>;

    async fn describe_subnets(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<TaggedResource>, Error>;

    /// Groups without a `Name` tag report their group name under `Name`.
    async fn describe_security_groups(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<TaggedResource>, Error>;

    async fn describe_images(
        &self,
        name_pattern: &str,
        owners: &[String],
    ) -> Result<Vec<ImageCandidate>, Error>;

    async fn run_instance(&self, spec: &LaunchSpec)
        -> Result<Ec2Instance, Error>;

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Ec2Instance, Error>;
}

/// AWS specific request fields.
#[derive(Clone, Debug, Default)]
pub struct AwsExtras {
    pub instance_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AwsPrepared {
    pub topology: Topology,
    pub image: ResolvedImage,
}

/// Name token for VPCs without an environment tag.
fn vpc_name_token(environment: Environment) -> &'static str {
    match environment {
        Environment::Base => "base",
        Environment::Dev => "dev",
        Environment::Nonprod => "nonProd",
        Environment::Prod => "prod",
    }
}

pub struct AwsPipeline {
    config: AwsConfig,
    retry: LookupRetryConfig,
    ec2: Arc<dyn Ec2Api>,
}

impl AwsPipeline {
    pub fn new(
        config: AwsConfig,
        retry: LookupRetryConfig,
        ec2: Arc<dyn Ec2Api>,
    ) -> Self {
        AwsPipeline { config, retry, ec2 }
    }

    async fn resolve_topology(
        &self,
        log: &Logger,
        plan: &RequestPlan<AwsExtras>,
    ) -> Result<Topology, Error> {
        let environment = plan.request.environment;
        let tier = plan.request.tier;

        let vpcs = retry_lookup(log, &self.retry, "describe vpcs", || {
            self.ec2.describe_vpcs()
        })
        .await?;
        let vpc_query = TagQuery {
            key: &self.config.environment_tag,
            value: environment.as_str(),
            name_token: vpc_name_token(environment),
        };
        let vpc = require(
            select_tagged(&vpcs, vpc_query),
            ResourceKind::Network,
            || format!("no VPC matches {vpc_query}"),
        )?;
        debug!(log, "resolved VPC"; "vpc_id" => &vpc.id);

        let tier_query = TagQuery {
            key: &self.config.tier_tag,
            value: tier.as_str(),
            name_token: tier.as_str(),
        };
        let subnets =
            retry_lookup(log, &self.retry, "describe subnets", || {
                self.ec2.describe_subnets(&vpc.id)
            })
            .await?;
        let subnet = require(
            select_tagged(&subnets, tier_query),
            ResourceKind::Subnet,
            || format!("no subnet in {} matches {tier_query}", vpc.id),
        )?;
        debug!(log, "resolved subnet"; "subnet_id" => &subnet.id);

        let groups =
            retry_lookup(log, &self.retry, "describe security groups", || {
                self.ec2.describe_security_groups(&vpc.id)
            })
            .await?;
        let group = require(
            select_tagged(&groups, tier_query),
            ResourceKind::SecurityBoundary,
            || format!("no security group in {} matches {tier_query}", vpc.id),
        )?;
        debug!(log, "resolved security group"; "group_id" => &group.id);

        Ok(Topology {
            network: vpc.id.clone(),
            subnet: subnet.id.clone(),
            security: SecurityBoundary::Group(group.id.clone()),
        })
    }

    async fn resolve_image(
        &self,
        log: &Logger,
        filter: &CatalogFilter,
    ) -> Result<ResolvedImage, Error> {
        let CatalogFilter::NamePattern { pattern } = filter else {
            return Err(Error::internal(format!(
                "EC2 cannot resolve images by {filter}"
            )));
        };
        let candidates =
            retry_lookup(log, &self.retry, "describe images", || {
                self.ec2.describe_images(pattern, &self.config.image_owners)
            })
            .await?;
        debug!(log, "image candidates"; "count" => candidates.len());
        select_latest(candidates, filter)
    }

    async fn await_running(
        &self,
        instance: Ec2Instance,
    ) -> Result<Ec2Instance, Error> {
        if !self.config.wait_for_running || instance.state != "pending" {
            return Ok(instance);
        }
        let operation = format!("waiting for {} to run", instance.instance_id);
        wait_for_condition(
            &operation,
            || async {
                let current =
                    self.ec2.describe_instance(&instance.instance_id).await?;
                match current.state.as_str() {
                    "pending" => Err(CondCheckError::NotYet),
                    "running" => Ok(current),
                    other => Err(CondCheckError::Failed(Error::rejected(
                        "run instances",
                        format!(
                            "instance {} entered state {other}",
                            current.instance_id
                        ),
                    ))),
                }
            },
            &Duration::from_millis(self.config.poll_interval_ms),
            &Duration::from_secs(self.config.poll_timeout_secs),
        )
        .await
    }
}

#[async_trait]
impl Pipeline for AwsPipeline {
    type Extras = AwsExtras;
    type Prepared = AwsPrepared;

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn max_data_disks(&self) -> usize {
        self.config.max_data_disks
    }

    async fn prepare(
        &self,
        log: &Logger,
        plan: &RequestPlan<AwsExtras>,
    ) -> Result<AwsPrepared, Error> {
        let topology = self.resolve_topology(log, plan).await?;
        let image = self.resolve_image(log, &plan.image_filter).await?;
        info!(
            log,
            "resolved shared prerequisites";
            "vpc_id" => &topology.network,
            "subnet_id" => &topology.subnet,
            "security" => %topology.security,
            "image_id" => &image.reference,
        );
        Ok(AwsPrepared { topology, image })
    }

    async fn provision_one(
        &self,
        log: &Logger,
        plan: &RequestPlan<AwsExtras>,
        prepared: &AwsPrepared,
        slot: &InstanceSlot,
    ) -> Result<InstanceRecord, Error> {
        let security_group_ids = match &prepared.topology.security {
            SecurityBoundary::Group(id) => vec![id.clone()],
            SecurityBoundary::Inherited(_) => Vec::new(),
        };
        let spec = LaunchSpec {
            name: slot.name.clone(),
            image_id: prepared.image.reference.clone(),
            instance_type: plan
                .request
                .extras
                .instance_type
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| self.config.default_instance_type.clone()),
            subnet_id: prepared.topology.subnet.clone(),
            security_group_ids,
            key_name: self.config.key_name.clone(),
            data_disks: plan.disks.disks().to_vec(),
            tags: slot.tags(plan).aws(),
        };

        info!(
            log,
            "launching instance";
            "instance_type" => &spec.instance_type,
        );
        let instance = self.ec2.run_instance(&spec).await?;
        let instance = self.await_running(instance).await?;

        Ok(InstanceRecord {
            name: slot.name.clone(),
            status: instance.state,
            address: NetworkAddress::from_optional(instance.private_ip),
            zone: instance.availability_zone,
            provider_id: Some(instance.instance_id),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fakes::FakeEc2;
    use crate::fanout::FanoutConfig;
    use crate::fanout::Orchestrator;
    use crate::params::CountRange;
    use crate::params::OsSpec;
    use crate::ProvisionRequest;
    use crate::Tier;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn request(
        environment: Environment,
        tier: Tier,
        count: &str,
    ) -> ProvisionRequest<AwsExtras> {
        ProvisionRequest {
            environment,
            tier,
            os: OsSpec::new("redhat", "8"),
            disk_sizes: String::from("100GB,200GB"),
            count: count.parse::<CountRange>().unwrap(),
            app_code: String::from("app"),
            change_number: String::from("CHG0001"),
            extras: AwsExtras::default(),
        }
    }

    fn pipeline(ec2: &Arc<FakeEc2>) -> Arc<AwsPipeline> {
        Arc::new(AwsPipeline::new(
            AwsConfig {
                key_name: Some(String::from("ops")),
                ..AwsConfig::default()
            },
            LookupRetryConfig::default(),
            ec2.clone(),
        ))
    }

    #[test]
    fn test_config_defaults() {
        let config: AwsConfig = toml::from_str(
            r#"
            region = "us-west-2"
            image_owners = ["amazon"]
            "#,
        )
        .unwrap();
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.image_owners, vec!["amazon"]);
        assert_eq!(config.default_instance_type, "t2.micro");
        assert_eq!(config.environment_tag, "env");
        assert!(config.wait_for_running);
    }

    #[tokio::test]
    async fn test_provision_prod_db() {
        let ec2 = Arc::new(FakeEc2::populated());
        let pipeline = pipeline(&ec2);
        let result = Orchestrator::new(FanoutConfig::default())
            .provision(
                &test_logger(),
                pipeline.clone(),
                request(Environment::Prod, Tier::Db, "1-2"),
            )
            .await
            .unwrap();
        assert_eq!(result.slots.len(), 2);

        let launches = ec2.launches();
        assert_eq!(launches.len(), 2);
        let first = launches.iter().find(|l| l.name == "awspxepapp01").unwrap();
        assert_eq!(first.subnet_id, "subnet-prod-db");
        assert_eq!(first.security_group_ids, vec!["sg-prod-db"]);
        assert_eq!(first.image_id, "ami-rhel-new");
        assert_eq!(first.instance_type, "t2.micro");
        assert_eq!(first.key_name.as_deref(), Some("ops"));
        assert_eq!(first.data_disks.len(), 2);
        assert_eq!(first.tags["env"], "prod");
        assert_eq!(first.tags["ChangeNum"], "CHG0001");
        assert_eq!(first.tags["Name"], "awspxepapp01");

        let record = result.slots[0].result.as_ref().unwrap();
        assert_eq!(record.status, "running");
        assert!(record.provider_id.is_some());
    }

    #[tokio::test]
    async fn test_prod_db_without_db_subnet_makes_no_launches() {
        let ec2 =
            Arc::new(FakeEc2::populated().without_subnet("subnet-prod-db"));
        let pipeline = pipeline(&ec2);
        let error = Orchestrator::new(FanoutConfig::default())
            .provision(
                &test_logger(),
                pipeline.clone(),
                request(Environment::Prod, Tier::Db, "1-2"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::ResourceNotFound { kind: ResourceKind::Subnet, .. }
        ));
        assert!(ec2.launches().is_empty());
    }

    #[tokio::test]
    async fn test_no_wait_reports_pending() {
        let ec2 = Arc::new(FakeEc2::populated());
        let pipeline = Arc::new(AwsPipeline::new(
            AwsConfig { wait_for_running: false, ..AwsConfig::default() },
            LookupRetryConfig::default(),
            ec2.clone(),
        ));
        let result = Orchestrator::new(FanoutConfig::default())
            .provision(
                &test_logger(),
                pipeline,
                request(Environment::Prod, Tier::Web, "1-1"),
            )
            .await
            .unwrap();
        let record = result.slots[0].result.as_ref().unwrap();
        assert_eq!(record.status, "pending");
    }

    #[tokio::test]
    async fn test_missing_subnet_makes_no_launches() {
        let ec2 = Arc::new(FakeEc2::populated());
        let pipeline = pipeline(&ec2);
        let error = Orchestrator::new(FanoutConfig::default())
            .provision(
                &test_logger(),
                pipeline.clone(),
                request(Environment::Base, Tier::Db, "1-3"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::ResourceNotFound { kind: ResourceKind::Subnet, .. }
        ));
        assert!(ec2.launches().is_empty());
    }

    #[tokio::test]
    async fn test_untagged_vpc_matched_by_name() {
        let ec2 = Arc::new(FakeEc2::populated());
        let pipeline = pipeline(&ec2);
        let result = Orchestrator::new(FanoutConfig::default())
            .provision(
                &test_logger(),
                pipeline.clone(),
                request(Environment::Base, Tier::Web, "1-1"),
            )
            .await
            .unwrap();
        assert!(result.slots[0].result.is_ok());
        assert_eq!(ec2.launches()[0].subnet_id, "subnet-base-web");
    }

    #[tokio::test]
    async fn test_wait_for_running() {
        let ec2 = Arc::new(FakeEc2::populated());
        ec2.set_pending_polls(2);
        let pipeline = Arc::new(AwsPipeline::new(
            AwsConfig {
                poll_interval_ms: 1,
                ..AwsConfig::default()
            },
            LookupRetryConfig::default(),
            ec2.clone(),
        ));
        let result = Orchestrator::new(FanoutConfig::default())
            .provision(
                &test_logger(),
                pipeline,
                request(Environment::Prod, Tier::Web, "1-1"),
            )
            .await
            .unwrap();
        let record = result.slots[0].result.as_ref().unwrap();
        assert_eq!(record.status, "running");
        assert_eq!(
            record.address,
            NetworkAddress::Assigned(String::from("10.1.0.10"))
        );
    }

    #[tokio::test]
    async fn test_launch_failure_is_inline() {
        let ec2 = Arc::new(FakeEc2::populated());
        ec2.fail_launch("awspxepapp02");
        let pipeline = pipeline(&ec2);
        let result = Orchestrator::new(FanoutConfig::default())
            .provision(
                &test_logger(),
                pipeline,
                request(Environment::Prod, Tier::App, "1-3"),
            )
            .await
            .unwrap();
        assert!(result.slots[0].result.is_ok());
        assert!(matches!(
            result.slots[1].result,
            Err(Error::RemoteRejected { .. })
        ));
        assert!(result.slots[2].result.is_ok());
    }
}
