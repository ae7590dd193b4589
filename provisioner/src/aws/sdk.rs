// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`Ec2Api`] over the AWS SDK.

use super::AwsConfig;
use super::Ec2Api;
use super::Ec2Instance;
use super::LaunchSpec;
use crate::error::ResourceKind;
use crate::image::ImageCandidate;
use crate::topology::TaggedResource;
use crate::topology::NAME_TAG;
use crate::Error;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::error::SdkError;
use aws_sdk_ec2::types::BlockDeviceMapping;
use aws_sdk_ec2::types::EbsBlockDevice;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::types::Instance;
use aws_sdk_ec2::types::InstanceType;
use aws_sdk_ec2::types::ResourceType;
use aws_sdk_ec2::types::Tag;
use aws_sdk_ec2::types::TagSpecification;
use aws_sdk_ec2::types::VolumeType;
use aws_sdk_ec2::Client;
use chrono::DateTime;
use chrono::Utc;

/// Error codes EC2 uses for throttling and server-side trouble.
const TRANSIENT_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "Throttling",
    "ThrottlingException",
    "InternalError",
    "ServiceUnavailable",
    "Unavailable",
];

fn sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(context) => {
            let code = context.err().code().unwrap_or_default();
            if TRANSIENT_CODES.contains(&code) {
                Error::unavailable(operation, message)
            } else {
                Error::rejected(operation, message)
            }
        }
        SdkError::ConstructionFailure(_) => {
            Error::internal(format!("building {operation} request: {message}"))
        }
        _ => Error::unavailable(operation, message),
    }
}

fn tags_to_map<'a>(
    resource: TaggedResource,
    tags: impl IntoIterator<Item = &'a Tag>,
) -> TaggedResource {
    tags.into_iter().fold(resource, |r, tag| match (tag.key(), tag.value()) {
        (Some(k), Some(v)) => r.with_tag(k, v),
        _ => r,
    })
}

fn to_ec2_instance(instance: &Instance) -> Result<Ec2Instance, Error> {
    let instance_id = instance
        .instance_id()
        .ok_or_else(|| Error::internal("EC2 returned an instance without id"))?
        .to_string();
    let state = instance
        .state()
        .and_then(|s| s.name())
        .map(|name| name.as_str().to_string())
        .unwrap_or_else(|| String::from("unknown"));
    Ok(Ec2Instance {
        instance_id,
        state,
        private_ip: instance.private_ip_address().map(str::to_string),
        availability_zone: instance
            .placement()
            .and_then(|p| p.availability_zone())
            .map(str::to_string),
    })
}

fn vpc_filter(vpc_id: &str) -> Filter {
    Filter::builder().name("vpc-id").values(vpc_id).build()
}

/// Talks to EC2 with credentials from the default provider chain.
pub struct SdkEc2 {
    client: Client,
}

impl SdkEc2 {
    pub async fn connect(config: &AwsConfig) -> SdkEc2 {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;
        SdkEc2 { client: Client::new(&sdk_config) }
    }
}

/// A missing creation date is `None`. A date that does not parse fails the
/// whole image lookup.
fn parse_creation_date(
    image_id: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, Error> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|d| Some(d.with_timezone(&Utc)))
        .map_err(|e| {
            Error::internal(format!(
                "image {image_id} has unreadable creation date {raw:?}: {e}"
            ))
        })
}

#[async_trait]
impl Ec2Api for SdkEc2 {
    async fn describe_vpcs(&self) -> Result<Vec<TaggedResource>, Error> {
        let mut vpcs = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .client
                .describe_vpcs()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("describe vpcs", e))?;
            for vpc in output.vpcs() {
                let Some(id) = vpc.vpc_id() else { continue };
                vpcs.push(tags_to_map(TaggedResource::new(id), vpc.tags()));
            }
            match output.next_token() {
                Some(token) if !token.is_empty() => {
                    next_token = Some(token.to_string())
                }
                _ => break,
            }
        }
        Ok(vpcs)
    }

    async fn describe_subnets(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<TaggedResource>, Error> {
        let mut subnets = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .client
                .describe_subnets()
                .filters(vpc_filter(vpc_id))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("describe subnets", e))?;
            for subnet in output.subnets() {
                let Some(id) = subnet.subnet_id() else { continue };
                let resource = TaggedResource::new(id).in_network(vpc_id);
                subnets.push(tags_to_map(resource, subnet.tags()));
            }
            match output.next_token() {
                Some(token) if !token.is_empty() => {
                    next_token = Some(token.to_string())
                }
                _ => break,
            }
        }
        Ok(subnets)
    }

    async fn describe_security_groups(
        &self,
        vpc_id: &str,
    ) -> Result<Vec<TaggedResource>, Error> {
        let mut groups = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .client
                .describe_security_groups()
                .filters(vpc_filter(vpc_id))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("describe security groups", e))?;
            for group in output.security_groups() {
                let Some(id) = group.group_id() else { continue };
                let mut resource = tags_to_map(
                    TaggedResource::new(id).in_network(vpc_id),
                    group.tags(),
                );
                if resource.name().is_none() {
                    if let Some(name) = group.group_name() {
                        resource = resource.with_tag(NAME_TAG, name);
                    }
                }
                groups.push(resource);
            }
            match output.next_token() {
                Some(token) if !token.is_empty() => {
                    next_token = Some(token.to_string())
                }
                _ => break,
            }
        }
        Ok(groups)
    }

    async fn describe_images(
        &self,
        name_pattern: &str,
        owners: &[String],
    ) -> Result<Vec<ImageCandidate>, Error> {
        let output = self
            .client
            .describe_images()
            .set_owners((!owners.is_empty()).then(|| owners.to_vec()))
            .filters(Filter::builder().name("name").values(name_pattern).build())
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await
            .map_err(|e| sdk_error("describe images", e))?;

        output
            .images()
            .iter()
            .filter_map(|image| {
                let reference = image.image_id()?.to_string();
                Some((reference, image))
            })
            .map(|(reference, image)| {
                let created_at =
                    parse_creation_date(&reference, image.creation_date())?;
                Ok(ImageCandidate {
                    reference,
                    version: image.name().map(str::to_string),
                    created_at,
                    product_codes: image
                        .product_codes()
                        .iter()
                        .filter_map(|p| p.product_code_id())
                        .map(str::to_string)
                        .collect(),
                })
            })
            .collect()
    }

    async fn run_instance(
        &self,
        spec: &LaunchSpec,
    ) -> Result<Ec2Instance, Error> {
        let tags: Vec<Tag> = spec
            .tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();

        let mut mappings = Vec::with_capacity(spec.data_disks.len());
        for disk in &spec.data_disks {
            let size = i32::try_from(disk.size_gb).map_err(|_| {
                Error::InvalidSize {
                    entry: disk.size_gb.to_string(),
                    reason: String::from("too large for an EBS volume"),
                }
            })?;
            let ebs = EbsBlockDevice::builder()
                .volume_size(size)
                .volume_type(VolumeType::Gp2)
                .encrypted(true)
                .delete_on_termination(false)
                .build();
            mappings.push(
                BlockDeviceMapping::builder()
                    .device_name(disk.device_name())
                    .ebs(ebs)
                    .build(),
            );
        }

        let output = self
            .client
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .subnet_id(&spec.subnet_id)
            .set_security_group_ids(Some(spec.security_group_ids.clone()))
            .set_key_name(spec.key_name.clone())
            .set_block_device_mappings(
                (!mappings.is_empty()).then_some(mappings),
            )
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .set_tags(Some(tags))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("run instances", e))?;

        let instance = output.instances().first().ok_or_else(|| {
            Error::internal(format!("EC2 launched nothing for {}", spec.name))
        })?;
        to_ec2_instance(instance)
    }

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Ec2Instance, Error> {
        let output = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| sdk_error("describe instances", e))?;
        let instance = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .ok_or_else(|| {
                Error::not_found(
                    ResourceKind::Instance,
                    format!("instance id {instance_id}"),
                )
            })?;
        to_ec2_instance(instance)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_creation_date() {
        let parsed =
            parse_creation_date("ami-1", Some("2021-03-04T05:06:07.000Z"))
                .unwrap()
                .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2021-03-04T05:06:07+00:00");
        assert_eq!(parse_creation_date("ami-1", None), Ok(None));

        let error = parse_creation_date("ami-2", Some("last tuesday"))
            .unwrap_err();
        assert!(matches!(error, Error::Internal { .. }));
        assert!(error.to_string().contains("ami-2"), "{error}");
    }
}
