// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`ComputeApi`] on the Google Cloud Compute Engine v1 client library.

use super::ComputeApi;
use super::ComputeInstance;
use super::GcpConfig;
use super::InstanceSpec;
use super::Network;
use super::Subnetwork;
use super::DEFAULT_SCOPES;
use crate::error::ResourceKind;
use crate::image::ImageCandidate;
use crate::Error;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use google_cloud_compute_v1::client::Images;
use google_cloud_compute_v1::client::Instances;
use google_cloud_compute_v1::client::Networks;
use google_cloud_compute_v1::client::Subnetworks;
use google_cloud_compute_v1::client::Zones;
use google_cloud_compute_v1::model::AttachedDisk;
use google_cloud_compute_v1::model::AttachedDiskInitializeParams;
use google_cloud_compute_v1::model::Instance;
use google_cloud_compute_v1::model::NetworkInterface;
use google_cloud_compute_v1::model::Operation;
use google_cloud_compute_v1::model::ServiceAccount;
use google_cloud_gax::paginator::ItemPaginator as _;
use google_cloud_lro::Poller;

type GaxError = google_cloud_gax::error::Error;

/// Sorts a client library error into the shared taxonomy. `not_found` is the
/// lookup a 404 refers to, for calls where a 404 means a missing resource.
fn compute_error(
    operation: &str,
    not_found: Option<(ResourceKind, String)>,
    err: GaxError,
) -> Error {
    let message = match err.status() {
        Some(status) if !status.message.is_empty() => status.message.clone(),
        _ => err.to_string(),
    };
    match (err.http_status_code(), not_found) {
        (Some(404), Some((kind, lookup))) => Error::not_found(kind, lookup),
        (Some(429), _) => Error::unavailable(operation, message),
        (Some(code), _) if code >= 500 => Error::unavailable(operation, message),
        (Some(_), _) => Error::rejected(operation, message),
        // No HTTP response at all: the request never reached the API.
        (None, _) if err.status().is_none() => {
            Error::unavailable(operation, message)
        }
        (None, _) => Error::rejected(operation, message),
    }
}

fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Collects the per-entry errors of a finished operation.
fn operation_error(operation: &Operation) -> Option<String> {
    let errors = &operation.error.as_ref()?.errors;
    if errors.is_empty() {
        return None;
    }
    Some(
        errors
            .iter()
            .map(|entry| {
                format!(
                    "{}: {}",
                    entry.code.as_deref().unwrap_or_default(),
                    entry.message.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn instance_body(spec: &InstanceSpec) -> Instance {
    let zone = &spec.zone;
    let boot = AttachedDisk::new()
        .set_boot(true)
        .set_auto_delete(true)
        .set_device_name(spec.boot_disk_name())
        .set_initialize_params(
            AttachedDiskInitializeParams::new()
                .set_disk_name(spec.boot_disk_name())
                .set_source_image(&spec.source_image),
        );
    let data = spec.data_disks.iter().map(|disk| {
        let name = disk.disk_name(&spec.name);
        AttachedDisk::new()
            .set_boot(false)
            .set_auto_delete(false)
            .set_device_name(&name)
            .set_initialize_params(
                AttachedDiskInitializeParams::new()
                    .set_disk_name(&name)
                    .set_disk_size_gb(i64::from(disk.size_gb))
                    .set_disk_type(format!(
                        "zones/{zone}/diskTypes/pd-standard"
                    )),
            )
    });

    let mut instance = Instance::new()
        .set_name(&spec.name)
        .set_machine_type(format!(
            "zones/{zone}/machineTypes/{}",
            spec.machine_type
        ))
        .set_labels(spec.labels.clone())
        .set_disks(std::iter::once(boot).chain(data))
        .set_network_interfaces([NetworkInterface::new()
            .set_network(&spec.network)
            .set_subnetwork(&spec.subnetwork)]);
    if let Some(description) = &spec.description {
        instance = instance.set_description(description);
    }
    if let Some(email) = &spec.service_account {
        instance = instance.set_service_accounts([ServiceAccount::new()
            .set_email(email)
            .set_scopes(DEFAULT_SCOPES.iter().copied())]);
    }
    instance
}

/// Compute Engine clients for one project, authenticated with Application
/// Default Credentials.
pub struct SdkCompute {
    project: String,
    instances: Instances,
    networks: Networks,
    subnetworks: Subnetworks,
    images: Images,
    zones: Zones,
}

impl SdkCompute {
    pub async fn new(config: &GcpConfig) -> Result<SdkCompute, Error> {
        let connect = |e: google_cloud_gax::client_builder::Error| {
            Error::unavailable("connect to Compute Engine", e.to_string())
        };
        // Every client builder takes the same settings.
        macro_rules! build {
            ($client:ty) => {{
                let builder = <$client>::builder();
                let builder = match &config.endpoint {
                    Some(endpoint) => builder.with_endpoint(endpoint),
                    None => builder,
                };
                builder.build().await.map_err(connect)?
            }};
        }
        Ok(SdkCompute {
            project: config.project_id.clone(),
            instances: build!(Instances),
            networks: build!(Networks),
            subnetworks: build!(Subnetworks),
            images: build!(Images),
            zones: build!(Zones),
        })
    }
}

#[async_trait]
impl ComputeApi for SdkCompute {
    async fn list_networks(&self) -> Result<Vec<Network>, Error> {
        let mut items =
            self.networks.list().set_project(&self.project).by_item();
        let mut networks = Vec::new();
        while let Some(network) = items.next().await {
            let network =
                network.map_err(|e| compute_error("list networks", None, e))?;
            networks.push(Network {
                name: network.name.unwrap_or_default(),
                self_link: network.self_link.unwrap_or_default(),
            });
        }
        Ok(networks)
    }

    async fn list_subnetworks(
        &self,
        region: &str,
    ) -> Result<Vec<Subnetwork>, Error> {
        let mut items = self
            .subnetworks
            .list()
            .set_project(&self.project)
            .set_region(region)
            .by_item();
        let mut subnetworks = Vec::new();
        while let Some(subnetwork) = items.next().await {
            let subnetwork = subnetwork
                .map_err(|e| compute_error("list subnetworks", None, e))?;
            subnetworks.push(Subnetwork {
                name: subnetwork.name.unwrap_or_default(),
                self_link: subnetwork.self_link.unwrap_or_default(),
                network: subnetwork.network.unwrap_or_default(),
            });
        }
        Ok(subnetworks)
    }

    async fn image_from_family(
        &self,
        project: &str,
        family: &str,
    ) -> Result<ImageCandidate, Error> {
        let image = self
            .images
            .get_from_family()
            .set_project(project)
            .set_family(family)
            .send()
            .await
            .map_err(|e| {
                compute_error(
                    "get image family",
                    Some((
                        ResourceKind::Image,
                        format!("image family {project}/{family}"),
                    )),
                    e,
                )
            })?;
        Ok(ImageCandidate {
            reference: image.self_link.unwrap_or_default(),
            created_at: image
                .creation_timestamp
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            version: image.name,
            product_codes: Vec::new(),
        })
    }

    async fn list_zones(&self, region: &str) -> Result<Vec<String>, Error> {
        let mut items = self.zones.list().set_project(&self.project).by_item();
        let prefix = format!("{region}-");
        let mut zones = Vec::new();
        while let Some(zone) = items.next().await {
            let zone = zone.map_err(|e| compute_error("list zones", None, e))?;
            let up = zone.status.as_ref().and_then(|s| s.name()) == Some("UP");
            match zone.name {
                Some(name) if up && name.starts_with(&prefix) => {
                    zones.push(name)
                }
                _ => (),
            }
        }
        Ok(zones)
    }

    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<(), Error> {
        let operation = self
            .instances
            .insert()
            .set_project(&self.project)
            .set_zone(&spec.zone)
            .set_body(instance_body(spec))
            .poller()
            .until_done()
            .await
            .map_err(|e| compute_error("insert instance", None, e))?;
        match operation_error(&operation) {
            Some(message) => Err(Error::rejected("insert instance", message)),
            None => Ok(()),
        }
    }

    async fn get_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<ComputeInstance, Error> {
        let instance = self
            .instances
            .get()
            .set_project(&self.project)
            .set_zone(zone)
            .set_instance(name)
            .send()
            .await
            .map_err(|e| {
                compute_error(
                    "get instance",
                    Some((
                        ResourceKind::Instance,
                        format!("instance {name} in {zone}"),
                    )),
                    e,
                )
            })?;
        Ok(ComputeInstance {
            name: instance.name.clone().unwrap_or_else(|| name.to_string()),
            zone: instance
                .zone
                .as_deref()
                .map(last_segment)
                .unwrap_or(zone)
                .to_string(),
            status: instance
                .status
                .as_ref()
                .and_then(|s| s.name())
                .unwrap_or("UNKNOWN")
                .to_string(),
            network_ip: instance
                .network_interfaces
                .into_iter()
                .find_map(|nic| nic.network_ip),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::DiskPlan;
    use std::collections::BTreeMap;

    fn spec(description: Option<&str>) -> InstanceSpec {
        InstanceSpec {
            name: String::from("gcpbxwdapp01"),
            zone: String::from("us-east1-b"),
            machine_type: String::from("n1-standard-2"),
            description: description.map(String::from),
            source_image: String::from("projects/rhel-cloud/images/rhel-8"),
            network: String::from("global/networks/base-net"),
            subnetwork: String::from("regions/us-east1/subnetworks/base-web"),
            data_disks: DiskPlan::build("20GB,40GB", 8)
                .unwrap()
                .disks()
                .to_vec(),
            labels: BTreeMap::from([(
                String::from("env"),
                String::from("base"),
            )]),
            service_account: Some(String::from("svc@p.example")),
        }
    }

    #[test]
    fn test_instance_body_disks() {
        let body = instance_body(&spec(None));

        assert_eq!(
            body.machine_type.as_deref(),
            Some("zones/us-east1-b/machineTypes/n1-standard-2")
        );
        assert_eq!(body.description, None);
        assert_eq!(body.disks.len(), 3);

        let boot = &body.disks[0];
        assert_eq!(boot.boot, Some(true));
        assert_eq!(boot.auto_delete, Some(true));
        assert_eq!(boot.device_name.as_deref(), Some("gcpbxwdapp01-os-disk"));

        let last = &body.disks[2];
        assert_eq!(last.auto_delete, Some(false));
        let params = last.initialize_params.as_ref().unwrap();
        assert_eq!(params.disk_name.as_deref(), Some("gcpbxwdapp0102"));
        assert_eq!(params.disk_size_gb, Some(40));
        assert_eq!(
            params.disk_type.as_deref(),
            Some("zones/us-east1-b/diskTypes/pd-standard")
        );
        assert_eq!(params.source_image, None);
    }

    #[test]
    fn test_instance_body_account_and_network() {
        let body = instance_body(&spec(Some("batch")));

        assert_eq!(body.description.as_deref(), Some("batch"));
        assert_eq!(body.labels.get("env").map(String::as_str), Some("base"));
        let nic = &body.network_interfaces[0];
        assert_eq!(
            nic.subnetwork.as_deref(),
            Some("regions/us-east1/subnetworks/base-web")
        );
        let account = &body.service_accounts[0];
        assert_eq!(account.email.as_deref(), Some("svc@p.example"));
        assert_eq!(account.scopes.len(), DEFAULT_SCOPES.len());
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(
            last_segment(
                "https://compute.googleapis.com/compute/v1/projects/p/zones/us-east1-c"
            ),
            "us-east1-c"
        );
        assert_eq!(last_segment("us-east1-b"), "us-east1-b");
    }
}
