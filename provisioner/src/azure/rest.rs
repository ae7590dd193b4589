// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`ArmApi`] over the Azure Resource Manager REST API.

use super::ArmApi;
use super::ArmOperation;
use super::AzureConfig;
use super::NicSpec;
use super::OperationStatus;
use super::SubnetInfo;
use super::VirtualMachine;
use super::VmSpec;
use crate::error::ResourceKind;
use crate::image::ImageCandidate;
use crate::naming::OsFamily;
use crate::rest::RestClient;
use crate::rest::RestResponse;
use crate::Error;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use std::time::Duration;

const ASYNC_OPERATION_HEADER: &str = "Azure-AsyncOperation";
const STORAGE_ACCOUNT_TYPE: &str = "Standard_LRS";

#[derive(Deserialize)]
struct Resource {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetJson {
    id: String,
    #[serde(default)]
    properties: SubnetProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetProperties {
    network_security_group: Option<Resource>,
}

#[derive(Deserialize)]
struct ImageVersionJson {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct AsyncOperationJson {
    status: String,
    error: Option<ArmErrorJson>,
}

#[derive(Deserialize)]
struct ArmErrorJson {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmJson {
    id: String,
    name: String,
    properties: VmProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmProperties {
    provisioning_state: Option<String>,
    network_profile: Option<NetworkProfileJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkProfileJson {
    #[serde(default)]
    network_interfaces: Vec<Resource>,
}

fn operation_of(response: RestResponse<Resource>) -> ArmOperation {
    let status_url = response
        .headers
        .get(ASYNC_OPERATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ArmOperation { resource_id: response.body.id, status_url }
}

fn nic_body(spec: &NicSpec) -> Value {
    json!({
        "location": spec.location,
        "tags": spec.tags,
        "properties": {
            "ipConfigurations": [{
                "name": "ipconfig1",
                "properties": {
                    "privateIPAllocationMethod": "Dynamic",
                    "privateIPAddressVersion": "IPv4",
                    "subnet": { "id": spec.subnet_id },
                },
            }],
        },
    })
}

fn vm_body(spec: &VmSpec, admin_password: &str) -> Value {
    let managed_disk = json!({ "storageAccountType": STORAGE_ACCOUNT_TYPE });
    let data_disks: Vec<Value> = spec
        .data_disks
        .iter()
        .map(|disk| {
            json!({
                "lun": disk.lun(),
                "name": disk.disk_name(&spec.name),
                "diskSizeGB": disk.size_gb,
                "createOption": "Empty",
                "caching": "ReadWrite",
                "managedDisk": managed_disk,
            })
        })
        .collect();
    let mut os_profile = json!({
        "computerName": spec.name,
        "adminUsername": spec.admin_username,
        "adminPassword": admin_password,
    });
    match spec.os_family {
        OsFamily::Windows => {
            os_profile["windowsConfiguration"] =
                json!({ "provisionVMAgent": true, "enableAutomaticUpdates": true });
        }
        OsFamily::Linux => {
            os_profile["linuxConfiguration"] =
                json!({ "disablePasswordAuthentication": false });
        }
    }

    json!({
        "location": spec.location,
        "tags": spec.tags,
        "properties": {
            "hardwareProfile": { "vmSize": spec.vm_size },
            "availabilitySet": { "id": spec.availability_set_id },
            "storageProfile": {
                "imageReference": {
                    "publisher": spec.image.publisher,
                    "offer": spec.image.offer,
                    "sku": spec.image.sku,
                    "version": spec.image.version,
                },
                "osDisk": {
                    "name": spec.os_disk_name(),
                    "createOption": "FromImage",
                    "caching": "ReadWrite",
                    "managedDisk": managed_disk,
                },
                "dataDisks": data_disks,
            },
            "osProfile": os_profile,
            "networkProfile": {
                "networkInterfaces": [{
                    "id": spec.nic_id,
                    "properties": { "primary": true },
                }],
            },
        },
    })
}

/// Talks to ARM for one subscription.
pub struct ArmRest {
    rest: RestClient,
    subscription_id: String,
    api_version: String,
    admin_password_env: String,
}

impl ArmRest {
    pub fn new(config: &AzureConfig) -> Result<ArmRest, Error> {
        let rest = RestClient::new(
            &config.api_base,
            &config.token_env,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(ArmRest {
            rest,
            subscription_id: config.subscription_id.clone(),
            api_version: config.api_version.clone(),
            admin_password_env: config.admin_password_env.clone(),
        })
    }

    fn group_path(&self, resource_group: &str, rest: &str) -> String {
        format!(
            "subscriptions/{}/resourceGroups/{resource_group}/providers/{rest}",
            self.subscription_id
        )
    }

    fn version_query(&self) -> [(&str, &str); 1] {
        [("api-version", self.api_version.as_str())]
    }

    fn admin_password(&self) -> Result<String, Error> {
        match std::env::var(&self.admin_password_env) {
            Ok(password) if !password.is_empty() => Ok(password),
            _ => Err(Error::internal(format!(
                "no VM admin password in ${}",
                self.admin_password_env
            ))),
        }
    }

    async fn put(
        &self,
        operation: &str,
        path: &str,
        body: &Value,
    ) -> Result<ArmOperation, Error> {
        let response = self
            .rest
            .send::<_, Resource>(
                operation,
                None,
                Method::PUT,
                path,
                &self.version_query(),
                Some(body),
            )
            .await?;
        Ok(operation_of(response))
    }
}

#[async_trait]
impl ArmApi for ArmRest {
    async fn get_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        subnet: &str,
    ) -> Result<SubnetInfo, Error> {
        let path = self.group_path(
            resource_group,
            &format!(
                "Microsoft.Network/virtualNetworks/{vnet}/subnets/{subnet}"
            ),
        );
        let subnet: SubnetJson = self
            .rest
            .get(
                "get subnet",
                ResourceKind::Subnet,
                &path,
                &self.version_query(),
            )
            .await?;
        Ok(SubnetInfo {
            id: subnet.id,
            network_security_group: subnet
                .properties
                .network_security_group
                .map(|nsg| nsg.id),
        })
    }

    async fn list_image_versions(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
    ) -> Result<Vec<ImageCandidate>, Error> {
        let path = format!(
            "subscriptions/{}/providers/Microsoft.Compute/locations/\
             {location}/publishers/{publisher}/artifacttypes/vmimage/offers/\
             {offer}/skus/{sku}/versions",
            self.subscription_id
        );
        let versions: Vec<ImageVersionJson> = self
            .rest
            .get(
                "list image versions",
                ResourceKind::Image,
                &path,
                &self.version_query(),
            )
            .await?;
        Ok(versions
            .into_iter()
            .map(|v| ImageCandidate {
                reference: v.id,
                version: Some(v.name),
                ..ImageCandidate::default()
            })
            .collect())
    }

    async fn put_availability_set(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<String, Error> {
        let path = self.group_path(
            resource_group,
            &format!("Microsoft.Compute/availabilitySets/{name}"),
        );
        let body = json!({
            "location": location,
            "sku": { "name": "Aligned" },
            "properties": {
                "platformFaultDomainCount": 2,
                "platformUpdateDomainCount": 5,
            },
        });
        let operation =
            self.put("create availability set", &path, &body).await?;
        Ok(operation.resource_id)
    }

    async fn put_nic(
        &self,
        resource_group: &str,
        spec: &NicSpec,
    ) -> Result<ArmOperation, Error> {
        let path = self.group_path(
            resource_group,
            &format!("Microsoft.Network/networkInterfaces/{}", spec.name),
        );
        self.put("create network interface", &path, &nic_body(spec)).await
    }

    async fn nic_address(&self, nic_id: &str) -> Result<Option<String>, Error> {
        let nic: Value = self
            .rest
            .get(
                "get network interface",
                ResourceKind::Instance,
                nic_id,
                &self.version_query(),
            )
            .await?;
        Ok(nic
            .pointer("/properties/ipConfigurations/0/properties/privateIPAddress")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn put_vm(
        &self,
        resource_group: &str,
        spec: &VmSpec,
    ) -> Result<ArmOperation, Error> {
        let path = self.group_path(
            resource_group,
            &format!("Microsoft.Compute/virtualMachines/{}", spec.name),
        );
        let body = vm_body(spec, &self.admin_password()?);
        self.put("create virtual machine", &path, &body).await
    }

    async fn operation_status(
        &self,
        status_url: &str,
    ) -> Result<OperationStatus, Error> {
        let status: AsyncOperationJson = self
            .rest
            .get("poll operation", ResourceKind::Operation, status_url, &[])
            .await?;
        Ok(match status.status.as_str() {
            "Succeeded" => OperationStatus::Succeeded,
            "Failed" | "Canceled" => {
                let detail = status
                    .error
                    .map(|e| {
                        format!(
                            "{}: {}",
                            e.code.unwrap_or_default(),
                            e.message.unwrap_or_default()
                        )
                    })
                    .unwrap_or_else(|| status.status.clone());
                OperationStatus::Failed(detail)
            }
            _ => OperationStatus::InProgress,
        })
    }

    async fn get_vm(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualMachine, Error> {
        let path = self.group_path(
            resource_group,
            &format!("Microsoft.Compute/virtualMachines/{name}"),
        );
        let vm: VmJson = self
            .rest
            .get(
                "get virtual machine",
                ResourceKind::Instance,
                &path,
                &self.version_query(),
            )
            .await?;
        Ok(VirtualMachine {
            id: vm.id,
            name: vm.name,
            provisioning_state: vm
                .properties
                .provisioning_state
                .unwrap_or_else(|| String::from("Unknown")),
            nic_ids: vm
                .properties
                .network_profile
                .map(|p| p.network_interfaces.into_iter().map(|n| n.id).collect())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::azure::ImageReference;
    use crate::disk::DiskPlan;
    use std::collections::BTreeMap;

    fn spec(os_family: OsFamily) -> VmSpec {
        VmSpec {
            name: String::from("azpxwpapp03"),
            location: String::from("eastus"),
            vm_size: String::from("Standard_B2s"),
            availability_set_id: String::from("/avs/az-prod-avs-001"),
            nic_id: String::from("/nics/azpxwpapp03-nic-01"),
            image: ImageReference {
                publisher: String::from("RedHat"),
                offer: String::from("RHEL"),
                sku: String::from("8"),
                version: String::from("8.0.2021"),
            },
            os_family,
            admin_username: String::from("usertest"),
            data_disks: DiskPlan::build("10,20", 4).unwrap().disks().to_vec(),
            tags: BTreeMap::from([(
                String::from("Request#"),
                String::from("R1"),
            )]),
        }
    }

    #[test]
    fn test_vm_body_shape() {
        let body = vm_body(&spec(OsFamily::Linux), "hunter2");
        let storage = &body["properties"]["storageProfile"];
        assert_eq!(storage["osDisk"]["name"], "azpxwpapp03-os");
        assert_eq!(
            storage["osDisk"]["managedDisk"]["storageAccountType"],
            "Standard_LRS"
        );
        assert_eq!(storage["dataDisks"][1]["lun"], 1);
        assert_eq!(storage["dataDisks"][1]["name"], "azpxwpapp0302");
        assert_eq!(storage["dataDisks"][1]["diskSizeGB"], 20);
        assert_eq!(storage["dataDisks"][1]["createOption"], "Empty");
        assert_eq!(storage["imageReference"]["version"], "8.0.2021");
        let os_profile = &body["properties"]["osProfile"];
        assert_eq!(os_profile["adminPassword"], "hunter2");
        assert!(os_profile.get("linuxConfiguration").is_some());
        assert!(os_profile.get("windowsConfiguration").is_none());
        assert_eq!(body["tags"]["Request#"], "R1");
        assert_eq!(
            body["properties"]["availabilitySet"]["id"],
            "/avs/az-prod-avs-001"
        );
    }

    #[test]
    fn test_windows_vm_profile() {
        let body = vm_body(&spec(OsFamily::Windows), "pw");
        assert!(body["properties"]["osProfile"]
            .get("windowsConfiguration")
            .is_some());
    }

    #[test]
    fn test_nic_body_uses_dynamic_ipv4() {
        let nic = NicSpec {
            name: String::from("vm-nic-01"),
            location: String::from("eastus"),
            subnet_id: String::from("/subnets/az-Prod-sub-001"),
            tags: BTreeMap::new(),
        };
        let body = nic_body(&nic);
        let ip = &body["properties"]["ipConfigurations"][0]["properties"];
        assert_eq!(ip["privateIPAllocationMethod"], "Dynamic");
        assert_eq!(ip["privateIPAddressVersion"], "IPv4");
        assert_eq!(ip["subnet"]["id"], "/subnets/az-Prod-sub-001");
    }
}
