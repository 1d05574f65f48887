// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions for the types exchanged with the instance reconciliation
//! engine: create/update requests as they arrive from the API layer, the
//! hardware and operating system snapshots the caller fetches from storage,
//! and the resolved configuration handed back for persistence.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod boot;
pub mod capability;
pub mod interface;

pub use boot::{ExistingInstance, OperatingSystem, OperatingSystemType};
pub use capability::{DeviceCapability, HardwareCapabilities};
pub use interface::{
    InfiniBandInterfaceRequest, InterfaceRequest, NetworkTarget,
    NvLinkInterfaceRequest,
};

/// A request to deploy a DPU extension service alongside the instance.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DpuExtensionServiceDeploymentRequest {
    pub dpu_extension_service_id: Uuid,
    pub version: String,
}

/// A request to create a new instance.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCreateRequest {
    pub name: String,
    pub description: Option<String>,
    pub tenant_id: Uuid,
    pub instance_type_id: Option<Uuid>,
    pub machine_id: Option<String>,
    pub vpc_id: Uuid,
    pub operating_system_id: Option<Uuid>,

    pub ipxe_script: Option<String>,
    pub always_boot_with_custom_ipxe: Option<bool>,
    pub phone_home_enabled: Option<bool>,
    pub user_data: Option<String>,

    #[serde(default)]
    pub interfaces: Vec<InterfaceRequest>,
    #[serde(default)]
    pub infiniband_interfaces: Vec<InfiniBandInterfaceRequest>,
    #[serde(default, rename = "nvLinkInterfaces")]
    pub nvlink_interfaces: Vec<NvLinkInterfaceRequest>,
    #[serde(default)]
    pub dpu_extension_service_deployments:
        Vec<DpuExtensionServiceDeploymentRequest>,

    #[serde(default)]
    pub ssh_key_group_ids: Vec<Uuid>,
    pub labels: Option<BTreeMap<String, String>>,
    pub network_security_group_id: Option<String>,
}

/// A request to create several identical instances at once.
///
/// Instances are named `<namePrefix>-1` through `<namePrefix>-<count>`. The
/// boot fields and interface lists are shared by every instance.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceBatchCreateRequest {
    pub name_prefix: String,
    pub count: u32,
    pub description: Option<String>,
    pub tenant_id: Uuid,
    pub instance_type_id: Uuid,
    pub vpc_id: Uuid,
    pub operating_system_id: Option<Uuid>,

    pub ipxe_script: Option<String>,
    pub always_boot_with_custom_ipxe: Option<bool>,
    pub phone_home_enabled: Option<bool>,
    pub user_data: Option<String>,

    #[serde(default)]
    pub interfaces: Vec<InterfaceRequest>,
    #[serde(default)]
    pub infiniband_interfaces: Vec<InfiniBandInterfaceRequest>,
    #[serde(default, rename = "nvLinkInterfaces")]
    pub nvlink_interfaces: Vec<NvLinkInterfaceRequest>,
    #[serde(default)]
    pub dpu_extension_service_deployments:
        Vec<DpuExtensionServiceDeploymentRequest>,

    #[serde(default)]
    pub ssh_key_group_ids: Vec<Uuid>,
    pub labels: Option<BTreeMap<String, String>>,
    pub network_security_group_id: Option<String>,

    /// Require every instance to be placed within the same rack.
    pub topology_optimized: Option<bool>,
}

impl InstanceBatchCreateRequest {
    /// The names of the instances the request creates, in order.
    pub fn instance_names(&self) -> Vec<String> {
        (1..=self.count)
            .map(|i| format!("{}-{}", self.name_prefix, i))
            .collect()
    }
}

/// How an update request treats the instance's base operating system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsSelection {
    /// The request does not mention the operating system.
    Unchanged,
    /// The request detaches the instance from its operating system.
    Cleared,
    /// The request switches the instance to the given operating system.
    Selected(Uuid),
}

/// A request to update an existing instance.
///
/// Every field is optional; an absent field leaves the stored value alone.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,

    pub trigger_reboot: Option<bool>,
    pub reboot_with_custom_ipxe: Option<bool>,
    pub apply_updates_on_reboot: Option<bool>,

    /// Absent to keep the current OS, empty to clear it, or the ID of the OS
    /// to switch to. See [`InstanceUpdateRequest::os_selection`].
    pub operating_system_id: Option<String>,
    pub ipxe_script: Option<String>,
    pub user_data: Option<String>,
    pub phone_home_enabled: Option<bool>,
    pub always_boot_with_custom_ipxe: Option<bool>,

    pub interfaces: Option<Vec<InterfaceRequest>>,
    pub infiniband_interfaces: Option<Vec<InfiniBandInterfaceRequest>>,
    #[serde(rename = "nvLinkInterfaces")]
    pub nvlink_interfaces: Option<Vec<NvLinkInterfaceRequest>>,
    pub dpu_extension_service_deployments:
        Option<Vec<DpuExtensionServiceDeploymentRequest>>,

    pub ssh_key_group_ids: Option<Vec<Uuid>>,
    pub network_security_group_id: Option<String>,
}

impl InstanceUpdateRequest {
    /// Interprets the tri-state `operatingSystemId` field.
    pub fn os_selection(&self) -> Result<OsSelection, uuid::Error> {
        match self.operating_system_id.as_deref() {
            None => Ok(OsSelection::Unchanged),
            Some("") => Ok(OsSelection::Cleared),
            Some(id) => Ok(OsSelection::Selected(Uuid::parse_str(id)?)),
        }
    }

    /// Returns true if the request changes any instance attribute.
    pub fn is_update_request(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.labels.is_some()
            || self.operating_system_id.is_some()
            || self.ipxe_script.is_some()
            || self.user_data.is_some()
            || self.phone_home_enabled.is_some()
            || self.always_boot_with_custom_ipxe.is_some()
            || self.is_interface_update_request()
            || self.ssh_key_group_ids.is_some()
            || self.network_security_group_id.is_some()
    }

    /// Returns true if the request replaces any of the interface lists.
    pub fn is_interface_update_request(&self) -> bool {
        self.interfaces.is_some()
            || self.infiniband_interfaces.is_some()
            || self.nvlink_interfaces.is_some()
    }

    pub fn is_reboot_request(&self) -> bool {
        self.trigger_reboot == Some(true)
    }
}

/// The boot-related values an instance ends up with once the request, the
/// selected operating system, and the stored instance have been merged.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedInstanceConfig {
    pub ipxe_script: Option<String>,
    pub user_data: Option<String>,
    pub phone_home_enabled: bool,
    pub always_boot_with_custom_ipxe: bool,
}

/// The result of a successful reconciliation.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledInstance {
    pub boot: ResolvedInstanceConfig,

    /// The Ethernet interfaces to persist, with defaults applied. `None` if
    /// the request did not carry an interface list.
    pub interfaces: Option<Vec<InterfaceRequest>>,
}

/// The result of a successful batch reconciliation. Every instance in the
/// batch shares the same resolved configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledBatch {
    pub instance_names: Vec<String>,
    pub instance: ReconciledInstance,
}

/// A validation failure attributed to one request field, in the shape
/// returned to API clients.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }

    /// Renders the error as a single-entry `{field: message}` map.
    pub fn as_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(self.field.clone(), self.message.clone())])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn os_selection_is_tri_state() {
        let mut req = InstanceUpdateRequest::default();
        assert_eq!(req.os_selection().unwrap(), OsSelection::Unchanged);

        req.operating_system_id = Some(String::new());
        assert_eq!(req.os_selection().unwrap(), OsSelection::Cleared);

        let id = Uuid::new_v4();
        req.operating_system_id = Some(id.to_string());
        assert_eq!(req.os_selection().unwrap(), OsSelection::Selected(id));

        req.operating_system_id = Some("not-a-uuid".to_owned());
        assert!(req.os_selection().is_err());
    }

    #[test]
    fn reboot_only_request_is_not_an_update() {
        let req = InstanceUpdateRequest {
            trigger_reboot: Some(true),
            reboot_with_custom_ipxe: Some(true),
            ..Default::default()
        };
        assert!(req.is_reboot_request());
        assert!(!req.is_update_request());
    }

    #[test]
    fn create_request_uses_api_field_names() {
        let raw = r##"{
            "name": "web-0",
            "tenantId": "00000000-0000-0000-0000-000000000001",
            "vpcId": "00000000-0000-0000-0000-000000000002",
            "instanceTypeId": "00000000-0000-0000-0000-000000000003",
            "ipxeScript": "#!ipxe",
            "phoneHomeEnabled": true,
            "interfaces": [
                { "subnetId": "00000000-0000-0000-0000-000000000004" }
            ],
            "nvLinkInterfaces": [
                {
                    "nvLinkLogicalPartitionId":
                        "00000000-0000-0000-0000-000000000005",
                    "deviceInstance": 0
                }
            ]
        }"##;

        let req: InstanceCreateRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.name, "web-0");
        assert_eq!(req.ipxe_script.as_deref(), Some("#!ipxe"));
        assert_eq!(req.phone_home_enabled, Some(true));
        assert_eq!(req.interfaces.len(), 1);
        assert!(!req.interfaces[0].is_physical);
        assert_eq!(req.nvlink_interfaces.len(), 1);
        assert!(req.infiniband_interfaces.is_empty());
    }

    #[test]
    fn batch_request_names_instances_from_one() {
        let raw = r##"{
            "namePrefix": "worker",
            "count": 3,
            "tenantId": "00000000-0000-0000-0000-000000000001",
            "vpcId": "00000000-0000-0000-0000-000000000002",
            "instanceTypeId": "00000000-0000-0000-0000-000000000003",
            "ipxeScript": "#!ipxe",
            "topologyOptimized": true,
            "interfaces": [
                { "subnetId": "00000000-0000-0000-0000-000000000004" }
            ]
        }"##;

        let req: InstanceBatchCreateRequest =
            serde_json::from_str(raw).unwrap();
        assert_eq!(req.topology_optimized, Some(true));
        assert!(req.nvlink_interfaces.is_empty());
        assert_eq!(req.instance_names(), ["worker-1", "worker-2", "worker-3"]);
    }

    #[test]
    fn field_error_map_shape() {
        let err = FieldError::new("ipxeScript", "cannot be empty");
        let json = serde_json::to_value(err.as_map()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "ipxeScript": "cannot be empty" })
        );
    }
}
