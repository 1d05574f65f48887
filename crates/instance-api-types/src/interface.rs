// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network interface requests: Ethernet, InfiniBand, and NVLink.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The network an Ethernet interface attaches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkTarget {
    Subnet(Uuid),
    VpcPrefix(Uuid),
}

/// An Ethernet interface attached to an instance.
///
/// An interface that names a `device` and `deviceInstance` addresses one
/// specific port of a multi-device machine; one that omits both lets the
/// site pick the port.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRequest {
    pub subnet_id: Option<Uuid>,
    pub vpc_prefix_id: Option<Uuid>,

    /// The name of the network device, as declared in the machine's
    /// capabilities.
    pub device: Option<String>,

    /// The index of the device among the devices sharing its name.
    pub device_instance: Option<u32>,

    /// The virtual function to bind. Required for non-physical interfaces
    /// that name a device.
    pub virtual_function_id: Option<u8>,

    #[serde(default)]
    pub is_physical: bool,
}

impl InterfaceRequest {
    /// Returns true if this interface addresses a specific device slot.
    pub fn is_multi_device(&self) -> bool {
        self.device.is_some() && self.device_instance.is_some()
    }

    /// Returns the network this interface attaches to, or `None` unless
    /// exactly one of `subnetId` and `vpcPrefixId` is set.
    pub fn network_target(&self) -> Option<NetworkTarget> {
        match (self.subnet_id, self.vpc_prefix_id) {
            (Some(subnet), None) => Some(NetworkTarget::Subnet(subnet)),
            (None, Some(prefix)) => Some(NetworkTarget::VpcPrefix(prefix)),
            _ => None,
        }
    }
}

/// An InfiniBand interface attached to an instance.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct InfiniBandInterfaceRequest {
    /// The InfiniBand partition the interface joins.
    pub partition_id: Uuid,

    pub device: String,
    pub vendor: Option<String>,
    pub device_instance: u32,

    #[serde(default)]
    pub is_physical: bool,
    pub virtual_function_id: Option<u8>,
}

/// A GPU attached to an NVLink logical partition.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct NvLinkInterfaceRequest {
    #[serde(rename = "nvLinkLogicalPartitionId")]
    pub nvlink_logical_partition_id: Uuid,

    /// The GPU index.
    pub device_instance: u32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn network_target_requires_exactly_one_id() {
        let subnet = Uuid::new_v4();
        let prefix = Uuid::new_v4();

        let mut ifc = InterfaceRequest::default();
        assert_eq!(ifc.network_target(), None);

        ifc.subnet_id = Some(subnet);
        assert_eq!(ifc.network_target(), Some(NetworkTarget::Subnet(subnet)));

        ifc.vpc_prefix_id = Some(prefix);
        assert_eq!(ifc.network_target(), None);

        ifc.subnet_id = None;
        assert_eq!(
            ifc.network_target(),
            Some(NetworkTarget::VpcPrefix(prefix))
        );
    }

    #[test]
    fn multi_device_needs_both_fields() {
        let mut ifc = InterfaceRequest {
            device: Some("BlueField".to_owned()),
            ..Default::default()
        };
        assert!(!ifc.is_multi_device());

        ifc.device_instance = Some(0);
        assert!(ifc.is_multi_device());
    }
}
