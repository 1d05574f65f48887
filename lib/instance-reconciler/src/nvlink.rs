// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! NVLink partition checks.
//!
//! An instance joins at most one NVLink logical partition, and it either
//! attaches every GPU a capability declares or none of them.

use std::slice;

use instance_api_types::{DeviceCapability, NvLinkInterfaceRequest};
use thiserror::Error;
use uuid::Uuid;

use crate::devices::{
    DeviceClass, DeviceSlotError, SlotAllocator, SlotFunction, SlotKey,
};

#[derive(Debug, Error)]
pub enum NvLinkError {
    #[error(
        "NVLink Interfaces cannot be specified if Instance Type doesn't have \
         NVLink GPU capabilities"
    )]
    NoCapability,

    #[error(
        "number of NVLink Interfaces ({actual}) must match the number of GPUs \
         ({expected}) declared by the {device} capability"
    )]
    GpuCountMismatch { device: String, expected: u32, actual: usize },

    #[error(
        "all NVLink Interfaces must have the same NVLink Logical Partition: \
         expected {expected}, found {found}"
    )]
    PartitionMismatch { expected: Uuid, found: Uuid },

    #[error(transparent)]
    Slot(#[from] DeviceSlotError),
}

impl NvLinkError {
    pub fn field(&self) -> &'static str {
        match self {
            NvLinkError::Slot(e) => e.field(),
            _ => "nvLinkInterfaces",
        }
    }
}

/// Returns the partition every interface joins, or `None` for an empty
/// list. The first interface's partition is the one the rest must match.
pub fn common_partition(
    interfaces: &[NvLinkInterfaceRequest],
) -> Result<Option<Uuid>, NvLinkError> {
    let Some((first, rest)) = interfaces.split_first() else {
        return Ok(None);
    };

    let expected = first.nvlink_logical_partition_id;
    match rest.iter().find(|ifc| ifc.nvlink_logical_partition_id != expected) {
        Some(ifc) => Err(NvLinkError::PartitionMismatch {
            expected,
            found: ifc.nvlink_logical_partition_id,
        }),
        None => Ok(Some(expected)),
    }
}

/// Checks NVLink interface requests against the declared NVLink
/// capabilities and returns the partition they join.
///
/// Each GPU index must be unique and in range for every capability, the
/// number of interfaces must equal every capability's GPU count, and all
/// interfaces must name the same partition.
pub fn validate_nvlink_interfaces(
    capabilities: &[DeviceCapability],
    interfaces: &[NvLinkInterfaceRequest],
) -> Result<Option<Uuid>, NvLinkError> {
    if interfaces.is_empty() {
        return Ok(None);
    }
    if capabilities.is_empty() {
        return Err(NvLinkError::NoCapability);
    }

    for cap in capabilities {
        let mut slots =
            SlotAllocator::new(DeviceClass::NvLink, slice::from_ref(cap));
        for ifc in interfaces {
            slots.claim(
                SlotKey::new(
                    &cap.name,
                    ifc.device_instance,
                    SlotFunction::Unspecified,
                ),
                None,
            )?;
        }
    }

    for cap in capabilities {
        if interfaces.len() != cap.count as usize {
            return Err(NvLinkError::GpuCountMismatch {
                device: cap.name.clone(),
                expected: cap.count,
                actual: interfaces.len(),
            });
        }
    }

    common_partition(interfaces)
}
