// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ethernet interface checks.

use instance_api_types::{DeviceCapability, InterfaceRequest, NetworkTarget};
use slog::{info, Logger};

use super::{
    DeviceClass, DeviceSlotError, SlotAllocator, SlotFunction, SlotKey,
};

/// Checks that the interface list is uniform and returns it with the
/// physical-interface default applied.
///
/// All interfaces must attach to the same kind of network (all subnets or
/// all VPC prefixes), and either all of them or none of them must address
/// a specific device slot. When none of them do, exactly one may be marked
/// physical; if none is and `default_first_physical` is set, the first
/// interface is marked physical.
pub fn normalize_interfaces(
    log: &Logger,
    interfaces: &[InterfaceRequest],
    default_first_physical: bool,
) -> Result<Vec<InterfaceRequest>, DeviceSlotError> {
    let mut normalized = interfaces.to_vec();
    if normalized.is_empty() {
        return Ok(normalized);
    }

    let prefix_based = normalized
        .iter()
        .filter(|ifc| {
            matches!(ifc.network_target(), Some(NetworkTarget::VpcPrefix(_)))
        })
        .count();
    if prefix_based != 0 && prefix_based != normalized.len() {
        return Err(DeviceSlotError::MixedNetworkTargets);
    }

    let multi_device =
        normalized.iter().filter(|ifc| ifc.is_multi_device()).count();
    if multi_device != 0 && multi_device != normalized.len() {
        return Err(DeviceSlotError::MixedDeviceAddressing);
    }
    if multi_device != 0 {
        return Ok(normalized);
    }

    match normalized.iter().filter(|ifc| ifc.is_physical).count() {
        0 if default_first_physical => {
            info!(log, "no interface marked physical, defaulting the first");
            normalized[0].is_physical = true;
        }
        0 => return Err(DeviceSlotError::NoPhysical),
        1 => {}
        _ => return Err(DeviceSlotError::MultiplePhysical),
    }

    Ok(normalized)
}

/// Checks that every interface addressing a device slot claims a distinct,
/// declared, in-range slot.
pub fn validate_ethernet_slots(
    capabilities: &[DeviceCapability],
    interfaces: &[InterfaceRequest],
) -> Result<(), DeviceSlotError> {
    let mut slots = SlotAllocator::new(DeviceClass::Ethernet, capabilities);

    for ifc in interfaces {
        let (Some(device), Some(device_instance)) =
            (ifc.device.as_deref(), ifc.device_instance)
        else {
            continue;
        };
        let function =
            SlotFunction::from_parts(ifc.is_physical, ifc.virtual_function_id);
        slots.claim(SlotKey::new(device, device_instance, function), None)?;
    }

    Ok(())
}
