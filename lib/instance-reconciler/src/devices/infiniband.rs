// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use instance_api_types::{DeviceCapability, InfiniBandInterfaceRequest};

use super::{
    DeviceClass, DeviceSlotError, SlotAllocator, SlotFunction, SlotKey,
};

/// Checks InfiniBand interface requests against the declared InfiniBand
/// capabilities.
///
/// Requests are checked in order, and each request's checks run in this
/// order: the device must be declared, its slot must not already be
/// claimed, the device instance must be in range and active, and the
/// vendor, if given, must be one the capabilities declare.
pub fn validate_infiniband_interfaces(
    capabilities: &[DeviceCapability],
    interfaces: &[InfiniBandInterfaceRequest],
) -> Result<(), DeviceSlotError> {
    if interfaces.is_empty() {
        return Ok(());
    }

    let mut slots = SlotAllocator::new(DeviceClass::InfiniBand, capabilities);
    if !slots.has_capabilities() {
        return Err(DeviceSlotError::NoCapability {
            class: DeviceClass::InfiniBand,
        });
    }

    for ifc in interfaces {
        let function =
            SlotFunction::from_parts(ifc.is_physical, ifc.virtual_function_id);
        slots.claim(
            SlotKey::new(&ifc.device, ifc.device_instance, function),
            ifc.vendor.as_deref(),
        )?;
    }

    Ok(())
}
