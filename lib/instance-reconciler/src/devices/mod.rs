// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validation of interface requests against the device capabilities a
//! machine or instance type declares.
//!
//! Each requested interface claims a device slot, identified by a
//! [`SlotKey`]. A [`SlotAllocator`] checks each claim against the declared
//! capabilities and against the slots already claimed by the same request.
//! The allocator only sees a snapshot of the capabilities; it cannot detect
//! two concurrent requests claiming the same slot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use instance_api_types::DeviceCapability;
use thiserror::Error;

pub mod ethernet;
pub mod infiniband;

/// The class of device an interface request draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Ethernet,
    InfiniBand,
    NvLink,
}

impl DeviceClass {
    /// Whether claims must avoid the capability's inactive devices.
    fn enforces_inactive_devices(self) -> bool {
        matches!(self, DeviceClass::InfiniBand)
    }

    /// Whether a claim's vendor must be one the capabilities declare.
    fn enforces_vendor(self) -> bool {
        matches!(self, DeviceClass::InfiniBand)
    }

    /// The request field holding interfaces of this class.
    pub fn request_field(self) -> &'static str {
        match self {
            DeviceClass::Ethernet => "interfaces",
            DeviceClass::InfiniBand => "infinibandInterfaces",
            DeviceClass::NvLink => "nvLinkInterfaces",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Ethernet => "network",
            DeviceClass::InfiniBand => "InfiniBand",
            DeviceClass::NvLink => "NVLink GPU",
        };
        f.write_str(name)
    }
}

/// Which function of a device instance an interface binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotFunction {
    Physical,
    Virtual(u8),
    Unspecified,
}

impl SlotFunction {
    pub fn from_parts(is_physical: bool, virtual_function: Option<u8>) -> Self {
        match (is_physical, virtual_function) {
            (true, _) => SlotFunction::Physical,
            (false, Some(vf)) => SlotFunction::Virtual(vf),
            (false, None) => SlotFunction::Unspecified,
        }
    }
}

/// Identifies one allocatable port: a function of an instance of a named
/// device.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub device: String,
    pub device_instance: u32,
    pub function: SlotFunction,
}

impl SlotKey {
    pub fn new(
        device: impl Into<String>,
        device_instance: u32,
        function: SlotFunction,
    ) -> Self {
        Self { device: device.into(), device_instance, function }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.device, self.device_instance)?;
        match self.function {
            SlotFunction::Physical => write!(f, "/pf"),
            SlotFunction::Virtual(vf) => write!(f, "/vf{vf}"),
            SlotFunction::Unspecified => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceSlotError {
    #[error(
        "{class} interfaces cannot be specified if the Instance Type or \
         Machine doesn't have {class} capabilities"
    )]
    NoCapability { class: DeviceClass },

    #[error(
        "Device {device} is not present in the Instance Type's {class} \
         capabilities"
    )]
    UnknownDevice { class: DeviceClass, device: String },

    #[error(
        "Duplicate {class} interface configuration specified for Device \
         {}, Device Instance: {}", .slot.device, .slot.device_instance
    )]
    DuplicateSlot { class: DeviceClass, slot: SlotKey },

    #[error(
        "Device Instance: {device_instance} for Device {device} exceeds \
         Instance Type's {class} capability count of {count}"
    )]
    InstanceOutOfRange {
        class: DeviceClass,
        device: String,
        device_instance: u32,
        count: u32,
    },

    #[error(
        "Device Instance: {device_instance} for Device {device} is inactive"
    )]
    InactiveInstance { device: String, device_instance: u32 },

    #[error(
        "Vendor {vendor} is not present in Instance Type's {class} \
         capabilities"
    )]
    UnknownVendor { class: DeviceClass, vendor: String },

    #[error(
        "either all interfaces must be VPC Prefix based or all of them must \
         be Subnet based"
    )]
    MixedNetworkTargets,

    #[error(
        "either all interfaces must specify device/deviceInstance or none of \
         them should specify those fields"
    )]
    MixedDeviceAddressing,

    #[error(
        "only one interface can be marked as physical for single-device \
         interfaces"
    )]
    MultiplePhysical,

    #[error(
        "one interface must be marked as physical for single-device \
         interfaces"
    )]
    NoPhysical,
}

impl DeviceSlotError {
    pub fn field(&self) -> &'static str {
        match self {
            DeviceSlotError::NoCapability { class } => class.request_field(),
            DeviceSlotError::UnknownDevice { .. }
            | DeviceSlotError::DuplicateSlot { .. } => "device",
            DeviceSlotError::InstanceOutOfRange { .. }
            | DeviceSlotError::InactiveInstance { .. } => "deviceInstance",
            DeviceSlotError::UnknownVendor { .. } => "vendor",
            DeviceSlotError::MixedNetworkTargets
            | DeviceSlotError::MixedDeviceAddressing
            | DeviceSlotError::MultiplePhysical
            | DeviceSlotError::NoPhysical => "interfaces",
        }
    }
}

/// Tracks the slots claimed by one request against one class of declared
/// capabilities.
#[derive(Debug)]
pub struct SlotAllocator<'a> {
    class: DeviceClass,
    devices: BTreeMap<&'a str, &'a DeviceCapability>,
    vendors: BTreeSet<&'a str>,
    claimed: BTreeSet<SlotKey>,
}

impl<'a> SlotAllocator<'a> {
    pub fn new(
        class: DeviceClass,
        capabilities: &'a [DeviceCapability],
    ) -> Self {
        let devices =
            capabilities.iter().map(|cap| (cap.name.as_str(), cap)).collect();
        let vendors = capabilities
            .iter()
            .filter_map(|cap| cap.vendor.as_deref())
            .collect();

        Self { class, devices, vendors, claimed: BTreeSet::new() }
    }

    pub fn has_capabilities(&self) -> bool {
        !self.devices.is_empty()
    }

    /// Claims `slot`, failing if the device is undeclared, the slot is
    /// already claimed, or the device instance is out of range. InfiniBand
    /// claims are also checked against inactive devices and declared
    /// vendors.
    pub fn claim(
        &mut self,
        slot: SlotKey,
        vendor: Option<&str>,
    ) -> Result<(), DeviceSlotError> {
        let class = self.class;
        let Some(cap) = self.devices.get(slot.device.as_str()) else {
            return Err(DeviceSlotError::UnknownDevice {
                class,
                device: slot.device,
            });
        };

        if self.claimed.contains(&slot) {
            return Err(DeviceSlotError::DuplicateSlot { class, slot });
        }

        if slot.device_instance >= cap.count {
            return Err(DeviceSlotError::InstanceOutOfRange {
                class,
                device: slot.device,
                device_instance: slot.device_instance,
                count: cap.count,
            });
        }

        if class.enforces_inactive_devices()
            && cap.inactive_devices.contains(&slot.device_instance)
        {
            return Err(DeviceSlotError::InactiveInstance {
                device: slot.device,
                device_instance: slot.device_instance,
            });
        }

        if class.enforces_vendor() {
            if let Some(vendor) = vendor {
                if !self.vendors.contains(vendor) {
                    return Err(DeviceSlotError::UnknownVendor {
                        class,
                        vendor: vendor.to_owned(),
                    });
                }
            }
        }

        self.claimed.insert(slot);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn caps() -> Vec<DeviceCapability> {
        vec![
            DeviceCapability::new("BlueField-3", 2),
            DeviceCapability::new("ConnectX-7", 4)
                .with_vendor("Mellanox")
                .with_inactive([1]),
        ]
    }

    #[test]
    fn slot_keys_distinguish_functions() {
        let pf = SlotKey::new("dpu", 0, SlotFunction::Physical);
        let vf1 = SlotKey::new("dpu", 0, SlotFunction::Virtual(1));
        let vf2 = SlotKey::new("dpu", 0, SlotFunction::Virtual(2));
        assert_ne!(pf, vf1);
        assert_ne!(vf1, vf2);
        assert_eq!(pf.to_string(), "dpu[0]/pf");
        assert_eq!(vf2.to_string(), "dpu[0]/vf2");
    }

    #[test]
    fn slot_keys_do_not_collide_on_formatting() {
        let a = SlotKey::new("a-1", 0, SlotFunction::Virtual(2));
        let b = SlotKey::new("a", 1, SlotFunction::Virtual(2));
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_device_is_rejected() {
        let caps = caps();
        let mut slots = SlotAllocator::new(DeviceClass::Ethernet, &caps);
        let err = slots
            .claim(SlotKey::new("nope", 0, SlotFunction::Physical), None)
            .unwrap_err();
        assert!(matches!(err, DeviceSlotError::UnknownDevice { .. }));
        assert_eq!(err.field(), "device");
    }

    #[test]
    fn duplicate_slot_is_rejected() {
        let caps = caps();
        let mut slots = SlotAllocator::new(DeviceClass::Ethernet, &caps);
        let slot = SlotKey::new("BlueField-3", 1, SlotFunction::Virtual(3));
        slots.claim(slot.clone(), None).unwrap();
        let err = slots.claim(slot, None).unwrap_err();
        assert!(matches!(err, DeviceSlotError::DuplicateSlot { .. }));
        assert_eq!(err.field(), "device");
    }

    #[test]
    fn out_of_range_instance_is_rejected() {
        let caps = caps();
        let mut slots = SlotAllocator::new(DeviceClass::Ethernet, &caps);
        let err = slots
            .claim(SlotKey::new("BlueField-3", 2, SlotFunction::Physical), None)
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceSlotError::InstanceOutOfRange { count: 2, .. }
        ));
        assert_eq!(err.field(), "deviceInstance");
    }

    #[test]
    fn inactive_and_vendor_rules_apply_to_infiniband_only() {
        let caps = caps();

        let mut eth = SlotAllocator::new(DeviceClass::Ethernet, &caps);
        eth.claim(
            SlotKey::new("ConnectX-7", 1, SlotFunction::Physical),
            Some("Unknown"),
        )
        .unwrap();

        let mut ib = SlotAllocator::new(DeviceClass::InfiniBand, &caps);
        let err = ib
            .claim(SlotKey::new("ConnectX-7", 1, SlotFunction::Physical), None)
            .unwrap_err();
        assert!(matches!(err, DeviceSlotError::InactiveInstance { .. }));
        assert_eq!(err.field(), "deviceInstance");

        let err = ib
            .claim(
                SlotKey::new("ConnectX-7", 2, SlotFunction::Physical),
                Some("Unknown"),
            )
            .unwrap_err();
        assert!(matches!(err, DeviceSlotError::UnknownVendor { .. }));
        assert_eq!(err.field(), "vendor");

        ib.claim(
            SlotKey::new("ConnectX-7", 2, SlotFunction::Physical),
            Some("Mellanox"),
        )
        .unwrap();
        assert_eq!(ib.claimed.len(), 1);
    }

    fn arb_caps() -> impl Strategy<Value = Vec<DeviceCapability>> {
        proptest::collection::btree_map("[a-z]{1,6}", 1u32..6, 1..4).prop_map(
            |m| {
                m.into_iter()
                    .map(|(name, count)| DeviceCapability::new(name, count))
                    .collect()
            },
        )
    }

    /// Capabilities plus a set of distinct, in-bounds slots drawn from them.
    fn arb_caps_and_slots(
    ) -> impl Strategy<Value = (Vec<DeviceCapability>, Vec<SlotKey>)> {
        arb_caps().prop_flat_map(|caps| {
            let all: Vec<SlotKey> = caps
                .iter()
                .flat_map(|cap| {
                    (0..cap.count).flat_map(move |i| {
                        [
                            SlotKey::new(&cap.name, i, SlotFunction::Physical),
                            SlotKey::new(
                                &cap.name,
                                i,
                                SlotFunction::Virtual(1),
                            ),
                        ]
                    })
                })
                .collect();
            let len = all.len();
            (
                Just(caps),
                proptest::sample::subsequence(all, 1..=len).prop_shuffle(),
            )
        })
    }

    proptest! {
        #[test]
        fn distinct_in_bounds_slots_are_accepted(
            (caps, slots) in arb_caps_and_slots()
        ) {
            let mut alloc = SlotAllocator::new(DeviceClass::Ethernet, &caps);
            for slot in &slots {
                prop_assert!(alloc.claim(slot.clone(), None).is_ok());
            }
        }

        #[test]
        fn duplicating_any_slot_is_rejected(
            (caps, slots) in arb_caps_and_slots(),
            pick in any::<prop::sample::Index>(),
        ) {
            let dup = pick.get(&slots).clone();
            let mut alloc = SlotAllocator::new(DeviceClass::Ethernet, &caps);
            let mut result = Ok(());
            for slot in slots.iter().chain(std::iter::once(&dup)) {
                result = alloc.claim(slot.clone(), None);
                if result.is_err() {
                    break;
                }
            }
            let is_duplicate =
                matches!(result, Err(DeviceSlotError::DuplicateSlot { .. }));
            prop_assert!(is_duplicate);
        }
    }
}
