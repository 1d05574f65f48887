// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware capabilities declared by a machine or instance type.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One class of device a machine or instance type declares, e.g. a DPU
/// model or an InfiniBand HCA.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapability {
    /// The device name interface requests refer to.
    pub name: String,

    /// How many instances of this device the hardware has. Valid device
    /// instances are `0..count`.
    pub count: u32,

    pub vendor: Option<String>,

    /// Device instances that exist but must not be allocated.
    #[serde(default)]
    pub inactive_devices: BTreeSet<u32>,
}

impl DeviceCapability {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self { name: name.into(), count, ..Default::default() }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_inactive(
        mut self,
        inactive: impl IntoIterator<Item = u32>,
    ) -> Self {
        self.inactive_devices.extend(inactive);
        self
    }
}

/// A point-in-time snapshot of the capabilities relevant to interface
/// allocation, grouped by device class.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct HardwareCapabilities {
    #[serde(default)]
    pub ethernet: Vec<DeviceCapability>,
    #[serde(default)]
    pub infiniband: Vec<DeviceCapability>,
    #[serde(default)]
    pub nvlink: Vec<DeviceCapability>,
}
