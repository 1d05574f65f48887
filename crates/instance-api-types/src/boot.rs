// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Snapshots of the boot configuration sources: operating system
//! definitions and the stored state of an existing instance.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an operating system boots.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum::Display,
)]
pub enum OperatingSystemType {
    /// Boots from an image provisioned by the site.
    Image,

    /// Boots by chain-loading a tenant-supplied iPXE script.
    #[serde(rename = "iPXE")]
    #[strum(serialize = "iPXE")]
    Ipxe,
}

/// An operating system definition an instance can be based on.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub os_type: OperatingSystemType,
    pub ipxe_script: Option<String>,
    pub user_data: Option<String>,
    pub phone_home_enabled: bool,

    /// Whether instances may replace this OS's user-data with their own.
    pub allow_override: bool,
    pub is_active: bool,
}

/// The boot configuration currently stored for an instance.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct ExistingInstance {
    pub operating_system_id: Option<Uuid>,
    pub ipxe_script: Option<String>,
    pub user_data: Option<String>,
    pub phone_home_enabled: bool,
    pub always_boot_with_custom_ipxe: bool,
}
