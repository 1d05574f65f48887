// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of an instance's boot configuration.

use instance_api_types::{
    ExistingInstance, OperatingSystem, OperatingSystemType,
    ResolvedInstanceConfig,
};
use slog::{debug, Logger};
use thiserror::Error;
use uuid::Uuid;

use crate::phone_home::{apply_phone_home, PhoneHomeError};

pub mod layers;
pub mod os;

pub use layers::{BootLayer, Layer, Layers, MergedBoot, Transition};

#[derive(Debug, Error)]
pub enum BootConfigError {
    #[error(
        "must be specified and non-empty if no Operating System is specified"
    )]
    IpxeScriptRequired,

    #[error("cannot be specified for Operating System of type `{0}`")]
    IpxeScriptNotAllowed(OperatingSystemType),

    #[error(
        "must be specified and non-empty for Operating System of type `{0}`"
    )]
    IpxeScriptMissing(OperatingSystemType),

    #[error("cannot be enabled for Operating System of type `{0}`")]
    CustomIpxeNotAllowed(OperatingSystemType),

    #[error("Operating System {0} has been deactivated and cannot be used")]
    InactiveOperatingSystem(Uuid),

    #[error("Operating System {0} does not allow overriding `userData`")]
    UserDataOverrideNotAllowed(Uuid),

    #[error(
        "Operating System {0} was selected but its definition was not \
         supplied"
    )]
    OperatingSystemNotSupplied(Uuid),

    #[error(
        "Operating System {found} was supplied but the request does not \
         select it"
    )]
    UnexpectedOperatingSystem { found: Uuid },

    #[error(transparent)]
    PhoneHome(#[from] PhoneHomeError),
}

impl BootConfigError {
    pub fn field(&self) -> &'static str {
        match self {
            BootConfigError::IpxeScriptRequired
            | BootConfigError::IpxeScriptNotAllowed(_)
            | BootConfigError::IpxeScriptMissing(_) => "ipxeScript",
            BootConfigError::CustomIpxeNotAllowed(_) => {
                "alwaysBootWithCustomIpxe"
            }
            BootConfigError::InactiveOperatingSystem(_) => "isActive",
            BootConfigError::UserDataOverrideNotAllowed(_) => "allowOverride",
            BootConfigError::OperatingSystemNotSupplied(_)
            | BootConfigError::UnexpectedOperatingSystem { .. } => {
                "operatingSystemId"
            }
            BootConfigError::PhoneHome(e) => e.field(),
        }
    }
}

/// Everything that feeds one boot resolution.
#[derive(Debug)]
pub struct BootInputs<'a> {
    pub transition: Transition,

    /// The boot fields as the request supplied them.
    pub request: BootLayer,
    pub operating_system: Option<&'a OperatingSystem>,
    pub instance: Option<&'a ExistingInstance>,

    /// Whether the resolved user-data should be brought in line with the
    /// resolved phone-home setting. When false, the user-data is kept as
    /// merged.
    pub reconcile_user_data: bool,
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, str::is_empty)
}

/// Merges the boot fields, checks the result against the operating system,
/// and reconciles the phone-home stanza in the user-data.
pub fn resolve_boot(
    log: &Logger,
    phone_home_url: &str,
    inputs: &BootInputs<'_>,
) -> Result<ResolvedInstanceConfig, BootConfigError> {
    let layers = Layers::new(inputs.request.clone())
        .with_operating_system(inputs.operating_system)
        .with_instance(inputs.instance);
    let merged = layers.merge(inputs.transition);

    debug!(log, "merged boot fields";
        "transition" => ?inputs.transition,
        "ipxe_script" => merged.ipxe_script.source_name(),
        "user_data" => merged.user_data.source_name(),
        "phone_home_enabled" => merged.phone_home_enabled.source_name(),
        "always_boot_with_custom_ipxe" =>
            merged.always_boot_with_custom_ipxe.source_name(),
    );

    let always_boot_with_custom_ipxe =
        merged.always_boot_with_custom_ipxe.value.unwrap_or(false);

    match inputs.operating_system {
        None => {
            if is_blank(merged.ipxe_script.value.as_deref()) {
                return Err(BootConfigError::IpxeScriptRequired);
            }
        }
        Some(os) => {
            if inputs.transition.selects_os() && !os.is_active {
                return Err(BootConfigError::InactiveOperatingSystem(os.id));
            }

            match os.os_type {
                OperatingSystemType::Image => {
                    if !is_blank(merged.ipxe_script.value.as_deref()) {
                        return Err(BootConfigError::IpxeScriptNotAllowed(
                            os.os_type,
                        ));
                    }
                    if always_boot_with_custom_ipxe {
                        return Err(BootConfigError::CustomIpxeNotAllowed(
                            os.os_type,
                        ));
                    }
                }
                OperatingSystemType::Ipxe => {
                    if is_blank(merged.ipxe_script.value.as_deref()) {
                        return Err(BootConfigError::IpxeScriptMissing(
                            os.os_type,
                        ));
                    }
                }
            }

            if inputs.request.user_data.is_some() && !os.allow_override {
                return Err(BootConfigError::UserDataOverrideNotAllowed(os.id));
            }
        }
    }

    let phone_home_enabled = merged.phone_home_enabled.value.unwrap_or(false);
    let user_data = if inputs.reconcile_user_data {
        apply_phone_home(
            log,
            merged.user_data.value.as_deref(),
            phone_home_enabled,
            phone_home_url,
        )?
    } else {
        merged.user_data.value
    };

    Ok(ResolvedInstanceConfig {
        ipxe_script: merged.ipxe_script.value,
        user_data: user_data.filter(|text| !text.is_empty()),
        phone_home_enabled,
        always_boot_with_custom_ipxe,
    })
}
