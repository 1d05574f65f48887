// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use instance_api_types::FieldError;
use thiserror::Error;

use crate::boot::BootConfigError;
use crate::devices::DeviceSlotError;
use crate::nvlink::NvLinkError;
use crate::phone_home::PhoneHomeError;
use crate::request::RequestError;

/// Any reason a request can be rejected. Every variant is attributed to a
/// request field, see [`ValidationError::field`].
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    DeviceSlot(#[from] DeviceSlotError),

    #[error(transparent)]
    NvLink(#[from] NvLinkError),

    #[error(transparent)]
    BootConfig(#[from] BootConfigError),

    #[error(transparent)]
    PhoneHome(#[from] PhoneHomeError),
}

impl ValidationError {
    /// The API field the error is reported against.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Request(e) => e.field(),
            ValidationError::DeviceSlot(e) => e.field(),
            ValidationError::NvLink(e) => e.field(),
            ValidationError::BootConfig(e) => e.field(),
            ValidationError::PhoneHome(e) => e.field(),
        }
    }
}

impl From<&ValidationError> for FieldError {
    fn from(e: &ValidationError) -> Self {
        FieldError::new(e.field(), e.to_string())
    }
}
