// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layered resolution of boot fields.
//!
//! Each boot field is resolved by walking an ordered list of sources and
//! taking the first value present. The order depends on the lifecycle
//! transition: which operating system the instance moves from and to.

use std::fmt;

use instance_api_types::{
    ExistingInstance, InstanceBatchCreateRequest, InstanceCreateRequest,
    InstanceUpdateRequest, OperatingSystem,
};

/// A source of boot field values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Request,
    OperatingSystem,
    Instance,
    Default,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Request => "request",
            Layer::OperatingSystem => "operating-system",
            Layer::Instance => "instance",
            Layer::Default => "default",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The boot field values one source offers. `None` means the source has
/// nothing to say about that field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootLayer {
    pub ipxe_script: Option<String>,
    pub user_data: Option<String>,
    pub phone_home_enabled: Option<bool>,
    pub always_boot_with_custom_ipxe: Option<bool>,
}

impl BootLayer {
    pub fn defaults() -> Self {
        Self {
            ipxe_script: None,
            user_data: None,
            phone_home_enabled: Some(false),
            always_boot_with_custom_ipxe: Some(false),
        }
    }
}

impl From<&InstanceCreateRequest> for BootLayer {
    fn from(req: &InstanceCreateRequest) -> Self {
        Self {
            ipxe_script: req.ipxe_script.clone(),
            user_data: req.user_data.clone(),
            phone_home_enabled: req.phone_home_enabled,
            always_boot_with_custom_ipxe: req.always_boot_with_custom_ipxe,
        }
    }
}

impl From<&InstanceBatchCreateRequest> for BootLayer {
    fn from(req: &InstanceBatchCreateRequest) -> Self {
        Self {
            ipxe_script: req.ipxe_script.clone(),
            user_data: req.user_data.clone(),
            phone_home_enabled: req.phone_home_enabled,
            always_boot_with_custom_ipxe: req.always_boot_with_custom_ipxe,
        }
    }
}

impl From<&InstanceUpdateRequest> for BootLayer {
    fn from(req: &InstanceUpdateRequest) -> Self {
        Self {
            ipxe_script: req.ipxe_script.clone(),
            user_data: req.user_data.clone(),
            phone_home_enabled: req.phone_home_enabled,
            always_boot_with_custom_ipxe: req.always_boot_with_custom_ipxe,
        }
    }
}

impl From<&OperatingSystem> for BootLayer {
    fn from(os: &OperatingSystem) -> Self {
        Self {
            ipxe_script: os.ipxe_script.clone(),
            user_data: os.user_data.clone(),
            phone_home_enabled: Some(os.phone_home_enabled),
            always_boot_with_custom_ipxe: None,
        }
    }
}

impl From<&ExistingInstance> for BootLayer {
    fn from(instance: &ExistingInstance) -> Self {
        Self {
            ipxe_script: instance.ipxe_script.clone(),
            user_data: instance.user_data.clone(),
            phone_home_enabled: Some(instance.phone_home_enabled),
            always_boot_with_custom_ipxe: Some(
                instance.always_boot_with_custom_ipxe,
            ),
        }
    }
}

/// The source order for each boot field.
#[derive(Debug, PartialEq, Eq)]
pub struct Precedence {
    pub ipxe_script: &'static [Layer],
    pub user_data: &'static [Layer],
    pub phone_home_enabled: &'static [Layer],
    pub always_boot_with_custom_ipxe: &'static [Layer],
}

use Layer::{
    Default as Dflt, Instance as Inst, OperatingSystem as Os, Request as Req,
};

const CREATE_WITHOUT_OS: Precedence = Precedence {
    ipxe_script: &[Req],
    user_data: &[Req],
    phone_home_enabled: &[Req, Dflt],
    always_boot_with_custom_ipxe: &[Req, Dflt],
};

const CREATE_WITH_OS: Precedence = Precedence {
    ipxe_script: &[Req, Os],
    user_data: &[Req, Os],
    phone_home_enabled: &[Req, Os],
    always_boot_with_custom_ipxe: &[Req, Dflt],
};

const UPDATE_CLEAR_OS: Precedence = Precedence {
    ipxe_script: &[Req],
    user_data: &[Req, Dflt],
    phone_home_enabled: &[Req, Dflt],
    always_boot_with_custom_ipxe: &[Req, Inst],
};

const UPDATE_SELECT_OS: Precedence = Precedence {
    ipxe_script: &[Req, Os],
    user_data: &[Req, Os],
    phone_home_enabled: &[Req, Os],
    always_boot_with_custom_ipxe: &[Req, Inst],
};

const UPDATE_KEEP: Precedence = Precedence {
    ipxe_script: &[Req, Inst],
    user_data: &[Req, Inst],
    phone_home_enabled: &[Req, Inst],
    always_boot_with_custom_ipxe: &[Req, Inst],
};

/// How a request moves an instance between operating systems.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// A new instance booting from a tenant iPXE script.
    CreateWithoutOs,
    /// A new instance based on an operating system.
    CreateWithOs,
    /// An update detaching the instance from its operating system.
    UpdateClearOs,
    /// An update to an instance that has no operating system and gets none.
    UpdateWithoutOs,
    /// An update switching the instance to an operating system.
    UpdateSelectOs,
    /// An update leaving the instance's operating system in place.
    UpdateKeepOs,
}

impl Transition {
    pub fn precedence(self) -> &'static Precedence {
        match self {
            Transition::CreateWithoutOs => &CREATE_WITHOUT_OS,
            Transition::CreateWithOs => &CREATE_WITH_OS,
            Transition::UpdateClearOs => &UPDATE_CLEAR_OS,
            Transition::UpdateWithoutOs | Transition::UpdateKeepOs => {
                &UPDATE_KEEP
            }
            Transition::UpdateSelectOs => &UPDATE_SELECT_OS,
        }
    }

    /// Whether the request itself picks the operating system, as opposed to
    /// inheriting the one the instance already has.
    pub fn selects_os(self) -> bool {
        matches!(self, Transition::CreateWithOs | Transition::UpdateSelectOs)
    }
}

/// The sources available for one resolution.
#[derive(Debug)]
pub struct Layers {
    pub request: BootLayer,
    pub operating_system: Option<BootLayer>,
    pub instance: Option<BootLayer>,
    pub defaults: BootLayer,
}

impl Layers {
    pub fn new(request: BootLayer) -> Self {
        Self {
            request,
            operating_system: None,
            instance: None,
            defaults: BootLayer::defaults(),
        }
    }

    pub fn with_operating_system(
        mut self,
        os: Option<&OperatingSystem>,
    ) -> Self {
        self.operating_system = os.map(BootLayer::from);
        self
    }

    pub fn with_instance(
        mut self,
        instance: Option<&ExistingInstance>,
    ) -> Self {
        self.instance = instance.map(BootLayer::from);
        self
    }

    fn get(&self, layer: Layer) -> Option<&BootLayer> {
        match layer {
            Layer::Request => Some(&self.request),
            Layer::OperatingSystem => self.operating_system.as_ref(),
            Layer::Instance => self.instance.as_ref(),
            Layer::Default => Some(&self.defaults),
        }
    }

    fn resolve<T: Clone>(
        &self,
        order: &[Layer],
        field: impl Fn(&BootLayer) -> Option<&T>,
    ) -> Resolved<T> {
        order
            .iter()
            .find_map(|&layer| {
                let value = self.get(layer).and_then(&field)?;
                Some(Resolved {
                    value: Some(value.clone()),
                    source: Some(layer),
                })
            })
            .unwrap_or(Resolved { value: None, source: None })
    }

    /// Resolves every boot field in the order `transition` prescribes.
    pub fn merge(&self, transition: Transition) -> MergedBoot {
        let order = transition.precedence();
        MergedBoot {
            ipxe_script: self
                .resolve(order.ipxe_script, |l| l.ipxe_script.as_ref()),
            user_data: self.resolve(order.user_data, |l| l.user_data.as_ref()),
            phone_home_enabled: self.resolve(order.phone_home_enabled, |l| {
                l.phone_home_enabled.as_ref()
            }),
            always_boot_with_custom_ipxe: self
                .resolve(order.always_boot_with_custom_ipxe, |l| {
                    l.always_boot_with_custom_ipxe.as_ref()
                }),
        }
    }
}

/// A resolved value and the source it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: Option<T>,
    pub source: Option<Layer>,
}

impl<T> Resolved<T> {
    pub fn source_name(&self) -> &'static str {
        self.source.map_or("unset", Layer::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedBoot {
    pub ipxe_script: Resolved<String>,
    pub user_data: Resolved<String>,
    pub phone_home_enabled: Resolved<bool>,
    pub always_boot_with_custom_ipxe: Resolved<bool>,
}
