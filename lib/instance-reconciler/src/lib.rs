// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconciliation of instance provisioning requests.
//!
//! A [`Reconciler`] takes an instance create or update request together
//! with snapshots of the hardware capabilities, the selected operating
//! system, and (for updates) the stored instance. It either rejects the
//! request with a [`ValidationError`] naming the offending field, or
//! returns the boot configuration and interface list to persist. Batch
//! create requests resolve one configuration shared by every instance in
//! the batch.
//!
//! Reconciliation is a pure function of its inputs. Nothing is persisted
//! and no capability is reserved, so two requests checked against the same
//! snapshot may both succeed.

use instance_api_types::{
    ExistingInstance, HardwareCapabilities, InfiniBandInterfaceRequest,
    InstanceBatchCreateRequest, InstanceCreateRequest, InstanceUpdateRequest,
    InterfaceRequest, NvLinkInterfaceRequest, OperatingSystem, OsSelection,
    ReconciledBatch, ReconciledInstance,
};
use reconciler_config_toml::{Config, Limits};
use slog::{info, o, warn, Logger};
use uuid::Uuid;

pub mod boot;
pub mod devices;
pub mod document;
mod error;
pub mod nvlink;
pub mod phone_home;
pub mod request;

pub use error::ValidationError;

use boot::{BootConfigError, BootInputs, BootLayer, Transition};
use devices::ethernet::{normalize_interfaces, validate_ethernet_slots};
use devices::infiniband::validate_infiniband_interfaces;
use nvlink::{common_partition, validate_nvlink_interfaces};
use request::RequestError;

/// Settings the reconciler runs with.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub phone_home_url: String,
    pub limits: Limits,
    pub default_first_physical: bool,
}

impl From<&Config> for ReconcilerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            phone_home_url: cfg.site.phone_home_url.clone(),
            limits: cfg.limits.clone(),
            default_first_physical: cfg.interfaces.default_first_physical,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

pub struct Reconciler {
    log: Logger,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(log: Logger, config: ReconcilerConfig) -> Self {
        Self { log, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Checks a create request and resolves the new instance's boot
    /// configuration and interfaces.
    ///
    /// `os` must be the operating system the request selects, or `None` if
    /// it selects none.
    pub fn reconcile_create(
        &self,
        req: &InstanceCreateRequest,
        capabilities: &HardwareCapabilities,
        os: Option<&OperatingSystem>,
    ) -> Result<ReconciledInstance, ValidationError> {
        let log = self
            .log
            .new(o!("operation" => "create", "name" => req.name.clone()));
        let result = self.create_inner(&log, req, capabilities, os);
        log_outcome(&log, result.as_ref());
        result
    }

    /// Checks a batch create request. Every instance in the batch shares
    /// the resolved boot configuration and interfaces.
    ///
    /// `os` is interpreted as for [`Reconciler::reconcile_create`].
    pub fn reconcile_batch_create(
        &self,
        req: &InstanceBatchCreateRequest,
        capabilities: &HardwareCapabilities,
        os: Option<&OperatingSystem>,
    ) -> Result<ReconciledBatch, ValidationError> {
        let log = self.log.new(o!(
            "operation" => "batch-create",
            "name_prefix" => req.name_prefix.clone(),
            "count" => req.count,
        ));
        let result = self.batch_create_inner(&log, req, capabilities, os);
        log_outcome(&log, result.as_ref().map(|batch| &batch.instance));
        result
    }

    /// Checks an update request against the stored `instance` and resolves
    /// its new boot configuration and interfaces.
    ///
    /// `os` must be the operating system the instance ends up with: the one
    /// the request selects, or the instance's current one if the request
    /// leaves it unchanged.
    pub fn reconcile_update(
        &self,
        req: &InstanceUpdateRequest,
        capabilities: &HardwareCapabilities,
        instance: &ExistingInstance,
        os: Option<&OperatingSystem>,
    ) -> Result<ReconciledInstance, ValidationError> {
        let log = self.log.new(o!("operation" => "update"));
        let result = self.update_inner(&log, req, capabilities, instance, os);
        log_outcome(&log, result.as_ref());
        result
    }

    /// Returns the user-data to store for a new operating system definition.
    pub fn new_os_user_data(
        &self,
        user_data: Option<&str>,
        phone_home_enabled: Option<bool>,
    ) -> Result<Option<String>, ValidationError> {
        let out = boot::os::new_os_user_data(
            &self.log,
            user_data,
            phone_home_enabled,
            &self.config.phone_home_url,
        )?;
        Ok(out)
    }

    /// Returns the user-data to store when updating the definition
    /// `existing`.
    pub fn updated_os_user_data(
        &self,
        user_data: Option<&str>,
        phone_home_enabled: Option<bool>,
        existing: &OperatingSystem,
    ) -> Result<Option<String>, ValidationError> {
        let out = boot::os::updated_os_user_data(
            &self.log,
            user_data,
            phone_home_enabled,
            existing,
            &self.config.phone_home_url,
        )?;
        Ok(out)
    }

    fn create_inner(
        &self,
        log: &Logger,
        req: &InstanceCreateRequest,
        capabilities: &HardwareCapabilities,
        os: Option<&OperatingSystem>,
    ) -> Result<ReconciledInstance, ValidationError> {
        request::check_create_request(req, &self.config.limits)?;
        self.resolve_create(log, CreateParts::from(req), capabilities, os)
    }

    fn batch_create_inner(
        &self,
        log: &Logger,
        req: &InstanceBatchCreateRequest,
        capabilities: &HardwareCapabilities,
        os: Option<&OperatingSystem>,
    ) -> Result<ReconciledBatch, ValidationError> {
        request::check_batch_create_request(req, &self.config.limits)?;
        let instance =
            self.resolve_create(log, CreateParts::from(req), capabilities, os)?;
        Ok(ReconciledBatch { instance_names: req.instance_names(), instance })
    }

    fn resolve_create(
        &self,
        log: &Logger,
        parts: CreateParts<'_>,
        capabilities: &HardwareCapabilities,
        os: Option<&OperatingSystem>,
    ) -> Result<ReconciledInstance, ValidationError> {
        common_partition(parts.nvlink_interfaces)?;

        let interfaces =
            self.check_interfaces(log, parts.interfaces, capabilities)?;
        validate_infiniband_interfaces(
            &capabilities.infiniband,
            parts.infiniband_interfaces,
        )?;
        validate_nvlink_interfaces(
            &capabilities.nvlink,
            parts.nvlink_interfaces,
        )?;

        let inputs = BootInputs {
            transition: create_transition(parts.operating_system_id, os)?,
            request: parts.boot,
            operating_system: os,
            instance: None,
            reconcile_user_data: true,
        };
        let boot =
            boot::resolve_boot(log, &self.config.phone_home_url, &inputs)?;

        Ok(ReconciledInstance { boot, interfaces: Some(interfaces) })
    }

    fn update_inner(
        &self,
        log: &Logger,
        req: &InstanceUpdateRequest,
        capabilities: &HardwareCapabilities,
        instance: &ExistingInstance,
        os: Option<&OperatingSystem>,
    ) -> Result<ReconciledInstance, ValidationError> {
        request::check_update_request(req, &self.config.limits)?;
        if let Some(nvlink) = &req.nvlink_interfaces {
            common_partition(nvlink)?;
        }

        let interfaces = match &req.interfaces {
            Some(list) => Some(self.check_interfaces(log, list, capabilities)?),
            None => None,
        };
        if let Some(list) = &req.infiniband_interfaces {
            validate_infiniband_interfaces(&capabilities.infiniband, list)?;
        }
        if let Some(list) = &req.nvlink_interfaces {
            validate_nvlink_interfaces(&capabilities.nvlink, list)?;
        }

        let selection = req.os_selection().map_err(|_| {
            RequestError::InvalidOperatingSystemId(
                req.operating_system_id.clone().unwrap_or_default(),
            )
        })?;
        let transition = update_transition(selection, instance, os)?;

        let inputs = BootInputs {
            transition,
            request: BootLayer::from(req),
            operating_system: os,
            instance: Some(instance),
            reconcile_user_data: req.phone_home_enabled.is_some()
                || req.user_data.is_some()
                || req.operating_system_id.is_some(),
        };
        let boot =
            boot::resolve_boot(log, &self.config.phone_home_url, &inputs)?;

        Ok(ReconciledInstance { boot, interfaces })
    }

    fn check_interfaces(
        &self,
        log: &Logger,
        interfaces: &[InterfaceRequest],
        capabilities: &HardwareCapabilities,
    ) -> Result<Vec<InterfaceRequest>, ValidationError> {
        let normalized = normalize_interfaces(
            log,
            interfaces,
            self.config.default_first_physical,
        )?;
        validate_ethernet_slots(&capabilities.ethernet, &normalized)?;
        Ok(normalized)
    }
}

/// The fields of a create request, single or batch, that are checked
/// against the capabilities and the operating system.
struct CreateParts<'a> {
    operating_system_id: Option<Uuid>,
    interfaces: &'a [InterfaceRequest],
    infiniband_interfaces: &'a [InfiniBandInterfaceRequest],
    nvlink_interfaces: &'a [NvLinkInterfaceRequest],
    boot: BootLayer,
}

impl<'a> From<&'a InstanceCreateRequest> for CreateParts<'a> {
    fn from(req: &'a InstanceCreateRequest) -> Self {
        Self {
            operating_system_id: req.operating_system_id,
            interfaces: &req.interfaces,
            infiniband_interfaces: &req.infiniband_interfaces,
            nvlink_interfaces: &req.nvlink_interfaces,
            boot: BootLayer::from(req),
        }
    }
}

impl<'a> From<&'a InstanceBatchCreateRequest> for CreateParts<'a> {
    fn from(req: &'a InstanceBatchCreateRequest) -> Self {
        Self {
            operating_system_id: req.operating_system_id,
            interfaces: &req.interfaces,
            infiniband_interfaces: &req.infiniband_interfaces,
            nvlink_interfaces: &req.nvlink_interfaces,
            boot: BootLayer::from(req),
        }
    }
}

fn create_transition(
    operating_system_id: Option<Uuid>,
    os: Option<&OperatingSystem>,
) -> Result<Transition, BootConfigError> {
    match (operating_system_id, os) {
        (None, None) => Ok(Transition::CreateWithoutOs),
        (Some(id), Some(os)) if os.id == id => Ok(Transition::CreateWithOs),
        (Some(id), None) => {
            Err(BootConfigError::OperatingSystemNotSupplied(id))
        }
        (_, Some(os)) => {
            Err(BootConfigError::UnexpectedOperatingSystem { found: os.id })
        }
    }
}

fn update_transition(
    selection: OsSelection,
    instance: &ExistingInstance,
    os: Option<&OperatingSystem>,
) -> Result<Transition, BootConfigError> {
    let unexpected =
        |os: &OperatingSystem| BootConfigError::UnexpectedOperatingSystem {
            found: os.id,
        };

    match selection {
        OsSelection::Cleared => match os {
            None => Ok(Transition::UpdateClearOs),
            Some(os) => Err(unexpected(os)),
        },
        OsSelection::Selected(id) => match os {
            Some(os) if os.id == id => Ok(Transition::UpdateSelectOs),
            Some(os) => Err(unexpected(os)),
            None => Err(BootConfigError::OperatingSystemNotSupplied(id)),
        },
        OsSelection::Unchanged => match (instance.operating_system_id, os) {
            (None, None) => Ok(Transition::UpdateWithoutOs),
            (Some(id), Some(os)) if os.id == id => {
                Ok(Transition::UpdateKeepOs)
            }
            (Some(id), None) => {
                Err(BootConfigError::OperatingSystemNotSupplied(id))
            }
            (_, Some(os)) => Err(unexpected(os)),
        },
    }
}

fn log_outcome(
    log: &Logger,
    result: Result<&ReconciledInstance, &ValidationError>,
) {
    match result {
        Ok(out) => info!(log, "request reconciled";
            "phone_home_enabled" => out.boot.phone_home_enabled,
            "has_user_data" => out.boot.user_data.is_some(),
        ),
        Err(e) => warn!(log, "request rejected";
            "field" => e.field(),
            "error" => %e,
        ),
    }
}
