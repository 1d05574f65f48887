// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structural checks on instance requests.
//!
//! These checks look only at the request itself. Checks that need the
//! machine's capabilities or the operating system happen afterwards.

use std::collections::{BTreeMap, BTreeSet};

use instance_api_types::{
    DpuExtensionServiceDeploymentRequest, InfiniBandInterfaceRequest,
    InstanceBatchCreateRequest, InstanceCreateRequest, InstanceUpdateRequest,
    InterfaceRequest,
};
use reconciler_config_toml::Limits;
use thiserror::Error;
use uuid::Uuid;

const NAME_LENGTH: std::ops::RangeInclusive<usize> = 2..=256;
const NAME_PREFIX_LENGTH: std::ops::RangeInclusive<usize> = 2..=240;
const BATCH_COUNT: std::ops::RangeInclusive<u32> = 2..=18;
const MAX_DESCRIPTION_LENGTH: usize = 1024;
const VIRTUAL_FUNCTION_IDS: std::ops::RangeInclusive<u8> = 1..=16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error(
        "must contain at least 2 characters and a maximum of 256 characters"
    )]
    NameLength,

    #[error(
        "must contain at least 2 characters and a maximum of 240 characters"
    )]
    NamePrefixLength,

    #[error("must be between 2 and 18, got {0}")]
    BatchCountOutOfRange(u32),

    #[error("cannot exceed a maximum of 1024 characters")]
    DescriptionLength,

    #[error(
        "only one of `instanceTypeId` or `machineId` can be specified in \
         request, not both"
    )]
    InstanceTypeAndMachine,

    #[error("either `instanceTypeId` or `machineId` must be specified")]
    NoInstanceTypeOrMachine,

    #[error("either `operatingSystemId` or `ipxeScript` must be specified")]
    NoOperatingSystemOrIpxe,

    #[error("cannot be empty when `operatingSystemId` is not specified")]
    EmptyIpxeScript,

    #[error("invalid Operating System ID {0:?}")]
    InvalidOperatingSystemId(String),

    #[error("at least one Interface must be specified")]
    NoInterfaces,

    #[error("at most {0} Interfaces can be specified")]
    TooManyInterfaces(usize),

    #[error("`subnetId` and `vpcPrefixId` cannot be specified together")]
    SubnetAndVpcPrefix,

    #[error("either `subnetId` or `vpcPrefixId` must be specified")]
    NoNetworkTarget,

    #[error("must be specified when `deviceInstance` is specified")]
    DeviceRequired,

    #[error("must be specified when `device` is specified")]
    DeviceInstanceRequired,

    #[error(
        "must be specified when `device` and `deviceInstance` are specified"
    )]
    VpcPrefixRequired,

    #[error(
        "must be specified when `device` and `deviceInstance` are specified \
         and `isPhysical` is false"
    )]
    VirtualFunctionRequired,

    #[error("virtualFunctionId must be between 1 and 16, got {0}")]
    VirtualFunctionOutOfRange(u8),

    #[error("a value is required")]
    InfiniBandDeviceRequired,

    #[error(
        "must be set to true. Virtual functions are currently not supported \
         for InfiniBand interfaces"
    )]
    InfiniBandNotPhysical,

    #[error(
        "virtual functions are currently not supported for InfiniBand \
         interfaces"
    )]
    InfiniBandVirtualFunction,

    #[error(
        "a value is required for the version of DPU Extension Service {0}"
    )]
    DeploymentVersionRequired(Uuid),

    #[error(
        "duplicate deployment requests found for DPU Extension Service ID and \
         version: {id}:{version}"
    )]
    DuplicateDeployment { id: Uuid, version: String },

    #[error("up to {0} key/value pairs can be specified in labels")]
    TooManyLabels(usize),

    #[error("one or more labels do not have a key specified")]
    LabelKeyMissing,

    #[error("label key consists only of whitespace")]
    LabelKeyWhitespace,

    #[error(
        "Label key must contain at least 1 character and a maximum of {0} \
         characters"
    )]
    LabelKeyLength(usize),

    #[error("Label value cannot exceed a maximum of {0} characters")]
    LabelValueLength(usize),

    #[error(
        "reboot cannot be triggered if Instance attributes are being updated \
         in the same request"
    )]
    RebootWithUpdate,

    #[error(
        "`rebootWithCustomIpxe` can only be specified when `triggerReboot` \
         is specified"
    )]
    CustomIpxeWithoutReboot,

    #[error(
        "`applyUpdatesOnReboot` can only be specified when `triggerReboot` \
         is specified"
    )]
    ApplyUpdatesWithoutReboot,
}

impl RequestError {
    pub fn field(&self) -> &'static str {
        use RequestError::*;
        match self {
            NameLength => "name",
            NamePrefixLength => "namePrefix",
            BatchCountOutOfRange(_) => "count",
            DescriptionLength => "description",
            InstanceTypeAndMachine => "machineId",
            NoInstanceTypeOrMachine => "instanceTypeId",
            NoOperatingSystemOrIpxe | InvalidOperatingSystemId(_) => {
                "operatingSystemId"
            }
            EmptyIpxeScript => "ipxeScript",
            NoInterfaces | TooManyInterfaces(_) | NoNetworkTarget => {
                "interfaces"
            }
            SubnetAndVpcPrefix => "subnetId",
            DeviceRequired | InfiniBandDeviceRequired => "device",
            DeviceInstanceRequired => "deviceInstance",
            VpcPrefixRequired => "vpcPrefixId",
            VirtualFunctionRequired
            | VirtualFunctionOutOfRange(_)
            | InfiniBandVirtualFunction => "virtualFunctionId",
            InfiniBandNotPhysical => "isPhysical",
            DeploymentVersionRequired(_) | DuplicateDeployment { .. } => {
                "dpuExtensionServiceDeployments"
            }
            TooManyLabels(_)
            | LabelKeyMissing
            | LabelKeyWhitespace
            | LabelKeyLength(_)
            | LabelValueLength(_) => "labels",
            RebootWithUpdate => "triggerReboot",
            CustomIpxeWithoutReboot => "rebootWithCustomIpxe",
            ApplyUpdatesWithoutReboot => "applyUpdatesOnReboot",
        }
    }
}

fn check_name(name: &str) -> Result<(), RequestError> {
    if !NAME_LENGTH.contains(&name.chars().count()) {
        return Err(RequestError::NameLength);
    }
    Ok(())
}

fn check_description(description: Option<&str>) -> Result<(), RequestError> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LENGTH => {
            Err(RequestError::DescriptionLength)
        }
        _ => Ok(()),
    }
}

fn check_interface_count(
    interfaces: &[InterfaceRequest],
    limits: &Limits,
) -> Result<(), RequestError> {
    if interfaces.is_empty() {
        return Err(RequestError::NoInterfaces);
    }
    if interfaces.len() > limits.max_interfaces {
        return Err(RequestError::TooManyInterfaces(limits.max_interfaces));
    }
    Ok(())
}

pub fn check_interface(ifc: &InterfaceRequest) -> Result<(), RequestError> {
    if ifc.subnet_id.is_some() && ifc.vpc_prefix_id.is_some() {
        return Err(RequestError::SubnetAndVpcPrefix);
    }
    if ifc.subnet_id.is_none() && ifc.vpc_prefix_id.is_none() {
        return Err(RequestError::NoNetworkTarget);
    }

    if ifc.device.is_some() {
        if ifc.device_instance.is_none() {
            return Err(RequestError::DeviceInstanceRequired);
        }
        if ifc.vpc_prefix_id.is_none() {
            return Err(RequestError::VpcPrefixRequired);
        }
        if !ifc.is_physical && ifc.virtual_function_id.is_none() {
            return Err(RequestError::VirtualFunctionRequired);
        }
    } else if ifc.device_instance.is_some() {
        return Err(RequestError::DeviceRequired);
    }

    match ifc.virtual_function_id {
        Some(vf) if !VIRTUAL_FUNCTION_IDS.contains(&vf) => {
            Err(RequestError::VirtualFunctionOutOfRange(vf))
        }
        _ => Ok(()),
    }
}

pub fn check_infiniband_interface(
    ifc: &InfiniBandInterfaceRequest,
) -> Result<(), RequestError> {
    if ifc.device.is_empty() {
        return Err(RequestError::InfiniBandDeviceRequired);
    }
    if !ifc.is_physical {
        return Err(RequestError::InfiniBandNotPhysical);
    }
    if ifc.virtual_function_id.is_some() {
        return Err(RequestError::InfiniBandVirtualFunction);
    }
    Ok(())
}

pub fn check_deployments(
    deployments: &[DpuExtensionServiceDeploymentRequest],
) -> Result<(), RequestError> {
    if let Some(d) = deployments.iter().find(|d| d.version.is_empty()) {
        return Err(RequestError::DeploymentVersionRequired(
            d.dpu_extension_service_id,
        ));
    }

    let mut seen = BTreeSet::new();
    for d in deployments {
        if !seen.insert((d.dpu_extension_service_id, d.version.as_str())) {
            return Err(RequestError::DuplicateDeployment {
                id: d.dpu_extension_service_id,
                version: d.version.clone(),
            });
        }
    }
    Ok(())
}

pub fn check_labels(
    labels: &BTreeMap<String, String>,
    limits: &Limits,
) -> Result<(), RequestError> {
    if labels.len() > limits.max_labels {
        return Err(RequestError::TooManyLabels(limits.max_labels));
    }

    for (key, value) in labels {
        if key.is_empty() {
            return Err(RequestError::LabelKeyMissing);
        }
        if key.trim().is_empty() {
            return Err(RequestError::LabelKeyWhitespace);
        }
        if key.len() > limits.max_label_key_length {
            return Err(RequestError::LabelKeyLength(
                limits.max_label_key_length,
            ));
        }
        if value.len() > limits.max_label_value_length {
            return Err(RequestError::LabelValueLength(
                limits.max_label_value_length,
            ));
        }
    }
    Ok(())
}

/// Runs the structural checks on a create request.
pub fn check_create_request(
    req: &InstanceCreateRequest,
    limits: &Limits,
) -> Result<(), RequestError> {
    check_name(&req.name)?;
    check_description(req.description.as_deref())?;

    check_interface_count(&req.interfaces, limits)?;

    match (req.instance_type_id, req.machine_id.as_deref()) {
        (Some(_), Some(_)) => return Err(RequestError::InstanceTypeAndMachine),
        (None, None) => return Err(RequestError::NoInstanceTypeOrMachine),
        _ => {}
    }

    check_boot_source(req.operating_system_id, req.ipxe_script.as_deref())?;
    check_attachments(
        &req.interfaces,
        &req.infiniband_interfaces,
        &req.dpu_extension_service_deployments,
        req.labels.as_ref(),
        limits,
    )
}

/// Runs the structural checks on a batch create request.
pub fn check_batch_create_request(
    req: &InstanceBatchCreateRequest,
    limits: &Limits,
) -> Result<(), RequestError> {
    if !NAME_PREFIX_LENGTH.contains(&req.name_prefix.chars().count()) {
        return Err(RequestError::NamePrefixLength);
    }
    if !BATCH_COUNT.contains(&req.count) {
        return Err(RequestError::BatchCountOutOfRange(req.count));
    }
    check_description(req.description.as_deref())?;
    check_interface_count(&req.interfaces, limits)?;

    check_boot_source(req.operating_system_id, req.ipxe_script.as_deref())?;
    check_attachments(
        &req.interfaces,
        &req.infiniband_interfaces,
        &req.dpu_extension_service_deployments,
        req.labels.as_ref(),
        limits,
    )
}

/// A new instance boots either from an operating system or from a
/// non-empty iPXE script.
fn check_boot_source(
    operating_system_id: Option<Uuid>,
    ipxe_script: Option<&str>,
) -> Result<(), RequestError> {
    if operating_system_id.is_some() {
        return Ok(());
    }
    match ipxe_script {
        None => Err(RequestError::NoOperatingSystemOrIpxe),
        Some("") => Err(RequestError::EmptyIpxeScript),
        Some(_) => Ok(()),
    }
}

fn check_attachments(
    interfaces: &[InterfaceRequest],
    infiniband_interfaces: &[InfiniBandInterfaceRequest],
    deployments: &[DpuExtensionServiceDeploymentRequest],
    labels: Option<&BTreeMap<String, String>>,
    limits: &Limits,
) -> Result<(), RequestError> {
    interfaces.iter().try_for_each(check_interface)?;
    infiniband_interfaces
        .iter()
        .try_for_each(check_infiniband_interface)?;
    check_deployments(deployments)?;

    if let Some(labels) = labels {
        check_labels(labels, limits)?;
    }
    Ok(())
}

/// Runs the structural checks on an update request.
pub fn check_update_request(
    req: &InstanceUpdateRequest,
    limits: &Limits,
) -> Result<(), RequestError> {
    if let Some(name) = &req.name {
        check_name(name)?;
    }
    check_description(req.description.as_deref())?;

    if req.os_selection().is_err() {
        return Err(RequestError::InvalidOperatingSystemId(
            req.operating_system_id.clone().unwrap_or_default(),
        ));
    }

    if let Some(interfaces) = &req.interfaces {
        check_interface_count(interfaces, limits)?;
    }

    if req.is_reboot_request() {
        if req.is_update_request() {
            return Err(RequestError::RebootWithUpdate);
        }
    } else {
        if req.reboot_with_custom_ipxe == Some(true) {
            return Err(RequestError::CustomIpxeWithoutReboot);
        }
        if req.apply_updates_on_reboot == Some(true) {
            return Err(RequestError::ApplyUpdatesWithoutReboot);
        }
    }

    req.interfaces
        .as_deref()
        .unwrap_or_default()
        .iter()
        .try_for_each(check_interface)?;
    req.infiniband_interfaces
        .as_deref()
        .unwrap_or_default()
        .iter()
        .try_for_each(check_infiniband_interface)?;
    check_deployments(
        req.dpu_extension_service_deployments.as_deref().unwrap_or_default(),
    )?;

    if let Some(labels) = &req.labels {
        check_labels(labels, limits)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn limits() -> Limits {
        Limits::default()
    }

    fn subnet_ifc() -> InterfaceRequest {
        InterfaceRequest {
            subnet_id: Some(Uuid::new_v4()),
            ..Default::default()
        }
    }

    fn create_request() -> InstanceCreateRequest {
        InstanceCreateRequest {
            name: "web-01".to_owned(),
            tenant_id: Uuid::new_v4(),
            instance_type_id: Some(Uuid::new_v4()),
            vpc_id: Uuid::new_v4(),
            ipxe_script: Some("#!ipxe".to_owned()),
            interfaces: vec![subnet_ifc()],
            ..Default::default()
        }
    }

    #[test]
    fn minimal_create_request_passes() {
        check_create_request(&create_request(), &limits()).unwrap();
    }

    #[test]
    fn create_request_shape() {
        let mut req = create_request();
        req.name = "x".to_owned();
        assert_eq!(
            check_create_request(&req, &limits()),
            Err(RequestError::NameLength)
        );

        let mut req = create_request();
        req.interfaces.clear();
        assert_eq!(
            check_create_request(&req, &limits()).unwrap_err().field(),
            "interfaces"
        );

        let mut req = create_request();
        req.interfaces = vec![subnet_ifc(); 17];
        assert_eq!(
            check_create_request(&req, &limits()),
            Err(RequestError::TooManyInterfaces(16))
        );

        let mut req = create_request();
        req.machine_id = Some("fm100ht".to_owned());
        assert_eq!(
            check_create_request(&req, &limits()).unwrap_err().field(),
            "machineId"
        );

        let mut req = create_request();
        req.instance_type_id = None;
        assert_eq!(
            check_create_request(&req, &limits()).unwrap_err().field(),
            "instanceTypeId"
        );
    }

    #[test]
    fn create_needs_os_or_script() {
        let mut req = create_request();
        req.ipxe_script = None;
        assert_eq!(
            check_create_request(&req, &limits()),
            Err(RequestError::NoOperatingSystemOrIpxe)
        );

        req.ipxe_script = Some(String::new());
        assert_eq!(
            check_create_request(&req, &limits()).unwrap_err().field(),
            "ipxeScript"
        );

        req.operating_system_id = Some(Uuid::new_v4());
        check_create_request(&req, &limits()).unwrap();
    }

    #[test]
    fn interface_fields_are_consistent() {
        let mut ifc = subnet_ifc();
        ifc.vpc_prefix_id = Some(Uuid::new_v4());
        assert_eq!(
            check_interface(&ifc),
            Err(RequestError::SubnetAndVpcPrefix)
        );

        let ifc = InterfaceRequest::default();
        assert_eq!(check_interface(&ifc), Err(RequestError::NoNetworkTarget));

        let mut ifc = subnet_ifc();
        ifc.device_instance = Some(0);
        assert_eq!(check_interface(&ifc).unwrap_err().field(), "device");

        ifc.device = Some("dpu".to_owned());
        assert_eq!(check_interface(&ifc).unwrap_err().field(), "vpcPrefixId");

        ifc.subnet_id = None;
        ifc.vpc_prefix_id = Some(Uuid::new_v4());
        assert_eq!(
            check_interface(&ifc),
            Err(RequestError::VirtualFunctionRequired)
        );

        ifc.virtual_function_id = Some(17);
        assert_eq!(
            check_interface(&ifc),
            Err(RequestError::VirtualFunctionOutOfRange(17))
        );

        ifc.virtual_function_id = Some(16);
        check_interface(&ifc).unwrap();
    }

    #[test]
    fn infiniband_interfaces_must_be_physical() {
        let mut ifc = InfiniBandInterfaceRequest {
            partition_id: Uuid::new_v4(),
            device: "MT2910".to_owned(),
            is_physical: true,
            ..Default::default()
        };
        check_infiniband_interface(&ifc).unwrap();

        ifc.virtual_function_id = Some(1);
        assert_eq!(
            check_infiniband_interface(&ifc).unwrap_err().field(),
            "virtualFunctionId"
        );

        ifc.is_physical = false;
        assert_eq!(
            check_infiniband_interface(&ifc).unwrap_err().field(),
            "isPhysical"
        );

        ifc.device.clear();
        assert_eq!(
            check_infiniband_interface(&ifc).unwrap_err().field(),
            "device"
        );
    }

    #[test]
    fn duplicate_deployments_are_rejected() {
        let id = Uuid::new_v4();
        let d = |version: &str| DpuExtensionServiceDeploymentRequest {
            dpu_extension_service_id: id,
            version: version.to_owned(),
        };
        check_deployments(&[d("1.0"), d("1.1")]).unwrap();
        assert!(matches!(
            check_deployments(&[d("1.0"), d("1.0")]),
            Err(RequestError::DuplicateDeployment { .. })
        ));
        assert_eq!(
            check_deployments(&[d("")]),
            Err(RequestError::DeploymentVersionRequired(id))
        );
    }

    #[test]
    fn labels_are_bounded() {
        let limits = limits();
        let labels = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };

        check_labels(&labels(&[("env", "prod"), ("tier", "")]), &limits)
            .unwrap();
        assert_eq!(
            check_labels(&labels(&[("", "x")]), &limits),
            Err(RequestError::LabelKeyMissing)
        );
        assert_eq!(
            check_labels(&labels(&[("  ", "x")]), &limits),
            Err(RequestError::LabelKeyWhitespace)
        );

        let long = "k".repeat(256);
        assert_eq!(
            check_labels(&labels(&[(&long, "x")]), &limits),
            Err(RequestError::LabelKeyLength(255))
        );
        assert_eq!(
            check_labels(&labels(&[("k", &long)]), &limits),
            Err(RequestError::LabelValueLength(255))
        );

        let many: BTreeMap<_, _> =
            (0..11).map(|i| (format!("k{i}"), String::new())).collect();
        assert_eq!(
            check_labels(&many, &limits),
            Err(RequestError::TooManyLabels(10))
        );
    }

    #[test]
    fn update_reboot_rules() {
        let limits = limits();

        let reboot = InstanceUpdateRequest {
            trigger_reboot: Some(true),
            reboot_with_custom_ipxe: Some(true),
            ..Default::default()
        };
        check_update_request(&reboot, &limits).unwrap();

        let mixed = InstanceUpdateRequest {
            trigger_reboot: Some(true),
            name: Some("renamed".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            check_update_request(&mixed, &limits),
            Err(RequestError::RebootWithUpdate)
        );

        let stray = InstanceUpdateRequest {
            apply_updates_on_reboot: Some(true),
            ..Default::default()
        };
        assert_eq!(
            check_update_request(&stray, &limits).unwrap_err().field(),
            "applyUpdatesOnReboot"
        );
    }

    #[test]
    fn update_interface_list_cannot_be_emptied() {
        let req = InstanceUpdateRequest {
            interfaces: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(
            check_update_request(&req, &limits()),
            Err(RequestError::NoInterfaces)
        );

        let req = InstanceUpdateRequest {
            interfaces: Some(vec![subnet_ifc()]),
            ..Default::default()
        };
        check_update_request(&req, &limits()).unwrap();

        check_update_request(&InstanceUpdateRequest::default(), &limits())
            .unwrap();
    }

    fn batch_request() -> InstanceBatchCreateRequest {
        InstanceBatchCreateRequest {
            name_prefix: "worker".to_owned(),
            count: 4,
            tenant_id: Uuid::new_v4(),
            instance_type_id: Uuid::new_v4(),
            vpc_id: Uuid::new_v4(),
            ipxe_script: Some("#!ipxe".to_owned()),
            interfaces: vec![subnet_ifc()],
            ..Default::default()
        }
    }

    #[test]
    fn batch_count_and_prefix_are_bounded() {
        let limits = limits();
        check_batch_create_request(&batch_request(), &limits).unwrap();

        for count in [0, 1, 19] {
            let req = InstanceBatchCreateRequest { count, ..batch_request() };
            let err = check_batch_create_request(&req, &limits).unwrap_err();
            assert_eq!(err, RequestError::BatchCountOutOfRange(count));
            assert_eq!(err.field(), "count");
        }
        let req = InstanceBatchCreateRequest { count: 18, ..batch_request() };
        check_batch_create_request(&req, &limits).unwrap();

        for prefix in ["w".to_owned(), "w".repeat(241)] {
            let req = InstanceBatchCreateRequest {
                name_prefix: prefix,
                ..batch_request()
            };
            let err = check_batch_create_request(&req, &limits).unwrap_err();
            assert_eq!(err.field(), "namePrefix");
        }
    }

    #[test]
    fn batch_shares_create_checks() {
        let limits = limits();

        let req = InstanceBatchCreateRequest {
            ipxe_script: None,
            ..batch_request()
        };
        assert_eq!(
            check_batch_create_request(&req, &limits),
            Err(RequestError::NoOperatingSystemOrIpxe)
        );

        let req = InstanceBatchCreateRequest {
            interfaces: vec![],
            ..batch_request()
        };
        assert_eq!(
            check_batch_create_request(&req, &limits),
            Err(RequestError::NoInterfaces)
        );

        let req = InstanceBatchCreateRequest {
            interfaces: vec![InterfaceRequest::default()],
            ..batch_request()
        };
        assert_eq!(
            check_batch_create_request(&req, &limits),
            Err(RequestError::NoNetworkTarget)
        );
    }

    #[test]
    fn update_rejects_malformed_os_id() {
        let req = InstanceUpdateRequest {
            operating_system_id: Some("not-a-uuid".to_owned()),
            ..Default::default()
        };
        let err = check_update_request(&req, &limits()).unwrap_err();
        assert_eq!(err.field(), "operatingSystemId");

        let cleared = InstanceUpdateRequest {
            operating_system_id: Some(String::new()),
            ipxe_script: Some("#!ipxe".to_owned()),
            ..Default::default()
        };
        check_update_request(&cleared, &limits()).unwrap();
    }
}
