use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RepairError;
use crate::iam::IamLookup;
use crate::template::{Resource, Template};

pub const IAM_ROLE: &str = "AWS::IAM::Role";
pub const IAM_MANAGED_POLICY: &str = "AWS::IAM::ManagedPolicy";
pub const IAM_INSTANCE_PROFILE: &str = "AWS::IAM::InstanceProfile";

/// One entry of the import manifest handed to CloudFormation. The field
/// names and identifier keys are provider-mandated and serialized bit-exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceImport {
    #[serde(rename = "ResourceType")]
    pub resource_type: String,

    #[serde(rename = "LogicalResourceId")]
    pub logical_resource_id: String,

    #[serde(rename = "ResourceIdentifier")]
    pub resource_identifier: BTreeMap<String, String>,
}

/// Resolve a declared resource to its live identifier, or `None` when it has
/// no live counterpart. Only the three importable IAM types resolve;
/// everything else is skipped without error.
pub async fn resolve_identity(
    logical_id: &str,
    resource: &Resource,
    template: &Template,
    iam: &dyn IamLookup,
) -> Result<Option<ResourceImport>, RepairError> {
    match resource.resource_type.as_str() {
        IAM_ROLE => resolve_role(logical_id, resource, iam).await,
        IAM_MANAGED_POLICY => resolve_managed_policy(logical_id, resource, iam).await,
        IAM_INSTANCE_PROFILE => {
            resolve_instance_profile(logical_id, resource, template, iam).await
        }
        _ => Ok(None),
    }
}

async fn resolve_role(
    logical_id: &str,
    resource: &Resource,
    iam: &dyn IamLookup,
) -> Result<Option<ResourceImport>, RepairError> {
    let declared = resource
        .string_property("RoleName")
        .ok_or_else(|| property_err(logical_id, "RoleName"))?;

    let Some(name) = iam.get_role_name(declared).await? else {
        return Ok(None);
    };

    tracing::info!(logical_id, role_name = %name, "IAM role exists, importable");
    Ok(Some(identity(IAM_ROLE, logical_id, "RoleName", name)))
}

async fn resolve_managed_policy(
    logical_id: &str,
    resource: &Resource,
    iam: &dyn IamLookup,
) -> Result<Option<ResourceImport>, RepairError> {
    let declared = resource
        .string_property("ManagedPolicyName")
        .ok_or_else(|| property_err(logical_id, "ManagedPolicyName"))?;

    let Some(arn) = find_policy_arn(iam, declared).await? else {
        return Ok(None);
    };

    tracing::info!(logical_id, policy_arn = %arn, "managed policy exists, importable");
    Ok(Some(identity(
        IAM_MANAGED_POLICY,
        logical_id,
        "PolicyArn",
        arn,
    )))
}

/// Page through the account's managed policies until one matches the
/// declared name, case-insensitively. `None` after full enumeration.
async fn find_policy_arn(
    iam: &dyn IamLookup,
    declared: &str,
) -> Result<Option<String>, RepairError> {
    let mut marker = None;
    loop {
        let page = iam.list_policies_page(marker).await?;
        if let Some(policy) = page
            .policies
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(declared))
        {
            return Ok(Some(policy.arn.clone()));
        }
        match page.next_marker {
            Some(next) => marker = Some(next),
            None => return Ok(None),
        }
    }
}

/// `InstanceProfileName` may be a plain string or `{Ref: <role>}`. The Ref
/// is followed exactly one level, to a role in the same template, and that
/// role's declared `RoleName` becomes the profile's presumed name.
async fn resolve_instance_profile(
    logical_id: &str,
    resource: &Resource,
    template: &Template,
    iam: &dyn IamLookup,
) -> Result<Option<ResourceImport>, RepairError> {
    let profile_name = match resource.string_property("InstanceProfileName") {
        Some(name) => name.to_string(),
        None => {
            let role_ref = resource
                .ref_property("InstanceProfileName")
                .ok_or_else(|| property_err(logical_id, "InstanceProfileName"))?;
            let role = template.resources.get(role_ref).ok_or_else(|| {
                RepairError::Resolver(format!(
                    "{logical_id}: Ref \"{role_ref}\" names no resource in this template"
                ))
            })?;
            role.string_property("RoleName")
                .ok_or_else(|| property_err(role_ref, "RoleName"))?
                .to_string()
        }
    };

    let Some(name) = iam.get_instance_profile_name(&profile_name).await? else {
        return Ok(None);
    };

    tracing::info!(logical_id, profile_name = %name, "instance profile exists, importable");
    Ok(Some(identity(
        IAM_INSTANCE_PROFILE,
        logical_id,
        "InstanceProfileName",
        name,
    )))
}

fn identity(resource_type: &str, logical_id: &str, key: &str, value: String) -> ResourceImport {
    ResourceImport {
        resource_type: resource_type.to_string(),
        logical_resource_id: logical_id.to_string(),
        resource_identifier: BTreeMap::from([(key.to_string(), value)]),
    }
}

fn property_err(logical_id: &str, property: &str) -> RepairError {
    RepairError::Property {
        logical_id: logical_id.to_string(),
        property: property.to_string(),
    }
}
