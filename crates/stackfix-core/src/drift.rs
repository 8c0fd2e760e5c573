use aws_sdk_cloudformation::types::{DifferenceType, PropertyDifference};
use serde::Serialize;
use serde_json::Value;

use crate::cloud::{ResourcePatcher, RoleTargetBroker, SdkStackSetOps, StackSetOps, TargetBroker};
use crate::credentials::CredentialBroker;
use crate::error::RepairError;

/// One JSON-Patch mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// Translate one drift difference into the JSON-Patch operation that undoes
/// it.
///
/// The mapping inverts add/remove on purpose: an `Add` difference means the
/// property is present in the live resource but absent from the template,
/// so the patch must `remove` it; a `Remove` difference means the opposite.
///
/// An `Add`-difference expected value that is not valid JSON is a
/// provider-data contract violation and is reported as an error rather than
/// being patched in raw.
pub fn patch_operation(
    difference: &PropertyDifference,
) -> Result<Option<PatchOperation>, RepairError> {
    let path = difference.property_path().unwrap_or_default().to_string();

    let op = match difference.difference_type() {
        Some(DifferenceType::NotEqual) => PatchOperation {
            op: PatchOp::Replace,
            path,
            value: Some(parse_expected_lenient(
                difference.expected_value().unwrap_or_default(),
            )),
        },
        Some(DifferenceType::Add) => PatchOperation {
            op: PatchOp::Remove,
            path,
            value: None,
        },
        Some(DifferenceType::Remove) => {
            let value = serde_json::from_str(difference.expected_value().unwrap_or_default())
                .map_err(|e| {
                    RepairError::PatchValue {
                        path: path.clone(),
                        source: e,
                    }
                })?;
            PatchOperation {
                op: PatchOp::Add,
                path,
                value: Some(value),
            }
        }
        other => {
            tracing::warn!(difference_type = %other.map(DifferenceType::as_str).unwrap_or_default(), path = %path, "unrecognized difference type, skipping");
            return Ok(None);
        }
    };

    Ok(Some(op))
}

/// A replace patch carries the expected value as JSON when it parses, and
/// as the raw string otherwise.
fn parse_expected_lenient(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// The single-operation patch document CloudControl accepts.
pub fn patch_document(op: &PatchOperation) -> Result<String, RepairError> {
    Ok(serde_json::to_string_pretty(std::slice::from_ref(op))?)
}

/// Reconcile every DRIFTED stack instance of a StackSet by patching live
/// resources back to their declared properties through CloudControl.
pub async fn fix_drifted_instances(
    config: &aws_config::SdkConfig,
    stack_set_name: &str,
    role_name: &str,
) -> Result<(), RepairError> {
    let ops = SdkStackSetOps::new(config);
    let mut targets = RoleTargetBroker::new(CredentialBroker::new(config.clone(), role_name));
    reconcile_stack_set(&ops, &mut targets, stack_set_name).await
}

/// The workflow proper, over the capability seams.
///
/// Best-effort per instance: an instance whose role cannot be assumed or
/// whose drifts cannot be described is logged and skipped.
pub async fn reconcile_stack_set(
    ops: &dyn StackSetOps,
    targets: &mut dyn TargetBroker,
    stack_set_name: &str,
) -> Result<(), RepairError> {
    for instance in ops.stack_instances(stack_set_name).await? {
        if !instance.drifted {
            continue;
        }
        let Some(stack_id) = instance.stack_id.as_deref() else {
            continue;
        };

        tracing::info!(account = %instance.account, region = %instance.region, "reconciling drifted stack instance");

        let target = match targets.target(&instance.account, &instance.region).await {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(account = %instance.account, error = %e, "failed to assume repair role, skipping instance");
                continue;
            }
        };

        let drifts = match ops.resource_drifts(stack_id).await {
            Ok(drifts) => drifts,
            Err(e) => {
                tracing::warn!(account = %instance.account, error = %e, "failed to describe resource drifts, skipping instance");
                continue;
            }
        };

        for drift in drifts {
            if drift.in_sync {
                continue;
            }
            let Some(identifier) = drift.physical_resource_id.as_deref() else {
                continue;
            };
            apply_differences(
                target.patcher.as_ref(),
                identifier,
                &drift.resource_type,
                &drift.differences,
            )
            .await?;
        }
    }

    Ok(())
}

/// Apply every property difference of one drifted resource. A patch that
/// fails is logged and the remaining patches are still attempted.
pub async fn apply_differences(
    patcher: &dyn ResourcePatcher,
    identifier: &str,
    type_name: &str,
    differences: &[PropertyDifference],
) -> Result<(), RepairError> {
    for difference in differences {
        let Some(op) = patch_operation(difference)? else {
            continue;
        };
        let document = patch_document(&op)?;

        tracing::info!(identifier, type_name, path = %op.path, op = ?op.op, "patching drifted property");

        if let Err(e) = patcher.apply_patch(identifier, type_name, &document).await {
            tracing::warn!(identifier, path = %op.path, error = %e, "patch failed, continuing with remaining differences");
        }
    }

    Ok(())
}
