use std::time::Duration;

use tokio::time::sleep;

use crate::cloud::{
    RoleTargetBroker, SdkStackSetOps, StackInstance, StackSetOps, StackSetOperationState,
    TargetBroker,
};
use crate::credentials::CredentialBroker;
use crate::error::RepairError;
use crate::import_plan::build_import_plan;
use crate::storage::{InlineStore, S3Store, TemplateSource, TemplateStore};
use crate::template::Template;

const OPERATION_POLL: Duration = Duration::from_secs(10);

/// Repair every FAILED stack instance of a StackSet.
///
/// Per instance, in order: assume the repair role, build an import plan in
/// the target account, create and execute an IMPORT change set on the
/// existing stack, wait for the import, update the stack back to the
/// StackSet's declared template, then detach the instance (retaining the
/// stack) and re-attach the repaired stack to the StackSet.
///
/// Instances are processed sequentially; any step failing is fatal to the
/// run so the operator can inspect the half-repaired stack.
pub async fn fix_failed_instances(
    config: &aws_config::SdkConfig,
    stack_set_name: &str,
    role_name: &str,
    s3_bucket: Option<&str>,
) -> Result<(), RepairError> {
    let ops = SdkStackSetOps::new(config);
    let mut targets = RoleTargetBroker::new(CredentialBroker::new(config.clone(), role_name));
    let store: Box<dyn TemplateStore> = match s3_bucket {
        Some(bucket) => Box::new(S3Store::new(config.clone(), bucket)),
        None => Box::new(InlineStore),
    };
    repair_stack_set(&ops, &mut targets, store.as_ref(), stack_set_name).await
}

/// The workflow proper, over the capability seams so it can be driven by
/// stubs as well as the SDK.
pub async fn repair_stack_set(
    ops: &dyn StackSetOps,
    targets: &mut dyn TargetBroker,
    store: &dyn TemplateStore,
    stack_set_name: &str,
) -> Result<(), RepairError> {
    let template_body = ops.template_body(stack_set_name).await?;
    let template = Template::parse(template_body.as_bytes())?;
    let template_source = store.stage(template_body).await?;

    for instance in ops.stack_instances(stack_set_name).await? {
        if !instance.failed {
            continue;
        }
        repair_instance(
            ops,
            targets,
            store,
            stack_set_name,
            &template,
            &template_source,
            &instance,
        )
        .await?;
    }

    Ok(())
}

/// A stack id is `arn:...:stack/<name>/<uuid>`; the stack name is the second
/// slash-separated segment.
pub fn stack_name_from_id(stack_id: &str) -> Option<String> {
    let mut parts = stack_id.split('/');
    parts.next()?;
    parts
        .next()
        .filter(|name| !name.is_empty())
        .map(String::from)
}

async fn repair_instance(
    ops: &dyn StackSetOps,
    targets: &mut dyn TargetBroker,
    store: &dyn TemplateStore,
    stack_set_name: &str,
    template: &Template,
    template_source: &TemplateSource,
    instance: &StackInstance,
) -> Result<(), RepairError> {
    let instance_stack_id = instance.stack_id.as_deref().unwrap_or_default();
    let stack_name = stack_name_from_id(instance_stack_id)
        .ok_or_else(|| RepairError::Aws(format!("malformed stack id: {instance_stack_id}")))?;

    tracing::info!(account = %instance.account, region = %instance.region, stack = %stack_name, "repairing failed stack instance");

    // Identities are resolved in the target account so the lookups see
    // local state.
    let target = targets.target(&instance.account, &instance.region).await?;
    let plan = build_import_plan(template, &*target.iam).await?;

    if plan.is_empty() {
        tracing::warn!(account = %instance.account, region = %instance.region, "no importable resources exist in this account, skipping instance");
        return Ok(());
    }

    let import_source = store.stage(plan.template_yaml()?).await?;

    let stack_id = target
        .stack
        .import_resources(&stack_name, &import_source, &plan)
        .await?;
    target.stack.await_import(&stack_name).await?;
    target.stack.update_stack(&stack_name, template_source).await?;
    detach_instance(ops, stack_set_name, &instance.account, &instance.region).await?;
    ops.attach_stack(stack_set_name, &stack_id).await?;

    tracing::info!(account = %instance.account, region = %instance.region, stack = %stack_name, "stack instance repaired and re-attached");
    Ok(())
}

/// Delete the instance from the StackSet, retaining the underlying stack,
/// and poll the StackSet operation until it succeeds. A FAILED or STOPPED
/// operation is fatal.
async fn detach_instance(
    ops: &dyn StackSetOps,
    stack_set_name: &str,
    account: &str,
    region: &str,
) -> Result<(), RepairError> {
    let operation_id = ops
        .delete_stack_instance(stack_set_name, account, region, true)
        .await?;

    loop {
        match ops.operation_state(stack_set_name, &operation_id).await? {
            StackSetOperationState::Succeeded => return Ok(()),
            state @ (StackSetOperationState::Failed | StackSetOperationState::Stopped) => {
                return Err(RepairError::OperationTerminal {
                    status: state.as_str().to_string(),
                    message: format!(
                        "stack instance detach from {stack_set_name} did not succeed"
                    ),
                });
            }
            StackSetOperationState::InProgress => sleep(OPERATION_POLL).await,
        }
    }
}
