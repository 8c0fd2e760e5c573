//! Capability seams over the CloudFormation and CloudControl surfaces the
//! repair workflows drive. One production impl each over the SDK clients;
//! tests stub these the same way they stub [`IamLookup`].

use std::time::Duration;

use aws_sdk_cloudcontrol::types::OperationStatus;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::client::Waiters;
use aws_sdk_cloudformation::types::{
    Capability, ChangeSetType, PropertyDifference, ResourceToImport, StackDriftStatus,
    StackInstanceDetailedStatus, StackInstanceSummary, StackResourceDriftStatus,
    StackSetOperationStatus,
};
use tokio::time::sleep;

use crate::credentials::CredentialBroker;
use crate::error::{RepairError, format_err_chain};
use crate::iam::{BoxFuture, IamLookup, SdkIamLookup};
use crate::import_plan::ImportPlan;
use crate::resolve::ResourceImport;
use crate::storage::TemplateSource;

const CHANGE_SET_NAME: &str = "ImportChangeSet";

const CHANGE_SET_WAIT: Duration = Duration::from_secs(5 * 60);
const IMPORT_WAIT: Duration = Duration::from_secs(15 * 60);
const UPDATE_WAIT: Duration = Duration::from_secs(30 * 60);
const STATUS_POLL: Duration = Duration::from_secs(5);

/// Plain view of one stack instance of a StackSet.
#[derive(Debug, Clone)]
pub struct StackInstance {
    pub account: String,
    pub region: String,
    pub stack_id: Option<String>,
    pub failed: bool,
    pub drifted: bool,
}

/// One resource's drift record, addressed by the live physical identifier
/// the patches go to.
#[derive(Debug, Clone)]
pub struct ResourceDrift {
    pub physical_resource_id: Option<String>,
    pub resource_type: String,
    pub in_sync: bool,
    pub differences: Vec<PropertyDifference>,
}

/// Where a StackSet operation stands. Everything non-terminal maps to
/// `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSetOperationState {
    InProgress,
    Succeeded,
    Failed,
    Stopped,
}

impl StackSetOperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackSetOperationState::InProgress => "IN_PROGRESS",
            StackSetOperationState::Succeeded => "SUCCEEDED",
            StackSetOperationState::Failed => "FAILED",
            StackSetOperationState::Stopped => "STOPPED",
        }
    }
}

/// Management-account CloudFormation surface shared by both workflows.
pub trait StackSetOps: Send + Sync {
    /// `DescribeStackSet`, returning the declared template body.
    fn template_body(&self, stack_set_name: &str) -> BoxFuture<'_, Result<String, RepairError>>;

    /// Every stack instance of the StackSet, all pages.
    fn stack_instances(
        &self,
        stack_set_name: &str,
    ) -> BoxFuture<'_, Result<Vec<StackInstance>, RepairError>>;

    /// `DeleteStackInstances` for one (account, region). Returns the
    /// StackSet operation id to poll.
    fn delete_stack_instance(
        &self,
        stack_set_name: &str,
        account: &str,
        region: &str,
        retain_stacks: bool,
    ) -> BoxFuture<'_, Result<String, RepairError>>;

    /// `DescribeStackSetOperation`, reduced to a [`StackSetOperationState`].
    fn operation_state(
        &self,
        stack_set_name: &str,
        operation_id: &str,
    ) -> BoxFuture<'_, Result<StackSetOperationState, RepairError>>;

    /// `ImportStacksToStackSet` with one stack id.
    fn attach_stack(
        &self,
        stack_set_name: &str,
        stack_id: &str,
    ) -> BoxFuture<'_, Result<(), RepairError>>;

    /// `DescribeStackResourceDrifts` for one stack.
    fn resource_drifts(
        &self,
        stack_id: &str,
    ) -> BoxFuture<'_, Result<Vec<ResourceDrift>, RepairError>>;
}

/// Target-account stack surface: the import change set and the follow-up
/// update, bounded waits included.
pub trait StackOps: Send + Sync {
    /// Create and execute the IMPORT change set. Returns the stack id the
    /// change set was created against.
    fn import_resources(
        &self,
        stack_name: &str,
        source: &TemplateSource,
        plan: &ImportPlan,
    ) -> BoxFuture<'_, Result<String, RepairError>>;

    fn await_import(&self, stack_name: &str) -> BoxFuture<'_, Result<(), RepairError>>;

    fn update_stack(
        &self,
        stack_name: &str,
        source: &TemplateSource,
    ) -> BoxFuture<'_, Result<(), RepairError>>;
}

/// Target-account CloudControl surface: one patch document applied and
/// polled to a terminal status.
pub trait ResourcePatcher: Send + Sync {
    fn apply_patch(
        &self,
        identifier: &str,
        type_name: &str,
        document: &str,
    ) -> BoxFuture<'_, Result<(), RepairError>>;
}

/// Everything the workflows need inside one (account, region).
pub struct TargetCapabilities {
    pub iam: Box<dyn IamLookup>,
    pub stack: Box<dyn StackOps>,
    pub patcher: Box<dyn ResourcePatcher>,
}

/// Hands out [`TargetCapabilities`] per (account, region).
pub trait TargetBroker: Send + Sync {
    fn target(
        &mut self,
        account: &str,
        region: &str,
    ) -> BoxFuture<'_, Result<TargetCapabilities, RepairError>>;
}

pub struct SdkStackSetOps {
    client: Client,
}

impl SdkStackSetOps {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

impl StackSetOps for SdkStackSetOps {
    fn template_body(&self, stack_set_name: &str) -> BoxFuture<'_, Result<String, RepairError>> {
        let stack_set_name = stack_set_name.to_string();
        Box::pin(async move {
            let out = self
                .client
                .describe_stack_set()
                .stack_set_name(&stack_set_name)
                .send()
                .await
                .map_err(|e| {
                    RepairError::Aws(format!(
                        "cloudformation:DescribeStackSet failed: {}",
                        format_err_chain(&e)
                    ))
                })?;

            out.stack_set()
                .and_then(|s| s.template_body())
                .map(String::from)
                .ok_or_else(|| {
                    RepairError::Aws(format!("stack set {stack_set_name} has no template body"))
                })
        })
    }

    fn stack_instances(
        &self,
        stack_set_name: &str,
    ) -> BoxFuture<'_, Result<Vec<StackInstance>, RepairError>> {
        let stack_set_name = stack_set_name.to_string();
        Box::pin(async move {
            let mut instances = Vec::new();
            let mut pages = self
                .client
                .list_stack_instances()
                .stack_set_name(&stack_set_name)
                .into_paginator()
                .send();

            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| {
                    RepairError::Aws(format!(
                        "cloudformation:ListStackInstances failed: {}",
                        format_err_chain(&e)
                    ))
                })?;
                instances.extend(page.summaries().iter().map(from_summary));
            }

            Ok(instances)
        })
    }

    fn delete_stack_instance(
        &self,
        stack_set_name: &str,
        account: &str,
        region: &str,
        retain_stacks: bool,
    ) -> BoxFuture<'_, Result<String, RepairError>> {
        let stack_set_name = stack_set_name.to_string();
        let account = account.to_string();
        let region = region.to_string();
        Box::pin(async move {
            let output = self
                .client
                .delete_stack_instances()
                .stack_set_name(&stack_set_name)
                .accounts(&account)
                .regions(&region)
                .retain_stacks(retain_stacks)
                .send()
                .await
                .map_err(|e| {
                    RepairError::Aws(format!(
                        "cloudformation:DeleteStackInstances failed: {}",
                        format_err_chain(&e)
                    ))
                })?;

            output
                .operation_id()
                .map(String::from)
                .ok_or_else(|| {
                    RepairError::Aws("DeleteStackInstances returned no operation id".into())
                })
        })
    }

    fn operation_state(
        &self,
        stack_set_name: &str,
        operation_id: &str,
    ) -> BoxFuture<'_, Result<StackSetOperationState, RepairError>> {
        let stack_set_name = stack_set_name.to_string();
        let operation_id = operation_id.to_string();
        Box::pin(async move {
            let op = self
                .client
                .describe_stack_set_operation()
                .stack_set_name(&stack_set_name)
                .operation_id(&operation_id)
                .send()
                .await
                .map_err(|e| {
                    RepairError::Aws(format!(
                        "cloudformation:DescribeStackSetOperation failed: {}",
                        format_err_chain(&e)
                    ))
                })?;

            let state = match op.stack_set_operation().and_then(|o| o.status()) {
                Some(StackSetOperationStatus::Succeeded) => StackSetOperationState::Succeeded,
                Some(StackSetOperationStatus::Failed) => StackSetOperationState::Failed,
                Some(StackSetOperationStatus::Stopped) => StackSetOperationState::Stopped,
                _ => StackSetOperationState::InProgress,
            };
            Ok(state)
        })
    }

    fn attach_stack(
        &self,
        stack_set_name: &str,
        stack_id: &str,
    ) -> BoxFuture<'_, Result<(), RepairError>> {
        let stack_set_name = stack_set_name.to_string();
        let stack_id = stack_id.to_string();
        Box::pin(async move {
            self.client
                .import_stacks_to_stack_set()
                .stack_set_name(&stack_set_name)
                .stack_ids(&stack_id)
                .send()
                .await
                .map_err(|e| {
                    RepairError::Aws(format!(
                        "cloudformation:ImportStacksToStackSet failed: {}",
                        format_err_chain(&e)
                    ))
                })?;
            Ok(())
        })
    }

    fn resource_drifts(
        &self,
        stack_id: &str,
    ) -> BoxFuture<'_, Result<Vec<ResourceDrift>, RepairError>> {
        let stack_id = stack_id.to_string();
        Box::pin(async move {
            let output = self
                .client
                .describe_stack_resource_drifts()
                .stack_name(&stack_id)
                .send()
                .await
                .map_err(|e| {
                    RepairError::Aws(format!(
                        "cloudformation:DescribeStackResourceDrifts failed: {}",
                        format_err_chain(&e)
                    ))
                })?;

            let drifts = output
                .stack_resource_drifts()
                .iter()
                .map(|d| ResourceDrift {
                    physical_resource_id: d.physical_resource_id().map(String::from),
                    resource_type: d.resource_type().unwrap_or_default().to_string(),
                    in_sync: d
                        .stack_resource_drift_status()
                        .is_some_and(|s| *s == StackResourceDriftStatus::InSync),
                    differences: d.property_differences().to_vec(),
                })
                .collect();
            Ok(drifts)
        })
    }
}

fn from_summary(summary: &StackInstanceSummary) -> StackInstance {
    StackInstance {
        account: summary.account().unwrap_or_default().to_string(),
        region: summary.region().unwrap_or_default().to_string(),
        stack_id: summary.stack_id().map(String::from),
        failed: summary
            .stack_instance_status()
            .and_then(|s| s.detailed_status())
            .is_some_and(|s| *s == StackInstanceDetailedStatus::Failed),
        drifted: summary
            .drift_status()
            .is_some_and(|s| *s == StackDriftStatus::Drifted),
    }
}

pub struct SdkStackOps {
    client: Client,
}

impl SdkStackOps {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

impl StackOps for SdkStackOps {
    fn import_resources(
        &self,
        stack_name: &str,
        source: &TemplateSource,
        plan: &ImportPlan,
    ) -> BoxFuture<'_, Result<String, RepairError>> {
        let stack_name = stack_name.to_string();
        let source = source.clone();
        let plan = plan.clone();
        Box::pin(async move {
            let mut request = self
                .client
                .create_change_set()
                .stack_name(&stack_name)
                .change_set_name(CHANGE_SET_NAME)
                .change_set_type(ChangeSetType::Import)
                .capabilities(Capability::CapabilityNamedIam);

            request = match &source {
                TemplateSource::Body(body) => request.template_body(body),
                TemplateSource::Url(url) => request.template_url(url),
            };

            for resource in &plan.resources {
                request = request.resources_to_import(to_sdk_import(resource)?);
            }

            let output = request.send().await.map_err(|e| {
                RepairError::ChangeSet(format!(
                    "cloudformation:CreateChangeSet failed: {}",
                    format_err_chain(&e)
                ))
            })?;
            let stack_id = output.stack_id().unwrap_or(&stack_name).to_string();

            self.client
                .wait_until_change_set_create_complete()
                .stack_name(&stack_name)
                .change_set_name(CHANGE_SET_NAME)
                .wait(CHANGE_SET_WAIT)
                .await
                .map_err(|e| waiter_err("change set creation", &e))?;

            self.client
                .execute_change_set()
                .stack_name(&stack_name)
                .change_set_name(CHANGE_SET_NAME)
                .send()
                .await
                .map_err(|e| {
                    RepairError::ChangeSet(format!(
                        "cloudformation:ExecuteChangeSet failed: {}",
                        format_err_chain(&e)
                    ))
                })?;

            Ok(stack_id)
        })
    }

    fn await_import(&self, stack_name: &str) -> BoxFuture<'_, Result<(), RepairError>> {
        let stack_name = stack_name.to_string();
        Box::pin(async move {
            self.client
                .wait_until_stack_import_complete()
                .stack_name(&stack_name)
                .wait(IMPORT_WAIT)
                .await
                .map_err(|e| waiter_err("stack import", &e))?;
            Ok(())
        })
    }

    fn update_stack(
        &self,
        stack_name: &str,
        source: &TemplateSource,
    ) -> BoxFuture<'_, Result<(), RepairError>> {
        let stack_name = stack_name.to_string();
        let source = source.clone();
        Box::pin(async move {
            let mut request = self
                .client
                .update_stack()
                .stack_name(&stack_name)
                .capabilities(Capability::CapabilityNamedIam)
                .disable_rollback(true);

            request = match &source {
                TemplateSource::Body(body) => request.template_body(body),
                TemplateSource::Url(url) => request.template_url(url),
            };

            request.send().await.map_err(|e| {
                RepairError::Aws(format!(
                    "cloudformation:UpdateStack failed: {}",
                    format_err_chain(&e)
                ))
            })?;

            self.client
                .wait_until_stack_update_complete()
                .stack_name(&stack_name)
                .wait(UPDATE_WAIT)
                .await
                .map_err(|e| waiter_err("stack update", &e))?;
            Ok(())
        })
    }
}

pub struct SdkResourcePatcher {
    client: aws_sdk_cloudcontrol::Client,
}

impl SdkResourcePatcher {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudcontrol::Client::new(config),
        }
    }

    async fn wait_for_request(&self, token: &str) -> Result<(), RepairError> {
        loop {
            let output = self
                .client
                .get_resource_request_status()
                .request_token(token)
                .send()
                .await
                .map_err(|e| RepairError::UpdateResource(format_err_chain(&e)))?;

            let Some(event) = output.progress_event() else {
                return Err(RepairError::UpdateResource(
                    "GetResourceRequestStatus returned no progress event".into(),
                ));
            };

            match event.operation_status() {
                Some(OperationStatus::Success) => return Ok(()),
                Some(
                    status @ (OperationStatus::Failed
                    | OperationStatus::CancelComplete
                    | OperationStatus::CancelInProgress),
                ) => {
                    return Err(RepairError::OperationTerminal {
                        status: status.as_str().to_string(),
                        message: event
                            .status_message()
                            .unwrap_or("no status message")
                            .to_string(),
                    });
                }
                status => {
                    tracing::debug!(token, status = ?status, "resource request still in progress");
                    sleep(STATUS_POLL).await;
                }
            }
        }
    }
}

impl ResourcePatcher for SdkResourcePatcher {
    fn apply_patch(
        &self,
        identifier: &str,
        type_name: &str,
        document: &str,
    ) -> BoxFuture<'_, Result<(), RepairError>> {
        let identifier = identifier.to_string();
        let type_name = type_name.to_string();
        let document = document.to_string();
        Box::pin(async move {
            let output = self
                .client
                .update_resource()
                .identifier(&identifier)
                .type_name(&type_name)
                .patch_document(&document)
                .send()
                .await
                .map_err(|e| RepairError::UpdateResource(format_err_chain(&e)))?;

            let token = output
                .progress_event()
                .and_then(|p| p.request_token())
                .ok_or_else(|| {
                    RepairError::UpdateResource("UpdateResource returned no request token".into())
                })?
                .to_string();

            self.wait_for_request(&token).await
        })
    }
}

/// Production [`TargetBroker`]: assumes the repair role through the
/// [`CredentialBroker`] and wraps the scoped config in SDK capabilities.
pub struct RoleTargetBroker {
    broker: CredentialBroker,
}

impl RoleTargetBroker {
    pub fn new(broker: CredentialBroker) -> Self {
        Self { broker }
    }
}

impl TargetBroker for RoleTargetBroker {
    fn target(
        &mut self,
        account: &str,
        region: &str,
    ) -> BoxFuture<'_, Result<TargetCapabilities, RepairError>> {
        let account = account.to_string();
        let region = region.to_string();
        Box::pin(async move {
            let config = self.broker.scoped_config(&account, &region).await?.clone();
            Ok(TargetCapabilities {
                iam: Box::new(SdkIamLookup::new(&config)),
                stack: Box::new(SdkStackOps::new(&config)),
                patcher: Box::new(SdkResourcePatcher::new(&config)),
            })
        })
    }
}

fn to_sdk_import(resource: &ResourceImport) -> Result<ResourceToImport, RepairError> {
    Ok(ResourceToImport::builder()
        .resource_type(&resource.resource_type)
        .logical_resource_id(&resource.logical_resource_id)
        .set_resource_identifier(Some(
            resource.resource_identifier.clone().into_iter().collect(),
        ))
        .build())
}

fn waiter_err(operation: &str, err: &impl std::fmt::Display) -> RepairError {
    RepairError::Waiter {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}
