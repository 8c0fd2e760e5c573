use std::future::Future;
use std::pin::Pin;

use aws_sdk_iam::Client;
use aws_sdk_iam::types::PolicyScopeType;

use crate::error::{RepairError, format_err_chain};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One page of `iam:ListPolicies`.
#[derive(Debug, Clone, Default)]
pub struct PolicyPage {
    pub policies: Vec<PolicySummary>,
    /// Marker for the next page, `None` when this page is the last.
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PolicySummary {
    pub name: String,
    pub arn: String,
}

/// The IAM lookups the identity resolver needs. One production impl over
/// the SDK client; tests stub this.
///
/// The get methods return `Ok(None)` when the entity does not exist —
/// absence is the normal path, not an error.
pub trait IamLookup: Send + Sync {
    /// `iam:GetRole`. Returns the live role name.
    fn get_role_name(&self, role_name: &str)
    -> BoxFuture<'_, Result<Option<String>, RepairError>>;

    /// `iam:GetInstanceProfile`. Returns the live instance profile name.
    fn get_instance_profile_name(
        &self,
        profile_name: &str,
    ) -> BoxFuture<'_, Result<Option<String>, RepairError>>;

    /// One page of `iam:ListPolicies` with scope All, so both AWS-managed
    /// and customer-managed policies are seen.
    fn list_policies_page(
        &self,
        marker: Option<String>,
    ) -> BoxFuture<'_, Result<PolicyPage, RepairError>>;
}

pub struct SdkIamLookup {
    client: Client,
}

impl SdkIamLookup {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

impl IamLookup for SdkIamLookup {
    fn get_role_name(
        &self,
        role_name: &str,
    ) -> BoxFuture<'_, Result<Option<String>, RepairError>> {
        let role_name = role_name.to_string();
        Box::pin(async move {
            match self.client.get_role().role_name(&role_name).send().await {
                Ok(resp) => Ok(resp.role().map(|r| r.role_name().to_string())),
                Err(e) => {
                    let not_found = e
                        .as_service_error()
                        .map(|se| se.is_no_such_entity_exception())
                        .unwrap_or(false);
                    if not_found {
                        return Ok(None);
                    }
                    Err(RepairError::Resolver(format!(
                        "iam:GetRole failed: {}",
                        format_err_chain(&e)
                    )))
                }
            }
        })
    }

    fn get_instance_profile_name(
        &self,
        profile_name: &str,
    ) -> BoxFuture<'_, Result<Option<String>, RepairError>> {
        let profile_name = profile_name.to_string();
        Box::pin(async move {
            match self
                .client
                .get_instance_profile()
                .instance_profile_name(&profile_name)
                .send()
                .await
            {
                Ok(resp) => Ok(resp
                    .instance_profile()
                    .map(|p| p.instance_profile_name().to_string())),
                Err(e) => {
                    let not_found = e
                        .as_service_error()
                        .map(|se| se.is_no_such_entity_exception())
                        .unwrap_or(false);
                    if not_found {
                        return Ok(None);
                    }
                    Err(RepairError::Resolver(format!(
                        "iam:GetInstanceProfile failed: {}",
                        format_err_chain(&e)
                    )))
                }
            }
        })
    }

    fn list_policies_page(
        &self,
        marker: Option<String>,
    ) -> BoxFuture<'_, Result<PolicyPage, RepairError>> {
        Box::pin(async move {
            let output = self
                .client
                .list_policies()
                .scope(PolicyScopeType::All)
                .set_marker(marker)
                .send()
                .await
                .map_err(|e| {
                    RepairError::Resolver(format!(
                        "iam:ListPolicies failed: {}",
                        format_err_chain(&e)
                    ))
                })?;

            let policies = output
                .policies()
                .iter()
                .filter_map(|p| {
                    Some(PolicySummary {
                        name: p.policy_name()?.to_string(),
                        arn: p.arn()?.to_string(),
                    })
                })
                .collect();

            let next_marker = if output.is_truncated() {
                output.marker().map(String::from)
            } else {
                None
            };

            Ok(PolicyPage {
                policies,
                next_marker,
            })
        })
    }
}
