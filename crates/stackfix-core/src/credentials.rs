use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use aws_config::{BehaviorVersion, Region, SdkConfig};

use crate::error::{RepairError, format_err_chain};

/// Hands out per-(account, region) SDK configs obtained by assuming the
/// repair role, cached so each target pair is assumed at most once per run.
///
/// The broker does not verify the assumed identity and does not chain
/// roles; session duration is the STS default ceiling of one hour.
pub struct CredentialBroker {
    base: SdkConfig,
    role_name: String,
    cache: HashMap<(String, String), SdkConfig>,
}

const SESSION_DURATION_SECONDS: i32 = 3600;

impl CredentialBroker {
    pub fn new(base: SdkConfig, role_name: impl Into<String>) -> Self {
        Self {
            base,
            role_name: role_name.into(),
            cache: HashMap::new(),
        }
    }

    /// The repair role's ARN in one target account.
    pub fn role_arn(&self, account: &str) -> String {
        format!("arn:aws:iam::{account}:role/{}", self.role_name)
    }

    /// An SDK config scoped to `(account, region)` via the repair role.
    pub async fn scoped_config(
        &mut self,
        account: &str,
        region: &str,
    ) -> Result<&SdkConfig, RepairError> {
        let key = (account.to_string(), region.to_string());
        if !self.cache.contains_key(&key) {
            let config = self.assume(account, region).await?;
            self.cache.insert(key.clone(), config);
        }
        Ok(&self.cache[&key])
    }

    async fn assume(&self, account: &str, region: &str) -> Result<SdkConfig, RepairError> {
        let role_arn = self.role_arn(account);
        let session = format!("stack-importer-{}", unix_seconds());

        tracing::info!(role_arn = %role_arn, region = %region, session = %session, "assuming repair role");

        let sts = aws_sdk_sts::Client::new(&self.base);
        let resp = sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(&session)
            .duration_seconds(SESSION_DURATION_SECONDS)
            .send()
            .await
            .map_err(|e| RepairError::AssumeRole {
                account: account.to_string(),
                message: format_err_chain(&e),
            })?;

        let creds = resp.credentials().ok_or_else(|| RepairError::AssumeRole {
            account: account.to_string(),
            message: "AssumeRole returned no credentials".into(),
        })?;

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(aws_sdk_sts::config::Credentials::new(
                creds.access_key_id(),
                creds.secret_access_key(),
                Some(creds.session_token().to_string()),
                None,
                "stack-importer",
            ))
            .load()
            .await;

        Ok(config)
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
