use aws_sdk_s3::primitives::ByteStream;
use rand::RngCore;

use crate::error::{RepairError, format_err_chain};
use crate::iam::BoxFuture;

/// Where a template body lives for a CloudFormation call: inline, or staged
/// in S3 when an operator bucket was given.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    Body(String),
    Url(String),
}

/// Turns a template body into the form a CloudFormation request carries.
pub trait TemplateStore: Send + Sync {
    fn stage(&self, body: String) -> BoxFuture<'_, Result<TemplateSource, RepairError>>;
}

/// Passes bodies through inline.
pub struct InlineStore;

impl TemplateStore for InlineStore {
    fn stage(&self, body: String) -> BoxFuture<'_, Result<TemplateSource, RepairError>> {
        Box::pin(async move { Ok(TemplateSource::Body(body)) })
    }
}

/// Stages every body in an S3 bucket and hands back its URL. Needed when
/// bodies exceed the inline size limit.
pub struct S3Store {
    config: aws_config::SdkConfig,
    bucket: String,
}

impl S3Store {
    pub fn new(config: aws_config::SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            config,
            bucket: bucket.into(),
        }
    }
}

impl TemplateStore for S3Store {
    fn stage(&self, body: String) -> BoxFuture<'_, Result<TemplateSource, RepairError>> {
        Box::pin(async move {
            let url = upload_template(&self.config, &self.bucket, body.into_bytes()).await?;
            Ok(TemplateSource::Url(url))
        })
    }
}

/// Stage a template body in S3 and return the HTTPS URL CloudFormation
/// accepts as a `TemplateURL`.
pub async fn upload_template(
    config: &aws_config::SdkConfig,
    bucket: &str,
    body: Vec<u8>,
) -> Result<String, RepairError> {
    let client = aws_sdk_s3::Client::new(config);
    let key = random_object_key();

    client
        .put_object()
        .bucket(bucket)
        .key(&key)
        .body(ByteStream::from(body))
        .send()
        .await
        .map_err(|e| {
            RepairError::Aws(format!("s3:PutObject failed: {}", format_err_chain(&e)))
        })?;

    let region = config.region().map(|r| r.as_ref()).unwrap_or("us-east-1");
    let url = template_url(bucket, region, &key);
    tracing::info!(bucket, key = %key, "template staged in S3");
    Ok(url)
}

/// 32 random bytes, hex-encoded.
pub fn random_object_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn template_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}
