//! `stackfix fix-stackset-stack-instances` - repair the FAILED instances of
//! a StackSet.

use aws_config::BehaviorVersion;
use stackfix_core::repair;

pub async fn run(
    stack_set_name: &str,
    role_name: &str,
    s3_bucket: Option<&str>,
) -> anyhow::Result<()> {
    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    repair::fix_failed_instances(&config, stack_set_name, role_name, s3_bucket).await?;
    println!("Stack instances successfully repaired");
    Ok(())
}
