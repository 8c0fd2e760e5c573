//! `stackfix fix-stackset-drift` - reconcile the DRIFTED instances of a
//! StackSet.

use aws_config::BehaviorVersion;
use stackfix_core::drift;

pub async fn run(stack_set_name: &str, role_name: &str) -> anyhow::Result<()> {
    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    drift::fix_drifted_instances(&config, stack_set_name, role_name).await?;
    println!("Drifted stack instances reconciled");
    Ok(())
}
