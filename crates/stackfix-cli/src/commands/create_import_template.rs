//! `stackfix create-import-template` - build an import template from a
//! local CloudFormation template, against the current account's credentials.

use std::path::Path;

use anyhow::Context;
use aws_config::BehaviorVersion;
use stackfix_core::{SdkIamLookup, Template, build_import_plan};

const TEMPLATE_OUT: &str = "cloudformation_template.yaml";
const RESOURCES_OUT: &str = "ResourcesToImport.txt";

pub async fn run(cf_template: &Path) -> anyhow::Result<()> {
    let data = std::fs::read(cf_template)
        .with_context(|| format!("failed to read {}", cf_template.display()))?;
    let template = Template::parse(&data)?;

    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let iam = SdkIamLookup::new(&config);
    let plan = build_import_plan(&template, &iam).await?;

    std::fs::write(TEMPLATE_OUT, plan.template_yaml()?)
        .with_context(|| format!("failed to write {TEMPLATE_OUT}"))?;
    std::fs::write(RESOURCES_OUT, plan.resources_json()?)
        .with_context(|| format!("failed to write {RESOURCES_OUT}"))?;

    tracing::info!(
        resources = plan.resources.len(),
        template = TEMPLATE_OUT,
        manifest = RESOURCES_OUT,
        "import template created"
    );
    println!("Import template successfully created");
    Ok(())
}
