use crate::error::RepairError;
use crate::iam::IamLookup;
use crate::resolve::{ResourceImport, resolve_identity};
use crate::template::Template;

/// Deletion policy forced onto every imported resource so a later rollback
/// can never delete the live resource out from under the stack.
const RETAIN: &str = "Retain";

/// The two artifacts CloudFormation needs to import existing resources:
/// a reduced template and the matching import manifest.
///
/// Invariant: the logical names in `template` and the
/// `logical_resource_id`s in `resources` are the same set. An empty plan is
/// legal and means "nothing to import".
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    /// Only the importable resources, each with `DeletionPolicy: Retain`.
    pub template: Template,
    /// One manifest entry per resource in `template`.
    pub resources: Vec<ResourceImport>,
}

impl ImportPlan {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The reduced template in its on-disk YAML form.
    pub fn template_yaml(&self) -> Result<String, RepairError> {
        self.template.to_yaml()
    }

    /// The import manifest as the JSON array CloudFormation accepts.
    pub fn resources_json(&self) -> Result<String, RepairError> {
        Ok(serde_json::to_string(&self.resources)?)
    }
}

/// Walk the template's resources, resolve each against the live account,
/// and keep exactly those that already exist. Logical names are preserved
/// bit-exact; everything unresolved is dropped from the plan.
pub async fn build_import_plan(
    template: &Template,
    iam: &dyn IamLookup,
) -> Result<ImportPlan, RepairError> {
    let mut plan = ImportPlan::default();

    for (logical_id, resource) in &template.resources {
        let Some(identity) = resolve_identity(logical_id, resource, template, iam).await? else {
            continue;
        };

        let mut imported = resource.clone();
        imported.deletion_policy = Some(RETAIN.to_string());
        plan.template.resources.insert(logical_id.clone(), imported);
        plan.resources.push(identity);
    }

    Ok(plan)
}
