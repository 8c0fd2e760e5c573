//! stackfix-core
//!
//! Repair engine for CloudFormation StackSets whose per-account stack
//! instances are FAILED or DRIFTED.
//!
//! Public API:
//! - [`build_import_plan`] — turn a template into an import template plus
//!   manifest for the resources that already exist in the account
//! - [`fix_failed_instances`] — import, update, and re-attach every FAILED
//!   stack instance of a StackSet
//! - [`fix_drifted_instances`] — patch live resources of DRIFTED instances
//!   back to their declared properties via CloudControl
//!
//! All cross-account work goes through the [`CredentialBroker`]. Cloud
//! calls go through capability seams — [`IamLookup`] for the resolver,
//! [`StackSetOps`] / [`StackOps`] / [`ResourcePatcher`] for the workflows —
//! so tests can stub them.

pub mod cloud;
pub mod credentials;
pub mod drift;
pub mod error;
pub mod iam;
pub mod import_plan;
pub mod repair;
pub mod resolve;
pub mod storage;
pub mod template;

pub use crate::cloud::{
    ResourceDrift, ResourcePatcher, RoleTargetBroker, SdkResourcePatcher, SdkStackOps,
    SdkStackSetOps, StackInstance, StackOps, StackSetOperationState, StackSetOps,
    TargetBroker, TargetCapabilities,
};
pub use crate::credentials::CredentialBroker;
pub use crate::drift::{
    PatchOp, PatchOperation, fix_drifted_instances, patch_operation, reconcile_stack_set,
};
pub use crate::error::RepairError;
pub use crate::iam::{IamLookup, PolicyPage, PolicySummary, SdkIamLookup};
pub use crate::import_plan::{ImportPlan, build_import_plan};
pub use crate::repair::{fix_failed_instances, repair_stack_set};
pub use crate::resolve::ResourceImport;
pub use crate::storage::{InlineStore, S3Store, TemplateSource, TemplateStore};
pub use crate::template::{Resource, Template};
