use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use aws_sdk_cloudformation::types::{DifferenceType, PropertyDifference};
use stackfix_core::cloud::{
    ResourceDrift, ResourcePatcher, StackInstance, StackOps, StackSetOperationState, StackSetOps,
    TargetBroker, TargetCapabilities,
};
use stackfix_core::iam::{BoxFuture, IamLookup, PolicyPage};
use stackfix_core::storage::{InlineStore, TemplateSource};
use stackfix_core::{ImportPlan, RepairError, reconcile_stack_set, repair_stack_set};

/// Call log shared by all stubs, so tests can assert cross-capability
/// ordering.
type Log = Arc<Mutex<Vec<String>>>;

const ONE_ROLE: &str = r#"
Resources:
  MyRole:
    Type: AWS::IAM::Role
    Properties:
      RoleName: alpha
"#;

struct StubStackSetOps {
    log: Log,
    template: String,
    instances: Vec<StackInstance>,
    states: Mutex<VecDeque<StackSetOperationState>>,
    /// `None` means `resource_drifts` fails.
    drifts: Option<Vec<ResourceDrift>>,
}

impl StubStackSetOps {
    fn new(log: &Log, instances: Vec<StackInstance>) -> Self {
        Self {
            log: log.clone(),
            template: ONE_ROLE.to_string(),
            instances,
            states: Mutex::new(VecDeque::from([StackSetOperationState::Succeeded])),
            drifts: Some(Vec::new()),
        }
    }

    fn with_states(mut self, states: impl IntoIterator<Item = StackSetOperationState>) -> Self {
        self.states = Mutex::new(states.into_iter().collect());
        self
    }

    fn with_drifts(mut self, drifts: Option<Vec<ResourceDrift>>) -> Self {
        self.drifts = drifts;
        self
    }
}

impl StackSetOps for StubStackSetOps {
    fn template_body(&self, _stack_set_name: &str) -> BoxFuture<'_, Result<String, RepairError>> {
        let body = self.template.clone();
        Box::pin(async move { Ok(body) })
    }

    fn stack_instances(
        &self,
        _stack_set_name: &str,
    ) -> BoxFuture<'_, Result<Vec<StackInstance>, RepairError>> {
        let instances = self.instances.clone();
        Box::pin(async move { Ok(instances) })
    }

    fn delete_stack_instance(
        &self,
        _stack_set_name: &str,
        account: &str,
        region: &str,
        retain_stacks: bool,
    ) -> BoxFuture<'_, Result<String, RepairError>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("detach {account}/{region} retain={retain_stacks}"));
        Box::pin(async move { Ok("op-1".to_string()) })
    }

    fn operation_state(
        &self,
        _stack_set_name: &str,
        _operation_id: &str,
    ) -> BoxFuture<'_, Result<StackSetOperationState, RepairError>> {
        self.log.lock().unwrap().push("poll".to_string());
        let state = self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StackSetOperationState::Succeeded);
        Box::pin(async move { Ok(state) })
    }

    fn attach_stack(
        &self,
        _stack_set_name: &str,
        stack_id: &str,
    ) -> BoxFuture<'_, Result<(), RepairError>> {
        self.log.lock().unwrap().push(format!("attach {stack_id}"));
        Box::pin(async move { Ok(()) })
    }

    fn resource_drifts(
        &self,
        _stack_id: &str,
    ) -> BoxFuture<'_, Result<Vec<ResourceDrift>, RepairError>> {
        let result = match &self.drifts {
            Some(drifts) => Ok(drifts.clone()),
            None => Err(RepairError::Aws("describe drifts unavailable".into())),
        };
        Box::pin(async move { result })
    }
}

struct StubIam {
    roles: Vec<String>,
}

impl IamLookup for StubIam {
    fn get_role_name(
        &self,
        role_name: &str,
    ) -> BoxFuture<'_, Result<Option<String>, RepairError>> {
        let result = self.roles.iter().find(|r| r.as_str() == role_name).cloned();
        Box::pin(async move { Ok(result) })
    }

    fn get_instance_profile_name(
        &self,
        _profile_name: &str,
    ) -> BoxFuture<'_, Result<Option<String>, RepairError>> {
        Box::pin(async { Ok(None) })
    }

    fn list_policies_page(
        &self,
        _marker: Option<String>,
    ) -> BoxFuture<'_, Result<PolicyPage, RepairError>> {
        Box::pin(async { Ok(PolicyPage::default()) })
    }
}

struct StubStack {
    log: Log,
}

impl StackOps for StubStack {
    fn import_resources(
        &self,
        stack_name: &str,
        _source: &TemplateSource,
        plan: &ImportPlan,
    ) -> BoxFuture<'_, Result<String, RepairError>> {
        assert!(!plan.is_empty());
        self.log.lock().unwrap().push(format!("import {stack_name}"));
        Box::pin(async move { Ok("stack-id-from-change-set".to_string()) })
    }

    fn await_import(&self, stack_name: &str) -> BoxFuture<'_, Result<(), RepairError>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("await-import {stack_name}"));
        Box::pin(async move { Ok(()) })
    }

    fn update_stack(
        &self,
        stack_name: &str,
        _source: &TemplateSource,
    ) -> BoxFuture<'_, Result<(), RepairError>> {
        self.log.lock().unwrap().push(format!("update {stack_name}"));
        Box::pin(async move { Ok(()) })
    }
}

struct StubPatcher {
    log: Log,
}

impl ResourcePatcher for StubPatcher {
    fn apply_patch(
        &self,
        identifier: &str,
        _type_name: &str,
        _document: &str,
    ) -> BoxFuture<'_, Result<(), RepairError>> {
        self.log.lock().unwrap().push(format!("patch {identifier}"));
        Box::pin(async move { Ok(()) })
    }
}

struct StubTargets {
    log: Log,
    roles: Vec<String>,
    deny: bool,
}

impl StubTargets {
    fn new(log: &Log, roles: &[&str]) -> Self {
        Self {
            log: log.clone(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            deny: false,
        }
    }

    fn denying(log: &Log) -> Self {
        Self {
            log: log.clone(),
            roles: Vec::new(),
            deny: true,
        }
    }
}

impl TargetBroker for StubTargets {
    fn target(
        &mut self,
        account: &str,
        region: &str,
    ) -> BoxFuture<'_, Result<TargetCapabilities, RepairError>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("assume {account}/{region}"));
        let result = if self.deny {
            Err(RepairError::AssumeRole {
                account: account.to_string(),
                message: "access denied".into(),
            })
        } else {
            Ok(TargetCapabilities {
                iam: Box::new(StubIam {
                    roles: self.roles.clone(),
                }),
                stack: Box::new(StubStack {
                    log: self.log.clone(),
                }),
                patcher: Box::new(StubPatcher {
                    log: self.log.clone(),
                }),
            })
        };
        Box::pin(async move { result })
    }
}

fn failed_instance() -> StackInstance {
    StackInstance {
        account: "123456789012".into(),
        region: "eu-west-1".into(),
        stack_id: Some(
            "arn:aws:cloudformation:eu-west-1:123456789012:stack/fleet-baseline/6cd12620".into(),
        ),
        failed: true,
        drifted: false,
    }
}

fn drifted_instance() -> StackInstance {
    StackInstance {
        failed: false,
        drifted: true,
        ..failed_instance()
    }
}

fn not_equal(path: &str) -> PropertyDifference {
    PropertyDifference::builder()
        .property_path(path)
        .expected_value("\"declared\"")
        .actual_value("\"live\"")
        .difference_type(DifferenceType::NotEqual)
        .build()
}

#[tokio::test]
async fn repair_runs_the_steps_in_order_and_retains_the_stack() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![failed_instance()]);
    let mut targets = StubTargets::new(&log, &["alpha"]);

    repair_stack_set(&ops, &mut targets, &InlineStore, "fleet")
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "assume 123456789012/eu-west-1",
            "import fleet-baseline",
            "await-import fleet-baseline",
            "update fleet-baseline",
            "detach 123456789012/eu-west-1 retain=true",
            "poll",
            "attach stack-id-from-change-set",
        ]
    );
}

#[tokio::test]
async fn healthy_instances_are_left_alone() {
    let log: Log = Log::default();
    let healthy = StackInstance {
        failed: false,
        ..failed_instance()
    };
    let ops = StubStackSetOps::new(&log, vec![healthy]);
    let mut targets = StubTargets::new(&log, &["alpha"]);

    repair_stack_set(&ops, &mut targets, &InlineStore, "fleet")
        .await
        .unwrap();

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_import_plan_skips_the_instance() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![failed_instance()]);
    let mut targets = StubTargets::new(&log, &[]);

    repair_stack_set(&ops, &mut targets, &InlineStore, "fleet")
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["assume 123456789012/eu-west-1"]);
}

#[tokio::test(start_paused = true)]
async fn detach_polls_until_the_operation_succeeds() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![failed_instance()]).with_states([
        StackSetOperationState::InProgress,
        StackSetOperationState::InProgress,
        StackSetOperationState::Succeeded,
    ]);
    let mut targets = StubTargets::new(&log, &["alpha"]);

    repair_stack_set(&ops, &mut targets, &InlineStore, "fleet")
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.iter().filter(|entry| *entry == "poll").count(), 3);
    assert_eq!(log.last().unwrap(), "attach stack-id-from-change-set");
}

#[tokio::test]
async fn failed_detach_operation_is_fatal() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![failed_instance()])
        .with_states([StackSetOperationState::Failed]);
    let mut targets = StubTargets::new(&log, &["alpha"]);

    let err = repair_stack_set(&ops, &mut targets, &InlineStore, "fleet")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RepairError::OperationTerminal { ref status, .. } if status == "FAILED"
    ));
    assert!(!log.lock().unwrap().iter().any(|e| e.starts_with("attach")));
}

#[tokio::test]
async fn stopped_detach_operation_is_fatal() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![failed_instance()])
        .with_states([StackSetOperationState::Stopped]);
    let mut targets = StubTargets::new(&log, &["alpha"]);

    let err = repair_stack_set(&ops, &mut targets, &InlineStore, "fleet")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RepairError::OperationTerminal { ref status, .. } if status == "STOPPED"
    ));
}

#[tokio::test]
async fn unassumable_account_is_skipped_during_reconciliation() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![drifted_instance()])
        .with_drifts(Some(vec![ResourceDrift {
            physical_resource_id: Some("drifted-role".into()),
            resource_type: "AWS::IAM::Role".into(),
            in_sync: false,
            differences: vec![not_equal("/Description")],
        }]));
    let mut targets = StubTargets::denying(&log);

    reconcile_stack_set(&ops, &mut targets, "fleet").await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["assume 123456789012/eu-west-1"]);
}

#[tokio::test]
async fn undescribable_drifts_skip_the_instance() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![drifted_instance()]).with_drifts(None);
    let mut targets = StubTargets::new(&log, &["alpha"]);

    reconcile_stack_set(&ops, &mut targets, "fleet").await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["assume 123456789012/eu-west-1"]);
}

#[tokio::test]
async fn only_out_of_sync_resources_are_patched() {
    let log: Log = Log::default();
    let ops = StubStackSetOps::new(&log, vec![drifted_instance()]).with_drifts(Some(vec![
        ResourceDrift {
            physical_resource_id: Some("in-sync-role".into()),
            resource_type: "AWS::IAM::Role".into(),
            in_sync: true,
            differences: Vec::new(),
        },
        ResourceDrift {
            physical_resource_id: None,
            resource_type: "AWS::IAM::Role".into(),
            in_sync: false,
            differences: vec![not_equal("/Description")],
        },
        ResourceDrift {
            physical_resource_id: Some("drifted-role".into()),
            resource_type: "AWS::IAM::Role".into(),
            in_sync: false,
            differences: vec![not_equal("/Description")],
        },
    ]));
    let mut targets = StubTargets::new(&log, &["alpha"]);

    reconcile_stack_set(&ops, &mut targets, "fleet").await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["assume 123456789012/eu-west-1", "patch drifted-role"]
    );
}

#[tokio::test]
async fn in_sync_instances_are_not_reconciled() {
    let log: Log = Log::default();
    let in_sync = StackInstance {
        drifted: false,
        ..drifted_instance()
    };
    let ops = StubStackSetOps::new(&log, vec![in_sync]);
    let mut targets = StubTargets::new(&log, &["alpha"]);

    reconcile_stack_set(&ops, &mut targets, "fleet").await.unwrap();

    assert!(log.lock().unwrap().is_empty());
}
