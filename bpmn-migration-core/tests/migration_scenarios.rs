mod common;

use bpmn_migration_core::subscription::SubscriptionPayload;
use bpmn_migration_core::{Command, RejectionType};
use common::{assert_rejected, migrate_command, names, Harness};
use serde_json::json;

const ORDER: &str = r#"
id: order
elements:
  - { id: start, type: START_EVENT }
  - { id: A, type: SERVICE_TASK, job_type: work }
  - id: cancel
    type: BOUNDARY_EVENT
    attached_to: A
    event: { kind: MESSAGE, name: cancel, correlation_key: "=orderId" }
  - { id: cancelled, type: END_EVENT }
  - { id: end, type: END_EVENT }
flows:
  - { id: f1, from: start, to: A }
  - { id: f2, from: A, to: end }
  - { id: f3, from: cancel, to: cancelled }
"#;

const ORDER_WITHOUT_BOUNDARY: &str = r#"
id: order_plain
elements:
  - { id: start, type: START_EVENT }
  - { id: B, type: SERVICE_TASK, job_type: work_v2 }
  - { id: end, type: END_EVENT }
flows:
  - { id: g1, from: start, to: B }
  - { id: g2, from: B, to: end }
"#;

#[tokio::test]
async fn test_dropped_boundary_event_closes_message_subscription() {
    let h = Harness::new();
    h.deploy(ORDER);
    let target = h.deploy(ORDER_WITHOUT_BOUNDARY);
    let pik = h.create("order", json!({ "orderId": "o-1" })).await;
    let before = h.element(pik, "A").await;
    let job_before = h.job(pik, "A").await;
    assert_eq!(h.subscriptions(pik).await.len(), 1);

    let response = h.migrate(pik, &target, &[("A", "B")]).await;
    assert!(response.rejection().is_none(), "{:?}", response.rejection());

    let records = names(&response);
    assert!(records.contains(&"PROCESS_MESSAGE_SUBSCRIPTION_DELETED".to_string()));
    assert!(records.contains(&"MESSAGE_SUBSCRIPTION_DELETED".to_string()));
    assert_eq!(records.last().map(String::as_str), Some("PROCESS_INSTANCE_MIGRATION_MIGRATED"));
    assert!(h.subscriptions(pik).await.is_empty());

    let after = h.element(pik, "B").await;
    assert_eq!(after.key, before.key);
    assert_eq!(after.process_definition_key, target.key());
    assert_eq!(after.bpmn_process_id, "order_plain");

    let job = h.job(pik, "B").await;
    assert_eq!(job.key, job_before.key);
    assert_eq!(job.job_type, "work");
    assert_eq!(job.process_definition_key, target.key());

    // The old message no longer reaches the instance.
    h.publish("cancel", "o-1", json!({})).await;
    assert_eq!(h.element_ids(pik).await, vec!["B"]);
}

#[tokio::test]
async fn test_added_boundary_event_opens_message_subscription() {
    let h = Harness::new();
    h.deploy(ORDER_WITHOUT_BOUNDARY);
    let target = h.deploy(ORDER);
    let pik = h.create("order_plain", json!({ "orderId": "o-2" })).await;
    let host = h.element(pik, "B").await;

    let response = h.migrate(pik, &target, &[("B", "A")]).await;
    let records = names(&response);
    assert!(records.contains(&"MESSAGE_SUBSCRIPTION_CREATED".to_string()));
    assert!(records.contains(&"PROCESS_MESSAGE_SUBSCRIPTION_CREATED".to_string()));

    let subscription = h.subscription(pik, "cancel").await;
    assert_eq!(subscription.scope_key, host.key);
    assert_eq!(subscription.process_definition_key, target.key());
    match &subscription.payload {
        SubscriptionPayload::Message {
            message_name,
            correlation_key,
            interrupting,
        } => {
            assert_eq!(message_name, "cancel");
            assert_eq!(correlation_key, "o-2");
            assert!(*interrupting);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    // The new subscription behaves like one opened on activation.
    h.publish("cancel", "o-2", json!({})).await;
    assert!(h.is_completed(pik).await);
    let terminated = h
        .records()
        .await
        .into_iter()
        .any(|r| r.name() == "ELEMENT_TERMINATED" && r.key == host.key);
    assert!(terminated);
}

const FANOUT: &str = r#"
id: fanout
elements:
  - { id: start, type: START_EVENT }
  - { id: fork, type: INCLUSIVE_GATEWAY }
  - { id: B1, type: SERVICE_TASK, job_type: b1 }
  - { id: B2, type: SERVICE_TASK, job_type: b2 }
  - { id: join1, type: INCLUSIVE_GATEWAY }
  - { id: end, type: END_EVENT }
flows:
  - { id: f1, from: start, to: fork }
  - { id: f2, from: fork, to: B1 }
  - { id: f3, from: fork, to: B2 }
  - { id: f4, from: B1, to: join1 }
  - { id: f5, from: B2, to: join1 }
  - { id: f6, from: join1, to: end }
"#;

const FANOUT_NARROW: &str = r#"
id: fanout_narrow
elements:
  - { id: start, type: START_EVENT }
  - { id: B2, type: SERVICE_TASK, job_type: b2 }
  - { id: join2, type: INCLUSIVE_GATEWAY }
  - { id: end, type: END_EVENT }
flows:
  - { id: g1, from: start, to: B2 }
  - { id: g2, from: B2, to: join2 }
  - { id: g3, from: join2, to: end }
"#;

const FANOUT_RENAMED: &str = r#"
id: fanout_renamed
elements:
  - { id: start, type: START_EVENT }
  - { id: fork, type: INCLUSIVE_GATEWAY }
  - { id: C1, type: SERVICE_TASK, job_type: c1 }
  - { id: C2, type: SERVICE_TASK, job_type: c2 }
  - { id: join3, type: INCLUSIVE_GATEWAY }
  - { id: end, type: END_EVENT }
flows:
  - { id: g1, from: start, to: fork }
  - { id: g2, from: fork, to: C1 }
  - { id: g3, from: fork, to: C2 }
  - { id: f4, from: C1, to: join3 }
  - { id: g5, from: C2, to: join3 }
  - { id: g6, from: join3, to: end }
"#;

/// Instance of `fanout` with B1 done: one of join1's two flows is taken.
async fn half_joined(h: &Harness) -> i64 {
    h.deploy(FANOUT);
    let pik = h.create("fanout", json!({})).await;
    h.complete_job(pik, "B1", json!({})).await;
    assert_eq!(h.element_ids(pik).await, vec!["B2"]);
    let taken = h.handle.store().taken_sequence_flows(pik).await.unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].sequence_flow_id, "f4");
    pik
}

#[tokio::test]
async fn test_joining_gateway_with_fewer_incoming_flows_rejected() {
    let h = Harness::new();
    let pik = half_joined(&h).await;
    let target = h.deploy(FANOUT_NARROW);
    let records_before = h.records().await.len();

    let response = h.migrate(pik, &target, &[("B2", "B2"), ("join1", "join2")]).await;
    assert_rejected(&response, RejectionType::InvalidArgument, "has less incoming sequence flows");

    // Only the rejection was written.
    let records = h.records().await;
    assert_eq!(records.len(), records_before + 1);
    assert_eq!(records.last().map(|r| r.name()).as_deref(), Some("COMMAND_REJECTED"));
    assert_eq!(h.element(pik, "B2").await.bpmn_process_id, "fanout");
}

#[tokio::test]
async fn test_unmapped_joining_gateway_with_taken_flow_rejected() {
    let h = Harness::new();
    let pik = half_joined(&h).await;
    let target = h.deploy(FANOUT_RENAMED);

    let response = h.migrate(pik, &target, &[("B2", "C2")]).await;
    assert_rejected(
        &response,
        RejectionType::InvalidArgument,
        "gateway 'join1' has at least one incoming sequence flow taken",
    );
}

#[tokio::test]
async fn test_taken_flow_moves_to_mapped_gateway() {
    let h = Harness::new();
    let pik = half_joined(&h).await;
    let target = h.deploy(FANOUT_RENAMED);

    let response = h.migrate(pik, &target, &[("B2", "C2"), ("join1", "join3")]).await;
    let records = names(&response);
    assert!(records.contains(&"SEQUENCE_FLOW_DELETED".to_string()));
    assert!(records.contains(&"SEQUENCE_FLOW_TAKEN".to_string()));

    let taken = h.handle.store().taken_sequence_flows(pik).await.unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].gateway_id, "join3");
    assert_eq!(taken[0].sequence_flow_id, "f4");
    assert_eq!(taken[0].process_definition_key, target.key());

    // The migrated token counts towards the target join.
    h.complete_job(pik, "C2", json!({})).await;
    assert!(h.is_completed(pik).await);
}

#[tokio::test]
async fn test_taken_flow_must_connect_to_target_gateway() {
    let h = Harness::new();
    let pik = half_joined(&h).await;
    let target = h.deploy(FANOUT_RENAMED);

    // f4 exists in the target but the mapping redirects it away from join3.
    let response = h
        .migrate(pik, &target, &[("B2", "C2"), ("join1", "join3"), ("f4", "g2")])
        .await;
    assert_rejected(
        &response,
        RejectionType::InvalidArgument,
        "taken incoming sequence flow mismatch",
    );
}

const TWO_TIMERS: &str = r#"
id: reminders
elements:
  - { id: start, type: START_EVENT }
  - { id: A, type: USER_TASK, job_type: review }
  - id: t1
    type: BOUNDARY_EVENT
    attached_to: A
    interrupting: false
    event: { kind: TIMER, duration_ms: 60000 }
  - id: t2
    type: BOUNDARY_EVENT
    attached_to: A
    interrupting: false
    event: { kind: TIMER, duration_ms: 120000 }
  - { id: end, type: END_EVENT }
flows:
  - { id: f1, from: start, to: A }
  - { id: f2, from: A, to: end }
"#;

const ONE_TIMER: &str = r#"
id: reminders_v2
elements:
  - { id: start, type: START_EVENT }
  - { id: B, type: USER_TASK, job_type: review }
  - id: tb
    type: BOUNDARY_EVENT
    attached_to: B
    interrupting: false
    event: { kind: TIMER, duration_ms: 60000 }
  - { id: C, type: USER_TASK, job_type: other }
  - id: tc
    type: BOUNDARY_EVENT
    attached_to: C
    event: { kind: TIMER, duration_ms: 60000 }
  - id: mb
    type: BOUNDARY_EVENT
    attached_to: B
    event: { kind: MESSAGE, name: nudge }
  - { id: end, type: END_EVENT }
flows:
  - { id: g1, from: start, to: B }
  - { id: g2, from: B, to: C }
  - { id: g3, from: C, to: end }
"#;

#[tokio::test]
async fn test_merging_catch_events_rejected() {
    let h = Harness::new();
    h.deploy(TWO_TIMERS);
    let target = h.deploy(ONE_TIMER);
    let pik = h.create("reminders", json!({})).await;

    let response = h.migrate(pik, &target, &[("A", "B"), ("t1", "tb"), ("t2", "tb")]).await;
    assert_rejected(&response, RejectionType::InvalidState, "Catch events cannot be merged");
    assert!(response.rejection().unwrap().reason.contains("'t1', 't2'"));
    assert_eq!(h.subscriptions(pik).await.len(), 2);
}

#[tokio::test]
async fn test_detaching_catch_event_rejected() {
    let h = Harness::new();
    h.deploy(TWO_TIMERS);
    let target = h.deploy(ONE_TIMER);
    let pik = h.create("reminders", json!({})).await;

    let response = h.migrate(pik, &target, &[("A", "B"), ("t1", "tc")]).await;
    assert_rejected(&response, RejectionType::InvalidState, "detach the catch event");
}

#[tokio::test]
async fn test_changing_catch_event_type_rejected() {
    let h = Harness::new();
    h.deploy(TWO_TIMERS);
    let target = h.deploy(ONE_TIMER);
    let pik = h.create("reminders", json!({})).await;

    let response = h.migrate(pik, &target, &[("A", "B"), ("t1", "mb")]).await;
    assert_rejected(
        &response,
        RejectionType::InvalidState,
        "different event types: 'TIMER' and 'MESSAGE'",
    );
}

#[tokio::test]
async fn test_same_rejection_for_same_input() {
    let h = Harness::new();
    h.deploy(TWO_TIMERS);
    let target = h.deploy(ONE_TIMER);
    let pik = h.create("reminders", json!({})).await;

    let mapping = [("A", "B"), ("t1", "tc")];
    let first = h.migrate(pik, &target, &mapping).await;
    let second = h.migrate(pik, &target, &mapping).await;
    assert_eq!(first.rejection(), second.rejection());
}

const TWO_STEPS: &str = r#"
id: steps
elements:
  - { id: start, type: START_EVENT }
  - { id: A, type: SERVICE_TASK, job_type: first }
  - { id: B, type: SERVICE_TASK, job_type: second }
  - { id: end, type: END_EVENT }
flows:
  - { id: f1, from: start, to: A }
  - { id: f2, from: A, to: B }
  - { id: f3, from: B, to: end }
"#;

const TWO_STEPS_V2: &str = r#"
id: steps_v2
elements:
  - { id: start, type: START_EVENT }
  - { id: A2, type: SERVICE_TASK, job_type: first }
  - { id: B2, type: SERVICE_TASK, job_type: second }
  - { id: end, type: END_EVENT }
flows:
  - { id: g1, from: start, to: A2 }
  - { id: g2, from: A2, to: B2 }
  - { id: g3, from: B2, to: end }
"#;

#[tokio::test]
async fn test_concurrent_command_rejects_migration_until_retried() {
    let h = Harness::new();
    h.deploy(TWO_STEPS);
    let target = h.deploy(TWO_STEPS_V2);
    let pik = h.create("steps", json!({})).await;
    let job = h.job(pik, "A").await;
    let mapping = [("A", "A2"), ("B", "B2")];

    let responses = h
        .handle
        .submit_batch(vec![
            Command::CompleteJob {
                job_key: job.key,
                variables: Default::default(),
            },
            migrate_command(pik, target.key(), &mapping),
        ])
        .await
        .unwrap();
    assert!(responses[0].rejection().is_none());
    assert_rejected(&responses[1], RejectionType::InvalidState, "concurrent command");
    assert!(responses[1].rejection().unwrap().reason.ends_with("Please retry the migration."));
    assert_eq!(h.element(pik, "B").await.bpmn_process_id, "steps");

    let retried = h.migrate(pik, &target, &mapping).await;
    assert!(retried.rejection().is_none(), "{:?}", retried.rejection());
    assert_eq!(h.element_ids(pik).await, vec!["B2"]);
}

#[tokio::test]
async fn test_variable_update_does_not_block_migration() {
    let h = Harness::new();
    h.deploy(TWO_STEPS);
    let target = h.deploy(TWO_STEPS_V2);
    let pik = h.create("steps", json!({})).await;

    let responses = h
        .handle
        .submit_batch(vec![
            Command::SetVariables {
                scope_key: pik,
                variables: json!({ "note": "hi" }).as_object().cloned().unwrap(),
            },
            migrate_command(pik, target.key(), &[("A", "A2")]),
        ])
        .await
        .unwrap();
    assert!(responses[0].rejection().is_none());
    assert!(responses[1].rejection().is_none(), "{:?}", responses[1].rejection());
}
