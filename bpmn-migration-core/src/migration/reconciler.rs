//! Per-host subscription policy for a migration.
//!
//! For one migrated element instance the reconciler decides which of its
//! subscriptions are migrated in place, which are closed and which target
//! catch events need a fresh subscription. Payloads of kept subscriptions are
//! copied, never re-evaluated.

use super::MappingPlan;
use crate::error::{ProcessingError, Rejection};
use crate::events::Record;
use crate::keys::KeyGenerator;
use crate::model::{EventDefinition, ProcessModel};
use crate::store::{variable_scope, EngineStore};
use crate::subscription::{open_subscription, Subscription, SubscriptionChange, SubscriptionPayload};
use crate::types::{ElementInstance, EventType, Timestamp};

pub struct Reconciler<'a> {
    target: &'a ProcessModel,
    mapping: &'a MappingPlan,
    now: Timestamp,
}

impl<'a> Reconciler<'a> {
    pub fn new(target: &'a ProcessModel, mapping: &'a MappingPlan, now: Timestamp) -> Self {
        Self {
            target,
            mapping,
            now,
        }
    }

    /// Records reconciling the subscriptions owned by `instance`, which is
    /// migrated to `migrated`. `interrupted` hosts get no new subscriptions.
    pub async fn reconcile(
        &self,
        store: &dyn EngineStore,
        keys: &mut KeyGenerator,
        instance: &ElementInstance,
        migrated: &ElementInstance,
        interrupted: bool,
    ) -> Result<Vec<Record>, ProcessingError> {
        let mut records = Vec::new();
        let mut kept_message_names = Vec::new();

        for subscription in store.scope_subscriptions(instance.key).await? {
            if let SubscriptionPayload::Compensation { .. } = subscription.payload {
                records.extend(self.reconcile_compensation(&subscription));
                continue;
            }
            match self.mapping.target_of(&subscription.catch_event_id) {
                Some(target_catch_event_id) => {
                    let moved = subscription.migrated(self.target, target_catch_event_id);
                    if let Some(name) = moved.message_name() {
                        kept_message_names.push(name.to_string());
                    }
                    records.extend(moved.records(SubscriptionChange::Migrated));
                }
                None => records.extend(subscription.records(SubscriptionChange::Closed)),
            }
        }

        if interrupted {
            return Ok(records);
        }

        let candidates: Vec<_> = self
            .target
            .catch_events_of(&migrated.element_id, migrated.shape())
            .into_iter()
            .filter(|c| !self.mapping.is_target(&c.id) && c.event_type != EventType::Compensation)
            .collect();
        if candidates.is_empty() {
            return Ok(records);
        }

        // Evaluated in the unchanged scope of the pre-migration instance.
        let variables = variable_scope(store, instance.key).await?;
        for catch_event in candidates {
            if let Some(EventDefinition::Message { name, .. }) =
                self.target.element(&catch_event.id).map(|e| &e.event)
            {
                if kept_message_names.iter().any(|kept| kept == name) {
                    return Err(Rejection::invalid_state(format!(
                        "Expected to migrate process instance '{}' but active element with id '{}' \
                         attempts to subscribe to a message it is already subscribed to with name \
                         '{}'. Migrating active elements that subscribe to a message they are \
                         already subscribed to is not possible yet. Please provide a mapping \
                         instruction to message catch event with id '{}' to migrate the respective \
                         message subscription.",
                        instance.process_instance_key, instance.element_id, name, catch_event.id
                    ))
                    .into());
                }
            }

            let opened = open_subscription(
                keys.next_key(),
                self.target,
                catch_event,
                migrated,
                &variables,
                self.now,
            )
            .map_err(|cause| {
                Rejection::invalid_state(format!(
                    "Expected to migrate process instance '{}' but active element with id '{}' is \
                     mapped to element with id '{}' that must be subscribed to a catch event. {}",
                    instance.process_instance_key, instance.element_id, migrated.element_id, cause
                ))
            })?;
            if let Some(subscription) = opened {
                records.extend(subscription.records(SubscriptionChange::Opened));
            }
        }

        Ok(records)
    }

    /// Compensation subscriptions follow their compensable activity. They are
    /// closed when the activity is unmapped or its target has no compensation
    /// boundary event; new ones are only ever opened on activity completion.
    fn reconcile_compensation(&self, subscription: &Subscription) -> Vec<Record> {
        let SubscriptionPayload::Compensation {
            compensable_activity_id,
            compensable_activity_instance_key,
            compensation_handler_id,
        } = &subscription.payload
        else {
            return Vec::new();
        };

        let target_activity = self.mapping.target_of(compensable_activity_id);
        let boundary = target_activity.and_then(|t| self.target.compensation_boundary_of(t));
        let (Some(target_activity), Some(boundary)) = (target_activity, boundary) else {
            return subscription.records(SubscriptionChange::Closed);
        };

        let handler = compensation_handler_id
            .as_deref()
            .and_then(|h| self.mapping.target_of(h))
            .map(str::to_string)
            .or_else(|| match &boundary.event {
                EventDefinition::Compensation { handler } => handler.clone(),
                _ => None,
            });

        let mut moved = subscription.migrated(self.target, &boundary.id);
        moved.payload = SubscriptionPayload::Compensation {
            compensable_activity_id: target_activity.to_string(),
            compensable_activity_instance_key: *compensable_activity_instance_key,
            compensation_handler_id: handler,
        };
        moved.records(SubscriptionChange::Migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectionType;
    use crate::events::{Intent, RecordValue};
    use crate::migration::{validator, InstanceSnapshot, MappingInstruction};
    use crate::model::build::build_model_from_yaml;
    use crate::store_memory::MemoryStore;
    use crate::types::{ElementState, ElementType, Key, VariableRecord};
    use serde_json::json;
    use std::collections::BTreeMap;

    const SOURCE: &str = r#"
id: source
elements:
  - { id: A, type: USER_TASK, job_type: a }
  - id: timer
    type: BOUNDARY_EVENT
    attached_to: A
    event: { kind: TIMER, duration_ms: 1000 }
  - id: msg
    type: BOUNDARY_EVENT
    attached_to: A
    event: { kind: MESSAGE, name: cancel, correlation_key: "=orderId" }
"#;

    const TARGET: &str = r#"
id: target
elements:
  - { id: B, type: USER_TASK, job_type: b }
  - id: timer2
    type: BOUNDARY_EVENT
    attached_to: B
    interrupting: false
    event: { kind: TIMER, duration_ms: 99999 }
  - id: msg2
    type: BOUNDARY_EVENT
    attached_to: B
    event: { kind: MESSAGE, name: cancel, correlation_key: "=orderId" }
  - id: sig
    type: BOUNDARY_EVENT
    attached_to: B
    event: { kind: SIGNAL, name: stop }
"#;

    fn instance(
        key: Key,
        scope: Option<Key>,
        element_id: &str,
        element_type: ElementType,
    ) -> ElementInstance {
        ElementInstance {
            key,
            process_instance_key: 1,
            process_definition_key: 10,
            bpmn_process_id: "source".to_string(),
            version: 1,
            element_id: element_id.to_string(),
            element_type,
            flow_scope_key: scope,
            state: ElementState::Activated,
            job_key: None,
            loop_counter: 0,
            called_process_instance_key: None,
            parent_process_instance_key: None,
            parent_element_instance_key: None,
        }
    }

    fn subscription(key: Key, catch_event_id: &str, payload: SubscriptionPayload) -> Subscription {
        Subscription {
            key,
            process_instance_key: 1,
            process_definition_key: 10,
            bpmn_process_id: "source".to_string(),
            catch_event_id: catch_event_id.to_string(),
            scope_key: 2,
            payload,
        }
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let root = instance(1, None, "source", ElementType::Process);
        let task = instance(2, Some(1), "A", ElementType::UserTask);
        let mut records = vec![
            Record::event(1, Intent::ElementActivating, RecordValue::ProcessInstance(root)),
            Record::event(2, Intent::ElementActivating, RecordValue::ProcessInstance(task)),
            Record::event(
                1,
                Intent::Created,
                RecordValue::Variable(VariableRecord {
                    scope_key: 1,
                    process_instance_key: 1,
                    process_definition_key: 10,
                    bpmn_process_id: "source".to_string(),
                    name: "orderId".to_string(),
                    value: json!("o-1"),
                }),
            ),
        ];
        records.extend(
            subscription(3, "timer", SubscriptionPayload::Timer { due_date: 5_000 })
                .records(SubscriptionChange::Opened),
        );
        records.extend(
            subscription(
                4,
                "msg",
                SubscriptionPayload::Message {
                    message_name: "cancel".to_string(),
                    correlation_key: "o-1".to_string(),
                    interrupting: true,
                },
            )
            .records(SubscriptionChange::Opened),
        );
        store.append(records).await.unwrap();
        store
    }

    fn mapping(pairs: &[(&str, &str)]) -> MappingPlan {
        mapping_to(TARGET, pairs)
    }

    fn mapping_to(target_yaml: &str, pairs: &[(&str, &str)]) -> MappingPlan {
        let source = build_model_from_yaml(SOURCE, 10, 1).unwrap();
        let target = build_model_from_yaml(target_yaml, 20, 1).unwrap();
        let instructions: Vec<MappingInstruction> = pairs
            .iter()
            .map(|(s, t)| MappingInstruction {
                source_element_id: s.to_string(),
                target_element_id: t.to_string(),
            })
            .collect();
        let root = instance(1, None, "source", ElementType::Process);
        let snapshot = InstanceSnapshot {
            root: root.clone(),
            elements: vec![root, instance(2, Some(1), "A", ElementType::UserTask)],
            taken_sequence_flows: BTreeMap::new(),
        };
        validator::validate(&source, &target, &snapshot, &instructions).unwrap()
    }

    fn migrated_task() -> ElementInstance {
        let mut migrated = instance(2, Some(1), "B", ElementType::UserTask);
        migrated.process_definition_key = 20;
        migrated.bpmn_process_id = "target".to_string();
        migrated
    }

    #[tokio::test]
    async fn test_mapped_subscriptions_keep_payload_and_new_ones_open() {
        let store = seeded_store().await;
        let target = build_model_from_yaml(TARGET, 20, 1).unwrap();
        let plan = mapping(&[("A", "B"), ("timer", "timer2"), ("msg", "msg2")]);
        let reconciler = Reconciler::new(&target, &plan, 1_000);
        let mut keys = KeyGenerator::new(1);

        let task = instance(2, Some(1), "A", ElementType::UserTask);
        let records = reconciler
            .reconcile(&store, &mut keys, &task, &migrated_task(), false)
            .await
            .unwrap();
        let names: Vec<String> = records.iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec![
                "TIMER_MIGRATED",
                "PROCESS_MESSAGE_SUBSCRIPTION_MIGRATED",
                "MESSAGE_SUBSCRIPTION_MIGRATED",
                "SIGNAL_SUBSCRIPTION_CREATED"
            ]
        );

        let timer = records[0].value.subscription().unwrap();
        assert_eq!(timer.payload, SubscriptionPayload::Timer { due_date: 5_000 });
        assert_eq!(timer.catch_event_id, "timer2");
        assert_eq!(timer.process_definition_key, 20);
        assert_eq!(timer.scope_key, 2);

        let message = records[1].value.subscription().unwrap();
        assert_eq!(message.bpmn_process_id, "target");
        assert_eq!(message.stored_interrupting(), Some(true));
    }

    #[tokio::test]
    async fn test_unmapped_subscriptions_close() {
        let store = seeded_store().await;
        let target = build_model_from_yaml(TARGET, 20, 1).unwrap();
        let plan = mapping(&[("A", "B"), ("msg", "msg2")]);
        let reconciler = Reconciler::new(&target, &plan, 1_000);
        let mut keys = KeyGenerator::new(1);

        let task = instance(2, Some(1), "A", ElementType::UserTask);
        let records = reconciler
            .reconcile(&store, &mut keys, &task, &migrated_task(), false)
            .await
            .unwrap();
        let names: Vec<String> = records.iter().map(|r| r.name()).collect();
        assert!(names.contains(&"TIMER_CANCELED".to_string()));
        assert!(names.contains(&"TIMER_CREATED".to_string()), "timer2 is new on B");
        let created = records
            .iter()
            .find(|r| r.name() == "TIMER_CREATED")
            .and_then(|r| r.value.subscription())
            .unwrap();
        assert_eq!(created.payload, SubscriptionPayload::Timer { due_date: 100_999 });
    }

    const TARGET_DUPLICATE_MESSAGE: &str = r#"
id: target
elements:
  - { id: B, type: USER_TASK, job_type: b }
  - id: msg2
    type: BOUNDARY_EVENT
    attached_to: B
    event: { kind: MESSAGE, name: cancel, correlation_key: "=orderId" }
  - id: msg3
    type: BOUNDARY_EVENT
    attached_to: B
    interrupting: false
    event: { kind: MESSAGE, name: cancel, correlation_key: "=orderId" }
"#;

    const TARGET_BROKEN_KEY: &str = r#"
id: target
elements:
  - { id: B, type: USER_TASK, job_type: b }
  - id: late
    type: BOUNDARY_EVENT
    attached_to: B
    event: { kind: MESSAGE, name: late, correlation_key: "=missing" }
"#;

    #[tokio::test]
    async fn test_resubscribing_same_message_is_rejected() {
        let store = seeded_store().await;
        let target = build_model_from_yaml(TARGET_DUPLICATE_MESSAGE, 20, 1).unwrap();
        let plan = mapping_to(TARGET_DUPLICATE_MESSAGE, &[("A", "B"), ("msg", "msg2")]);
        let reconciler = Reconciler::new(&target, &plan, 0);
        let mut keys = KeyGenerator::new(1);

        let task = instance(2, Some(1), "A", ElementType::UserTask);
        let err = reconciler
            .reconcile(&store, &mut keys, &task, &migrated_task(), false)
            .await
            .unwrap_err();
        let ProcessingError::Rejected(rejection) = err else {
            panic!("expected a rejection");
        };
        assert_eq!(rejection.rejection_type, RejectionType::InvalidState);
        assert!(rejection.reason.contains("already subscribed to with name 'cancel'"));
        assert!(rejection.reason.contains("message catch event with id 'msg3'"));
    }

    #[tokio::test]
    async fn test_failing_correlation_key_is_rejected() {
        let store = seeded_store().await;
        let target = build_model_from_yaml(TARGET_BROKEN_KEY, 20, 1).unwrap();
        let plan = mapping_to(TARGET_BROKEN_KEY, &[("A", "B")]);
        let reconciler = Reconciler::new(&target, &plan, 0);
        let mut keys = KeyGenerator::new(1);

        let task = instance(2, Some(1), "A", ElementType::UserTask);
        let err = reconciler
            .reconcile(&store, &mut keys, &task, &migrated_task(), false)
            .await
            .unwrap_err();
        let ProcessingError::Rejected(rejection) = err else {
            panic!("expected a rejection");
        };
        let expected = "is mapped to element with id 'B' that must be subscribed to a catch event.";
        assert!(rejection.reason.contains(expected));
        assert!(rejection.reason.contains("no variable found with name 'missing'"));
    }

    #[tokio::test]
    async fn test_interrupted_host_opens_nothing() {
        let store = seeded_store().await;
        let target = build_model_from_yaml(TARGET, 20, 1).unwrap();
        let plan = mapping(&[("A", "B")]);
        let reconciler = Reconciler::new(&target, &plan, 0);
        let mut keys = KeyGenerator::new(1);

        let task = instance(2, Some(1), "A", ElementType::UserTask);
        let records = reconciler
            .reconcile(&store, &mut keys, &task, &migrated_task(), true)
            .await
            .unwrap();
        assert!(records.iter().all(|r| matches!(r.intent, Intent::Deleted | Intent::Canceled)));
    }
}
