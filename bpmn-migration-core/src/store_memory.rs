use crate::events::{Intent, Record, RecordValue};
use crate::store::EngineStore;
use crate::subscription::{Subscription, SubscriptionPayload};
use crate::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct State {
    element_instances: BTreeMap<Key, ElementInstance>,
    /// (process_instance_key, flow_scope_key, key)
    scope_index: BTreeSet<(Key, Key, Key)>,
    sequences: HashMap<Key, u64>,
    taken_flows: BTreeMap<Key, Vec<TakenSequenceFlow>>,
    jobs: BTreeMap<Key, Job>,
    incidents: BTreeMap<Key, Incident>,
    /// Process-side subscriptions of every kind.
    subscriptions: BTreeMap<Key, Subscription>,
    /// Message-side registrations, keyed like their process-side half.
    message_subscriptions: BTreeMap<Key, Subscription>,
    variables: BTreeMap<(Key, String), VariableRecord>,
    log: Vec<Record>,
}

impl State {
    fn apply(&mut self, record: &Record) {
        if record.advances_instance() {
            if let Some(sequence) = record
                .process_instance_key()
                .and_then(|pik| self.sequences.get_mut(&pik))
            {
                *sequence += 1;
            }
        }

        match (&record.value, record.intent) {
            (RecordValue::ProcessInstance(instance), Intent::ElementActivating) => {
                if let Some(flow_scope_key) = instance.flow_scope_key {
                    self.scope_index
                        .insert((instance.process_instance_key, flow_scope_key, instance.key));
                } else {
                    self.sequences.insert(instance.key, 1);
                }
                self.element_instances.insert(instance.key, instance.clone());
            }
            (
                RecordValue::ProcessInstance(instance),
                Intent::ElementActivated | Intent::ElementMigrated,
            ) => {
                self.element_instances.insert(instance.key, instance.clone());
            }
            (
                RecordValue::ProcessInstance(instance),
                Intent::ElementCompleted | Intent::ElementTerminated,
            ) => {
                self.element_instances.remove(&instance.key);
                match instance.flow_scope_key {
                    Some(flow_scope_key) => {
                        self.scope_index.remove(&(
                            instance.process_instance_key,
                            flow_scope_key,
                            instance.key,
                        ));
                    }
                    None => {
                        self.sequences.remove(&instance.key);
                    }
                }
                self.taken_flows.remove(&instance.key);
                self.variables.retain(|(scope_key, _), _| *scope_key != instance.key);
            }
            (RecordValue::SequenceFlow(flow), Intent::SequenceFlowTaken) => {
                self.taken_flows
                    .entry(flow.flow_scope_key)
                    .or_default()
                    .push(flow.clone());
            }
            (RecordValue::SequenceFlow(flow), Intent::SequenceFlowDeleted) => {
                if let Some(flows) = self.taken_flows.get_mut(&flow.flow_scope_key) {
                    if let Some(idx) = flows.iter().position(|f| {
                        f.gateway_id == flow.gateway_id
                            && f.sequence_flow_id == flow.sequence_flow_id
                    }) {
                        flows.remove(idx);
                    }
                    if flows.is_empty() {
                        self.taken_flows.remove(&flow.flow_scope_key);
                    }
                }
            }
            (RecordValue::Job(job), Intent::Completed | Intent::Canceled) => {
                self.jobs.remove(&job.key);
            }
            (RecordValue::Job(job), _) => {
                self.jobs.insert(job.key, job.clone());
            }
            (RecordValue::Incident(incident), Intent::Resolved) => {
                self.incidents.remove(&incident.key);
            }
            (RecordValue::Incident(incident), _) => {
                self.incidents.insert(incident.key, incident.clone());
            }
            (RecordValue::Variable(variable), _) => {
                self.variables.insert(
                    (variable.scope_key, variable.name.clone()),
                    variable.clone(),
                );
            }
            (RecordValue::MessageSubscription(subscription), intent) => match intent {
                Intent::Created | Intent::Migrated => {
                    self.message_subscriptions
                        .insert(subscription.key, subscription.clone());
                }
                Intent::Deleted => {
                    self.message_subscriptions.remove(&subscription.key);
                }
                _ => {}
            },
            (
                RecordValue::ProcessMessageSubscription(subscription)
                | RecordValue::Timer(subscription)
                | RecordValue::SignalSubscription(subscription)
                | RecordValue::ConditionalSubscription(subscription)
                | RecordValue::CompensationSubscription(subscription),
                intent,
            ) => match intent {
                Intent::Created | Intent::Migrated => {
                    self.subscriptions
                        .insert(subscription.key, subscription.clone());
                }
                Intent::Deleted | Intent::Canceled => {
                    self.subscriptions.remove(&subscription.key);
                }
                // Timers fire once.
                Intent::Triggered if subscription.event_type() == EventType::Timer => {
                    self.subscriptions.remove(&subscription.key);
                }
                _ => {}
            },
            _ => {}
        }
    }
}

/// In-memory EngineStore for tests and single-node runs.
pub struct MemoryStore {
    inner: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(State::default()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        let state = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(f(&state))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn element_instance(&self, key: Key) -> Result<Option<ElementInstance>> {
        self.read(|s| s.element_instances.get(&key).cloned())
    }

    async fn children(
        &self,
        process_instance_key: Key,
        flow_scope_key: Key,
    ) -> Result<Vec<ElementInstance>> {
        self.read(|s| {
            s.scope_index
                .range(
                    (process_instance_key, flow_scope_key, Key::MIN)
                        ..=(process_instance_key, flow_scope_key, Key::MAX),
                )
                .filter_map(|(_, _, key)| s.element_instances.get(key).cloned())
                .collect()
        })
    }

    async fn process_instance_elements(
        &self,
        process_instance_key: Key,
    ) -> Result<Vec<ElementInstance>> {
        self.read(|s| {
            s.element_instances
                .values()
                .filter(|e| e.process_instance_key == process_instance_key)
                .cloned()
                .collect()
        })
    }

    async fn instance_sequence(&self, process_instance_key: Key) -> Result<Option<u64>> {
        self.read(|s| s.sequences.get(&process_instance_key).copied())
    }

    async fn taken_sequence_flows(&self, flow_scope_key: Key) -> Result<Vec<TakenSequenceFlow>> {
        self.read(|s| s.taken_flows.get(&flow_scope_key).cloned().unwrap_or_default())
    }

    async fn job(&self, key: Key) -> Result<Option<Job>> {
        self.read(|s| s.jobs.get(&key).cloned())
    }

    async fn process_instance_jobs(&self, process_instance_key: Key) -> Result<Vec<Job>> {
        self.read(|s| {
            s.jobs
                .values()
                .filter(|j| j.process_instance_key == process_instance_key)
                .cloned()
                .collect()
        })
    }

    async fn incident(&self, key: Key) -> Result<Option<Incident>> {
        self.read(|s| s.incidents.get(&key).cloned())
    }

    async fn element_incident(&self, element_instance_key: Key) -> Result<Option<Incident>> {
        self.read(|s| {
            s.incidents
                .values()
                .find(|i| i.element_instance_key == element_instance_key && i.job_key.is_none())
                .cloned()
        })
    }

    async fn job_incident(&self, job_key: Key) -> Result<Option<Incident>> {
        self.read(|s| {
            s.incidents
                .values()
                .find(|i| i.job_key == Some(job_key))
                .cloned()
        })
    }

    async fn process_instance_incidents(&self, process_instance_key: Key) -> Result<Vec<Incident>> {
        self.read(|s| {
            s.incidents
                .values()
                .filter(|i| i.process_instance_key == process_instance_key)
                .cloned()
                .collect()
        })
    }

    async fn subscription(&self, key: Key) -> Result<Option<Subscription>> {
        self.read(|s| s.subscriptions.get(&key).cloned())
    }

    async fn scope_subscriptions(&self, scope_key: Key) -> Result<Vec<Subscription>> {
        self.read(|s| {
            s.subscriptions
                .values()
                .filter(|sub| sub.scope_key == scope_key)
                .cloned()
                .collect()
        })
    }

    async fn process_instance_subscriptions(
        &self,
        process_instance_key: Key,
    ) -> Result<Vec<Subscription>> {
        self.read(|s| {
            s.subscriptions
                .values()
                .filter(|sub| sub.process_instance_key == process_instance_key)
                .cloned()
                .collect()
        })
    }

    async fn message_subscriptions(
        &self,
        message_name: &str,
        correlation_key: &str,
    ) -> Result<Vec<Subscription>> {
        self.read(|s| {
            s.message_subscriptions
                .values()
                .filter(|sub| {
                    matches!(
                        &sub.payload,
                        SubscriptionPayload::Message {
                            message_name: name,
                            correlation_key: key,
                            ..
                        } if name == message_name && key == correlation_key
                    )
                })
                .cloned()
                .collect()
        })
    }

    async fn signal_subscriptions(&self, signal_name: &str) -> Result<Vec<Subscription>> {
        self.read(|s| {
            s.subscriptions
                .values()
                .filter(|sub| {
                    matches!(
                        &sub.payload,
                        SubscriptionPayload::Signal { signal_name: name } if name == signal_name
                    )
                })
                .cloned()
                .collect()
        })
    }

    async fn due_timers(&self, now: Timestamp) -> Result<Vec<Subscription>> {
        self.read(|s| {
            s.subscriptions
                .values()
                .filter(|sub| {
                    matches!(
                        sub.payload,
                        SubscriptionPayload::Timer { due_date } if due_date <= now
                    )
                })
                .cloned()
                .collect()
        })
    }

    async fn local_variables(&self, scope_key: Key) -> Result<Vec<VariableRecord>> {
        self.read(|s| {
            s.variables
                .range((scope_key, String::new())..)
                .take_while(|((scope, _), _)| *scope == scope_key)
                .map(|(_, v)| v.clone())
                .collect()
        })
    }

    async fn append(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut state = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut appended = Vec::with_capacity(records.len());
        for mut record in records {
            record.position = state.log.len() as u64 + 1;
            state.apply(&record);
            debug!(position = record.position, record = %record, "record applied");
            state.log.push(record.clone());
            appended.push(record);
        }
        Ok(appended)
    }

    async fn read_records(&self, from_position: u64) -> Result<Vec<Record>> {
        self.read(|s| {
            s.log
                .iter()
                .filter(|r| r.position >= from_position)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::variable_scope;
    use serde_json::json;

    fn instance(key: Key, flow_scope_key: Option<Key>, element_id: &str) -> ElementInstance {
        ElementInstance {
            key,
            process_instance_key: 1,
            process_definition_key: 10,
            bpmn_process_id: "p".to_string(),
            version: 1,
            element_id: element_id.to_string(),
            element_type: if flow_scope_key.is_none() {
                ElementType::Process
            } else {
                ElementType::ServiceTask
            },
            flow_scope_key,
            state: ElementState::Activated,
            job_key: None,
            loop_counter: 0,
            called_process_instance_key: None,
            parent_process_instance_key: None,
            parent_element_instance_key: None,
        }
    }

    fn activating(instance: ElementInstance) -> Record {
        Record::event(
            instance.key,
            Intent::ElementActivating,
            RecordValue::ProcessInstance(instance),
        )
    }

    fn variable(scope_key: Key, name: &str, value: serde_json::Value) -> Record {
        Record::event(
            scope_key,
            Intent::Created,
            RecordValue::Variable(VariableRecord {
                scope_key,
                process_instance_key: 1,
                process_definition_key: 10,
                bpmn_process_id: "p".to_string(),
                name: name.to_string(),
                value,
            }),
        )
    }

    #[tokio::test]
    async fn test_children_range_scan() {
        let store = MemoryStore::new();
        store
            .append(vec![
                activating(instance(1, None, "p")),
                activating(instance(3, Some(1), "B")),
                activating(instance(2, Some(1), "A")),
                activating(instance(4, Some(3), "C")),
            ])
            .await
            .unwrap();

        let children = store.children(1, 1).await.unwrap();
        let ids: Vec<&str> = children.iter().map(|c| c.element_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"], "children ordered by key, grandchildren excluded");
        assert_eq!(store.children(1, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sequence_moves_with_advancing_records() {
        let store = MemoryStore::new();
        store.append(vec![activating(instance(1, None, "p"))]).await.unwrap();
        let before = store.instance_sequence(1).await.unwrap().unwrap();

        store.append(vec![variable(1, "x", json!(1))]).await.unwrap();
        assert_eq!(store.instance_sequence(1).await.unwrap(), Some(before));

        store.append(vec![activating(instance(2, Some(1), "A"))]).await.unwrap();
        assert_eq!(store.instance_sequence(1).await.unwrap(), Some(before + 1));

        let completed = Record::event(
            1,
            Intent::ElementCompleted,
            RecordValue::ProcessInstance(instance(1, None, "p")),
        );
        store.append(vec![completed]).await.unwrap();
        assert_eq!(store.instance_sequence(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_variable_scope_inner_shadows_outer() {
        let store = MemoryStore::new();
        store
            .append(vec![
                activating(instance(1, None, "p")),
                activating(instance(2, Some(1), "A")),
                variable(1, "x", json!("outer")),
                variable(1, "y", json!(true)),
                variable(2, "x", json!("inner")),
            ])
            .await
            .unwrap();

        let scope = variable_scope(&store, 2).await.unwrap();
        assert_eq!(scope["x"], json!("inner"));
        assert_eq!(scope["y"], json!(true));
        let outer = variable_scope(&store, 1).await.unwrap();
        assert_eq!(outer["x"], json!("outer"));
    }

    #[tokio::test]
    async fn test_positions_are_monotonic() {
        let store = MemoryStore::new();
        let appended = store
            .append(vec![activating(instance(1, None, "p")), variable(1, "x", json!(1))])
            .await
            .unwrap();
        assert_eq!(appended[0].position, 1);
        assert_eq!(appended[1].position, 2);
        assert_eq!(store.read_records(2).await.unwrap().len(), 1);
    }
}
