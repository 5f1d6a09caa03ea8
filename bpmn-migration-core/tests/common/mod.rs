#![allow(dead_code)]

use bpmn_migration_core::clock::ManualClock;
use bpmn_migration_core::subscription::Subscription;
use bpmn_migration_core::types::{ElementInstance, Incident, Job, Key, Variables};
use bpmn_migration_core::{
    Command, CommandResponse, MappingInstruction, MemoryStore, Partition, PartitionHandle,
    ProcessInstanceMigration, ProcessModel, ProcessRepository, Record, RejectionType,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const START: i64 = 1_000;

/// One partition over a memory store, with a clock that only moves on demand.
pub struct Harness {
    pub repository: Arc<ProcessRepository>,
    pub clock: Arc<ManualClock>,
    pub partition: Partition,
    pub handle: PartitionHandle,
}

impl Harness {
    /// The timer checker effectively never runs; tests trigger timers.
    pub fn new() -> Self {
        Self::with_timer_interval(Duration::from_secs(3600))
    }

    pub fn with_timer_interval(interval: Duration) -> Self {
        let repository = Arc::new(ProcessRepository::new());
        let clock = Arc::new(ManualClock::new(START));
        let partition = Partition::start(
            1,
            Arc::new(MemoryStore::new()),
            repository.clone(),
            clock.clone(),
            interval,
        );
        let handle = partition.handle();
        Self {
            repository,
            clock,
            partition,
            handle,
        }
    }

    pub fn deploy(&self, yaml: &str) -> Arc<ProcessModel> {
        self.repository.deploy_yaml(yaml).unwrap()
    }

    pub async fn submit(&self, command: Command) -> CommandResponse {
        self.handle.submit(command).await.unwrap()
    }

    pub async fn accepted(&self, command: Command) -> CommandResponse {
        let response = self.submit(command).await;
        assert!(response.rejection().is_none(), "unexpected rejection: {:?}", response.rejection());
        response
    }

    pub async fn create(&self, bpmn_process_id: &str, variables: Value) -> Key {
        let variables: Variables = match variables {
            Value::Object(map) => map,
            _ => Variables::new(),
        };
        self.accepted(Command::CreateProcessInstance {
            bpmn_process_id: bpmn_process_id.to_string(),
            version: None,
            variables,
        })
        .await
        .key()
        .unwrap()
    }

    pub async fn migrate(
        &self,
        process_instance_key: Key,
        target: &ProcessModel,
        mapping: &[(&str, &str)],
    ) -> CommandResponse {
        self.submit(migrate_command(process_instance_key, target.key(), mapping)).await
    }

    pub async fn complete_job(
        &self,
        process_instance_key: Key,
        element_id: &str,
        variables: Value,
    ) {
        let job = self.job(process_instance_key, element_id).await;
        let variables = match variables {
            Value::Object(map) => map,
            _ => Variables::new(),
        };
        self.accepted(Command::CompleteJob {
            job_key: job.key,
            variables,
        })
        .await;
    }

    /// Wait until every follow-up queued so far has been processed. Follow-ups
    /// are queued ahead of the reply, so any later command runs after them.
    pub async fn settle(&self) {
        let response = self.submit(Command::ResolveIncident { incident_key: -1 }).await;
        assert_eq!(response.rejection().map(|r| r.rejection_type), Some(RejectionType::NotFound));
    }

    pub async fn publish(&self, name: &str, correlation_key: &str, variables: Value) {
        let variables = match variables {
            Value::Object(map) => map,
            _ => Variables::new(),
        };
        self.accepted(Command::PublishMessage {
            name: name.to_string(),
            correlation_key: correlation_key.to_string(),
            variables,
        })
        .await;
        self.settle().await;
    }

    // ── State inspection ──

    pub async fn elements(&self, process_instance_key: Key) -> Vec<ElementInstance> {
        self.handle
            .store()
            .process_instance_elements(process_instance_key)
            .await
            .unwrap()
    }

    pub async fn element_ids(&self, process_instance_key: Key) -> Vec<String> {
        let mut ids: Vec<String> = self
            .elements(process_instance_key)
            .await
            .into_iter()
            .filter(|e| !e.is_root())
            .map(|e| e.element_id)
            .collect();
        ids.sort();
        ids
    }

    pub async fn element(&self, process_instance_key: Key, element_id: &str) -> ElementInstance {
        self.elements(process_instance_key)
            .await
            .into_iter()
            .find(|e| e.element_id == element_id && !e.is_root())
            .unwrap_or_else(|| panic!("no active element '{}'", element_id))
    }

    pub async fn job(&self, process_instance_key: Key, element_id: &str) -> Job {
        self.handle
            .store()
            .process_instance_jobs(process_instance_key)
            .await
            .unwrap()
            .into_iter()
            .find(|j| j.element_id == element_id)
            .unwrap_or_else(|| panic!("no job for '{}'", element_id))
    }

    pub async fn jobs(&self, process_instance_key: Key) -> Vec<Job> {
        self.handle
            .store()
            .process_instance_jobs(process_instance_key)
            .await
            .unwrap()
    }

    pub async fn incidents(&self, process_instance_key: Key) -> Vec<Incident> {
        self.handle
            .store()
            .process_instance_incidents(process_instance_key)
            .await
            .unwrap()
    }

    pub async fn subscriptions(&self, process_instance_key: Key) -> Vec<Subscription> {
        self.handle
            .store()
            .process_instance_subscriptions(process_instance_key)
            .await
            .unwrap()
    }

    pub async fn subscription(
        &self,
        process_instance_key: Key,
        catch_event_id: &str,
    ) -> Subscription {
        self.subscriptions(process_instance_key)
            .await
            .into_iter()
            .find(|s| s.catch_event_id == catch_event_id)
            .unwrap_or_else(|| panic!("no subscription for '{}'", catch_event_id))
    }

    pub async fn records(&self) -> Vec<Record> {
        self.handle.store().read_records(0).await.unwrap()
    }

    pub async fn is_completed(&self, process_instance_key: Key) -> bool {
        self.handle
            .store()
            .element_instance(process_instance_key)
            .await
            .unwrap()
            .is_none()
    }
}

pub fn migrate_command(
    process_instance_key: Key,
    target_process_definition_key: Key,
    mapping: &[(&str, &str)],
) -> Command {
    Command::MigrateProcessInstance(ProcessInstanceMigration {
        process_instance_key,
        target_process_definition_key,
        mapping_instructions: mapping
            .iter()
            .map(|(source, target)| MappingInstruction {
                source_element_id: source.to_string(),
                target_element_id: target.to_string(),
            })
            .collect(),
    })
}

/// Names of the records in a response, e.g. `JOB_MIGRATED`.
pub fn names(response: &CommandResponse) -> Vec<String> {
    response.records().iter().map(|r| r.name()).collect()
}

pub fn assert_rejected(
    response: &CommandResponse,
    rejection_type: RejectionType,
    reason_part: &str,
) {
    let rejection = response
        .rejection()
        .unwrap_or_else(|| panic!("expected a rejection, got {:?}", names(response)));
    assert_eq!(rejection.rejection_type, rejection_type, "reason: {}", rejection.reason);
    assert!(
        rejection.reason.contains(reason_part),
        "reason '{}' does not contain '{}'",
        rejection.reason,
        reason_part
    );
}
