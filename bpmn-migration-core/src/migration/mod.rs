//! Live migration of a process instance to another deployed definition.
//!
//! A migrate command is handled in one pass of the partition worker:
//! concurrency check, lookups, [`validator::validate`], then
//! [`executor::plan`] computes every record of the migration from reads only.
//! The records are appended in a single batch, so a rejection at any step
//! leaves the instance untouched.

pub mod executor;
pub mod guard;
pub mod reconciler;
pub mod validator;

use crate::error::{ProcessingError, Rejection};
use crate::events::{Intent, Record, RecordValue};
use crate::processor::ProcessingContext;
use crate::store::EngineStore;
use crate::types::{ElementInstance, Key, TakenSequenceFlow};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::info;

pub use validator::MappingPlan;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingInstruction {
    pub source_element_id: String,
    pub target_element_id: String,
}

/// The `MIGRATE_PROCESS_INSTANCE` command body. Also the value of the final
/// `PROCESS_INSTANCE_MIGRATION_MIGRATED` record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstanceMigration {
    pub process_instance_key: Key,
    pub target_process_definition_key: Key,
    #[serde(default)]
    pub mapping_instructions: Vec<MappingInstruction>,
}

/// Active state of one process instance as read at the start of a migration.
#[derive(Clone, Debug)]
pub struct InstanceSnapshot {
    pub root: ElementInstance,
    /// Every active element instance, breadth-first from the root.
    pub elements: Vec<ElementInstance>,
    /// Taken joining-gateway flows by flow scope key.
    pub taken_sequence_flows: BTreeMap<Key, Vec<TakenSequenceFlow>>,
}

impl InstanceSnapshot {
    pub async fn load(store: &dyn EngineStore, root: ElementInstance) -> Result<Self> {
        let process_instance_key = root.process_instance_key;
        let mut elements = Vec::new();
        let mut taken_sequence_flows = BTreeMap::new();
        let mut queue = VecDeque::from([root.clone()]);

        while let Some(instance) = queue.pop_front() {
            let flows = store.taken_sequence_flows(instance.key).await?;
            if !flows.is_empty() {
                taken_sequence_flows.insert(instance.key, flows);
            }
            queue.extend(store.children(process_instance_key, instance.key).await?);
            elements.push(instance);
        }

        Ok(Self {
            root,
            elements,
            taken_sequence_flows,
        })
    }

    pub fn element(&self, key: Key) -> Option<&ElementInstance> {
        self.elements.iter().find(|e| e.key == key)
    }

    pub fn children_of(&self, key: Key) -> impl Iterator<Item = &ElementInstance> {
        self.elements
            .iter()
            .filter(move |e| e.flow_scope_key == Some(key))
    }
}

/// Handle a migrate command. `observed_sequence` is the instance sequence
/// stamped when the command was enqueued.
pub async fn migrate(
    ctx: &mut ProcessingContext<'_>,
    command: &ProcessInstanceMigration,
    observed_sequence: Option<u64>,
) -> Result<Key, ProcessingError> {
    let process_instance_key = command.process_instance_key;

    let root = ctx
        .store
        .element_instance(process_instance_key)
        .await?
        .filter(|e| e.is_root())
        .ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to migrate process instance but no process instance found with key '{}'",
                process_instance_key
            ))
        })?;

    let current_sequence = ctx.store.instance_sequence(process_instance_key).await?;
    guard::require_no_concurrent_command(
        process_instance_key,
        observed_sequence,
        current_sequence,
    )?;

    let target = ctx
        .models
        .model_by_key(command.target_process_definition_key)
        .ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to migrate process instance to process definition but no process \
                 definition found with key '{}'",
                command.target_process_definition_key
            ))
        })?;
    let source = ctx
        .models
        .model_by_key(root.process_definition_key)
        .ok_or_else(|| {
            anyhow!(
                "process definition {} of instance {} is not deployed",
                root.process_definition_key,
                process_instance_key
            )
        })?;

    let snapshot = InstanceSnapshot::load(ctx.store, root).await?;
    let plan = validator::validate(&source, &target, &snapshot, &command.mapping_instructions)?;

    let mut records = executor::plan(ctx, &source, &target, &snapshot, &plan).await?;
    records.push(Record::event(
        process_instance_key,
        Intent::Migrated,
        RecordValue::ProcessInstanceMigration(command.clone()),
    ));
    let count = records.len();
    ctx.writer.append(records).await?;

    info!(
        process_instance_key,
        target_process_definition_key = command.target_process_definition_key,
        records = count,
        "process instance migrated"
    );
    Ok(process_instance_key)
}
