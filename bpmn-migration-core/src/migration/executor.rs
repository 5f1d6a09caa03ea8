use super::reconciler::Reconciler;
use super::{InstanceSnapshot, MappingPlan};
use crate::error::ProcessingError;
use crate::events::{Intent, Record, RecordValue};
use crate::model::ProcessModel;
use crate::processor::ProcessingContext;
use crate::types::{ElementInstance, ElementState, ElementType, Incident, TakenSequenceFlow};
use anyhow::anyhow;

/// Every record of an accepted migration, in application order. Reads the
/// store but writes nothing; the caller appends the batch.
///
/// Element instances are visited breadth-first so a scope is always
/// migrated before its children.
pub async fn plan(
    ctx: &mut ProcessingContext<'_>,
    source: &ProcessModel,
    target: &ProcessModel,
    snapshot: &InstanceSnapshot,
    mapping: &MappingPlan,
) -> Result<Vec<Record>, ProcessingError> {
    let reconciler = Reconciler::new(target, mapping, ctx.now);
    let mut records = Vec::new();

    for instance in &snapshot.elements {
        let target_element_id = mapping.target_of(&instance.element_id).ok_or_else(|| {
            anyhow!("active element '{}' passed validation unmapped", instance.element_id)
        })?;
        let migrated = migrated_instance(instance, target, target_element_id);
        records.push(Record::event(
            instance.key,
            Intent::ElementMigrated,
            RecordValue::ProcessInstance(migrated.clone()),
        ));

        if let Some(flows) = snapshot.taken_sequence_flows.get(&instance.key) {
            for flow in flows {
                records.push(Record::event(
                    instance.key,
                    Intent::SequenceFlowDeleted,
                    RecordValue::SequenceFlow(flow.clone()),
                ));
                records.push(Record::event(
                    instance.key,
                    Intent::SequenceFlowTaken,
                    RecordValue::SequenceFlow(migrated_flow(flow, target, mapping)),
                ));
            }
        }

        if let Some(job_key) = instance.job_key {
            if let Some(mut job) = ctx.store.job(job_key).await? {
                // The job type was evaluated on creation and stays.
                job.process_definition_key = target.key();
                job.bpmn_process_id = target.bpmn_process_id().to_string();
                job.element_id = target_element_id.to_string();
                records.push(Record::event(job.key, Intent::Migrated, RecordValue::Job(job)));
            }
            if let Some(incident) = ctx.store.job_incident(job_key).await? {
                records.push(migrated_incident(incident, target, target_element_id));
            }
        }
        if let Some(incident) = ctx.store.element_incident(instance.key).await? {
            records.push(migrated_incident(incident, target, target_element_id));
        }

        for mut variable in ctx.store.local_variables(instance.key).await? {
            variable.process_definition_key = target.key();
            variable.bpmn_process_id = target.bpmn_process_id().to_string();
            records.push(Record::event(
                variable.scope_key,
                Intent::Migrated,
                RecordValue::Variable(variable),
            ));
        }

        // Activation did not finish, so nothing was subscribed yet.
        if instance.state == ElementState::Activating {
            continue;
        }
        let interrupted = snapshot.children_of(instance.key).any(|child| {
            child.element_type == ElementType::EventSubProcess
                && source.is_interrupting_event_sub_process(&child.element_id)
        });
        records.extend(
            reconciler
                .reconcile(ctx.store, ctx.keys, instance, &migrated, interrupted)
                .await?,
        );
    }

    Ok(records)
}

fn migrated_instance(
    instance: &ElementInstance,
    target: &ProcessModel,
    target_element_id: &str,
) -> ElementInstance {
    let mut migrated = instance.clone();
    migrated.process_definition_key = target.key();
    migrated.bpmn_process_id = target.bpmn_process_id().to_string();
    migrated.version = target.version();
    migrated.element_id = target_element_id.to_string();
    migrated
}

fn migrated_flow(
    flow: &TakenSequenceFlow,
    target: &ProcessModel,
    mapping: &MappingPlan,
) -> TakenSequenceFlow {
    TakenSequenceFlow {
        flow_scope_key: flow.flow_scope_key,
        process_instance_key: flow.process_instance_key,
        process_definition_key: target.key(),
        bpmn_process_id: target.bpmn_process_id().to_string(),
        gateway_id: mapping
            .target_of(&flow.gateway_id)
            .unwrap_or(flow.gateway_id.as_str())
            .to_string(),
        sequence_flow_id: mapping
            .target_of(&flow.sequence_flow_id)
            .unwrap_or(flow.sequence_flow_id.as_str())
            .to_string(),
    }
}

fn migrated_incident(
    mut incident: Incident,
    target: &ProcessModel,
    target_element_id: &str,
) -> Record {
    incident.process_definition_key = target.key();
    incident.bpmn_process_id = target.bpmn_process_id().to_string();
    incident.element_id = target_element_id.to_string();
    Record::event(incident.key, Intent::Migrated, RecordValue::Incident(incident))
}
