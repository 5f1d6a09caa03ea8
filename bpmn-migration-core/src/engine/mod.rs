//! Element lifecycle for the commands that drive process instances forward.
//!
//! The engine works through a queue of [`Step`]s. Activation appends the
//! `ELEMENT_ACTIVATING` record immediately and queues an [`Step::Open`];
//! opening does the element-type specific work and either waits or queues
//! a [`Step::Complete`]. Scopes are checked for completion once a child
//! leaves without continuing the flow. Nothing here recurses, so a long
//! chain of pass-through elements is a long queue, not a deep stack.

mod commands;
mod triggers;

pub use commands::handle;

use crate::events::{Intent, Record, RecordValue};
use crate::expression::{self, VariableScope};
use crate::model::{ElementDefinition, EventDefinition, ProcessModel};
use crate::processor::ProcessingContext;
use crate::store::variable_scope;
use crate::subscription::{open_subscription, Subscription, SubscriptionChange, SubscriptionPayload};
use crate::types::*;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Retries a freshly created job starts with.
pub const DEFAULT_JOB_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Open(Key),
    Complete(Key),
    CheckScope(Key),
}

pub(crate) struct Engine<'c, 'a> {
    ctx: &'c mut ProcessingContext<'a>,
    steps: VecDeque<Step>,
}

impl<'c, 'a> Engine<'c, 'a> {
    pub fn new(ctx: &'c mut ProcessingContext<'a>) -> Self {
        Self {
            ctx,
            steps: VecDeque::new(),
        }
    }

    /// Drain the step queue.
    pub async fn run(&mut self) -> Result<()> {
        while let Some(step) = self.steps.pop_front() {
            debug!(?step, "engine step");
            match step {
                Step::Open(key) => self.open(key).await?,
                Step::Complete(key) => self.complete(key).await?,
                Step::CheckScope(key) => self.check_scope(key).await?,
            }
        }
        Ok(())
    }

    // ── Plumbing ──

    async fn emit(&mut self, records: Vec<Record>) -> Result<()> {
        self.ctx.writer.append(records).await
    }

    fn next_key(&mut self) -> Key {
        self.ctx.keys.next_key()
    }

    fn model(&self, process_definition_key: Key) -> Result<Arc<ProcessModel>> {
        self.ctx.model(process_definition_key)
    }

    async fn instance(&self, key: Key) -> Result<Option<ElementInstance>> {
        self.ctx.store.element_instance(key).await
    }

    async fn transition(
        &mut self,
        instance: &mut ElementInstance,
        state: ElementState,
        intent: Intent,
    ) -> Result<()> {
        instance.state = state;
        self.emit(vec![element_record(intent, instance)]).await
    }

    pub(crate) fn queue_open(&mut self, key: Key) {
        self.steps.push_back(Step::Open(key));
    }

    pub(crate) fn queue_complete(&mut self, key: Key) {
        self.steps.push_back(Step::Complete(key));
    }

    // ── Activation ──

    /// Create an instance of `element` inside `scope`.
    async fn activate(
        &mut self,
        scope: &ElementInstance,
        element: &ElementDefinition,
    ) -> Result<Key> {
        let key = self.next_key();
        let instance = scope.child(key, &element.id, element.instance_type(InstanceShape::Plain));
        self.emit(vec![element_record(Intent::ElementActivating, &instance)]).await?;
        self.queue_open(key);
        Ok(key)
    }

    /// Create the inner instance `loop_counter` of a multi-instance body.
    async fn activate_inner(
        &mut self,
        body: &ElementInstance,
        element: &ElementDefinition,
        loop_counter: u32,
        item: Option<Value>,
    ) -> Result<Key> {
        let key = self.next_key();
        let mut inner = body.child(key, &element.id, element.element_type);
        inner.loop_counter = loop_counter;
        let mut records = vec![element_record(Intent::ElementActivating, &inner)];
        let input_element = element
            .multi_instance
            .as_ref()
            .and_then(|mi| mi.input_element.as_deref());
        if let (Some(name), Some(value)) = (input_element, item) {
            records.push(Record::event(
                key,
                Intent::Created,
                RecordValue::Variable(variable_record(&inner, name, value)),
            ));
        }
        self.emit(records).await?;
        self.queue_open(key);
        Ok(key)
    }

    /// Create a process instance root. Call activities pass themselves as
    /// `parent`.
    pub(crate) async fn create_process_instance(
        &mut self,
        model: &ProcessModel,
        variables: &Variables,
        parent: Option<&ElementInstance>,
    ) -> Result<Key> {
        let key = self.next_key();
        let root = ElementInstance {
            key,
            process_instance_key: key,
            process_definition_key: model.key(),
            bpmn_process_id: model.bpmn_process_id().to_string(),
            version: model.version(),
            element_id: model.bpmn_process_id().to_string(),
            element_type: ElementType::Process,
            flow_scope_key: None,
            state: ElementState::Activating,
            job_key: None,
            loop_counter: 0,
            called_process_instance_key: None,
            parent_process_instance_key: parent.map(|p| p.process_instance_key),
            parent_element_instance_key: parent.map(|p| p.key),
        };
        let mut records = vec![element_record(Intent::ElementActivating, &root)];
        for (name, value) in variables {
            records.push(Record::event(
                key,
                Intent::Created,
                RecordValue::Variable(variable_record(&root, name, value.clone())),
            ));
        }
        self.emit(records).await?;
        self.queue_open(key);
        Ok(key)
    }

    // ── Open ──

    async fn open(&mut self, key: Key) -> Result<()> {
        let Some(mut instance) = self.instance(key).await? else {
            return Ok(());
        };
        if instance.state != ElementState::Activating {
            return Ok(());
        }
        let model = self.model(instance.process_definition_key)?;
        let element = model
            .element(&instance.element_id)
            .ok_or_else(|| {
                anyhow!("element '{}' missing from its definition", instance.element_id)
            })?
            .clone();

        // Everything that can fail runs before the first record, so a
        // resolved incident can simply open the element again.
        let variables = variable_scope(self.ctx.store, key).await?;

        let items = match (&element.multi_instance, instance.shape()) {
            (Some(mi), InstanceShape::Body) => {
                match expression::evaluate_list(&mi.input_collection, &variables) {
                    Ok(items) => Some(items),
                    Err(e) => {
                        return self
                            .raise_incident(
                                &instance,
                                IncidentErrorType::ExtractValueError,
                                e.to_string(),
                                None,
                            )
                            .await;
                    }
                }
            }
            _ => None,
        };

        let called = if instance.element_type == ElementType::CallActivity {
            let process_id = element.called_process_id.as_deref().unwrap_or_default();
            match self.ctx.models.latest_by_id(process_id) {
                Some(called) => Some(called),
                None => {
                    let message = format!(
                        "Expected process with BPMN process id '{}' to be deployed, but not found.",
                        process_id
                    );
                    return self
                        .raise_incident(
                            &instance,
                            IncidentErrorType::CalledElementError,
                            message,
                            None,
                        )
                        .await;
                }
            }
        } else {
            None
        };

        let subscriptions = match self.prepare_subscriptions(&model, &instance, &variables) {
            Ok(subscriptions) => subscriptions,
            Err(message) => {
                return self
                    .raise_incident(&instance, IncidentErrorType::ExtractValueError, message, None)
                    .await;
            }
        };
        let mut records: Vec<Record> = subscriptions
            .iter()
            .flat_map(|s| s.records(SubscriptionChange::Opened))
            .collect();

        match instance.element_type {
            ElementType::Process | ElementType::SubProcess | ElementType::EventSubProcess => {
                instance.state = ElementState::Activated;
                records.push(element_record(Intent::ElementActivated, &instance));
                self.emit(records).await?;
                let start = if instance.element_type == ElementType::EventSubProcess {
                    model.event_sub_process_start(&element.id)
                } else {
                    model.none_start_event(&element.id)
                };
                match start {
                    Some(start) => {
                        self.activate(&instance, start).await?;
                    }
                    None => self.steps.push_back(Step::CheckScope(key)),
                }
            }
            ElementType::MultiInstanceBody => {
                instance.state = ElementState::Activated;
                records.push(element_record(Intent::ElementActivated, &instance));
                self.emit(records).await?;
                let items = items.unwrap_or_default();
                let sequential = element.multi_instance.as_ref().is_some_and(|mi| mi.sequential);
                if items.is_empty() {
                    self.queue_complete(key);
                } else if sequential {
                    let first = items.into_iter().next();
                    self.activate_inner(&instance, &element, 1, first).await?;
                } else {
                    for (idx, item) in items.into_iter().enumerate() {
                        self.activate_inner(&instance, &element, idx as u32 + 1, Some(item))
                            .await?;
                    }
                }
            }
            t if t.is_job_worker_task() => {
                let job = Job {
                    key: self.next_key(),
                    process_instance_key: instance.process_instance_key,
                    element_instance_key: instance.key,
                    process_definition_key: instance.process_definition_key,
                    bpmn_process_id: instance.bpmn_process_id.clone(),
                    element_id: instance.element_id.clone(),
                    job_type: element.job_type.clone().unwrap_or_default(),
                    retries: DEFAULT_JOB_RETRIES,
                    state: JobState::Activatable,
                    error_message: None,
                };
                instance.job_key = Some(job.key);
                instance.state = ElementState::Activated;
                records.push(Record::event(job.key, Intent::Created, RecordValue::Job(job)));
                records.push(element_record(Intent::ElementActivated, &instance));
                self.emit(records).await?;
            }
            ElementType::CallActivity => {
                let Some(called) = called else {
                    return Err(anyhow!("call activity '{}' resolved no process", element.id));
                };
                let child_variables: Variables = variables.into_iter().collect();
                self.emit(records).await?;
                let child_key = self
                    .create_process_instance(&called, &child_variables, Some(&instance))
                    .await?;
                instance.called_process_instance_key = Some(child_key);
                self.transition(&mut instance, ElementState::Activated, Intent::ElementActivated)
                    .await?;
            }
            ElementType::IntermediateCatchEvent | ElementType::ReceiveTask
                if model
                    .catch_event(&element.id)
                    .is_some_and(|c| c.host_element_id != element.id) =>
            {
                // Reached through an event-based gateway: the event already occurred.
                instance.state = ElementState::Activated;
                records.push(element_record(Intent::ElementActivated, &instance));
                self.emit(records).await?;
                self.queue_complete(key);
            }
            ElementType::ReceiveTask
            | ElementType::IntermediateCatchEvent
            | ElementType::EventBasedGateway => {
                instance.state = ElementState::Activated;
                records.push(element_record(Intent::ElementActivated, &instance));
                self.emit(records).await?;
            }
            _ => {
                instance.state = ElementState::Activated;
                records.push(element_record(Intent::ElementActivated, &instance));
                self.emit(records).await?;
                self.queue_complete(key);
            }
        }
        Ok(())
    }

    /// Subscriptions `instance` opens on activation. An `Err` carries the
    /// incident message of the first failing expression.
    fn prepare_subscriptions(
        &mut self,
        model: &ProcessModel,
        instance: &ElementInstance,
        variables: &VariableScope,
    ) -> std::result::Result<Vec<Subscription>, String> {
        let mut opened = Vec::new();
        for catch_event in model.catch_events_of(&instance.element_id, instance.shape()) {
            let key = self.ctx.keys.next_key();
            match open_subscription(key, model, catch_event, instance, variables, self.ctx.now) {
                Ok(Some(subscription)) => opened.push(subscription),
                Ok(None) => {}
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(opened)
    }

    pub(crate) async fn raise_incident(
        &mut self,
        instance: &ElementInstance,
        error_type: IncidentErrorType,
        error_message: String,
        job_key: Option<Key>,
    ) -> Result<()> {
        let incident = Incident {
            key: self.next_key(),
            process_instance_key: instance.process_instance_key,
            element_instance_key: instance.key,
            job_key,
            process_definition_key: instance.process_definition_key,
            bpmn_process_id: instance.bpmn_process_id.clone(),
            element_id: instance.element_id.clone(),
            error_type,
            error_message,
        };
        debug!(
            incident_key = incident.key,
            element_id = %incident.element_id,
            error_type = ?incident.error_type,
            "incident raised"
        );
        self.emit(vec![Record::event(
            incident.key,
            Intent::Created,
            RecordValue::Incident(incident),
        )])
        .await
    }

    // ── Complete ──

    async fn complete(&mut self, key: Key) -> Result<()> {
        let Some(mut instance) = self.instance(key).await? else {
            return Ok(());
        };
        if instance.state != ElementState::Activated {
            return Ok(());
        }
        let model = self.model(instance.process_definition_key)?;
        let element = model
            .element(&instance.element_id)
            .ok_or_else(|| {
                anyhow!("element '{}' missing from its definition", instance.element_id)
            })?
            .clone();

        let outgoing = if instance.is_root() || instance.shape() == InstanceShape::Inner {
            Vec::new()
        } else {
            match self.select_outgoing(&model, &element, &instance).await? {
                Ok(flows) => flows,
                Err(message) => {
                    return self
                        .raise_incident(&instance, IncidentErrorType::ConditionError, message, None)
                        .await;
                }
            }
        };

        // Variables of a called instance return to the caller.
        let returns_to_caller =
            instance.is_root() && instance.parent_element_instance_key.is_some();
        let returned: Variables = if returns_to_caller {
            self.ctx
                .store
                .local_variables(key)
                .await?
                .into_iter()
                .map(|v| (v.name, v.value))
                .collect()
        } else {
            Variables::new()
        };

        self.close_subscriptions(key).await?;
        self.open_compensation(&model, &instance).await?;
        self.transition(&mut instance, ElementState::Completed, Intent::ElementCompleted)
            .await?;

        if instance.is_root() {
            if let Some(parent_key) = instance.parent_element_instance_key {
                if let Some(parent) = self.instance(parent_key).await? {
                    if let Some(scope_key) = parent.flow_scope_key {
                        self.propagate_variables(scope_key, &returned).await?;
                    }
                    self.queue_complete(parent_key);
                }
            }
            return Ok(());
        }

        let scope_key = instance
            .flow_scope_key
            .ok_or_else(|| anyhow!("element instance {} has no flow scope", key))?;
        let Some(scope) = self.instance(scope_key).await? else {
            return Ok(());
        };

        if instance.shape() == InstanceShape::Inner {
            return self.inner_completed(&element, &scope, &instance).await;
        }

        if outgoing.is_empty() {
            self.steps.push_back(Step::CheckScope(scope_key));
        }
        for flow_id in outgoing {
            self.take_flow(&model, &scope, &flow_id).await?;
        }
        Ok(())
    }

    /// Outgoing flows to take when `instance` completes. Gateways choose by
    /// condition; `Ok(Err(message))` means no flow could be chosen.
    async fn select_outgoing(
        &self,
        model: &ProcessModel,
        element: &ElementDefinition,
        instance: &ElementInstance,
    ) -> Result<std::result::Result<Vec<String>, String>> {
        let conditional = matches!(
            element.element_type,
            ElementType::ExclusiveGateway | ElementType::InclusiveGateway
        ) && instance.shape() == InstanceShape::Plain;
        if !conditional {
            return Ok(Ok(element.outgoing_sequence_flow_ids.clone()));
        }

        let variables = variable_scope(self.ctx.store, instance.key).await?;
        let mut chosen = Vec::new();
        let mut default = None;
        for flow_id in &element.outgoing_sequence_flow_ids {
            let Some(flow) = model.flow(flow_id) else { continue };
            if flow.is_default {
                default = Some(flow.id.clone());
                continue;
            }
            let taken = match &flow.condition {
                None => true,
                Some(condition) => match expression::evaluate_condition(condition, &variables) {
                    Ok(taken) => taken,
                    Err(e) => return Ok(Err(e.to_string())),
                },
            };
            if taken {
                chosen.push(flow.id.clone());
                if element.element_type == ElementType::ExclusiveGateway {
                    break;
                }
            }
        }
        if chosen.is_empty() {
            match default {
                Some(default) => chosen.push(default),
                None => {
                    return Ok(Err(format!(
                        "Expected at least one condition to evaluate to true, or to have a default \
                         flow, but none of the outgoing sequence flows of '{}' could be taken",
                        element.id
                    )))
                }
            }
        }
        Ok(Ok(chosen))
    }

    async fn inner_completed(
        &mut self,
        element: &ElementDefinition,
        body: &ElementInstance,
        inner: &ElementInstance,
    ) -> Result<()> {
        let sequential = element.multi_instance.as_ref().is_some_and(|mi| mi.sequential);
        if sequential {
            let variables = variable_scope(self.ctx.store, body.key).await?;
            let items = match element.multi_instance.as_ref() {
                Some(mi) => expression::evaluate_list(&mi.input_collection, &variables)
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            if let Some(item) = items.into_iter().nth(inner.loop_counter as usize) {
                self.activate_inner(body, element, inner.loop_counter + 1, Some(item))
                    .await?;
                return Ok(());
            }
        }
        let remaining = self
            .ctx
            .store
            .children(body.process_instance_key, body.key)
            .await?;
        if remaining.is_empty() {
            self.queue_complete(body.key);
        }
        Ok(())
    }

    /// Compensation is armed on completion of an activity that carries a
    /// compensation boundary event. The subscription belongs to the
    /// activity's flow scope.
    async fn open_compensation(
        &mut self,
        model: &ProcessModel,
        instance: &ElementInstance,
    ) -> Result<()> {
        if instance.shape() == InstanceShape::Body || !instance.element_type.is_activity() {
            return Ok(());
        }
        let Some(boundary) = model.compensation_boundary_of(&instance.element_id) else {
            return Ok(());
        };
        let Some(mut owner_key) = instance.flow_scope_key else {
            return Ok(());
        };
        if instance.shape() == InstanceShape::Inner {
            if let Some(body) = self.instance(owner_key).await? {
                owner_key = body.flow_scope_key.unwrap_or(owner_key);
            }
        }
        let handler = match &boundary.event {
            EventDefinition::Compensation { handler } => handler.clone(),
            _ => None,
        };
        let subscription = Subscription {
            key: self.next_key(),
            process_instance_key: instance.process_instance_key,
            process_definition_key: instance.process_definition_key,
            bpmn_process_id: instance.bpmn_process_id.clone(),
            catch_event_id: boundary.id.clone(),
            scope_key: owner_key,
            payload: SubscriptionPayload::Compensation {
                compensable_activity_id: instance.element_id.clone(),
                compensable_activity_instance_key: instance.key,
                compensation_handler_id: handler,
            },
        };
        self.emit(subscription.records(SubscriptionChange::Opened)).await
    }

    pub(crate) async fn close_subscriptions(&mut self, scope_key: Key) -> Result<()> {
        let records: Vec<Record> = self
            .ctx
            .store
            .scope_subscriptions(scope_key)
            .await?
            .iter()
            .flat_map(|s| s.records(SubscriptionChange::Closed))
            .collect();
        self.emit(records).await
    }

    // ── Sequence flows and joins ──

    async fn take_flow(
        &mut self,
        model: &ProcessModel,
        scope: &ElementInstance,
        flow_id: &str,
    ) -> Result<()> {
        let flow = model
            .flow(flow_id)
            .ok_or_else(|| anyhow!("sequence flow '{}' missing from its definition", flow_id))?;
        let target = model
            .element(&flow.target_id)
            .ok_or_else(|| anyhow!("element '{}' missing from its definition", flow.target_id))?
            .clone();

        if target.element_type.is_joining_gateway() && target.incoming_sequence_flow_ids.len() > 1 {
            let taken = TakenSequenceFlow {
                flow_scope_key: scope.key,
                process_instance_key: scope.process_instance_key,
                process_definition_key: scope.process_definition_key,
                bpmn_process_id: scope.bpmn_process_id.clone(),
                gateway_id: target.id.clone(),
                sequence_flow_id: flow.id.clone(),
            };
            self.emit(vec![Record::event(
                scope.key,
                Intent::SequenceFlowTaken,
                RecordValue::SequenceFlow(taken),
            )])
            .await?;
            return self.try_join(model, scope, &target).await;
        }

        self.activate(scope, &target).await?;
        Ok(())
    }

    /// Activate `gateway` if its taken incoming flows satisfy it. A parallel
    /// gateway needs every incoming flow; an inclusive gateway also fires
    /// once no active element of the scope can still reach it.
    async fn try_join(
        &mut self,
        model: &ProcessModel,
        scope: &ElementInstance,
        gateway: &ElementDefinition,
    ) -> Result<()> {
        let taken: Vec<TakenSequenceFlow> = self
            .ctx
            .store
            .taken_sequence_flows(scope.key)
            .await?
            .into_iter()
            .filter(|f| f.gateway_id == gateway.id)
            .collect();
        let distinct: BTreeSet<&str> = taken.iter().map(|f| f.sequence_flow_id.as_str()).collect();
        if distinct.is_empty() {
            return Ok(());
        }

        let all_taken = gateway
            .incoming_sequence_flow_ids
            .iter()
            .all(|id| distinct.contains(id.as_str()));
        let ready = all_taken
            || (gateway.element_type == ElementType::InclusiveGateway
                && !self
                    .ctx
                    .store
                    .children(scope.process_instance_key, scope.key)
                    .await?
                    .iter()
                    .any(|child| model.can_reach(&child.element_id, &gateway.id)));
        if !ready {
            return Ok(());
        }

        // Consume one token per incoming flow.
        let consumed: Vec<Record> = distinct
            .iter()
            .filter_map(|id| taken.iter().find(|f| f.sequence_flow_id == *id))
            .map(|f| {
                Record::event(
                    scope.key,
                    Intent::SequenceFlowDeleted,
                    RecordValue::SequenceFlow(f.clone()),
                )
            })
            .collect();
        self.emit(consumed).await?;
        self.activate(scope, gateway).await?;
        Ok(())
    }

    async fn check_scope(&mut self, key: Key) -> Result<()> {
        let Some(scope) = self.instance(key).await? else {
            return Ok(());
        };
        if scope.state != ElementState::Activated || !scope.element_type.is_container() {
            return Ok(());
        }
        let model = self.model(scope.process_definition_key)?;

        let pending: BTreeSet<String> = self
            .ctx
            .store
            .taken_sequence_flows(key)
            .await?
            .into_iter()
            .map(|f| f.gateway_id)
            .collect();
        for gateway_id in pending {
            if let Some(gateway) = model
                .element(&gateway_id)
                .filter(|g| g.element_type == ElementType::InclusiveGateway)
                .cloned()
            {
                self.try_join(&model, &scope, &gateway).await?;
            }
        }

        let children = self.ctx.store.children(scope.process_instance_key, key).await?;
        let flows = self.ctx.store.taken_sequence_flows(key).await?;
        if children.is_empty() && flows.is_empty() {
            self.queue_complete(key);
        }
        Ok(())
    }

    // ── Variables ──

    /// Write each variable to the nearest scope from `scope_key` upwards that
    /// already holds it, else to the process instance root.
    pub(crate) async fn propagate_variables(
        &mut self,
        scope_key: Key,
        variables: &Variables,
    ) -> Result<()> {
        if variables.is_empty() {
            return Ok(());
        }
        let mut chain = Vec::new();
        let mut next = Some(scope_key);
        while let Some(key) = next {
            let Some(instance) = self.instance(key).await? else { break };
            let names: BTreeSet<String> = self
                .ctx
                .store
                .local_variables(key)
                .await?
                .into_iter()
                .map(|v| v.name)
                .collect();
            next = instance.flow_scope_key;
            chain.push((instance, names));
        }
        let Some((root, _)) = chain.last() else {
            return Err(anyhow!("variable scope {} does not exist", scope_key));
        };
        let root = root.clone();

        let mut records = Vec::new();
        for (name, value) in variables {
            let (holder, intent) = match chain.iter().find(|(_, names)| names.contains(name)) {
                Some((holder, _)) => (holder, Intent::Updated),
                None => (&root, Intent::Created),
            };
            records.push(Record::event(
                holder.key,
                intent,
                RecordValue::Variable(variable_record(holder, name, value.clone())),
            ));
        }
        self.emit(records).await
    }

    /// Set variables local to `scope`.
    pub(crate) async fn set_local_variables(
        &mut self,
        scope: &ElementInstance,
        variables: &Variables,
    ) -> Result<()> {
        let existing: BTreeSet<String> = self
            .ctx
            .store
            .local_variables(scope.key)
            .await?
            .into_iter()
            .map(|v| v.name)
            .collect();
        let records = variables
            .iter()
            .map(|(name, value)| {
                let intent = if existing.contains(name) {
                    Intent::Updated
                } else {
                    Intent::Created
                };
                let variable = variable_record(scope, name, value.clone());
                Record::event(scope.key, intent, RecordValue::Variable(variable))
            })
            .collect();
        self.emit(records).await
    }
}

pub(crate) fn element_record(intent: Intent, instance: &ElementInstance) -> Record {
    Record::event(instance.key, intent, RecordValue::ProcessInstance(instance.clone()))
}

fn variable_record(scope: &ElementInstance, name: &str, value: Value) -> VariableRecord {
    VariableRecord {
        scope_key: scope.key,
        process_instance_key: scope.process_instance_key,
        process_definition_key: scope.process_definition_key,
        bpmn_process_id: scope.bpmn_process_id.clone(),
        name: name.to_string(),
        value,
    }
}
