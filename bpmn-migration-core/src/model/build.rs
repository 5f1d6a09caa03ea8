use super::dto::{ElementDto, EventDefinitionDto, ProcessDefinitionDto};
use super::{
    Attachment, CatchEventDefinition, ElementDefinition, EventDefinition, LoopCharacteristics,
    ProcessModel, SequenceFlowDefinition,
};
use crate::types::{ElementType, EventType, Key};
use petgraph::graph::DiGraph;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to parse process definition: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("duplicate id '{0}'")]
    DuplicateId(String),
    #[error("element '{element}' has unknown parent '{parent}'")]
    UnknownParent { element: String, parent: String },
    #[error("element '{element}' cannot be nested in '{parent}' of type {parent_type}")]
    InvalidParent {
        element: String,
        parent: String,
        parent_type: ElementType,
    },
    #[error("element '{0}' of type {1} cannot be declared in a process definition")]
    UnsupportedElement(String, ElementType),
    #[error("boundary event '{0}' must be attached to an activity")]
    MissingAttachment(String),
    #[error("boundary event '{element}' is attached to '{host}', which is not an activity")]
    InvalidAttachment { element: String, host: String },
    #[error("element '{0}' requires an event definition")]
    MissingEventDefinition(String),
    #[error("element '{element}' cannot have an event definition of type {event_type}")]
    UnsupportedEventDefinition {
        element: String,
        event_type: EventType,
    },
    #[error("task '{0}' requires a job type")]
    MissingJobType(String),
    #[error("call activity '{0}' requires a called process id")]
    MissingCalledProcess(String),
    #[error("element '{0}' of type {1} cannot have multi-instance characteristics")]
    InvalidMultiInstance(String, ElementType),
    #[error("sequence flow '{flow}' references unknown element '{element}'")]
    UnknownFlowNode { flow: String, element: String },
    #[error("sequence flow '{0}' crosses a scope boundary")]
    CrossScopeFlow(String),
    #[error("event sub-process '{0}' requires exactly one start event")]
    EventSubProcessStart(String),
    #[error(
        "timer '{element}' duration of {duration_ms} ms exceeds {max} ms",
        max = MAX_TIMER_DURATION_MS
    )]
    InvalidTimerDuration { element: String, duration_ms: u64 },
}

/// Timer durations must be representable as a timestamp offset.
pub const MAX_TIMER_DURATION_MS: u64 = i64::MAX as u64;

pub fn checksum_of(source: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.finalize().into()
}

/// Parse and build in one step. Used by tests and the repository.
pub fn build_model_from_yaml(
    yaml: &str,
    key: Key,
    version: u32,
) -> Result<ProcessModel, ModelError> {
    let dto: ProcessDefinitionDto = serde_yaml::from_str(yaml)?;
    build_model(&dto, key, version, checksum_of(yaml))
}

/// Build the index for one definition version, rejecting structurally
/// invalid definitions.
pub fn build_model(
    dto: &ProcessDefinitionDto,
    key: Key,
    version: u32,
    checksum: [u8; 32],
) -> Result<ProcessModel, ModelError> {
    let by_id = index_dtos(dto)?;

    let mut elements: BTreeMap<String, ElementDefinition> = BTreeMap::new();
    elements.insert(
        dto.id.clone(),
        ElementDefinition {
            id: dto.id.clone(),
            element_type: ElementType::Process,
            flow_scope_id: None,
            event: EventDefinition::None,
            interrupting: true,
            attached_to: None,
            attached_catch_events: Vec::new(),
            incoming_sequence_flow_ids: Vec::new(),
            outgoing_sequence_flow_ids: Vec::new(),
            job_type: None,
            called_process_id: None,
            multi_instance: None,
        },
    );

    for element in &dto.elements {
        let definition = build_element(dto, element, &by_id)?;
        elements.insert(definition.id.clone(), definition);
    }

    // ── Sequence flows ──

    let mut flows = BTreeMap::new();
    for flow in &dto.flows {
        if flows.contains_key(&flow.id) || elements.contains_key(&flow.id) {
            return Err(ModelError::DuplicateId(flow.id.clone()));
        }
        for end in [&flow.from, &flow.to] {
            if !by_id.contains_key(end.as_str()) {
                return Err(ModelError::UnknownFlowNode {
                    flow: flow.id.clone(),
                    element: end.clone(),
                });
            }
        }
        if elements[&flow.from].flow_scope_id != elements[&flow.to].flow_scope_id {
            return Err(ModelError::CrossScopeFlow(flow.id.clone()));
        }
        if let Some(source) = elements.get_mut(&flow.from) {
            source.outgoing_sequence_flow_ids.push(flow.id.clone());
        }
        if let Some(target) = elements.get_mut(&flow.to) {
            target.incoming_sequence_flow_ids.push(flow.id.clone());
        }
        flows.insert(
            flow.id.clone(),
            SequenceFlowDefinition {
                id: flow.id.clone(),
                source_id: flow.from.clone(),
                target_id: flow.to.clone(),
                condition: flow.condition.clone(),
                is_default: flow.default,
            },
        );
    }

    // ── Catch events ──

    let mut attachments: Vec<(String, CatchEventDefinition)> = Vec::new();
    for element in elements.values() {
        let event_type = element.event.event_type();
        match element.element_type {
            ElementType::BoundaryEvent => {
                if let Some(host) = &element.attached_to {
                    attachments.push((
                        host.clone(),
                        CatchEventDefinition {
                            id: element.id.clone(),
                            event_type,
                            host_element_id: host.clone(),
                            interrupting: element.interrupting,
                            attachment: Attachment::Boundary,
                        },
                    ));
                }
            }
            ElementType::IntermediateCatchEvent | ElementType::ReceiveTask => {
                // Events behind an event-based gateway are subscribed by the gateway.
                let host = element
                    .incoming_sequence_flow_ids
                    .iter()
                    .filter_map(|flow_id| flows.get(flow_id))
                    .map(|flow| &flow.source_id)
                    .find(|source| {
                        elements
                            .get(*source)
                            .is_some_and(|s| s.element_type == ElementType::EventBasedGateway)
                    })
                    .cloned()
                    .unwrap_or_else(|| element.id.clone());
                attachments.push((
                    host.clone(),
                    CatchEventDefinition {
                        id: element.id.clone(),
                        event_type,
                        host_element_id: host,
                        interrupting: true,
                        attachment: Attachment::Own,
                    },
                ));
            }
            ElementType::EventSubProcess => {
                let starts: Vec<&ElementDefinition> = elements
                    .values()
                    .filter(|e| {
                        e.element_type == ElementType::StartEvent
                            && e.flow_scope_id.as_deref() == Some(element.id.as_str())
                    })
                    .collect();
                let [start] = starts.as_slice() else {
                    return Err(ModelError::EventSubProcessStart(element.id.clone()));
                };
                if let Some(scope) = &element.flow_scope_id {
                    attachments.push((
                        scope.clone(),
                        CatchEventDefinition {
                            id: start.id.clone(),
                            event_type: start.event.event_type(),
                            host_element_id: scope.clone(),
                            interrupting: start.interrupting,
                            attachment: Attachment::EventSubProcessStart,
                        },
                    ));
                }
            }
            _ => {}
        }
    }

    let mut catch_events = BTreeMap::new();
    for (host, catch_event) in attachments {
        catch_events.insert(catch_event.id.clone(), catch_event.clone());
        if let Some(host) = elements.get_mut(&host) {
            host.attached_catch_events.push(catch_event);
        }
    }

    // ── Flow graph ──

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for id in elements.keys() {
        nodes.insert(id.clone(), graph.add_node(id.clone()));
    }
    for flow in flows.values() {
        graph.add_edge(nodes[&flow.source_id], nodes[&flow.target_id], flow.id.clone());
    }
    for element in elements.values() {
        if let Some(host) = &element.attached_to {
            graph.add_edge(nodes[host], nodes[&element.id], String::new());
        }
    }

    Ok(ProcessModel {
        key,
        bpmn_process_id: dto.id.clone(),
        version,
        checksum,
        elements,
        flows,
        catch_events,
        graph,
        nodes,
    })
}

fn index_dtos(dto: &ProcessDefinitionDto) -> Result<HashMap<&str, &ElementDto>, ModelError> {
    let mut by_id: HashMap<&str, &ElementDto> = HashMap::new();
    for element in &dto.elements {
        if element.id == dto.id || by_id.insert(element.id.as_str(), element).is_some() {
            return Err(ModelError::DuplicateId(element.id.clone()));
        }
        if matches!(
            element.element_type,
            ElementType::Process | ElementType::MultiInstanceBody
        ) {
            return Err(ModelError::UnsupportedElement(
                element.id.clone(),
                element.element_type,
            ));
        }
    }
    Ok(by_id)
}

fn build_element(
    dto: &ProcessDefinitionDto,
    element: &ElementDto,
    by_id: &HashMap<&str, &ElementDto>,
) -> Result<ElementDefinition, ModelError> {
    let id = element.id.clone();
    let element_type = element.element_type;

    let mut flow_scope_id = match &element.parent {
        None => dto.id.clone(),
        Some(parent) => {
            let parent_dto = by_id.get(parent.as_str()).ok_or_else(|| ModelError::UnknownParent {
                element: id.clone(),
                parent: parent.clone(),
            })?;
            if !matches!(
                parent_dto.element_type,
                ElementType::SubProcess | ElementType::EventSubProcess
            ) {
                return Err(ModelError::InvalidParent {
                    element: id,
                    parent: parent.clone(),
                    parent_type: parent_dto.element_type,
                });
            }
            parent.clone()
        }
    };

    let event = match &element.event {
        None => EventDefinition::None,
        Some(EventDefinitionDto::Message {
            name,
            correlation_key,
        }) => EventDefinition::Message {
            name: name.clone(),
            correlation_key: correlation_key.clone(),
        },
        Some(EventDefinitionDto::Timer { duration_ms }) => {
            if *duration_ms > MAX_TIMER_DURATION_MS {
                return Err(ModelError::InvalidTimerDuration {
                    element: id,
                    duration_ms: *duration_ms,
                });
            }
            EventDefinition::Timer {
                duration_ms: *duration_ms,
            }
        }
        Some(EventDefinitionDto::Signal { name }) => EventDefinition::Signal { name: name.clone() },
        Some(EventDefinitionDto::Conditional {
            condition,
            variable_names,
            variable_events,
        }) => EventDefinition::Conditional {
            condition: condition.clone(),
            variable_names: variable_names.clone(),
            variable_events: variable_events.clone(),
        },
        Some(EventDefinitionDto::Compensation { handler }) => EventDefinition::Compensation {
            handler: handler.clone(),
        },
    };
    let event_type = event.event_type();

    let unsupported = |event_type| ModelError::UnsupportedEventDefinition {
        element: element.id.clone(),
        event_type,
    };

    match element_type {
        ElementType::BoundaryEvent => {
            let host = element
                .attached_to
                .as_deref()
                .ok_or_else(|| ModelError::MissingAttachment(id.clone()))?;
            let host_dto = by_id
                .get(host)
                .filter(|h| h.element_type.is_activity())
                .ok_or_else(|| ModelError::InvalidAttachment {
                    element: id.clone(),
                    host: host.to_string(),
                })?;
            if event_type == EventType::None {
                return Err(ModelError::MissingEventDefinition(id));
            }
            flow_scope_id = host_dto.parent.clone().unwrap_or_else(|| dto.id.clone());
        }
        ElementType::IntermediateCatchEvent => match event_type {
            EventType::None => return Err(ModelError::MissingEventDefinition(id)),
            EventType::Compensation => return Err(unsupported(event_type)),
            _ => {}
        },
        ElementType::ReceiveTask => {
            if event_type != EventType::Message {
                return Err(ModelError::MissingEventDefinition(id));
            }
        }
        ElementType::StartEvent => {
            let in_event_sub_process = element
                .parent
                .as_deref()
                .and_then(|p| by_id.get(p))
                .is_some_and(|p| p.element_type == ElementType::EventSubProcess);
            match (in_event_sub_process, event_type) {
                (true, EventType::None) => return Err(ModelError::MissingEventDefinition(id)),
                (true, EventType::Compensation) => return Err(unsupported(event_type)),
                (false, EventType::None) | (true, _) => {}
                (false, other) => return Err(unsupported(other)),
            }
        }
        _ => {
            if event_type != EventType::None {
                return Err(unsupported(event_type));
            }
        }
    }

    if element_type.is_job_worker_task() && element.job_type.is_none() {
        return Err(ModelError::MissingJobType(id));
    }
    if element_type == ElementType::CallActivity && element.called_process_id.is_none() {
        return Err(ModelError::MissingCalledProcess(id));
    }
    if element.multi_instance.is_some() && !element_type.is_activity() {
        return Err(ModelError::InvalidMultiInstance(id, element_type));
    }

    Ok(ElementDefinition {
        id,
        element_type,
        flow_scope_id: Some(flow_scope_id),
        event,
        interrupting: element.interrupting,
        attached_to: element.attached_to.clone(),
        attached_catch_events: Vec::new(),
        incoming_sequence_flow_ids: Vec::new(),
        outgoing_sequence_flow_ids: Vec::new(),
        job_type: element.job_type.clone(),
        called_process_id: element.called_process_id.clone(),
        multi_instance: element.multi_instance.as_ref().map(|mi| LoopCharacteristics {
            sequential: mi.sequential,
            input_collection: mi.input_collection.clone(),
            input_element: mi.input_element.clone(),
        }),
    })
}
