//! Read-only index over one deployed process definition.
//!
//! Built once per `(bpmn_process_id, version)` by [`build::build_model`] and
//! shared behind an `Arc`. Everything the migration path asks of a definition
//! (element type, flow scope, attached catch events, gateway fan-in) is a map
//! lookup here.

pub mod build;
pub mod dto;
pub mod repository;

use crate::types::{ElementType, EventType, InstanceShape, Key};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use build::{build_model, ModelError};
pub use repository::{ProcessModelProvider, ProcessRepository};

// ─── Element definitions ──────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventDefinition {
    None,
    Message {
        name: String,
        correlation_key: Option<String>,
    },
    Timer {
        duration_ms: u64,
    },
    Signal {
        name: String,
    },
    Conditional {
        condition: String,
        variable_names: Vec<String>,
        variable_events: Vec<String>,
    },
    Compensation {
        handler: Option<String>,
    },
}

impl EventDefinition {
    pub fn event_type(&self) -> EventType {
        match self {
            EventDefinition::None => EventType::None,
            EventDefinition::Message { .. } => EventType::Message,
            EventDefinition::Timer { .. } => EventType::Timer,
            EventDefinition::Signal { .. } => EventType::Signal,
            EventDefinition::Conditional { .. } => EventType::Conditional,
            EventDefinition::Compensation { .. } => EventType::Compensation,
        }
    }
}

/// How a catch event hangs off its host element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attachment {
    /// The host is the catch event itself (intermediate catch event, receive task).
    Own,
    /// A boundary event on the host activity.
    Boundary,
    /// The start event of an event sub-process inside the host scope.
    EventSubProcessStart,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatchEventDefinition {
    pub id: String,
    pub event_type: EventType,
    pub host_element_id: String,
    pub interrupting: bool,
    pub attachment: Attachment,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopCharacteristics {
    pub sequential: bool,
    pub input_collection: String,
    pub input_element: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementDefinition {
    pub id: String,
    pub element_type: ElementType,
    /// `None` only for the process element.
    pub flow_scope_id: Option<String>,
    pub event: EventDefinition,
    pub interrupting: bool,
    pub attached_to: Option<String>,
    pub attached_catch_events: Vec<CatchEventDefinition>,
    pub incoming_sequence_flow_ids: Vec<String>,
    pub outgoing_sequence_flow_ids: Vec<String>,
    pub job_type: Option<String>,
    pub called_process_id: Option<String>,
    pub multi_instance: Option<LoopCharacteristics>,
}

impl ElementDefinition {
    /// The element type an instance of this element carries.
    pub fn instance_type(&self, shape: InstanceShape) -> ElementType {
        match (&self.multi_instance, shape) {
            (Some(_), InstanceShape::Inner) => self.element_type,
            (Some(_), _) => ElementType::MultiInstanceBody,
            (None, _) => self.element_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceFlowDefinition {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub condition: Option<String>,
    pub is_default: bool,
}

// ─── ProcessModel ─────────────────────────────────────────────

#[derive(Debug)]
pub struct ProcessModel {
    pub(crate) key: Key,
    pub(crate) bpmn_process_id: String,
    pub(crate) version: u32,
    pub(crate) checksum: [u8; 32],
    pub(crate) elements: BTreeMap<String, ElementDefinition>,
    pub(crate) flows: BTreeMap<String, SequenceFlowDefinition>,
    pub(crate) catch_events: BTreeMap<String, CatchEventDefinition>,
    pub(crate) graph: DiGraph<String, String>,
    pub(crate) nodes: HashMap<String, NodeIndex>,
}

impl ProcessModel {
    pub fn key(&self) -> Key {
        self.key
    }

    pub fn bpmn_process_id(&self) -> &str {
        &self.bpmn_process_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// SHA-256 of the source the model was built from.
    pub fn checksum(&self) -> &[u8; 32] {
        &self.checksum
    }

    pub fn element(&self, id: &str) -> Option<&ElementDefinition> {
        self.elements.get(id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementDefinition> {
        self.elements.values()
    }

    pub fn flow(&self, id: &str) -> Option<&SequenceFlowDefinition> {
        self.flows.get(id)
    }

    /// True for element ids and sequence flow ids.
    pub fn contains(&self, id: &str) -> bool {
        self.elements.contains_key(id) || self.flows.contains_key(id)
    }

    pub fn catch_event(&self, id: &str) -> Option<&CatchEventDefinition> {
        self.catch_events.get(id)
    }

    /// Catch events an instance of `element_id` with the given shape listens to.
    /// Boundary events belong to the multi-instance body, everything else to
    /// the inner instances.
    pub fn catch_events_of(
        &self,
        element_id: &str,
        shape: InstanceShape,
    ) -> Vec<&CatchEventDefinition> {
        let Some(element) = self.elements.get(element_id) else {
            return Vec::new();
        };
        let is_multi_instance = element.multi_instance.is_some();
        element
            .attached_catch_events
            .iter()
            .filter(|c| match shape {
                InstanceShape::Body => c.attachment == Attachment::Boundary,
                InstanceShape::Inner => c.attachment != Attachment::Boundary,
                InstanceShape::Plain => !is_multi_instance,
            })
            .collect()
    }

    /// The none start event directly inside `scope_id`.
    pub fn none_start_event(&self, scope_id: &str) -> Option<&ElementDefinition> {
        self.elements.values().find(|e| {
            e.element_type == ElementType::StartEvent
                && e.event == EventDefinition::None
                && e.flow_scope_id.as_deref() == Some(scope_id)
        })
    }

    /// The start event of an event sub-process.
    pub fn event_sub_process_start(
        &self,
        event_sub_process_id: &str,
    ) -> Option<&ElementDefinition> {
        self.elements.values().find(|e| {
            e.element_type == ElementType::StartEvent
                && e.flow_scope_id.as_deref() == Some(event_sub_process_id)
        })
    }

    /// Event sub-process instances of an interrupting start event suspend
    /// their scope for new subscriptions.
    pub fn is_interrupting_event_sub_process(&self, event_sub_process_id: &str) -> bool {
        self.event_sub_process_start(event_sub_process_id)
            .is_some_and(|start| start.interrupting)
    }

    pub fn is_attached_to_event_based_gateway(&self, element_id: &str) -> bool {
        let Some(element) = self.elements.get(element_id) else {
            return false;
        };
        element.incoming_sequence_flow_ids.iter().any(|flow_id| {
            self.flows
                .get(flow_id)
                .and_then(|flow| self.elements.get(&flow.source_id))
                .is_some_and(|source| source.element_type == ElementType::EventBasedGateway)
        })
    }

    pub fn compensation_boundary_of(&self, activity_id: &str) -> Option<&ElementDefinition> {
        self.elements.values().find(|e| {
            e.element_type == ElementType::BoundaryEvent
                && e.attached_to.as_deref() == Some(activity_id)
                && e.event.event_type() == EventType::Compensation
        })
    }

    /// Whether a token at `from` can still arrive at `to` by following
    /// sequence flows. Boundary events count as reachable from their host.
    pub fn can_reach(&self, from: &str, to: &str) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(a), Some(b)) => has_path_connecting(&self.graph, *a, *b, None),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build::build_model_from_yaml;

    const YAML: &str = r#"
id: order
elements:
  - { id: start, type: START_EVENT }
  - { id: A, type: SERVICE_TASK, job_type: a }
  - id: boundary1
    type: BOUNDARY_EVENT
    attached_to: A
    event: { kind: MESSAGE, name: cancel, correlation_key: "=orderId" }
  - { id: fork, type: PARALLEL_GATEWAY }
  - { id: B, type: SERVICE_TASK, job_type: b }
  - { id: C, type: SERVICE_TASK, job_type: c }
  - { id: join, type: PARALLEL_GATEWAY }
  - { id: end, type: END_EVENT }
  - { id: cancelled, type: END_EVENT }
  - { id: esp, type: EVENT_SUB_PROCESS }
  - id: esp_start
    type: START_EVENT
    parent: esp
    interrupting: false
    event: { kind: SIGNAL, name: audit }
  - { id: esp_end, type: END_EVENT, parent: esp }
flows:
  - { id: f1, from: start, to: A }
  - { id: f2, from: A, to: fork }
  - { id: f3, from: fork, to: B }
  - { id: f4, from: fork, to: C }
  - { id: f5, from: B, to: join }
  - { id: f6, from: C, to: join }
  - { id: f7, from: join, to: end }
  - { id: f8, from: boundary1, to: cancelled }
  - { id: f9, from: esp_start, to: esp_end }
"#;

    #[test]
    fn test_lookups() {
        let model = build_model_from_yaml(YAML, 1, 1).unwrap();
        assert_eq!(model.bpmn_process_id(), "order");
        let join = model.element("join").unwrap();
        assert_eq!(join.incoming_sequence_flow_ids, vec!["f5", "f6"]);
        assert!(model.contains("f5"), "sequence flows are addressable");
        assert!(!model.contains("missing"));
        assert_eq!(model.none_start_event("order").unwrap().id, "start");
        assert_eq!(model.event_sub_process_start("esp").unwrap().id, "esp_start");
        assert!(!model.is_interrupting_event_sub_process("esp"));
    }

    #[test]
    fn test_catch_events_per_host() {
        let model = build_model_from_yaml(YAML, 1, 1).unwrap();
        let on_a = model.catch_events_of("A", InstanceShape::Plain);
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].id, "boundary1");
        assert_eq!(on_a[0].attachment, Attachment::Boundary);
        assert_eq!(on_a[0].event_type, EventType::Message);

        let on_process = model.catch_events_of("order", InstanceShape::Plain);
        assert_eq!(on_process.len(), 1);
        assert_eq!(on_process[0].id, "esp_start");
        assert_eq!(on_process[0].attachment, Attachment::EventSubProcessStart);
        assert!(!on_process[0].interrupting);
    }

    #[test]
    fn test_reachability() {
        let model = build_model_from_yaml(YAML, 1, 1).unwrap();
        assert!(model.can_reach("B", "join"));
        assert!(model.can_reach("A", "cancelled"), "boundary reachable from host");
        assert!(!model.can_reach("join", "B"));
    }
}
