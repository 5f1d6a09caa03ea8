//! Structural checks of a mapping against the source and target models and
//! the active instance tree.
//!
//! Each rule is checked over every active instance (breadth-first) before the
//! next rule runs, so the first violated rule is always the one reported.

use super::{InstanceSnapshot, MappingInstruction};
use crate::error::Rejection;
use crate::model::{Attachment, ProcessModel};
use crate::types::{ElementInstance, ElementType, EventType, InstanceShape, Key};
use std::collections::{BTreeMap, BTreeSet};

/// Accepted source → target element id mapping. The process itself is
/// always mapped to the target process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingPlan {
    targets: BTreeMap<String, String>,
}

impl MappingPlan {
    pub fn target_of(&self, source_id: &str) -> Option<&str> {
        self.targets.get(source_id).map(String::as_str)
    }

    pub fn is_target(&self, target_id: &str) -> bool {
        self.targets.values().any(|t| t == target_id)
    }
}

/// Elements the migration knows how to carry over while active.
fn is_supported(element_type: ElementType) -> bool {
    matches!(
        element_type,
        ElementType::Process
            | ElementType::ServiceTask
            | ElementType::UserTask
            | ElementType::ScriptTask
            | ElementType::SendTask
            | ElementType::BusinessRuleTask
            | ElementType::ReceiveTask
            | ElementType::SubProcess
            | ElementType::EventSubProcess
            | ElementType::CallActivity
            | ElementType::IntermediateCatchEvent
            | ElementType::ExclusiveGateway
            | ElementType::EventBasedGateway
            | ElementType::MultiInstanceBody
    )
}

const SUPPORTED_INTERMEDIATE_CATCH_EVENTS: [EventType; 4] = [
    EventType::Message,
    EventType::Timer,
    EventType::Signal,
    EventType::Conditional,
];

struct Validation<'a> {
    process_instance_key: Key,
    source: &'a ProcessModel,
    target: &'a ProcessModel,
    snapshot: &'a InstanceSnapshot,
    plan: MappingPlan,
}

/// Accept the mapping or return the first violated rule.
pub fn validate(
    source: &ProcessModel,
    target: &ProcessModel,
    snapshot: &InstanceSnapshot,
    instructions: &[MappingInstruction],
) -> Result<MappingPlan, Rejection> {
    let process_instance_key = snapshot.root.process_instance_key;
    require_unique_sources(process_instance_key, instructions)?;
    require_known_elements(process_instance_key, source, target, instructions)?;

    let mut targets: BTreeMap<String, String> = instructions
        .iter()
        .map(|i| (i.source_element_id.clone(), i.target_element_id.clone()))
        .collect();
    targets.insert(
        source.bpmn_process_id().to_string(),
        target.bpmn_process_id().to_string(),
    );

    let v = Validation {
        process_instance_key,
        source,
        target,
        snapshot,
        plan: MappingPlan { targets },
    };
    v.require_mapped_active_elements()?;
    v.require_same_element_types()?;
    v.require_attached_catch_events()?;
    v.require_no_merged_catch_events()?;
    v.require_same_catch_event_types()?;
    v.require_supported_active_elements()?;
    v.require_valid_joining_gateways()?;
    v.require_same_flow_scopes()?;
    v.require_same_loop_characteristics()?;
    v.require_matching_taken_flows()?;
    Ok(v.plan)
}

fn require_unique_sources(
    process_instance_key: Key,
    instructions: &[MappingInstruction],
) -> Result<(), Rejection> {
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<&str> = instructions
        .iter()
        .map(|i| i.source_element_id.as_str())
        .filter(|id| !seen.insert(*id))
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(Rejection::invalid_argument(format!(
        "Expected to migrate process instance '{}' but the mapping instructions contain \
         duplicate source element ids '{}'.",
        process_instance_key,
        duplicates.into_iter().collect::<Vec<_>>().join("', '")
    )))
}

fn require_known_elements(
    process_instance_key: Key,
    source: &ProcessModel,
    target: &ProcessModel,
    instructions: &[MappingInstruction],
) -> Result<(), Rejection> {
    for instruction in instructions {
        if !source.contains(&instruction.source_element_id) {
            return Err(Rejection::invalid_argument(format!(
                "Expected to migrate process instance '{}' but mapping instructions contain a \
                 non-existing source element id '{}'. Elements provided in mapping instructions \
                 must exist in the source process definition.",
                process_instance_key, instruction.source_element_id
            )));
        }
        if !target.contains(&instruction.target_element_id) {
            return Err(Rejection::invalid_argument(format!(
                "Expected to migrate process instance '{}' but mapping instructions contain a \
                 non-existing target element id '{}'. Elements provided in mapping instructions \
                 must exist in the target process definition.",
                process_instance_key, instruction.target_element_id
            )));
        }
    }
    Ok(())
}

impl Validation<'_> {
    fn active(&self) -> impl Iterator<Item = &ElementInstance> {
        self.snapshot.elements.iter()
    }

    fn active_children(&self) -> impl Iterator<Item = &ElementInstance> {
        self.active().filter(|e| !e.is_root())
    }

    /// Mapped target of an active element. Only valid after the mapping rule.
    fn target_id(&self, instance: &ElementInstance) -> &str {
        self.plan.target_of(&instance.element_id).unwrap_or_default()
    }

    fn prefix(&self) -> String {
        format!("Expected to migrate process instance '{}' but", self.process_instance_key)
    }

    fn require_mapped_active_elements(&self) -> Result<(), Rejection> {
        for instance in self.active_children() {
            if self.plan.target_of(&instance.element_id).is_none() {
                return Err(Rejection::invalid_state(format!(
                    "{} no mapping instruction defined for active element with id '{}'. \
                     Elements cannot be migrated without a mapping.",
                    self.prefix(),
                    instance.element_id
                )));
            }
        }
        Ok(())
    }

    fn require_same_element_types(&self) -> Result<(), Rejection> {
        for instance in self.active_children() {
            let target_id = self.target_id(instance);
            let target_type = self
                .target
                .element(target_id)
                .map(|e| e.instance_type(instance.shape()));
            if target_type != Some(instance.element_type) {
                let target_type = target_type.map_or("SEQUENCE_FLOW", |t| t.as_str());
                return Err(Rejection::invalid_state(format!(
                    "{} active element with id '{}' and type '{}' is mapped to an element with id \
                     '{}' and different type '{}'. Elements must be mapped to elements of the \
                     same type.",
                    self.prefix(),
                    instance.element_id,
                    instance.element_type,
                    target_id,
                    target_type
                )));
            }
        }
        Ok(())
    }

    /// Mapped catch events of `instance` with their mapped target ids.
    fn mapped_catch_events<'s>(
        &'s self,
        instance: &ElementInstance,
    ) -> Vec<(&'s crate::model::CatchEventDefinition, &'s str)> {
        self.source
            .catch_events_of(&instance.element_id, instance.shape())
            .into_iter()
            .filter_map(|c| self.plan.target_of(&c.id).map(|t| (c, t)))
            .collect()
    }

    fn require_attached_catch_events(&self) -> Result<(), Rejection> {
        for instance in self.active() {
            let host_target = self.target_id(instance);
            for (catch_event, target_catch_event_id) in self.mapped_catch_events(instance) {
                let attached = self
                    .target
                    .catch_event(target_catch_event_id)
                    .is_some_and(|t| {
                        t.host_element_id == host_target
                            && (t.attachment == Attachment::Boundary)
                                == (catch_event.attachment == Attachment::Boundary)
                    });
                if !attached {
                    return Err(Rejection::invalid_state(format!(
                        "{} active element with id '{}' is mapped to an element with id '{}' and \
                         has a catch event with id '{}' that is mapped to a catch event with id \
                         '{}'. These mappings detach the catch event from the element in the \
                         target process. Catch events must stay attached to the same element \
                         instance.",
                        self.prefix(),
                        instance.element_id,
                        host_target,
                        catch_event.id,
                        target_catch_event_id
                    )));
                }
            }
        }
        Ok(())
    }

    fn require_no_merged_catch_events(&self) -> Result<(), Rejection> {
        for instance in self.active() {
            let mut by_target: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for (catch_event, target_id) in self.mapped_catch_events(instance) {
                by_target.entry(target_id).or_default().push(&catch_event.id);
            }
            for (target_id, mut sources) in by_target {
                if sources.len() > 1 {
                    sources.sort_unstable();
                    return Err(Rejection::invalid_state(format!(
                        "{} active element with id '{}' has a catch event attached that is mapped \
                         to a catch event with id '{}'. There are multiple mapping instructions \
                         that target this catch event: '{}'. Catch events cannot be merged by \
                         process instance migration. Please ensure the mapping instructions target \
                         a catch event only once.",
                        self.prefix(),
                        instance.element_id,
                        target_id,
                        sources.join("', '")
                    )));
                }
            }
        }
        Ok(())
    }

    fn require_same_catch_event_types(&self) -> Result<(), Rejection> {
        for instance in self.active() {
            for (catch_event, target_id) in self.mapped_catch_events(instance) {
                let Some(target_catch_event) = self.target.catch_event(target_id) else {
                    continue;
                };
                if target_catch_event.event_type != catch_event.event_type {
                    return Err(Rejection::invalid_state(format!(
                        "{} active element with id '{}' has a catch event with id '{}' that is \
                         mapped to a catch event with id '{}'. These catch events have different \
                         event types: '{}' and '{}'. The event type of a catch event cannot be \
                         changed by process instance migration. Please ensure the event type of \
                         the catch event remains the same or remove the mapping instruction for \
                         these catch events.",
                        self.prefix(),
                        instance.element_id,
                        catch_event.id,
                        target_id,
                        catch_event.event_type,
                        target_catch_event.event_type
                    )));
                }
            }
        }
        Ok(())
    }

    fn require_supported_active_elements(&self) -> Result<(), Rejection> {
        for instance in self.active_children() {
            if !is_supported(instance.element_type) {
                return Err(Rejection::invalid_state(format!(
                    "{} active element with id '{}' has an unsupported type. \
                     The migration of a {} is not supported.",
                    self.prefix(),
                    instance.element_id,
                    instance.element_type
                )));
            }
            if instance.element_type != ElementType::IntermediateCatchEvent {
                continue;
            }
            if self.source.is_attached_to_event_based_gateway(&instance.element_id) {
                return Err(Rejection::invalid_state(format!(
                    "{} active element with id '{}' is an intermediate catch event attached to an \
                     event-based gateway. Migrating active events attached to an event-based \
                     gateway is not possible yet.",
                    self.prefix(),
                    instance.element_id
                )));
            }
            let event_type = self
                .source
                .element(&instance.element_id)
                .map_or(EventType::None, |e| e.event.event_type());
            if !SUPPORTED_INTERMEDIATE_CATCH_EVENTS.contains(&event_type) {
                return Err(Rejection::invalid_state(format!(
                    "{} active element with id '{}' is intermediate catch event of type '{}'. \
                     Migrating active intermediate catch event of this type is not possible yet.",
                    self.prefix(),
                    instance.element_id,
                    event_type
                )));
            }
        }
        Ok(())
    }

    fn require_valid_joining_gateways(&self) -> Result<(), Rejection> {
        for (gateway_id, _) in self.taken_gateway_flows() {
            let Some(source_gateway) = self.source.element(gateway_id) else {
                continue;
            };
            let target_gateway = self
                .plan
                .target_of(gateway_id)
                .and_then(|t| self.target.element(t))
                .filter(|t| t.element_type == source_gateway.element_type);
            let Some(target_gateway) = target_gateway else {
                return Err(Rejection::invalid_argument(format!(
                    "{} gateway '{}' has at least one incoming sequence flow taken. Joining \
                     gateways with at least one incoming sequence flow taken must be mapped to a \
                     gateway of the same type in the target process definition.",
                    self.prefix(),
                    gateway_id
                )));
            };
            if target_gateway.incoming_sequence_flow_ids.len()
                < source_gateway.incoming_sequence_flow_ids.len()
            {
                return Err(Rejection::invalid_argument(format!(
                    "{} target gateway with id '{}' has less incoming sequence flows than the \
                     source gateway with id '{}'. Target gateway must have at least the same \
                     number of incoming sequence flows as the source gateway.",
                    self.prefix(),
                    target_gateway.id,
                    gateway_id
                )));
            }
        }
        Ok(())
    }

    fn require_same_flow_scopes(&self) -> Result<(), Rejection> {
        for instance in self.active_children() {
            // Inner instances share the body's element id.
            if instance.shape() == InstanceShape::Inner {
                continue;
            }
            let Some(scope) = instance
                .flow_scope_key
                .and_then(|key| self.snapshot.element(key))
            else {
                continue;
            };
            let expected = self.plan.target_of(&scope.element_id).unwrap_or_default();
            let actual = self
                .target
                .element(self.target_id(instance))
                .and_then(|e| e.flow_scope_id.as_deref())
                .unwrap_or_default();
            if expected != actual {
                return Err(Rejection::invalid_state(format!(
                    "{} the flow scope of active element with id '{}' is changed. The flow scope \
                     of the active element is expected to be '{}' but was '{}'. The flow scope of \
                     an element cannot be changed during migration yet.",
                    self.prefix(),
                    instance.element_id,
                    expected,
                    actual
                )));
            }
        }
        Ok(())
    }

    fn require_same_loop_characteristics(&self) -> Result<(), Rejection> {
        for instance in self.active_children() {
            if instance.shape() != InstanceShape::Body {
                continue;
            }
            let target_id = self.target_id(instance);
            let source_sequential = self
                .source
                .element(&instance.element_id)
                .and_then(|e| e.multi_instance.as_ref())
                .map(|mi| mi.sequential);
            let target_sequential = self
                .target
                .element(target_id)
                .and_then(|e| e.multi_instance.as_ref())
                .map(|mi| mi.sequential);
            if source_sequential != target_sequential {
                return Err(Rejection::invalid_state(format!(
                    "{} active element with id '{}' has a different loop characteristics than the \
                     target element with id '{}'. Both elements must have either sequential or \
                     parallel loop characteristics.",
                    self.prefix(),
                    instance.element_id,
                    target_id
                )));
            }
        }
        Ok(())
    }

    fn require_matching_taken_flows(&self) -> Result<(), Rejection> {
        for (gateway_id, flow_id) in self.taken_gateway_flows() {
            let Some(target_gateway) = self
                .plan
                .target_of(gateway_id)
                .and_then(|t| self.target.element(t))
            else {
                continue;
            };
            let target_flow = self.plan.target_of(flow_id).unwrap_or(flow_id);
            if !target_gateway
                .incoming_sequence_flow_ids
                .iter()
                .any(|f| f == target_flow)
            {
                return Err(Rejection::invalid_argument(format!(
                    "{} gateway with id '{}' has a taken incoming sequence flow mismatch. Taken \
                     sequence flow with id '{}' must connect to the mapped target gateway with id \
                     '{}' in the target process definition.",
                    self.prefix(),
                    gateway_id,
                    flow_id,
                    target_gateway.id
                )));
            }
        }
        Ok(())
    }

    /// `(gateway_id, sequence_flow_id)` of every taken flow into a joining
    /// gateway, in scope order.
    fn taken_gateway_flows(&self) -> Vec<(&str, &str)> {
        self.snapshot
            .taken_sequence_flows
            .values()
            .flatten()
            .filter(|f| {
                self.source
                    .element(&f.gateway_id)
                    .is_some_and(|g| g.element_type.is_joining_gateway())
            })
            .map(|f| (f.gateway_id.as_str(), f.sequence_flow_id.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectionType;
    use crate::model::build::build_model_from_yaml;
    use crate::types::{ElementState, TakenSequenceFlow};

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

    fn snapshot(children: Vec<ElementInstance>) -> InstanceSnapshot {
        let root = instance(1, None, "source", ElementType::Process);
        let mut elements = vec![root.clone()];
        elements.extend(children);
        InstanceSnapshot {
            root,
            elements,
            taken_sequence_flows: BTreeMap::new(),
        }
    }

    fn map(pairs: &[(&str, &str)]) -> Vec<MappingInstruction> {
        pairs
            .iter()
            .map(|(s, t)| MappingInstruction {
                source_element_id: s.to_string(),
                target_element_id: t.to_string(),
            })
            .collect()
    }

    const SOURCE: &str = r#"
id: source
elements:
  - { id: start, type: START_EVENT }
  - { id: A, type: USER_TASK, job_type: a }
  - id: boundary1
    type: BOUNDARY_EVENT
    attached_to: A
    event: { kind: MESSAGE, name: m1, correlation_key: "=k" }
  - id: boundary2
    type: BOUNDARY_EVENT
    attached_to: A
    event: { kind: MESSAGE, name: m2, correlation_key: "=k" }
  - { id: end, type: END_EVENT }
flows:
  - { id: f1, from: start, to: A }
  - { id: f2, from: A, to: end }
"#;

    const TARGET: &str = r#"
id: target
elements:
  - { id: start, type: START_EVENT }
  - { id: A, type: USER_TASK, job_type: a }
  - { id: B, type: USER_TASK, job_type: b }
  - { id: S, type: SERVICE_TASK, job_type: s }
  - id: boundary1
    type: BOUNDARY_EVENT
    attached_to: S
    event: { kind: MESSAGE, name: m1, correlation_key: "=k" }
  - id: boundary3
    type: BOUNDARY_EVENT
    attached_to: B
    event: { kind: MESSAGE, name: m3, correlation_key: "=k" }
  - id: timer
    type: BOUNDARY_EVENT
    attached_to: B
    event: { kind: TIMER, duration_ms: 1000 }
  - { id: end, type: END_EVENT }
flows:
  - { id: f1, from: start, to: B }
  - { id: f2, from: B, to: end }
  - { id: f3, from: A, to: S }
"#;

    fn models() -> (ProcessModel, ProcessModel) {
        (
            build_model_from_yaml(SOURCE, 10, 1).unwrap(),
            build_model_from_yaml(TARGET, 20, 1).unwrap(),
        )
    }

    fn active_a() -> InstanceSnapshot {
        snapshot(vec![instance(2, Some(1), "A", ElementType::UserTask)])
    }

    #[test]
    fn test_accepts_rename_and_maps_root() {
        let (source, target) = models();
        let plan = validate(&source, &target, &active_a(), &map(&[("A", "B")])).unwrap();
        assert_eq!(plan.target_of("A"), Some("B"));
        assert_eq!(plan.target_of("source"), Some("target"));
        assert!(plan.is_target("B"));
    }

    #[test]
    fn test_duplicate_sources_checked_first() {
        let (source, target) = models();
        let mapping = map(&[("A", "B"), ("A", "zzz")]);
        let err = validate(&source, &target, &active_a(), &mapping).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidArgument);
        assert!(err.reason.contains("duplicate source element ids 'A'"), "{}", err.reason);
    }

    #[test]
    fn test_unknown_ids() {
        let (source, target) = models();
        let err = validate(&source, &target, &active_a(), &map(&[("X", "B")])).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidArgument);
        assert!(err.reason.contains("non-existing source element id 'X'"));

        let err = validate(&source, &target, &active_a(), &map(&[("A", "Y")])).unwrap_err();
        assert!(err.reason.contains("non-existing target element id 'Y'"));
    }

    #[test]
    fn test_unmapped_active_element() {
        let (source, target) = models();
        let err = validate(&source, &target, &active_a(), &[]).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidState);
        assert!(err
            .reason
            .contains("no mapping instruction defined for active element with id 'A'"));
    }

    #[test]
    fn test_type_mismatch() {
        let (source, target) = models();
        let err = validate(&source, &target, &active_a(), &map(&[("A", "S")])).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidState);
        let expected = concat!(
            "type 'USER_TASK' is mapped to an element with id 'S' ",
            "and different type 'SERVICE_TASK'"
        );
        assert!(err.reason.contains(expected), "{}", err.reason);
    }

    #[test]
    fn test_detachment_is_reported_regardless_of_history() {
        let (source, target) = models();
        let mapping = map(&[("A", "A"), ("boundary1", "boundary1")]);
        for _ in 0..3 {
            let err = validate(&source, &target, &active_a(), &mapping).unwrap_err();
            assert_eq!(err.rejection_type, RejectionType::InvalidState);
            assert!(err.reason.contains("These mappings detach the catch event"));
        }
    }

    #[test]
    fn test_merge_lists_sources_sorted() {
        let (source, target) = models();
        let mapping = map(&[("A", "B"), ("boundary2", "boundary3"), ("boundary1", "boundary3")]);
        let err = validate(&source, &target, &active_a(), &mapping).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidState);
        assert!(err.reason.contains("'boundary1', 'boundary2'"), "{}", err.reason);
        assert!(err.reason.contains("Catch events cannot be merged"));
    }

    #[test]
    fn test_event_type_change() {
        let (source, target) = models();
        let mapping = map(&[("A", "B"), ("boundary1", "timer")]);
        let err = validate(&source, &target, &active_a(), &mapping).unwrap_err();
        assert!(
            err.reason.contains("different event types: 'MESSAGE' and 'TIMER'"),
            "{}",
            err.reason
        );
    }

    #[test]
    fn test_active_boundary_event_unsupported() {
        let (source, target) = models();
        let snap = snapshot(vec![instance(2, Some(1), "boundary1", ElementType::BoundaryEvent)]);
        let err =
            validate(&source, &target, &snap, &map(&[("boundary1", "boundary3")])).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidState);
        assert!(err.reason.contains("The migration of a BOUNDARY_EVENT is not supported"));
    }

    const GATED: &str = r#"
id: gated
elements:
  - { id: start, type: START_EVENT }
  - { id: gate, type: EVENT_BASED_GATEWAY }
  - id: paid
    type: INTERMEDIATE_CATCH_EVENT
    event: { kind: MESSAGE, name: paid, correlation_key: "=k" }
  - id: expired
    type: INTERMEDIATE_CATCH_EVENT
    event: { kind: TIMER, duration_ms: 1000 }
  - id: confirmed
    type: INTERMEDIATE_CATCH_EVENT
    event: { kind: SIGNAL, name: confirmed }
  - { id: end, type: END_EVENT }
flows:
  - { id: f1, from: start, to: gate }
  - { id: f2, from: gate, to: paid }
  - { id: f3, from: gate, to: expired }
  - { id: f4, from: paid, to: confirmed }
  - { id: f5, from: confirmed, to: end }
  - { id: f6, from: expired, to: end }
"#;

    #[test]
    fn test_active_catch_event_after_event_based_gateway_unsupported() {
        let source = build_model_from_yaml(GATED, 10, 1).unwrap();
        let target = build_model_from_yaml(GATED, 20, 2).unwrap();
        let mapping = map(&[("paid", "paid"), ("confirmed", "confirmed")]);

        let paid = instance(2, Some(1), "paid", ElementType::IntermediateCatchEvent);
        let err = validate(&source, &target, &snapshot(vec![paid]), &mapping).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidState);
        let expected = "'paid' is an intermediate catch event attached to an event-based gateway";
        assert!(err.reason.contains(expected), "{}", err.reason);

        // Not behind a gateway, the same kind of element migrates.
        let confirmed = instance(2, Some(1), "confirmed", ElementType::IntermediateCatchEvent);
        assert!(validate(&source, &target, &snapshot(vec![confirmed]), &mapping).is_ok());
    }

    const JOIN_SOURCE: &str = r#"
id: source
elements:
  - { id: start, type: START_EVENT }
  - { id: fork, type: INCLUSIVE_GATEWAY }
  - { id: A, type: SERVICE_TASK, job_type: a }
  - { id: B, type: SERVICE_TASK, job_type: b }
  - { id: join1, type: INCLUSIVE_GATEWAY }
  - { id: end, type: END_EVENT }
flows:
  - { id: f0, from: start, to: fork }
  - { id: fa, from: fork, to: A, condition: "=true" }
  - { id: fb, from: fork, to: B, condition: "=true" }
  - { id: flow1, from: A, to: join1 }
  - { id: flow2, from: B, to: join1 }
  - { id: f9, from: join1, to: end }
"#;

    const JOIN_TARGET: &str = r#"
id: target
elements:
  - { id: start, type: START_EVENT }
  - { id: B, type: SERVICE_TASK, job_type: b }
  - { id: join2, type: INCLUSIVE_GATEWAY }
  - { id: end, type: END_EVENT }
flows:
  - { id: f0, from: start, to: B }
  - { id: flow2, from: B, to: join2 }
  - { id: f9, from: join2, to: end }
"#;

    fn join_snapshot() -> InstanceSnapshot {
        let mut snap = snapshot(vec![instance(3, Some(1), "B", ElementType::ServiceTask)]);
        snap.taken_sequence_flows.insert(
            1,
            vec![TakenSequenceFlow {
                flow_scope_key: 1,
                process_instance_key: 1,
                process_definition_key: 10,
                bpmn_process_id: "source".to_string(),
                gateway_id: "join1".to_string(),
                sequence_flow_id: "flow1".to_string(),
            }],
        );
        snap
    }

    #[test]
    fn test_joining_gateway_fan_in() {
        let source = build_model_from_yaml(JOIN_SOURCE, 10, 1).unwrap();
        let target = build_model_from_yaml(JOIN_TARGET, 20, 1).unwrap();

        let err = validate(&source, &target, &join_snapshot(), &map(&[("B", "B")])).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidArgument);
        assert!(err
            .reason
            .contains("gateway 'join1' has at least one incoming sequence flow taken"));

        let mapping = map(&[("B", "B"), ("join1", "join2")]);
        let err = validate(&source, &target, &join_snapshot(), &mapping).unwrap_err();
        assert_eq!(err.rejection_type, RejectionType::InvalidArgument);
        assert!(err.reason.contains(concat!(
            "target gateway with id 'join2' has less incoming sequence flows ",
            "than the source gateway with id 'join1'"
        )));
    }
}
