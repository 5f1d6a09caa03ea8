use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Scalar aliases ───────────────────────────────────────────

/// Record key. The upper bits carry the id of the partition that generated it.
pub type Key = i64;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Process variables as submitted with commands.
pub type Variables = serde_json::Map<String, serde_json::Value>;

// ─── Element types ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementType {
    Process,
    SubProcess,
    EventSubProcess,
    CallActivity,
    MultiInstanceBody,
    ServiceTask,
    UserTask,
    ScriptTask,
    SendTask,
    BusinessRuleTask,
    ReceiveTask,
    StartEvent,
    EndEvent,
    IntermediateCatchEvent,
    BoundaryEvent,
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    EventBasedGateway,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Process => "PROCESS",
            ElementType::SubProcess => "SUB_PROCESS",
            ElementType::EventSubProcess => "EVENT_SUB_PROCESS",
            ElementType::CallActivity => "CALL_ACTIVITY",
            ElementType::MultiInstanceBody => "MULTI_INSTANCE_BODY",
            ElementType::ServiceTask => "SERVICE_TASK",
            ElementType::UserTask => "USER_TASK",
            ElementType::ScriptTask => "SCRIPT_TASK",
            ElementType::SendTask => "SEND_TASK",
            ElementType::BusinessRuleTask => "BUSINESS_RULE_TASK",
            ElementType::ReceiveTask => "RECEIVE_TASK",
            ElementType::StartEvent => "START_EVENT",
            ElementType::EndEvent => "END_EVENT",
            ElementType::IntermediateCatchEvent => "INTERMEDIATE_CATCH_EVENT",
            ElementType::BoundaryEvent => "BOUNDARY_EVENT",
            ElementType::ExclusiveGateway => "EXCLUSIVE_GATEWAY",
            ElementType::ParallelGateway => "PARALLEL_GATEWAY",
            ElementType::InclusiveGateway => "INCLUSIVE_GATEWAY",
            ElementType::EventBasedGateway => "EVENT_BASED_GATEWAY",
        }
    }

    /// Tasks that are worked on through a job.
    pub fn is_job_worker_task(&self) -> bool {
        matches!(
            self,
            ElementType::ServiceTask
                | ElementType::UserTask
                | ElementType::ScriptTask
                | ElementType::SendTask
                | ElementType::BusinessRuleTask
        )
    }

    /// Elements that may contain other elements.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ElementType::Process | ElementType::SubProcess | ElementType::EventSubProcess
        )
    }

    pub fn is_activity(&self) -> bool {
        self.is_job_worker_task()
            || matches!(
                self,
                ElementType::ReceiveTask | ElementType::SubProcess | ElementType::CallActivity
            )
    }

    pub fn is_joining_gateway(&self) -> bool {
        matches!(
            self,
            ElementType::ParallelGateway | ElementType::InclusiveGateway
        )
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Event types ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    None,
    Message,
    Timer,
    Signal,
    Conditional,
    Compensation,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::None => "NONE",
            EventType::Message => "MESSAGE",
            EventType::Timer => "TIMER",
            EventType::Signal => "SIGNAL",
            EventType::Conditional => "CONDITIONAL",
            EventType::Compensation => "COMPENSATION",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Element instances ────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementState {
    Activating,
    Activated,
    Completing,
    Completed,
    Terminating,
    Terminated,
}

/// How an element instance relates to a multi-instance activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceShape {
    /// A regular element instance.
    Plain,
    /// The body wrapping the inner instances.
    Body,
    /// One inner instance of a multi-instance body.
    Inner,
}

/// One activation of a BPMN element. Stored flat and addressed by key; the
/// tree is recovered through `flow_scope_key`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementInstance {
    pub key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub version: u32,
    pub element_id: String,
    pub element_type: ElementType,
    /// `None` only for the process instance root.
    pub flow_scope_key: Option<Key>,
    pub state: ElementState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_key: Option<Key>,
    /// 1-based position inside a multi-instance body, 0 otherwise.
    #[serde(default)]
    pub loop_counter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_process_instance_key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_process_instance_key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_element_instance_key: Option<Key>,
}

impl ElementInstance {
    pub fn is_root(&self) -> bool {
        self.flow_scope_key.is_none()
    }

    pub fn shape(&self) -> InstanceShape {
        if self.element_type == ElementType::MultiInstanceBody {
            InstanceShape::Body
        } else if self.loop_counter > 0 {
            InstanceShape::Inner
        } else {
            InstanceShape::Plain
        }
    }

    /// A child of `self` in the same process instance and definition.
    pub fn child(&self, key: Key, element_id: &str, element_type: ElementType) -> ElementInstance {
        ElementInstance {
            key,
            process_instance_key: self.process_instance_key,
            process_definition_key: self.process_definition_key,
            bpmn_process_id: self.bpmn_process_id.clone(),
            version: self.version,
            element_id: element_id.to_string(),
            element_type,
            flow_scope_key: Some(self.key),
            state: ElementState::Activating,
            job_key: None,
            loop_counter: 0,
            called_process_instance_key: None,
            parent_process_instance_key: None,
            parent_element_instance_key: None,
        }
    }
}

// ─── Jobs ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Activatable,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: Key,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub element_id: String,
    /// Evaluated once on creation and never re-evaluated.
    pub job_type: String,
    pub retries: u32,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ─── Incidents ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentErrorType {
    JobNoRetries,
    ExtractValueError,
    ConditionError,
    CalledElementError,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub key: Key,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    /// Set for job incidents, `None` for process incidents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_key: Option<Key>,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub error_type: IncidentErrorType,
    pub error_message: String,
}

// ─── Taken sequence flows ─────────────────────────────────────

/// An incoming sequence flow of a joining gateway that has been taken but not
/// yet consumed by the gateway's activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakenSequenceFlow {
    pub flow_scope_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub gateway_id: String,
    pub sequence_flow_id: String,
}

// ─── Variables ────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub scope_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub name: String,
    pub value: serde_json::Value,
}
