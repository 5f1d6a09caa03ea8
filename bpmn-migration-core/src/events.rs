use crate::error::Rejection;
use crate::migration::ProcessInstanceMigration;
use crate::subscription::Subscription;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    ElementActivating,
    ElementActivated,
    ElementCompleted,
    ElementTerminated,
    ElementMigrated,
    SequenceFlowTaken,
    SequenceFlowDeleted,
    Created,
    Completed,
    Failed,
    RetriesUpdated,
    Canceled,
    Migrated,
    Deleted,
    Correlated,
    Triggered,
    Resolved,
    Updated,
    Published,
    Broadcasted,
    Rejected,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ElementActivating => "ELEMENT_ACTIVATING",
            Intent::ElementActivated => "ELEMENT_ACTIVATED",
            Intent::ElementCompleted => "ELEMENT_COMPLETED",
            Intent::ElementTerminated => "ELEMENT_TERMINATED",
            Intent::ElementMigrated => "ELEMENT_MIGRATED",
            Intent::SequenceFlowTaken => "SEQUENCE_FLOW_TAKEN",
            Intent::SequenceFlowDeleted => "SEQUENCE_FLOW_DELETED",
            Intent::Created => "CREATED",
            Intent::Completed => "COMPLETED",
            Intent::Failed => "FAILED",
            Intent::RetriesUpdated => "RETRIES_UPDATED",
            Intent::Canceled => "CANCELED",
            Intent::Migrated => "MIGRATED",
            Intent::Deleted => "DELETED",
            Intent::Correlated => "CORRELATED",
            Intent::Triggered => "TRIGGERED",
            Intent::Resolved => "RESOLVED",
            Intent::Updated => "UPDATED",
            Intent::Published => "PUBLISHED",
            Intent::Broadcasted => "BROADCASTED",
            Intent::Rejected => "REJECTED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    ProcessInstance,
    SequenceFlow,
    Job,
    Incident,
    Variable,
    MessageSubscription,
    ProcessMessageSubscription,
    Timer,
    SignalSubscription,
    ConditionalSubscription,
    CompensationSubscription,
    ProcessInstanceMigration,
    Message,
    Signal,
    CommandRejection,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::ProcessInstance => "PROCESS_INSTANCE",
            ValueType::SequenceFlow => "SEQUENCE_FLOW",
            ValueType::Job => "JOB",
            ValueType::Incident => "INCIDENT",
            ValueType::Variable => "VARIABLE",
            ValueType::MessageSubscription => "MESSAGE_SUBSCRIPTION",
            ValueType::ProcessMessageSubscription => "PROCESS_MESSAGE_SUBSCRIPTION",
            ValueType::Timer => "TIMER",
            ValueType::SignalSubscription => "SIGNAL_SUBSCRIPTION",
            ValueType::ConditionalSubscription => "CONDITIONAL_SUBSCRIPTION",
            ValueType::CompensationSubscription => "COMPENSATION_SUBSCRIPTION",
            ValueType::ProcessInstanceMigration => "PROCESS_INSTANCE_MIGRATION",
            ValueType::Message => "MESSAGE",
            ValueType::Signal => "SIGNAL",
            ValueType::CommandRejection => "COMMAND",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    pub variables: Variables,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal_name: String,
    pub variables: Variables,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_instance_key: Option<Key>,
    pub rejection: Rejection,
}

/// Record payloads, one per value type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordValue {
    ProcessInstance(ElementInstance),
    SequenceFlow(TakenSequenceFlow),
    Job(Job),
    Incident(Incident),
    Variable(VariableRecord),
    MessageSubscription(Subscription),
    ProcessMessageSubscription(Subscription),
    Timer(Subscription),
    SignalSubscription(Subscription),
    ConditionalSubscription(Subscription),
    CompensationSubscription(Subscription),
    ProcessInstanceMigration(ProcessInstanceMigration),
    Message(MessageRecord),
    Signal(SignalRecord),
    CommandRejection(RejectionRecord),
}

impl RecordValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            RecordValue::ProcessInstance(_) => ValueType::ProcessInstance,
            RecordValue::SequenceFlow(_) => ValueType::SequenceFlow,
            RecordValue::Job(_) => ValueType::Job,
            RecordValue::Incident(_) => ValueType::Incident,
            RecordValue::Variable(_) => ValueType::Variable,
            RecordValue::MessageSubscription(_) => ValueType::MessageSubscription,
            RecordValue::ProcessMessageSubscription(_) => ValueType::ProcessMessageSubscription,
            RecordValue::Timer(_) => ValueType::Timer,
            RecordValue::SignalSubscription(_) => ValueType::SignalSubscription,
            RecordValue::ConditionalSubscription(_) => ValueType::ConditionalSubscription,
            RecordValue::CompensationSubscription(_) => ValueType::CompensationSubscription,
            RecordValue::ProcessInstanceMigration(_) => ValueType::ProcessInstanceMigration,
            RecordValue::Message(_) => ValueType::Message,
            RecordValue::Signal(_) => ValueType::Signal,
            RecordValue::CommandRejection(_) => ValueType::CommandRejection,
        }
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        match self {
            RecordValue::MessageSubscription(s)
            | RecordValue::ProcessMessageSubscription(s)
            | RecordValue::Timer(s)
            | RecordValue::SignalSubscription(s)
            | RecordValue::ConditionalSubscription(s)
            | RecordValue::CompensationSubscription(s) => Some(s),
            _ => None,
        }
    }
}

/// One entry of the partition's append-only record stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Assigned on append.
    pub position: u64,
    pub key: Key,
    pub intent: Intent,
    pub value: RecordValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl Record {
    pub fn event(key: Key, intent: Intent, value: RecordValue) -> Self {
        Self {
            position: 0,
            key,
            intent,
            value,
            request_id: None,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    /// Name in the `VALUE_TYPE_INTENT` style, e.g. `JOB_MIGRATED`. Element
    /// and sequence flow intents already carry their prefix.
    pub fn name(&self) -> String {
        match self.value {
            RecordValue::ProcessInstance(_) | RecordValue::SequenceFlow(_) => {
                self.intent.as_str().to_string()
            }
            RecordValue::CommandRejection(_) => "COMMAND_REJECTED".to_string(),
            _ => format!("{}_{}", self.value_type().as_str(), self.intent.as_str()),
        }
    }

    pub fn process_instance_key(&self) -> Option<Key> {
        match &self.value {
            RecordValue::ProcessInstance(v) => Some(v.process_instance_key),
            RecordValue::SequenceFlow(v) => Some(v.process_instance_key),
            RecordValue::Job(v) => Some(v.process_instance_key),
            RecordValue::Incident(v) => Some(v.process_instance_key),
            RecordValue::Variable(v) => Some(v.process_instance_key),
            RecordValue::ProcessInstanceMigration(v) => Some(v.process_instance_key),
            RecordValue::CommandRejection(v) => v.process_instance_key,
            RecordValue::Message(_) | RecordValue::Signal(_) => None,
            other => other.subscription().map(|s| s.process_instance_key),
        }
    }

    pub fn process_definition_key(&self) -> Option<Key> {
        match &self.value {
            RecordValue::ProcessInstance(v) => Some(v.process_definition_key),
            RecordValue::SequenceFlow(v) => Some(v.process_definition_key),
            RecordValue::Job(v) => Some(v.process_definition_key),
            RecordValue::Incident(v) => Some(v.process_definition_key),
            RecordValue::Variable(v) => Some(v.process_definition_key),
            RecordValue::ProcessInstanceMigration(v) => Some(v.target_process_definition_key),
            other => other.subscription().map(|s| s.process_definition_key),
        }
    }

    /// Whether applying this record changes the active element set, the job
    /// set or the subscription set of its process instance. Only these move
    /// the instance sequence a migration is checked against.
    pub fn advances_instance(&self) -> bool {
        match (&self.value, self.intent) {
            (RecordValue::ProcessInstance(_), Intent::ElementMigrated) => false,
            (RecordValue::ProcessInstance(_), _) => true,
            (RecordValue::SequenceFlow(_), _) => true,
            (RecordValue::Job(_), intent) => matches!(
                intent,
                Intent::Created | Intent::Completed | Intent::Canceled
            ),
            (RecordValue::ProcessMessageSubscription(_), Intent::Migrated) => false,
            (RecordValue::ProcessMessageSubscription(_), _) => true,
            (
                RecordValue::Timer(_)
                | RecordValue::SignalSubscription(_)
                | RecordValue::ConditionalSubscription(_)
                | RecordValue::CompensationSubscription(_),
                intent,
            ) => intent != Intent::Migrated,
            (RecordValue::ProcessInstanceMigration(_), _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} key={}", self.position, self.name(), self.key)
    }
}
