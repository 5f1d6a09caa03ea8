use crate::events::{Intent, Record, RecordValue};
use crate::expression::{self, ExpressionError, VariableScope};
use crate::model::{CatchEventDefinition, EventDefinition, ProcessModel};
use crate::types::{ElementInstance, EventType, Key, Timestamp};
use serde::{Deserialize, Serialize};

/// An open wait for an external trigger, owned by the element instance
/// `scope_key`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    /// Element id of the catch event (for timers: the target element).
    pub catch_event_id: String,
    /// Owning element instance. Never changed by migration.
    pub scope_key: Key,
    pub payload: SubscriptionPayload,
}

/// Kind-specific data. Carried unchanged across migration except for the
/// message `interrupting` flag and the compensation ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPayload {
    Message {
        message_name: String,
        correlation_key: String,
        interrupting: bool,
    },
    Timer {
        due_date: Timestamp,
    },
    Signal {
        signal_name: String,
    },
    Conditional {
        condition: String,
        variable_names: Vec<String>,
        variable_events: Vec<String>,
    },
    Compensation {
        compensable_activity_id: String,
        compensable_activity_instance_key: Key,
        compensation_handler_id: Option<String>,
    },
}

impl SubscriptionPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            SubscriptionPayload::Message { .. } => EventType::Message,
            SubscriptionPayload::Timer { .. } => EventType::Timer,
            SubscriptionPayload::Signal { .. } => EventType::Signal,
            SubscriptionPayload::Conditional { .. } => EventType::Conditional,
            SubscriptionPayload::Compensation { .. } => EventType::Compensation,
        }
    }
}

/// The lifecycle step a subscription record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionChange {
    Opened,
    Migrated,
    Closed,
}

impl Subscription {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn message_name(&self) -> Option<&str> {
        match &self.payload {
            SubscriptionPayload::Message { message_name, .. } => Some(message_name),
            _ => None,
        }
    }

    /// Interrupting flag stored on the subscription. Only messages carry one;
    /// the other kinds read it from the current definition.
    pub fn stored_interrupting(&self) -> Option<bool> {
        match &self.payload {
            SubscriptionPayload::Message { interrupting, .. } => Some(*interrupting),
            _ => None,
        }
    }

    /// The records describing `change`. Message subscriptions have a process
    /// side and a message side and always produce both.
    pub fn records(&self, change: SubscriptionChange) -> Vec<Record> {
        let key = self.key;
        let ev = |intent, value| Record::event(key, intent, value);
        let subscription = self.clone();
        match (&self.payload, change) {
            (SubscriptionPayload::Message { .. }, SubscriptionChange::Opened) => vec![
                ev(Intent::Created, RecordValue::MessageSubscription(subscription.clone())),
                ev(Intent::Created, RecordValue::ProcessMessageSubscription(subscription)),
            ],
            (SubscriptionPayload::Message { .. }, SubscriptionChange::Migrated) => vec![
                ev(Intent::Migrated, RecordValue::ProcessMessageSubscription(subscription.clone())),
                ev(Intent::Migrated, RecordValue::MessageSubscription(subscription)),
            ],
            (SubscriptionPayload::Message { .. }, SubscriptionChange::Closed) => vec![
                ev(Intent::Deleted, RecordValue::ProcessMessageSubscription(subscription.clone())),
                ev(Intent::Deleted, RecordValue::MessageSubscription(subscription)),
            ],
            (SubscriptionPayload::Timer { .. }, change) => {
                vec![ev(timer_intent(change), RecordValue::Timer(subscription))]
            }
            (SubscriptionPayload::Signal { .. }, change) => {
                vec![ev(change.intent(), RecordValue::SignalSubscription(subscription))]
            }
            (SubscriptionPayload::Conditional { .. }, change) => {
                vec![ev(change.intent(), RecordValue::ConditionalSubscription(subscription))]
            }
            (SubscriptionPayload::Compensation { .. }, change) => {
                vec![ev(change.intent(), RecordValue::CompensationSubscription(subscription))]
            }
        }
    }

    /// Copy carrying the identity of `target`'s element `catch_event_id`.
    pub fn migrated(&self, target: &ProcessModel, catch_event_id: &str) -> Subscription {
        let mut migrated = self.clone();
        migrated.process_definition_key = target.key();
        migrated.bpmn_process_id = target.bpmn_process_id().to_string();
        migrated.catch_event_id = catch_event_id.to_string();
        if let SubscriptionPayload::Message { interrupting, .. } = &mut migrated.payload {
            if let Some(catch_event) = target.catch_event(catch_event_id) {
                *interrupting = catch_event.interrupting;
            }
        }
        migrated
    }
}

impl SubscriptionChange {
    fn intent(self) -> Intent {
        match self {
            SubscriptionChange::Opened => Intent::Created,
            SubscriptionChange::Migrated => Intent::Migrated,
            SubscriptionChange::Closed => Intent::Deleted,
        }
    }
}

fn timer_intent(change: SubscriptionChange) -> Intent {
    match change {
        SubscriptionChange::Opened => Intent::Created,
        SubscriptionChange::Migrated => Intent::Migrated,
        SubscriptionChange::Closed => Intent::Canceled,
    }
}

/// Open a subscription for `catch_event`, owned by `owner`, evaluating the
/// event's expressions in `variables`.
///
/// Returns `Ok(None)` for catch events that never subscribe on activation
/// (compensation).
pub fn open_subscription(
    key: Key,
    model: &ProcessModel,
    catch_event: &CatchEventDefinition,
    owner: &ElementInstance,
    variables: &VariableScope,
    now: Timestamp,
) -> Result<Option<Subscription>, ExpressionError> {
    let Some(element) = model.element(&catch_event.id) else {
        return Ok(None);
    };
    let payload = match &element.event {
        EventDefinition::Message {
            name,
            correlation_key,
        } => {
            let correlation_key = match correlation_key {
                Some(expr) => expression::evaluate_correlation_key(expr, variables)?,
                None => String::new(),
            };
            SubscriptionPayload::Message {
                message_name: name.clone(),
                correlation_key,
                interrupting: catch_event.interrupting,
            }
        }
        EventDefinition::Timer { duration_ms } => {
            let due_date = Timestamp::try_from(*duration_ms)
                .ok()
                .and_then(|d| now.checked_add(d))
                .ok_or_else(|| ExpressionError::DueDateOutOfRange {
                    element: catch_event.id.clone(),
                    duration_ms: *duration_ms,
                })?;
            SubscriptionPayload::Timer { due_date }
        }
        EventDefinition::Signal { name } => SubscriptionPayload::Signal {
            signal_name: name.clone(),
        },
        EventDefinition::Conditional {
            condition,
            variable_names,
            variable_events,
        } => SubscriptionPayload::Conditional {
            condition: condition.clone(),
            variable_names: variable_names.clone(),
            variable_events: variable_events.clone(),
        },
        EventDefinition::Compensation { .. } | EventDefinition::None => return Ok(None),
    };
    Ok(Some(Subscription {
        key,
        process_instance_key: owner.process_instance_key,
        process_definition_key: model.key(),
        bpmn_process_id: model.bpmn_process_id().to_string(),
        catch_event_id: catch_event.id.clone(),
        scope_key: owner.key,
        payload,
    }))
}
