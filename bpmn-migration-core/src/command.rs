use crate::error::Rejection;
use crate::events::Record;
use crate::migration::ProcessInstanceMigration;
use crate::types::{Key, Variables};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commands accepted by a partition. Serialized with a `command` tag so a
/// journal line reads `{"command":"COMPLETE_JOB","job_key":...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    CreateProcessInstance {
        bpmn_process_id: String,
        /// Latest version when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u32>,
        #[serde(default)]
        variables: Variables,
    },
    CompleteJob {
        job_key: Key,
        #[serde(default)]
        variables: Variables,
    },
    FailJob {
        job_key: Key,
        retries: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    ResolveIncident {
        incident_key: Key,
    },
    TriggerTimer {
        timer_key: Key,
    },
    PublishMessage {
        name: String,
        correlation_key: String,
        #[serde(default)]
        variables: Variables,
    },
    CorrelateMessage {
        subscription_key: Key,
        message_name: String,
        #[serde(default)]
        variables: Variables,
    },
    BroadcastSignal {
        signal_name: String,
        #[serde(default)]
        variables: Variables,
    },
    SetVariables {
        /// Element instance whose scope receives the variables.
        scope_key: Key,
        variables: Variables,
    },
    MigrateProcessInstance(ProcessInstanceMigration),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateProcessInstance { .. } => "CREATE_PROCESS_INSTANCE",
            Command::CompleteJob { .. } => "COMPLETE_JOB",
            Command::FailJob { .. } => "FAIL_JOB",
            Command::ResolveIncident { .. } => "RESOLVE_INCIDENT",
            Command::TriggerTimer { .. } => "TRIGGER_TIMER",
            Command::PublishMessage { .. } => "PUBLISH_MESSAGE",
            Command::CorrelateMessage { .. } => "CORRELATE_MESSAGE",
            Command::BroadcastSignal { .. } => "BROADCAST_SIGNAL",
            Command::SetVariables { .. } => "SET_VARIABLES",
            Command::MigrateProcessInstance(_) => "MIGRATE_PROCESS_INSTANCE",
        }
    }

    /// Key used to route the command to its partition. `None` for commands
    /// any partition may take.
    pub fn routing_key(&self) -> Option<Key> {
        match self {
            Command::CompleteJob { job_key, .. } | Command::FailJob { job_key, .. } => {
                Some(*job_key)
            }
            Command::ResolveIncident { incident_key } => Some(*incident_key),
            Command::TriggerTimer { timer_key } => Some(*timer_key),
            Command::CorrelateMessage { subscription_key, .. } => Some(*subscription_key),
            Command::SetVariables { scope_key, .. } => Some(*scope_key),
            Command::MigrateProcessInstance(m) => Some(m.process_instance_key),
            Command::CreateProcessInstance { .. }
            | Command::PublishMessage { .. }
            | Command::BroadcastSignal { .. } => None,
        }
    }
}

/// A command as queued on a partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub request_id: Uuid,
    pub command: Command,
    /// Instance sequence stamped at enqueue time (migrations only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_sequence: Option<u64>,
}

impl CommandEnvelope {
    pub fn new(command: Command) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            command,
            observed_sequence: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResponse {
    Accepted {
        request_id: Uuid,
        key: Key,
        records: Vec<Record>,
    },
    Rejected {
        request_id: Uuid,
        command: String,
        rejection: Rejection,
    },
}

impl CommandResponse {
    pub fn request_id(&self) -> Uuid {
        match self {
            CommandResponse::Accepted { request_id, .. }
            | CommandResponse::Rejected { request_id, .. } => *request_id,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            CommandResponse::Rejected { rejection, .. } => Some(rejection),
            CommandResponse::Accepted { .. } => None,
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            CommandResponse::Accepted { records, .. } => records,
            CommandResponse::Rejected { .. } => &[],
        }
    }

    /// Key of the entity the command created or acted on.
    pub fn key(&self) -> Option<Key> {
        match self {
            CommandResponse::Accepted { key, .. } => Some(*key),
            CommandResponse::Rejected { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MappingInstruction;

    #[test]
    fn test_journal_line_format() {
        let line = concat!(
            r#"{"command":"MIGRATE_PROCESS_INSTANCE","process_instance_key":5,"#,
            r#""target_process_definition_key":9,"mapping_instructions":"#,
            r#"[{"source_element_id":"A","target_element_id":"B"}]}"#,
        );
        let command: Command = serde_json::from_str(line).unwrap();
        assert_eq!(
            command,
            Command::MigrateProcessInstance(ProcessInstanceMigration {
                process_instance_key: 5,
                target_process_definition_key: 9,
                mapping_instructions: vec![MappingInstruction {
                    source_element_id: "A".to_string(),
                    target_element_id: "B".to_string(),
                }],
            })
        );
        assert_eq!(command.routing_key(), Some(5));
        assert_eq!(command.name(), "MIGRATE_PROCESS_INSTANCE");
    }

    #[test]
    fn test_variables_default_to_empty() {
        let command: Command =
            serde_json::from_str(r#"{"command":"COMPLETE_JOB","job_key":3}"#).unwrap();
        assert!(matches!(
            command,
            Command::CompleteJob { job_key: 3, ref variables } if variables.is_empty()
        ));
    }
}
