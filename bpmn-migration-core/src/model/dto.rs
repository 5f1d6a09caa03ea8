use crate::types::ElementType;
use serde::{Deserialize, Serialize};

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !v
}

fn is_true(v: &bool) -> bool {
    *v
}

// ── Top-level DTO ──

/// Authoring form of a process definition, parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinitionDto {
    /// The BPMN process id. Also the element id of the process itself.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub elements: Vec<ElementDto>,
    #[serde(default)]
    pub flows: Vec<FlowDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDto {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    /// Enclosing sub-process or event sub-process. Absent for top-level elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Host activity of a boundary event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<String>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub interrupting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventDefinitionDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_instance: Option<MultiInstanceDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventDefinitionDto {
    Message {
        name: String,
        /// Expression evaluated when the subscription is opened.
        #[serde(default, skip_serializing_if = "Option::is_none")]
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
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        variable_names: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        variable_events: Vec<String>,
    },
    Compensation {
        /// Activity invoked when compensation is thrown.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handler: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiInstanceDto {
    #[serde(default, skip_serializing_if = "is_false")]
    pub sequential: bool,
    pub input_collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_element: Option<String>,
}

// ── Sequence flow ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDto {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub default: bool,
}
