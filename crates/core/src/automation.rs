use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::UnknownVariant;
use crate::types::{AutomationId, TriggerId};

/// An operator-defined automation: what to send, on which channel, to which
/// segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub id: AutomationId,
    pub action_name: String,
    /// Channel the automation sends on.
    pub automation_type: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
    pub is_active: bool,
    /// Number of actions that reached `delivered`. Never counts retries.
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl AutomationDefinition {
    pub fn new(
        id: impl Into<AutomationId>,
        action_name: impl Into<String>,
        channel: Channel,
    ) -> Self {
        Self {
            id: id.into(),
            action_name: action_name.into(),
            automation_type: channel,
            segment_id: None,
            is_active: true,
            execution_count: 0,
            last_executed_at: None,
        }
    }
}

/// How a trigger's condition is evaluated. Evaluation itself happens outside
/// the pipeline; the type is kept for operators and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fires when a profile enters a customer segment.
    SegmentRule,
    /// Fired by an operator.
    Manual,
    /// Fires at `next_trigger_at`.
    Schedule,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SegmentRule => "segment_rule",
            Self::Manual => "manual",
            Self::Schedule => "schedule",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "segment_rule" => Ok(Self::SegmentRule),
            "manual" => Ok(Self::Manual),
            "schedule" => Ok(Self::Schedule),
            other => Err(UnknownVariant::new("trigger type", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub id: TriggerId,
    pub trigger_type: TriggerType,
    /// Automation whose message the trigger enqueues.
    pub automation_id: AutomationId,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_trigger_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl TriggerDefinition {
    pub fn manual(id: impl Into<TriggerId>, automation_id: impl Into<AutomationId>) -> Self {
        Self {
            id: id.into(),
            trigger_type: TriggerType::Manual,
            automation_id: automation_id.into(),
            trigger_config: serde_json::Value::Null,
            is_active: true,
            next_trigger_at: None,
            last_fired_at: None,
        }
    }
}
