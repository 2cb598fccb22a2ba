//! Workflow Data Model
//!
//! Core data structures describing a triggered run and the messages that
//! drive it forward.
//!
//! # Example Fixture Format
//!
//! ```yaml
//! runs:
//!   - id: r1
//!     workflow:
//!       id: welcome-flow
//!       actions:
//!         - kind: email
//!           sortingOrder: 0
//!           parameterTemplate:
//!             email: "{user.email}"
//!             body: "Welcome {user.name}"
//!         - kind: send-sol
//!           sortingOrder: 1
//!           parameterTemplate:
//!             address: "{wallet}"
//!             amount: "0.5"
//!     triggerMetadata:
//!       user: { email: ada@example.com, name: Ada }
//!       wallet: 9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// The type of side effect an action performs.
///
/// Unknown names are preserved in [`ActionKind::Other`] so that newer
/// definitions can flow through older workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Send a notification (email)
    Notification,
    /// Transfer an asset to an address
    AssetTransfer,
    /// Any kind this worker has no executor for
    Other(String),
}

impl ActionKind {
    /// Resolves a wire name, accepting the legacy aliases.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "notification" | "email" => Self::Notification,
            "asset-transfer" | "send-sol" => Self::AssetTransfer,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Notification => "notification",
            Self::AssetTransfer => "asset-transfer",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// A single configured step of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    /// Which executor handles this action
    pub kind: ActionKind,

    /// Parameter name -> template string
    #[serde(default)]
    pub parameter_template: BTreeMap<String, String>,

    /// Zero-based position of this action within the workflow
    pub sorting_order: u32,
}

impl ActionDefinition {
    /// Creates an action with no parameters.
    pub fn new(kind: ActionKind, sorting_order: u32) -> Self {
        Self {
            kind,
            parameter_template: BTreeMap::new(),
            sorting_order,
        }
    }

    /// Adds a parameter template.
    pub fn with_param(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.parameter_template.insert(name.into(), template.into());
        self
    }
}

/// Ordered sequence of actions. Immutable once a run references it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Identifier of the workflow (informational)
    #[serde(default)]
    pub id: String,

    /// Actions, one per stage
    pub actions: Vec<ActionDefinition>,
}

impl WorkflowDefinition {
    /// Creates a definition from a list of actions.
    pub fn new(id: impl Into<String>, actions: Vec<ActionDefinition>) -> Self {
        Self {
            id: id.into(),
            actions,
        }
    }

    /// Returns the action whose sorting order equals `stage`.
    pub fn action_for_stage(&self, stage: u32) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.sorting_order == stage)
    }

    /// Index of the final stage, or `None` for an empty workflow.
    pub fn last_stage(&self) -> Option<u32> {
        (self.actions.len() as u32).checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// One triggered execution of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,

    pub workflow: WorkflowDefinition,

    /// Substitution source for every stage's templates
    #[serde(default = "empty_metadata")]
    pub trigger_metadata: Value,
}

fn empty_metadata() -> Value {
    Value::Object(Default::default())
}

impl WorkflowRun {
    pub fn new(
        id: impl Into<String>,
        workflow: WorkflowDefinition,
        trigger_metadata: Value,
    ) -> Self {
        Self {
            id: id.into(),
            workflow,
            trigger_metadata,
        }
    }
}

/// "Execute stage N of run R" - the unit carried on the log.
///
/// Both `runId` and the older `zapRunId` are accepted; `runId` wins when a
/// producer sends both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase", try_from = "WireStageMessage")]
pub struct StageMessage {
    pub run_id: String,

    pub stage: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStageMessage {
    run_id: Option<String>,
    zap_run_id: Option<String>,
    stage: u32,
}

impl TryFrom<WireStageMessage> for StageMessage {
    type Error = String;

    fn try_from(wire: WireStageMessage) -> Result<Self, Self::Error> {
        let run_id = wire
            .run_id
            .or(wire.zap_run_id)
            .ok_or_else(|| "missing field `runId`".to_string())?;
        if run_id.trim().is_empty() {
            return Err("runId must not be empty".to_string());
        }
        Ok(Self {
            run_id,
            stage: wire.stage,
        })
    }
}

impl StageMessage {
    pub fn new(run_id: impl Into<String>, stage: u32) -> Self {
        Self {
            run_id: run_id.into(),
            stage,
        }
    }

    /// Parses a raw log payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Serializes to the wire representation.
    pub fn to_payload(&self) -> Vec<u8> {
        // Two plain fields; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// The message requesting the following stage of the same run.
    pub fn next(&self) -> Self {
        Self::new(self.run_id.clone(), self.stage + 1)
    }

    /// Key used by executors to de-duplicate redelivered stages.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.stage)
    }
}

impl fmt::Display for StageMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run '{}' stage {}", self.run_id, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_stage_workflow() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "wf",
            vec![
                ActionDefinition::new(ActionKind::Notification, 0),
                ActionDefinition::new(ActionKind::AssetTransfer, 1),
            ],
        )
    }

    #[test]
    fn test_action_kind_aliases() {
        assert_eq!(ActionKind::from_name("email"), ActionKind::Notification);
        assert_eq!(ActionKind::from_name("notification"), ActionKind::Notification);
        assert_eq!(ActionKind::from_name("send-sol"), ActionKind::AssetTransfer);
        assert_eq!(
            ActionKind::from_name("webhook"),
            ActionKind::Other("webhook".to_string())
        );
    }

    #[test]
    fn test_action_kind_serializes_canonical_name() {
        let json = serde_json::to_string(&ActionKind::from_name("email")).unwrap();
        assert_eq!(json, "\"notification\"");
    }

    #[test]
    fn test_action_for_stage() {
        let workflow = two_stage_workflow();
        assert_eq!(
            workflow.action_for_stage(1).map(|a| &a.kind),
            Some(&ActionKind::AssetTransfer)
        );
        assert!(workflow.action_for_stage(2).is_none());
    }

    #[test]
    fn test_last_stage() {
        assert_eq!(two_stage_workflow().last_stage(), Some(1));
        assert_eq!(WorkflowDefinition::new("empty", vec![]).last_stage(), None);
    }

    #[test]
    fn test_stage_message_parse() {
        let msg = StageMessage::from_payload(br#"{"runId":"r1","stage":0}"#).unwrap();
        assert_eq!(msg, StageMessage::new("r1", 0));
    }

    #[test]
    fn test_stage_message_tolerates_extra_fields_and_legacy_name() {
        let msg =
            StageMessage::from_payload(br#"{"zapRunId":"r9","stage":3,"source":"hooks"}"#).unwrap();
        assert_eq!(msg, StageMessage::new("r9", 3));
    }

    #[test]
    fn test_stage_message_with_both_run_id_names() {
        let msg =
            StageMessage::from_payload(br#"{"runId":"r1","zapRunId":"old","stage":2}"#).unwrap();
        assert_eq!(msg, StageMessage::new("r1", 2));
    }

    #[test]
    fn test_stage_message_rejects_malformed() {
        assert!(StageMessage::from_payload(b"").is_err());
        assert!(StageMessage::from_payload(b"not json").is_err());
        assert!(StageMessage::from_payload(br#"{"stage":0}"#).is_err());
        assert!(StageMessage::from_payload(br#"{"runId":"","stage":0}"#).is_err());
        assert!(StageMessage::from_payload(br#"{"zapRunId":" ","stage":0}"#).is_err());
        assert!(StageMessage::from_payload(br#"{"runId":"r1","stage":-1}"#).is_err());
        assert!(StageMessage::from_payload(br#"{"runId":"r1"}"#).is_err());
    }

    #[test]
    fn test_stage_message_payload_shape() {
        let payload = StageMessage::new("r1", 1).to_payload();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value, json!({"runId": "r1", "stage": 1}));
    }

    #[test]
    fn test_next_and_idempotency_key() {
        let msg = StageMessage::new("r1", 0);
        assert_eq!(msg.next(), StageMessage::new("r1", 1));
        assert_eq!(msg.idempotency_key(), "r1:0");
    }

    #[test]
    fn test_run_deserializes_camel_case() {
        let run: WorkflowRun = serde_json::from_value(json!({
            "id": "r1",
            "workflow": {
                "actions": [
                    {"kind": "email", "sortingOrder": 0, "parameterTemplate": {"body": "hi"}}
                ]
            }
        }))
        .unwrap();

        assert_eq!(run.workflow.actions[0].kind, ActionKind::Notification);
        assert_eq!(run.workflow.actions[0].parameter_template["body"], "hi");
        assert!(run.trigger_metadata.is_object());
    }
}
