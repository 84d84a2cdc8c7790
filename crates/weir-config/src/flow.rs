use serde::{Deserialize, Serialize};

use crate::task::TaskDef;

fn default_revision() -> u32 {
  1
}

/// A flow definition as written by users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
  pub id: String,
  pub namespace: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tenant_id: Option<String>,
  #[serde(default = "default_revision")]
  pub revision: u32,
  /// Default values for execution inputs.
  #[serde(default)]
  pub inputs: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub tasks: Vec<TaskDef>,
  /// Tasks run when one of the root tasks fails.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<TaskDef>,
  /// Tasks run once the root tasks and errors are done.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub finally: Vec<TaskDef>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::TaskKind;

  #[test]
  fn test_parse_flow_with_if() {
    let flow: FlowDef = serde_json::from_str(
      r#"{
        "id": "if",
        "namespace": "company.team",
        "tasks": [
          {
            "id": "if",
            "type": "if",
            "condition": "{{ inputs.string == 'Condition' }}",
            "then": [{ "id": "when_true", "type": "log", "message": "true" }],
            "else": [{ "id": "when_false", "type": "log", "message": "false", "level": "WARN" }]
          }
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(flow.revision, 1);
    assert_eq!(flow.tasks.len(), 1);
    match &flow.tasks[0].kind {
      TaskKind::If(task) => {
        assert_eq!(task.then[0].id, "when_true");
        assert_eq!(task.else_tasks[0].id, "when_false");
        assert!(task.errors.is_empty());
      }
      other => panic!("expected if task, got {:?}", other),
    }
  }

  #[test]
  fn test_policy_flags_default_to_false() {
    let flow: FlowDef = serde_json::from_str(
      r#"{ "id": "f", "namespace": "n", "tasks": [{ "id": "a", "type": "fail" }] }"#,
    )
    .unwrap();

    let task = &flow.tasks[0];
    assert!(!task.disabled);
    assert!(!task.allow_failure);
    assert!(!task.allow_warning);
  }

  #[test]
  fn test_roundtrip_keeps_branch_names() {
    let flow: FlowDef = serde_json::from_str(
      r#"{ "id": "f", "namespace": "n", "tasks": [{
        "id": "seq", "type": "sequential",
        "tasks": [{ "id": "a", "type": "log", "message": "a" }],
        "finally": [{ "id": "cleanup", "type": "log", "message": "bye" }]
      }] }"#,
    )
    .unwrap();

    let json = serde_json::to_value(&flow).unwrap();
    assert_eq!(json["tasks"][0]["type"], "sequential");
    assert_eq!(json["tasks"][0]["finally"][0]["id"], "cleanup");
  }
}
