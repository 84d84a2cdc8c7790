use serde::{Deserialize, Serialize};

/// Reference to a flow in the flow repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRef {
  /// Namespace of the flow, e.g. "company.team"
  pub namespace: String,

  /// Flow id within the namespace.
  pub flow_id: String,

  /// Optional revision.
  /// If not specified, the latest revision is used.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub revision: Option<u32>,
}
