//! Structural graph of a flow, for visualization only.
//!
//! Every composite task becomes a [`GraphCluster`] with its own root and end
//! nodes. Edges carry the [`RelationType`] of the branch they belong to.

use serde::Serialize;
use weir_execution::StateType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
  Sequential,
  Parallel,
  Choice,
  Error,
  Finally,
  Dynamic,
}

/// A task run attached to a graph node when an execution is supplied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphTaskRun {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
  pub state: StateType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphTask {
  pub uid: String,
  pub task_id: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub task_runs: Vec<GraphTaskRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphNode {
  Root { uid: String },
  End { uid: String },
  Task(GraphTask),
  Cluster(GraphCluster),
}

impl GraphNode {
  pub fn uid(&self) -> &str {
    match self {
      Self::Root { uid } | Self::End { uid } => uid,
      Self::Task(task) => &task.uid,
      Self::Cluster(cluster) => &cluster.uid,
    }
  }

  /// Where incoming edges attach: a cluster is entered through its root.
  pub fn entry(&self) -> &str {
    match self {
      Self::Cluster(cluster) => &cluster.root,
      other => other.uid(),
    }
  }

  /// Where outgoing edges leave: a cluster is left through its end.
  pub fn exit(&self) -> &str {
    match self {
      Self::Cluster(cluster) => &cluster.end,
      other => other.uid(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
  pub from: String,
  pub to: String,
  pub relation: RelationType,
  /// Branch label, e.g. `then`/`else` on a choice or the loop value.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphCluster {
  pub uid: String,
  /// The composite task this cluster represents; `None` for the flow itself.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub task_id: Option<String>,
  pub relation: RelationType,
  pub root: String,
  pub end: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub task_runs: Vec<GraphTaskRun>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub parent_values: Vec<String>,
  pub nodes: Vec<GraphNode>,
  pub edges: Vec<GraphEdge>,
}

impl GraphCluster {
  /// Create an empty cluster holding only its root and end nodes.
  pub fn new(uid: impl Into<String>, task_id: Option<String>, relation: RelationType) -> Self {
    let uid = uid.into();
    let root = format!("{}.root", uid);
    let end = format!("{}.end", uid);

    Self {
      nodes: vec![
        GraphNode::Root { uid: root.clone() },
        GraphNode::End { uid: end.clone() },
      ],
      uid,
      task_id,
      relation,
      root,
      end,
      task_runs: Vec::new(),
      parent_values: Vec::new(),
      edges: Vec::new(),
    }
  }

  pub fn add_node(&mut self, node: GraphNode) {
    self.nodes.push(node);
  }

  pub fn add_edge(
    &mut self,
    from: impl Into<String>,
    to: impl Into<String>,
    relation: RelationType,
    value: Option<String>,
  ) {
    self.edges.push(GraphEdge {
      from: from.into(),
      to: to.into(),
      relation,
      value,
    });
  }

  /// Get downstream node uids for a given node.
  pub fn downstream(&self, uid: &str) -> Vec<&str> {
    self
      .edges
      .iter()
      .filter(|e| e.from == uid)
      .map(|e| e.to.as_str())
      .collect()
  }

  /// Get upstream node uids for a given node.
  pub fn upstream(&self, uid: &str) -> Vec<&str> {
    self
      .edges
      .iter()
      .filter(|e| e.to == uid)
      .map(|e| e.from.as_str())
      .collect()
  }

  /// Find a node by uid in this cluster or any nested cluster.
  pub fn find(&self, uid: &str) -> Option<&GraphNode> {
    self.nodes.iter().find_map(|node| {
      if node.uid() == uid {
        return Some(node);
      }
      match node {
        GraphNode::Cluster(cluster) => cluster.find(uid),
        _ => None,
      }
    })
  }
}
