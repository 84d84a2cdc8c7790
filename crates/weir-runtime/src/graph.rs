//! Builders for the structural graph of a flow.
//!
//! The graph types live in `weir-workflow`; this module walks task lists and
//! wires nodes together. When an execution is supplied, nodes carry the task
//! runs that instantiate them.

use weir_config::TaskDef;
use weir_execution::{Execution, TaskRun};
use weir_workflow::{Flow, GraphCluster, GraphNode, GraphTask, GraphTaskRun, RelationType};

use crate::flowable::flowable;

/// The task lists of one composite.
#[derive(Debug, Clone, Copy)]
pub struct Branches<'a> {
  pub tasks: &'a [TaskDef],
  pub errors: &'a [TaskDef],
  pub finally: &'a [TaskDef],
}

/// What the nodes of a cluster are matched against.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
  pub execution: Option<&'a Execution>,
  pub parent_run: Option<&'a TaskRun>,
  pub parent_values: &'a [String],
}

#[derive(Debug, Default)]
struct Segment {
  entries: Vec<String>,
  exits: Vec<String>,
}

/// Graph of a whole flow, optionally annotated with an execution's runs.
pub fn flow_graph(flow: &Flow, execution: Option<&Execution>) -> GraphCluster {
  let mut cluster = GraphCluster::new(flow.id.clone(), None, RelationType::Sequential);
  let scope = Scope {
    execution,
    ..Default::default()
  };
  sequential(
    &mut cluster,
    Branches {
      tasks: &flow.tasks,
      errors: &flow.errors,
      finally: &flow.finally,
    },
    scope,
  );
  cluster
}

/// Empty cluster for a composite task.
pub fn cluster_for(task: &TaskDef, relation: RelationType, parent_values: &[String]) -> GraphCluster {
  let mut cluster = GraphCluster::new(task.id.clone(), Some(task.id.clone()), relation);
  cluster.parent_values = parent_values.to_vec();
  cluster
}

/// Chain tasks one after the other from the cluster root.
pub fn sequential(cluster: &mut GraphCluster, branches: Branches<'_>, scope: Scope<'_>) {
  let relation = cluster.relation;
  let body = chain(cluster, branches.tasks, relation, scope);
  let root = vec![cluster.root.clone()];

  connect(cluster, &root, &body.entries, relation, None);
  let exits = if body.exits.is_empty() { root } else { body.exits };
  close(cluster, exits, branches, scope);
}

/// Fan tasks out from the cluster root and join them before finally.
pub fn parallel(cluster: &mut GraphCluster, branches: Branches<'_>, scope: Scope<'_>) {
  let relation = cluster.relation;
  let mut body = Segment::default();
  for task in branches.tasks {
    let node = task_node(task, scope);
    body.entries.push(node.entry().to_string());
    body.exits.push(node.exit().to_string());
    cluster.add_node(node);
  }
  let root = vec![cluster.root.clone()];

  connect(cluster, &root, &body.entries, relation, None);
  let exits = if body.exits.is_empty() { root } else { body.exits };
  close(cluster, exits, branches, scope);
}

/// Two labeled branches out of the cluster root, `then` and `else`.
pub fn if_else(
  cluster: &mut GraphCluster,
  then: &[TaskDef],
  else_tasks: &[TaskDef],
  branches: Branches<'_>,
  scope: Scope<'_>,
) {
  let root = vec![cluster.root.clone()];
  let mut exits = Vec::new();

  for (label, tasks) in [("then", then), ("else", else_tasks)] {
    let body = chain(cluster, tasks, RelationType::Sequential, scope);
    if body.entries.is_empty() {
      if !exits.contains(&cluster.root) {
        exits.push(cluster.root.clone());
      }
      continue;
    }
    connect(cluster, &root, &body.entries, RelationType::Choice, Some(label));
    exits.extend(body.exits);
  }

  close(cluster, exits, branches, scope);
}

/// Add tasks as a chain and return its first entry and last exit.
fn chain(cluster: &mut GraphCluster, tasks: &[TaskDef], relation: RelationType, scope: Scope<'_>) -> Segment {
  let mut segment = Segment::default();
  let mut previous: Option<String> = None;

  for task in tasks {
    let node = task_node(task, scope);
    let (entry, exit) = (node.entry().to_string(), node.exit().to_string());
    cluster.add_node(node);

    match previous {
      Some(from) => cluster.add_edge(from, entry, relation, None),
      None => segment.entries.push(entry),
    }
    previous = Some(exit);
  }

  segment.exits.extend(previous);
  segment
}

/// Wire body exits through finally to the end, and errors from the root.
fn close(cluster: &mut GraphCluster, exits: Vec<String>, branches: Branches<'_>, scope: Scope<'_>) {
  let end = vec![cluster.end.clone()];
  let finally = chain(cluster, branches.finally, RelationType::Finally, scope);
  let (after, relation) = if finally.entries.is_empty() {
    (end.clone(), cluster.relation)
  } else {
    (finally.entries.clone(), RelationType::Finally)
  };

  connect(cluster, &exits, &after, relation, None);

  let errors = chain(cluster, branches.errors, RelationType::Error, scope);
  if !errors.entries.is_empty() {
    let root = vec![cluster.root.clone()];
    connect(cluster, &root, &errors.entries, RelationType::Error, None);
    connect(cluster, &errors.exits, &after, RelationType::Error, None);
  }

  connect(cluster, &finally.exits, &end, RelationType::Finally, None);
}

fn connect(cluster: &mut GraphCluster, from: &[String], to: &[String], relation: RelationType, value: Option<&str>) {
  for source in from {
    for target in to {
      cluster.add_edge(source.clone(), target.clone(), relation, value.map(str::to_string));
    }
  }
}

/// Node for one task: a nested cluster for composites, a leaf otherwise.
fn task_node(task: &TaskDef, scope: Scope<'_>) -> GraphNode {
  let parent_id = scope.parent_run.map(|p| p.id.as_str());
  let runs: Vec<&TaskRun> = scope
    .execution
    .map(|e| {
      e.task_runs
        .iter()
        .filter(|r| r.task_id == task.id && r.parent_task_run_id.as_deref() == parent_id)
        .collect()
    })
    .unwrap_or_default();
  let graph_runs: Vec<GraphTaskRun> = runs
    .iter()
    .map(|r| GraphTaskRun {
      id: r.id.clone(),
      value: r.value.clone(),
      state: r.current(),
    })
    .collect();

  match flowable(task) {
    Some(composite) => {
      let mut cluster = composite.tasks_tree(scope.execution, runs.first().copied(), scope.parent_values);
      cluster.task_runs = graph_runs;
      GraphNode::Cluster(cluster)
    }
    None => GraphNode::Task(GraphTask {
      uid: task.id.clone(),
      task_id: task.id.clone(),
      task_runs: graph_runs,
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flowable::test_support::*;
  use weir_execution::StateType;

  fn has_edge(cluster: &GraphCluster, from: &str, to: &str, relation: RelationType) -> bool {
    cluster
      .edges
      .iter()
      .any(|e| e.from == from && e.to == to && e.relation == relation)
  }

  #[test]
  fn test_sequential_flow_graph() {
    let flow = flow(
      r#"{
        "id": "f", "namespace": "n",
        "tasks": [
          { "id": "a", "type": "log", "message": "a" },
          { "id": "b", "type": "log", "message": "b" }
        ],
        "errors": [{ "id": "alert", "type": "log", "message": "e" }],
        "finally": [{ "id": "cleanup", "type": "log", "message": "f" }]
      }"#,
    );

    let graph = flow_graph(&flow, None);
    assert!(has_edge(&graph, "f.root", "a", RelationType::Sequential));
    assert!(has_edge(&graph, "a", "b", RelationType::Sequential));
    assert!(has_edge(&graph, "b", "cleanup", RelationType::Finally));
    assert!(has_edge(&graph, "f.root", "alert", RelationType::Error));
    assert!(has_edge(&graph, "alert", "cleanup", RelationType::Error));
    assert!(has_edge(&graph, "cleanup", "f.end", RelationType::Finally));
  }

  #[test]
  fn test_if_cluster_has_labeled_choices() {
    let flow = flow(
      r#"{
        "id": "f", "namespace": "n",
        "tasks": [{
          "id": "check", "type": "if", "condition": "{{ inputs.go }}",
          "then": [{ "id": "yes", "type": "log", "message": "y" }],
          "else": [{ "id": "no", "type": "log", "message": "n" }]
        }]
      }"#,
    );

    let graph = flow_graph(&flow, None);
    assert!(has_edge(&graph, "f.root", "check.root", RelationType::Sequential));
    assert!(has_edge(&graph, "check.end", "f.end", RelationType::Sequential));

    let Some(GraphNode::Cluster(check)) = graph.find("check") else {
      panic!("expected a cluster for check");
    };
    assert_eq!(check.relation, RelationType::Choice);
    let labels: Vec<_> = check
      .edges
      .iter()
      .filter(|e| e.relation == RelationType::Choice)
      .filter_map(|e| e.value.as_deref())
      .collect();
    assert_eq!(labels, vec!["then", "else"]);
    assert_eq!(check.upstream("check.end").len(), 2);
  }

  #[test]
  fn test_parallel_fans_out() {
    let flow = flow(
      r#"{
        "id": "f", "namespace": "n",
        "tasks": [{
          "id": "fan", "type": "parallel",
          "tasks": [
            { "id": "x", "type": "log", "message": "x" },
            { "id": "y", "type": "log", "message": "y" }
          ]
        }]
      }"#,
    );

    let graph = flow_graph(&flow, None);
    let Some(GraphNode::Cluster(fan)) = graph.find("fan") else {
      panic!("expected a cluster for fan");
    };
    assert_eq!(fan.downstream("fan.root"), vec!["x", "y"]);
    assert_eq!(fan.upstream("fan.end"), vec!["x", "y"]);
  }

  #[test]
  fn test_graph_carries_task_runs() {
    let flow = flow(
      r#"{
        "id": "f", "namespace": "n",
        "tasks": [{
          "id": "seq", "type": "sequential",
          "tasks": [{ "id": "inner", "type": "log", "message": "x" }]
        }]
      }"#,
    );
    let mut execution = execution(&flow, serde_json::json!({}));
    let parent = add_run(&mut execution, "seq", None, None, StateType::Running);
    add_run(&mut execution, "inner", Some(&parent), None, StateType::Success);

    let graph = flow_graph(&flow, Some(&execution));
    let Some(GraphNode::Cluster(seq)) = graph.find("seq") else {
      panic!("expected a cluster for seq");
    };
    assert_eq!(seq.task_runs[0].id, parent.id);

    let Some(GraphNode::Task(inner)) = graph.find("inner") else {
      panic!("expected a task node for inner");
    };
    assert_eq!(inner.task_runs.len(), 1);
    assert_eq!(inner.task_runs[0].state, StateType::Success);
  }
}
