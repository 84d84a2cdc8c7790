//! Expression rendering using minijinja templates.
//!
//! A [`RunContext`] holds the variables visible to one task run and renders
//! expressions against them.
//!
//! # Variables
//! ```json
//! {
//!   "flow": { "id": "deploy", "namespace": "company.team", "revision": 1 },
//!   "execution": { "id": "..." },
//!   "inputs": { "env": "prod" },
//!   "outputs": { "check": { "evaluationResult": true } },
//!   "task": { "id": "check" },
//!   "taskrun": { "id": "...", "value": "eu-west-1", "parentId": "..." }
//! }
//! ```
//!
//! Outputs of runs created inside a loop are keyed by loop value:
//! `{{ outputs.build['eu-west-1'].artifact }}`.
//!
//! Undefined variables are errors rather than empty strings, so a typo in a
//! condition fails the run instead of silently choosing a branch.

use minijinja::{Environment, UndefinedBehavior, Value};
use serde_json::json;
use weir_config::TaskDef;
use weir_execution::{Execution, TaskRun};
use weir_workflow::Flow;

use crate::aggregate::FailurePolicy;
use crate::error::RuntimeError;

/// Variables and policy for evaluating one task run.
#[derive(Debug, Clone)]
pub struct RunContext {
  variables: serde_json::Value,
  policy: FailurePolicy,
}

impl RunContext {
  /// Context for flow-level evaluation (root tasks).
  pub fn new(flow: &Flow, execution: &Execution) -> Self {
    Self {
      variables: json!({
        "flow": {
          "id": flow.id,
          "namespace": flow.namespace,
          "revision": flow.revision,
          "tenantId": flow.tenant_id,
        },
        "execution": { "id": execution.id },
        "inputs": flow.merge_inputs(execution.inputs.clone()),
        "outputs": collect_outputs(execution),
      }),
      policy: FailurePolicy::default(),
    }
  }

  /// Context for one task run. The task's failure policy comes with it.
  pub fn for_task_run(flow: &Flow, execution: &Execution, task: &TaskDef, task_run: &TaskRun) -> Self {
    let mut context = Self::new(flow, execution).with_policy(FailurePolicy::of(task));
    if let Some(variables) = context.variables.as_object_mut() {
      variables.insert("task".to_string(), json!({ "id": task.id }));
      variables.insert(
        "taskrun".to_string(),
        json!({
          "id": task_run.id,
          "value": task_run.value,
          "parentId": task_run.parent_task_run_id,
        }),
      );
    }
    context
  }

  /// Context over raw variables, e.g. shipped to a worker with a task.
  pub fn from_variables(variables: serde_json::Value) -> Self {
    Self {
      variables,
      policy: FailurePolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn variables(&self) -> &serde_json::Value {
    &self.variables
  }

  pub fn policy(&self) -> FailurePolicy {
    self.policy
  }

  /// Render a template to a string.
  pub fn render(&self, template: &str) -> Result<String, RuntimeError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let ctx = Value::from_serialize(&self.variables);
    env
      .render_str(template, ctx)
      .map_err(|e| RuntimeError::VariableEvaluation {
        template: template.to_string(),
        message: e.to_string(),
      })
  }

  /// Render a template and parse the result as JSON.
  pub fn render_json(&self, task_id: &str, template: &str) -> Result<serde_json::Value, RuntimeError> {
    let rendered = self.render(template)?;
    serde_json::from_str(&rendered).map_err(|e| RuntimeError::InvalidValue {
      task_id: task_id.to_string(),
      message: format!("expected JSON, got '{}': {}", rendered, e),
    })
  }
}

/// Outputs of every run that has any, keyed by task id then loop value.
fn collect_outputs(execution: &Execution) -> serde_json::Value {
  let mut outputs = serde_json::Map::new();

  for run in execution.task_runs.iter().filter(|r| !r.outputs.is_empty()) {
    let value = serde_json::Value::Object(run.outputs.clone());
    match &run.value {
      Some(loop_value) => {
        let entry = outputs
          .entry(run.task_id.clone())
          .or_insert_with(|| json!({}));
        if let Some(by_value) = entry.as_object_mut() {
          by_value.insert(loop_value.clone(), value);
        }
      }
      None => {
        outputs.insert(run.task_id.clone(), value);
      }
    }
  }

  serde_json::Value::Object(outputs)
}

#[cfg(test)]
mod tests {
  use super::*;
  use weir_config::FlowDef;

  fn flow() -> Flow {
    let def: FlowDef = serde_json::from_str(
      r#"{
        "id": "deploy", "namespace": "company.team",
        "inputs": { "env": "dev", "name": "john doe" },
        "tasks": [{ "id": "a", "type": "log", "message": "x" }]
      }"#,
    )
    .unwrap();
    Flow::from_validated(def)
  }

  fn execution(flow: &Flow, inputs: serde_json::Value) -> Execution {
    let inputs = inputs.as_object().cloned().unwrap_or_default();
    Execution::new(None, &flow.namespace, &flow.id, flow.revision, inputs)
  }

  #[test]
  fn test_render_inputs_over_defaults() {
    let flow = flow();
    let execution = execution(&flow, json!({ "env": "prod" }));
    let ctx = RunContext::new(&flow, &execution);

    assert_eq!(ctx.render("{{ inputs.env }}").unwrap(), "prod");
    assert_eq!(ctx.render("Hello {{ inputs.name | title }}!").unwrap(), "Hello John Doe!");
    assert_eq!(ctx.render("{{ flow.namespace }}.{{ flow.id }}").unwrap(), "company.team.deploy");
  }

  #[test]
  fn test_render_comparison() {
    let flow = flow();
    let execution = execution(&flow, json!({}));
    let ctx = RunContext::new(&flow, &execution);

    assert_eq!(ctx.render("{{ 1 == 1 }}").unwrap(), "true");
    assert_eq!(ctx.render("{{ inputs.env == 'prod' }}").unwrap(), "false");
  }

  #[test]
  fn test_undefined_variable_is_an_error() {
    let flow = flow();
    let execution = execution(&flow, json!({}));
    let ctx = RunContext::new(&flow, &execution);

    let result = ctx.render("{{ inputs.missing.deeper }}");
    assert!(matches!(result, Err(RuntimeError::VariableEvaluation { .. })));
  }

  #[test]
  fn test_outputs_keyed_by_loop_value() {
    let flow = flow();
    let mut execution = execution(&flow, json!({}));
    let mut outputs = serde_json::Map::new();
    outputs.insert("artifact".to_string(), json!("a.tar"));
    execution.upsert_task_run(
      TaskRun::new(&execution.id, "build", None, Some("eu".to_string())).with_outputs(outputs.clone()),
    );
    execution.upsert_task_run(TaskRun::new(&execution.id, "check", None, None).with_outputs(outputs));

    let ctx = RunContext::new(&flow, &execution);
    assert_eq!(ctx.render("{{ outputs.build['eu'].artifact }}").unwrap(), "a.tar");
    assert_eq!(ctx.render("{{ outputs.check.artifact }}").unwrap(), "a.tar");
  }

  #[test]
  fn test_task_run_variables_and_policy() {
    let flow = flow();
    let execution = execution(&flow, json!({}));
    let mut task = flow.tasks[0].clone();
    task.allow_failure = true;
    let run = TaskRun::new(&execution.id, "a", None, Some("v1".to_string()));

    let ctx = RunContext::for_task_run(&flow, &execution, &task, &run);
    assert_eq!(ctx.render("{{ task.id }}:{{ taskrun.value }}").unwrap(), "a:v1");
    assert!(ctx.policy().allow_failure);
  }

  #[test]
  fn test_render_json() {
    let flow = flow();
    let execution = execution(&flow, json!({ "regions": ["eu", "us"] }));
    let ctx = RunContext::new(&flow, &execution);

    let values = ctx.render_json("loop", "{{ inputs.regions | tojson }}").unwrap();
    assert_eq!(values, json!(["eu", "us"]));

    let invalid = ctx.render_json("loop", "not json");
    assert!(matches!(invalid, Err(RuntimeError::InvalidValue { .. })));
  }
}
