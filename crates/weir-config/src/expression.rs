//! Expression types for task configuration.
//!
//! Conditions, messages and loop values are template strings rendered by
//! minijinja at runtime against the execution's variables.
//!
//! # Examples
//!
//! ```json
//! {
//!   "condition": "{{ inputs.env == 'prod' }}",
//!   "message": "Deploying {{ inputs.service }}",
//!   "values": "{{ inputs.regions | tojson }}"
//! }
//! ```
//!
//! After rendering, each consumer interprets the string itself:
//! - conditions are coerced to a boolean by truthiness
//! - loop values are parsed as a JSON array
//! - messages are used as-is

/// An expression is a template string that gets rendered at runtime.
pub type Expression = String;
