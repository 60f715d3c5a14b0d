//! Planning module for reconciliation operations.
//!
//! This module compares desired intents with recorded state, groups the
//! resulting operations into plans, and executes them against the remote API.

mod diff;
mod executor;
mod plan;

pub use diff::{
    DiffEngine, DiffResult, DiffType, FieldChange, Operation, OperationType, ResourceDiff,
    RuleSetChange, field_changes, rule_changes,
};
pub use executor::{
    DriftRecord, DriftStatus, OperationResult, OperationStatus, PlanExecutor, ResourceOutcome,
    RetryPolicy,
};
pub use plan::{Plan, PlanSummary, ResourcePlan};
