//! Reconciliation plan types and construction.
//!
//! A plan groups the operations of a diff by resource. Each group runs
//! sequentially in generated order; distinct groups are independent.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ResourceAddress;
use crate::error::{HcloudError, PlanError, Result};

use super::diff::{DiffResult, DiffType, Operation, OperationType};

/// A complete reconciliation plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Document hash this plan is based on.
    pub config_hash: String,
    /// Per-resource operation lists, in document order.
    pub resources: Vec<ResourcePlan>,
}

/// Operations for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourcePlan {
    /// Resource address.
    pub address: ResourceAddress,
    /// Kind of change.
    pub diff_type: DiffType,
    /// Operations in execution order.
    pub operations: Vec<Operation>,
}

/// Operation counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Create operations.
    pub creates: usize,
    /// Update operations.
    pub updates: usize,
    /// Delete operations.
    pub deletes: usize,
    /// Import operations.
    pub imports: usize,
}

impl Plan {
    /// Creates a plan from a diff result, skipping unchanged resources.
    #[must_use]
    pub fn from_diff(diff: &DiffResult, config_hash: &str) -> Self {
        let resources = diff
            .diffs
            .iter()
            .filter(|d| !d.operations.is_empty())
            .map(|d| ResourcePlan {
                address: d.address.clone(),
                diff_type: d.diff_type,
                operations: d.operations.clone(),
            })
            .collect();

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            resources,
        }
    }

    /// Creates a plan holding a single import.
    #[must_use]
    pub fn import(operation: Operation) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: String::new(),
            resources: vec![ResourcePlan {
                address: operation.address().clone(),
                diff_type: DiffType::Create,
                operations: vec![operation],
            }],
        }
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            resources: vec![],
        }
    }

    /// Checks that no resource appears in more than one group and that every
    /// operation in a group targets that group's address.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::ConflictingOperations` otherwise.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for resource in &self.resources {
            if !seen.insert(&resource.address) {
                return Err(conflict(format!(
                    "{} appears in more than one group",
                    resource.address
                )));
            }
            if let Some(op) = resource
                .operations
                .iter()
                .find(|op| op.address() != &resource.address)
            {
                return Err(conflict(format!(
                    "operation '{op}' is grouped under {}",
                    resource.address
                )));
            }
        }
        Ok(())
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns the total number of operations.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.resources.iter().map(|r| r.operations.len()).sum()
    }

    /// Counts operations by type.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in self.resources.iter().flat_map(|r| &r.operations) {
            match op.op_type() {
                OperationType::Create => summary.creates += 1,
                OperationType::Update => summary.updates += 1,
                OperationType::Delete => summary.deletes += 1,
                OperationType::Import => summary.imports += 1,
            }
        }
        summary
    }

    /// Finds the group for an address.
    #[must_use]
    pub fn resource(&self, address: &ResourceAddress) -> Option<&ResourcePlan> {
        self.resources.iter().find(|r| r.address == *address)
    }
}

fn conflict(message: String) -> HcloudError {
    HcloudError::Plan(PlanError::ConflictingOperations { message })
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete",
            self.creates, self.updates, self.deletes
        )?;
        if self.imports > 0 {
            write!(f, ", {} to import", self.imports)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ResourcePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address, self.diff_type)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.resources.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} resources):", self.resources.len())?;
        for resource in &self.resources {
            writeln!(f, "  {resource}")?;
            for op in &resource.operations {
                writeln!(f, "    - {op}")?;
            }
        }
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkIntent, ResourceIntent, ResourceKind};
    use crate::planner::diff::ResourceDiff;
    use std::collections::BTreeMap;

    fn network(name: &str) -> ResourceIntent {
        ResourceIntent::Network(NetworkIntent {
            name: name.to_string(),
            labels: BTreeMap::new(),
            ip_range: "10.0.0.0/16".parse().unwrap(),
        })
    }

    fn sample_diff() -> DiffResult {
        let created: ResourceAddress = "hcloud_network.a".parse().unwrap();
        let replaced: ResourceAddress = "hcloud_network.b".parse().unwrap();
        let unchanged: ResourceAddress = "hcloud_network.c".parse().unwrap();

        DiffResult::from_diffs(vec![
            ResourceDiff {
                address: created.clone(),
                diff_type: DiffType::Create,
                operations: vec![Operation::Create {
                    address: created,
                    intent: network("a"),
                }],
                old_hash: None,
                new_hash: Some(String::from("h1")),
            },
            ResourceDiff {
                address: replaced.clone(),
                diff_type: DiffType::Replace,
                operations: vec![
                    Operation::Delete {
                        address: replaced.clone(),
                        kind: ResourceKind::Network,
                        id: 2,
                    },
                    Operation::Create {
                        address: replaced,
                        intent: network("b"),
                    },
                ],
                old_hash: Some(String::from("h2")),
                new_hash: Some(String::from("h3")),
            },
            ResourceDiff {
                address: unchanged,
                diff_type: DiffType::NoChange,
                operations: vec![],
                old_hash: Some(String::from("h4")),
                new_hash: Some(String::from("h4")),
            },
        ])
    }

    #[test]
    fn test_plan_skips_unchanged_resources() {
        let plan = Plan::from_diff(&sample_diff(), "hash");

        assert_eq!(plan.resources.len(), 2);
        assert_eq!(plan.operation_count(), 3);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_summary_counts_operations() {
        let plan = Plan::from_diff(&sample_diff(), "hash");
        let summary = plan.summary();

        assert_eq!(summary.creates, 2);
        assert_eq!(summary.deletes, 1);
        assert_eq!(summary.updates, 0);
        assert_eq!(summary.to_string(), "2 to create, 0 to update, 1 to delete");
    }

    #[test]
    fn test_replace_keeps_delete_before_create() {
        let plan = Plan::from_diff(&sample_diff(), "hash");
        let group = plan
            .resource(&"hcloud_network.b".parse().unwrap())
            .unwrap();

        assert_eq!(group.operations[0].op_type(), OperationType::Delete);
        assert_eq!(group.operations[1].op_type(), OperationType::Create);
    }

    #[test]
    fn test_duplicate_group_is_a_conflict() {
        let mut plan = Plan::from_diff(&sample_diff(), "hash");
        plan.resources.push(plan.resources[0].clone());

        assert!(matches!(
            plan.validate(),
            Err(HcloudError::Plan(PlanError::ConflictingOperations { .. }))
        ));
    }

    #[test]
    fn test_empty_plan_display() {
        let plan = Plan::empty("hash");
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No changes required");
    }
}
