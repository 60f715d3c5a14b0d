//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ResourceAddress, ValidatedConfig};
use crate::planner::{DiffResult, DiffType, OperationStatus, OperationType, Plan};
use crate::reconciler::{ApplyReport, DriftReport};
use crate::state::{LockInfo, ResourceState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// State entry row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Apply result row for table display.
#[derive(Tabled)]
struct ApplyRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Error")]
    error: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validated document summary.
    #[must_use]
    pub fn format_validation(&self, config: &ValidatedConfig) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": true,
                "resources": config.addresses().iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": config.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid.\n", "✓".green());
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                for address in config.addresses() {
                    let _ = writeln!(output, "     - {address}");
                }
                if !config.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &config.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a plan for display. `diff` adds field-level detail.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, diff: Option<&DiffResult>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "config_hash": plan.config_hash,
                "summary": plan.summary(),
                "resources": plan.resources,
            })),
            OutputFormat::Text => Self::format_plan_text(plan, diff),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, diff: Option<&DiffResult>) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required, infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nReconciliation Plan\n");
        if !plan.config_hash.is_empty() {
            let _ = write!(
                output,
                "   Config hash: {}\n\n",
                truncate(&plan.config_hash, 8)
            );
        }

        let rows: Vec<PlanRow> = plan
            .resources
            .iter()
            .flat_map(|r| &r.operations)
            .enumerate()
            .map(|(i, op)| PlanRow {
                index: i + 1,
                action: format_op_type(op.op_type()),
                resource: op.address().to_string(),
                detail: truncate(&op.to_string(), 48),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if let Some(diff) = diff {
            output.push_str("\nDetailed changes:\n");
            for resource in diff.actionable_diffs() {
                let _ = writeln!(
                    output,
                    "  {} {}",
                    format_diff_type(resource.diff_type),
                    resource.address
                );
                for op in &resource.operations {
                    if let crate::planner::Operation::Update { changes, .. } = op {
                        for change in changes {
                            let _ = writeln!(output, "      {change}");
                            if let Some(rules) = &change.rules {
                                for key in &rules.added {
                                    let _ = writeln!(output, "        {} {key}", "+".green());
                                }
                                for key in &rules.modified {
                                    let _ = writeln!(output, "        {} {key}", "~".yellow());
                                }
                                for key in &rules.removed {
                                    let _ = writeln!(output, "        {} {key}", "-".red());
                                }
                            }
                        }
                    }
                }
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            summary.creates.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.deletes.to_string().red()
        );

        output
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        let rows: Vec<ApplyRow> = report
            .outcomes
            .iter()
            .flat_map(|o| &o.results)
            .map(|r| ApplyRow {
                resource: r.operation.address().to_string(),
                operation: r.operation.op_type().to_string(),
                status: r.status.to_string(),
                attempts: r.attempts,
                error: r.error.clone().unwrap_or_default(),
            })
            .collect();

        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "success": report.is_success(),
                "cancelled": report.was_cancelled(),
                "summary": report.summary(),
                "operations": rows.iter().map(|r| serde_json::json!({
                    "resource": r.resource,
                    "operation": r.operation,
                    "status": r.status,
                    "attempts": r.attempts,
                    "error": r.error,
                })).collect::<Vec<_>>(),
                "worker_errors": report.worker_errors,
            })),
            OutputFormat::Text => {
                let status = if report.is_success() {
                    format!("{} Apply complete", "✓".green())
                } else if report.was_cancelled() {
                    format!("{} Apply cancelled", "⚠".yellow())
                } else {
                    format!("{} Apply finished with errors", "✗".red())
                };

                let mut output = format!("{status}: {}\n\n", report.summary());
                if !rows.is_empty() {
                    let colored_rows: Vec<ApplyRow> = rows
                        .into_iter()
                        .map(|mut r| {
                            r.status = color_status(&r.status);
                            r.error = truncate(&r.error, 60);
                            r
                        })
                        .collect();
                    output.push_str(&Table::new(colored_rows).to_string());
                    output.push('\n');
                }
                for error in &report.worker_errors {
                    let _ = writeln!(output, "   - {error}");
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected, state is converged.\n", "✓".green())
                } else {
                    format!("{} {report}", "⚠".yellow())
                }
            }
        }
    }

    /// Formats the result of an import.
    #[must_use]
    pub fn format_import(&self, address: &ResourceAddress, state: &ResourceState) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "address": address,
                "state": state,
            })),
            OutputFormat::Text => format!(
                "{} Imported {address} (id {}, name '{}')\n",
                "✓".green(),
                state.id,
                state.attributes.name()
            ),
        }
    }

    /// Formats recorded state as a table.
    #[must_use]
    pub fn format_state_list(&self, entries: &[(ResourceAddress, ResourceState)]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&entries
                .iter()
                .map(|(address, state)| serde_json::json!({ "address": address, "id": state.id }))
                .collect::<Vec<_>>()),
            OutputFormat::Text => {
                if entries.is_empty() {
                    return String::from("No resources in state.\n");
                }
                let rows: Vec<StateRow> = entries
                    .iter()
                    .map(|(address, state)| StateRow {
                        address: address.to_string(),
                        id: state.id,
                        name: state.attributes.name().to_string(),
                        hash: truncate(&state.config_hash, 8),
                        updated: state.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats full state details.
    #[must_use]
    pub fn format_state(
        &self,
        backend: &str,
        entries: &[(ResourceAddress, ResourceState)],
        lock: Option<&LockInfo>,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "backend": backend,
                "lock": lock,
                "resources": entries
                    .iter()
                    .map(|(address, state)| serde_json::json!({ "address": address, "state": state }))
                    .collect::<Vec<_>>(),
            })),
            OutputFormat::Text => {
                let mut output = String::from("\nState\n\n");
                let _ = writeln!(output, "   Backend: {backend}");
                let _ = writeln!(output, "   Resources: {}", entries.len());
                match lock {
                    Some(lock) if !lock.is_expired() => {
                        let _ = writeln!(
                            output,
                            "   Lock: held by {} ({}s left, id {})",
                            lock.holder,
                            lock.remaining_secs(),
                            lock.lock_id
                        );
                    }
                    _ => {
                        let _ = writeln!(output, "   Lock: {}", "free".green());
                    }
                }

                for (address, state) in entries {
                    let _ = write!(output, "\n   {address} (id {})\n", state.id);
                    if let Ok(yaml) = serde_yaml::to_string(&state.attributes) {
                        for line in yaml.lines() {
                            let _ = writeln!(output, "     {line}");
                        }
                    }
                }
                output
            }
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, status: MessageLevel, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": status.as_str(),
                "message": message,
            })),
            OutputFormat::Text => {
                let marker = match status {
                    MessageLevel::Success => "✓".green(),
                    MessageLevel::Warning => "⚠".yellow(),
                    MessageLevel::Error => "✗".red(),
                };
                format!("{marker} {message}")
            }
        }
    }
}

/// Severity of a one-line message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    /// Something completed.
    Success,
    /// Something needs attention.
    Warning,
    /// Something failed.
    Error,
}

impl MessageLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Formats an operation type with color.
fn format_op_type(op_type: OperationType) -> String {
    match op_type {
        OperationType::Create => "+create".green().to_string(),
        OperationType::Update => "~update".yellow().to_string(),
        OperationType::Delete => "-delete".red().to_string(),
        OperationType::Import => "<import".cyan().to_string(),
    }
}

fn format_diff_type(diff_type: DiffType) -> String {
    match diff_type {
        DiffType::Create => "+".green().to_string(),
        DiffType::Update => "~".yellow().to_string(),
        DiffType::Replace => "-/+".magenta().to_string(),
        DiffType::Delete => "-".red().to_string(),
        DiffType::NoChange => " ".to_string(),
    }
}

fn color_status(status: &str) -> String {
    match status {
        s if s == OperationStatus::Applied.to_string() => s.green().to_string(),
        s if s == OperationStatus::Failed.to_string() => s.red().to_string(),
        s => s.yellow().to_string(),
    }
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_empty_plan_text() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let output = formatter.format_plan(&Plan::empty("abc"), None);
        assert!(output.contains("No changes required"));
    }

    #[test]
    fn test_json_message() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.message(MessageLevel::Error, "boom");
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "boom");
    }
}
