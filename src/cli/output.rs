//! Output formatting for CLI commands.
//!
//! Every formatter returns a string. Text output uses `colored` and `tabled`;
//! JSON output serializes the report structs directly.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::model::{ChildResourceSpec, Operation, ParentState, PowerState};
use crate::reconcile::MutationPlan;
use crate::reconciler::{ApplyReport, DestroyReport, PlanReport, StatusReport};
use crate::state::{LockInfo, VmStateRecord};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Operation row for table display.
#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Child row for table display.
#[derive(Tabled)]
struct ChildRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Backing UUID")]
    backing: String,
    #[tabled(rename = "Settings")]
    settings: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    fn json(value: &impl Serialize) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats validation findings.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        if self.format == OutputFormat::Json {
            let json = serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            });
            return Self::json(&json);
        }

        let mut output = String::new();
        if result.is_valid() {
            let _ = writeln!(output, "{} Configuration is valid", "✓".green());
        } else {
            let _ = writeln!(output, "{} {} error(s):", "✗".red(), result.error_count());
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        if show_warnings && result.warning_count() > 0 {
            let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }
        output
    }

    /// Formats the result of `plan`.
    #[must_use]
    pub fn format_plan(&self, report: &PlanReport) -> String {
        if self.format == OutputFormat::Json {
            return Self::json(report);
        }

        let Some(vm_ref) = &report.vm_ref else {
            return format!(
                "\n{} VM {} will be cloned from template matching '{}', then configured.\n",
                "+".green(),
                report.name_label.bold(),
                report.template_name
            );
        };

        let mut output = format!("\nVM {} ({vm_ref})\n", report.name_label.bold());
        output.push_str(&Self::format_operations(&report.plan));
        output
    }

    fn format_operations(plan: &MutationPlan) -> String {
        if plan.is_empty() {
            return format!("{} No changes required, the VM is up to date.\n", "✓".green());
        }

        let rows: Vec<OperationRow> = plan
            .operations
            .iter()
            .enumerate()
            .map(|(i, op)| OperationRow {
                index: i + 1,
                action: Self::format_verb(op),
                target: op.target(),
                detail: Self::truncate(&op.detail(), 60),
            })
            .collect();

        let mut output = Table::new(rows).to_string();
        let _ = write!(
            output,
            "\n\nPlan: {} to create, {} to change, {} to destroy, {} to plug\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red(),
            plan.plug_count()
        );
        output
    }

    /// Formats the result of `apply`.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        if self.format == OutputFormat::Json {
            return Self::json(report);
        }

        let mut output = if report.is_success() {
            format!("{} Apply complete", "✓".green())
        } else {
            format!("{} Apply failed", "✗".red())
        };
        let _ = writeln!(output, " for VM {} ({})\n", report.vm_uuid, report.vm_ref);

        if report.created_vm {
            let _ = writeln!(output, "   Cloned from template");
        }
        let _ = writeln!(
            output,
            "   Operations: {}/{} completed",
            report.executed.len(),
            report.plan.len()
        );

        if let (Some(index), Some(error)) = (report.failed_index, &report.error) {
            let failed = report
                .plan
                .operations
                .get(index)
                .map_or_else(String::new, ToString::to_string);
            let _ = writeln!(
                output,
                "\n{} Operation {} failed: {failed}",
                "⚠".yellow(),
                index + 1
            );
            let _ = writeln!(output, "   {error}");
            let _ = writeln!(
                output,
                "   Earlier operations were kept; run apply again to continue."
            );
        }
        output
    }

    /// Formats the result of `status`.
    #[must_use]
    pub fn format_status(&self, report: &StatusReport) -> String {
        if self.format == OutputFormat::Json {
            return Self::json(report);
        }

        let mut output = format!("\nVM: {}\n\n", report.name_label.bold());

        let Some(observed) = &report.observed else {
            output.push_str("   Not created. Run 'xenvm apply' to create it.\n");
            return output;
        };

        let _ = writeln!(output, "   UUID: {}", report.vm_uuid.as_deref().unwrap_or("-"));
        let _ = writeln!(output, "   Power: {}", Self::format_power_state(observed.power_state));
        output.push_str(&Self::format_parent(observed));

        let drift = if report.pending_operations == 0 {
            "converged".green().to_string()
        } else {
            format!("{} pending operations", report.pending_operations)
                .yellow()
                .to_string()
        };
        let _ = writeln!(output, "\n   State: {drift}");
        let _ = writeln!(
            output,
            "   Config: {}{}",
            ConfigHasher::short_hash(&report.config_hash),
            if report.config_changed { " (changed since last apply)" } else { "" }
        );

        if let Some(last) = &report.last_run {
            let result = if last.is_success() { "✓".green() } else { "✗".red() };
            let _ = writeln!(
                output,
                "   Last run: {result} {} at {} ({}/{})",
                last.operation,
                last.timestamp.format("%Y-%m-%d %H:%M"),
                last.completed,
                last.planned
            );
        }
        if let Some(lock) = &report.lock {
            let _ = writeln!(output, "   {}", Self::describe_lock(lock));
        }
        output
    }

    fn format_parent(state: &ParentState) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "   vCPUs: {}/{}{}",
            state.vcpus.at_startup,
            state.vcpus.max,
            state
                .cores_per_socket
                .map_or_else(String::new, |c| format!(" ({c} per socket)"))
        );
        let _ = writeln!(
            output,
            "   Memory: {} MiB (dynamic {}-{} MiB)",
            state.memory.static_max >> 20,
            state.memory.dynamic_min >> 20,
            state.memory.dynamic_max >> 20
        );
        if let Some(mode) = state.boot_mode {
            let _ = writeln!(output, "   Boot: {mode} order={}", state.boot_order);
        }
        if let Some(iso) = &state.cdrom {
            let _ = writeln!(output, "   CD: {}", if iso.is_empty() { "empty" } else { iso });
        }

        if !state.children.is_empty() {
            let rows: Vec<ChildRow> = state.children.iter().map(Self::child_row).collect();
            let _ = write!(output, "\n{}\n", Table::new(rows));
        }
        output
    }

    fn child_row(child: &ChildResourceSpec) -> ChildRow {
        let settings = match child {
            ChildResourceSpec::Disk(disk) => {
                format!("{}{}", disk.mode, if disk.bootable { " bootable" } else { "" })
            }
            ChildResourceSpec::NetworkAdapter(adapter) => format!(
                "{} mtu={}",
                adapter.mac.as_deref().unwrap_or("-"),
                adapter.mtu.map_or_else(|| String::from("-"), |m| m.to_string())
            ),
        };
        ChildRow {
            kind: child.kind().to_string(),
            device: child.device().unwrap_or("-").to_string(),
            backing: child.backing_uuid().to_string(),
            settings,
        }
    }

    /// Formats the result of `destroy`.
    #[must_use]
    pub fn format_destroy(&self, report: &DestroyReport) -> String {
        if self.format == OutputFormat::Json {
            return Self::json(report);
        }
        match &report.vm_ref {
            Some(vm_ref) => {
                format!("{} Destroyed VM {} ({vm_ref})\n", "✓".green(), report.name_label)
            }
            None => format!("{} VM {} does not exist\n", "✓".green(), report.name_label),
        }
    }

    /// Formats the cached state record.
    #[must_use]
    pub fn format_state(&self, record: Option<&VmStateRecord>) -> String {
        if self.format == OutputFormat::Json {
            return Self::json(&record);
        }

        let Some(record) = record else {
            return String::from("No state recorded yet.\n");
        };

        let mut output = format!("\nState: {}\n\n", record.name_label.bold());
        let _ = writeln!(output, "   Version: {}", record.version);
        let _ = writeln!(output, "   VM UUID: {}", record.vm_uuid.as_deref().unwrap_or("-"));
        let _ = writeln!(output, "   VM ref: {}", record.vm_ref.as_deref().unwrap_or("-"));
        let _ = writeln!(
            output,
            "   Config hash: {}",
            ConfigHasher::short_hash(&record.config_hash)
        );
        let _ = writeln!(output, "   Last updated: {}", record.last_updated);

        if !record.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", record.history.len());
            for entry in record.history.iter().rev().take(5) {
                let status = if entry.is_success() { "✓".green() } else { "✗".red() };
                let _ = write!(
                    output,
                    "     {status} {} - {} ({}/{})",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.operation,
                    entry.completed,
                    entry.planned
                );
                if let Some(index) = entry.failed_index {
                    let _ = write!(output, " stopped at operation {}", index + 1);
                }
                output.push('\n');
            }
        }
        output
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        if self.format == OutputFormat::Json {
            return Self::json(&lock);
        }
        lock.map_or_else(
            || String::from("State is not locked.\n"),
            |lock| format!("{}\n", Self::describe_lock(lock)),
        )
    }

    fn describe_lock(lock: &LockInfo) -> String {
        if lock.is_expired() {
            format!("Lock {} held by {} has expired", lock.lock_id, lock.holder)
        } else {
            format!(
                "Locked by {} for {} (id {}, expires in {}s)",
                lock.holder,
                lock.operation,
                lock.lock_id,
                lock.remaining_secs()
            )
        }
    }

    fn format_verb(operation: &Operation) -> String {
        match operation {
            Operation::CreateChild { .. } => "+create".green().to_string(),
            Operation::UpdateChildField { .. } => "~update".yellow().to_string(),
            Operation::DeleteChild { .. } => "-delete".red().to_string(),
            Operation::PlugChild { .. } => "plug".cyan().to_string(),
            Operation::SetScalarField { .. } | Operation::SetMapField { .. } => {
                "~set".yellow().to_string()
            }
            Operation::SetCdrom { iso: Some(_) } => "~insert".yellow().to_string(),
            Operation::SetCdrom { iso: None } => "~eject".yellow().to_string(),
        }
    }

    fn format_power_state(state: PowerState) -> String {
        match state {
            PowerState::Running => "running".green().to_string(),
            PowerState::Halted => "halted".dimmed().to_string(),
            PowerState::Suspended | PowerState::Paused => state.to_string().yellow().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, marker: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                Self::json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }
}
