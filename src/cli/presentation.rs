//! CLI presentation: text tables and JSON renderings of reports.

use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use serde_json::json;

use crate::error::{PublishError, UpgradeError};
use crate::events::UpgradeHistoryEvent;
use crate::upgrade::{StepReport, StepStatus, Upgrade, UpgradeReport};

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, UpgradeError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| PublishError::Serialization(e.to_string()).into())
}

fn step_rows(table: &mut Table, section: &str, steps: &[StepReport]) {
    for step in steps {
        table.add_row(vec![
            section.to_string(),
            step.step_id.clone(),
            step.result.status.to_string(),
            if step.result.action_performed { "yes" } else { "no" }.to_string(),
            step.attempts.to_string(),
            format!("{} ms", step.duration_ms),
            step.result.message.clone().unwrap_or_default(),
        ]);
    }
}

pub fn format_report(report: &UpgradeReport, format: &str) -> Result<String, UpgradeError> {
    if format == "json" {
        return to_json(report);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["", "Step", "Status", "Action", "Attempts", "Duration", "Message"]);
    step_rows(&mut table, "main", &report.steps);
    step_rows(&mut table, "cleanup", &report.cleanup);
    Ok(format!(
        "Upgrade {} ({}): {}\n{}",
        report.upgrade_name, report.run_id, report.overall, table
    ))
}

pub fn format_upgrade_list(upgrades: &[&Upgrade], format: &str) -> Result<String, UpgradeError> {
    if format == "json" {
        let arr: Vec<_> = upgrades
            .iter()
            .map(|u| {
                json!({
                    "name": u.name(),
                    "steps": u.step_ids(),
                    "cleanup": u.cleanup_steps().iter().map(|s| s.id()).collect::<Vec<_>>(),
                })
            })
            .collect();
        return to_json(&arr);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Upgrade", "Steps", "Cleanup"]);
    for upgrade in upgrades {
        let cleanup: Vec<&str> = upgrade.cleanup_steps().iter().map(|s| s.id()).collect();
        table.add_row(vec![
            upgrade.name().to_string(),
            upgrade.step_ids().join("\n"),
            cleanup.join("\n"),
        ]);
    }
    Ok(table.to_string())
}

fn count(report: &UpgradeReport, status: StepStatus) -> usize {
    report.steps.iter().filter(|s| s.result.status == status).count()
}

pub fn format_history(events: &[UpgradeHistoryEvent], format: &str) -> Result<String, UpgradeError> {
    if format == "json" {
        return to_json(&events);
    }
    if events.is_empty() {
        return Ok("No upgrade history recorded.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Finished", "Upgrade", "Run", "Outcome", "Steps (ok/failed/skipped)"]);
    for event in events {
        let report = &event.report;
        table.add_row(vec![
            report.finished_at.clone(),
            report.upgrade_name.clone(),
            report.run_id.clone(),
            report.overall.to_string(),
            format!(
                "{}/{}/{}",
                count(report, StepStatus::Succeeded),
                count(report, StepStatus::Failed),
                count(report, StepStatus::Skipped)
            ),
        ]);
    }
    Ok(table.to_string())
}
