//! Repair and failure history

use anyhow::{Context, Result};
use repair_lib::{Action, FailureEvent, RepairAction, RepairHistory};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_status, color_value, format_percent, format_timestamp, print_info, print_json,
    print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Restarts")]
    restarts: u64,
}

#[derive(Tabled)]
struct RepairRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Reward")]
    reward: String,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Success")]
    success_rate: String,
    #[tabled(rename = "Avg reward")]
    mean_reward: String,
}

/// Aggregate outcome of one action across the history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSummary {
    pub action: Action,
    pub count: usize,
    pub successes: usize,
    pub mean_reward: f64,
}

/// Per-action totals in action order
pub fn summarize<'a>(repairs: impl IntoIterator<Item = &'a RepairAction>) -> Vec<ActionSummary> {
    let mut totals: BTreeMap<Action, (usize, usize, f64)> = BTreeMap::new();
    for repair in repairs {
        let entry = totals.entry(repair.action).or_insert((0, 0, 0.0));
        entry.0 += 1;
        entry.1 += usize::from(repair.success);
        entry.2 += repair.reward;
    }
    totals
        .into_iter()
        .map(|(action, (count, successes, reward_sum))| ActionSummary {
            action,
            count,
            successes,
            mean_reward: reward_sum / count as f64,
        })
        .collect()
}

#[derive(Serialize)]
struct HistoryReport<'a> {
    failures: Vec<&'a FailureEvent>,
    repairs: Vec<&'a RepairAction>,
    summary: Vec<ActionSummary>,
}

/// Print the newest `limit` failures and repairs, newest first
pub fn show_history(
    path: &Path,
    limit: usize,
    service: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    if !path.exists() {
        print_warning(&format!("No history file at {}", path.display()));
        return Ok(());
    }
    let file = RepairHistory::read_file(path)
        .with_context(|| format!("Failed to read history from {}", path.display()))?;

    let matches = |s: &str| service.map_or(true, |wanted| s == wanted);
    let failures: Vec<&FailureEvent> = file
        .failures
        .iter()
        .rev()
        .filter(|f| matches(f.service_id.as_str()))
        .take(limit)
        .collect();
    let all_repairs: Vec<&RepairAction> = file
        .repairs
        .iter()
        .rev()
        .filter(|r| matches(r.service_id.as_str()))
        .collect();
    let summary = summarize(all_repairs.iter().copied());
    let repairs: Vec<&RepairAction> = all_repairs.into_iter().take(limit).collect();

    match format {
        OutputFormat::Json => print_json(&HistoryReport {
            failures,
            repairs,
            summary,
        })?,
        OutputFormat::Table => {
            print_info(&format!(
                "Last updated {}",
                file.last_updated.format("%Y-%m-%d %H:%M:%S")
            ));

            println!("\nFailures");
            if failures.is_empty() {
                print_warning("No failures recorded");
            } else {
                print_table(
                    failures
                        .iter()
                        .map(|f| FailureRow {
                            time: format_timestamp(f.timestamp),
                            service: f.service_id.clone(),
                            kind: color_status(f.kind.as_str()),
                            restarts: f.restart_count,
                        })
                        .collect::<Vec<_>>(),
                );
            }

            println!("\nRepairs");
            if repairs.is_empty() {
                print_warning("No repairs recorded");
                return Ok(());
            }
            print_table(
                repairs
                    .iter()
                    .map(|r| RepairRow {
                        time: format_timestamp(r.timestamp),
                        service: r.service_id.clone(),
                        action: r.action.to_string(),
                        trigger: r.trigger.as_str().to_string(),
                        outcome: color_status(if r.success { "success" } else { "failed" }),
                        reward: color_value(r.reward),
                    })
                    .collect::<Vec<_>>(),
            );

            println!("\nBy action");
            print_table(
                summary
                    .iter()
                    .map(|s| SummaryRow {
                        action: s.action.to_string(),
                        count: s.count,
                        success_rate: format_percent(s.successes as f64 / s.count as f64),
                        mean_reward: color_value(s.mean_reward),
                    })
                    .collect::<Vec<_>>(),
            );
        }
    }

    Ok(())
}
