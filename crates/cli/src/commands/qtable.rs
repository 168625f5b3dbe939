//! Learned action values

use anyhow::{Context, Result};
use repair_lib::policy::QEntry;
use repair_lib::{ModelPersistence, PolicyConfig, PolicyEngine, QTable};
use std::path::Path;
use tabled::Tabled;

use crate::output::{color_status, color_value, print_json, print_table, print_warning, OutputFormat};

/// Row for the Q-table
#[derive(Tabled)]
struct QRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Q-value")]
    value: String,
    #[tabled(rename = "Best")]
    best: String,
}

/// Entries for one service, or all of them, in state order
pub fn filter_entries(q_table: &QTable, service: Option<&str>) -> Vec<QEntry> {
    q_table
        .entries()
        .into_iter()
        .filter(|e| service.map_or(true, |s| e.state.service_id == s))
        .collect()
}

/// Print the persisted Q-table
pub fn show_qtable(model_dir: &Path, service: Option<&str>, format: OutputFormat) -> Result<()> {
    let loaded = ModelPersistence::new(model_dir)
        .load()
        .with_context(|| format!("Failed to load learned state from {}", model_dir.display()))?;

    let entries = filter_entries(&loaded.q_table, service);

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => {
            if entries.is_empty() {
                print_warning("No Q-values found");
                return Ok(());
            }

            // Ties resolve exactly as the running agent resolves them
            let policy = PolicyEngine::new(&PolicyConfig::default())?.with_q_table(loaded.q_table);
            let rows: Vec<QRow> = entries
                .iter()
                .map(|e| QRow {
                    service: e.state.service_id.clone(),
                    cpu: e.state.cpu.as_str().to_string(),
                    memory: e.state.memory.as_str().to_string(),
                    health: color_status(e.state.health.as_str()),
                    action: e.action.to_string(),
                    value: color_value(e.value),
                    best: if policy.best_action(&e.state) == e.action {
                        "*".to_string()
                    } else {
                        String::new()
                    },
                })
                .collect();

            print_table(rows);
            println!("\nTotal: {} entries", entries.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repair_lib::policy::{DiscretizedState, HealthBucket, UsageLevel};
    use repair_lib::Action;

    #[test]
    fn test_filter_by_service() {
        let mut q_table = QTable::new();
        let api = DiscretizedState::new("api", UsageLevel::High, UsageLevel::Low, HealthBucket::Healthy);
        let db = DiscretizedState::new("db", UsageLevel::Low, UsageLevel::Low, HealthBucket::Healthy);
        q_table.set(api.clone(), Action::Restart, 1.0);
        q_table.set(api, Action::NoAction, 0.5);
        q_table.set(db, Action::ScaleUp, -2.0);

        assert_eq!(filter_entries(&q_table, None).len(), 3);
        let only_api = filter_entries(&q_table, Some("api"));
        assert_eq!(only_api.len(), 2);
        assert!(only_api.iter().all(|e| e.state.service_id == "api"));
        assert!(filter_entries(&q_table, Some("cache")).is_empty());
    }
}
