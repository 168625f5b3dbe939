//! Model manifest and artifact verification

use anyhow::{Context, Result};
use repair_lib::training::Manifest;
use repair_lib::{ModelGroup, ModelPersistence};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    format_bytes, format_percent, print_info, print_json, print_success, print_table,
    print_warning, short_digest, OutputFormat,
};

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct ArtifactRow {
    #[tabled(rename = "Artifact")]
    name: String,
    #[tabled(rename = "SHA-256")]
    digest: String,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct ImportanceRow {
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Importance")]
    importance: String,
}

/// What a verified load reveals about the model group
#[derive(Debug, Serialize)]
pub struct ModelDetails {
    pub version: String,
    pub trees: usize,
    pub horizon: usize,
    pub anomaly_threshold: f64,
    pub contamination: f64,
    /// Highest first
    pub feature_importances: Vec<(String, f64)>,
}

impl ModelDetails {
    pub fn from_group(group: &ModelGroup) -> Self {
        let mut feature_importances: Vec<(String, f64)> =
            group.classifier.feature_importances().into_iter().collect();
        feature_importances.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self {
            version: group.version_label(),
            trees: group.classifier.n_trees(),
            horizon: group.classifier.horizon(),
            anomaly_threshold: group.detector.threshold(),
            contamination: group.detector.contamination(),
            feature_importances,
        }
    }
}

#[derive(Serialize)]
struct ModelsReport<'a> {
    manifest: &'a Manifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ModelDetails>,
}

/// Show the manifest; with `verify`, load every artifact and check it
pub fn show_models(model_dir: &Path, verify: bool, format: OutputFormat) -> Result<()> {
    let persistence = ModelPersistence::new(model_dir);
    let Some(manifest) = persistence
        .read_manifest()
        .with_context(|| format!("Failed to read manifest in {}", model_dir.display()))?
    else {
        print_warning(&format!("No saved models in {}", model_dir.display()));
        return Ok(());
    };

    let details = if verify {
        let loaded = persistence
            .load()
            .context("Artifact verification failed")?;
        loaded.models.as_ref().map(ModelDetails::from_group)
    } else {
        None
    };

    match format {
        OutputFormat::Json => print_json(&ModelsReport {
            manifest: &manifest,
            details,
        })?,
        OutputFormat::Table => {
            let version = manifest
                .model_version
                .map(|v| format!("v{}", v))
                .unwrap_or_else(|| "none".to_string());
            let trained_at = manifest
                .trained_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            let positive_share = if manifest.training_samples > 0 {
                format_percent(manifest.positive_labels as f64 / manifest.training_samples as f64)
            } else {
                "-".to_string()
            };

            print_table(vec![
                FieldRow {
                    field: "Model version".to_string(),
                    value: version,
                },
                FieldRow {
                    field: "Trained at".to_string(),
                    value: trained_at,
                },
                FieldRow {
                    field: "Training samples".to_string(),
                    value: manifest.training_samples.to_string(),
                },
                FieldRow {
                    field: "Failure labels".to_string(),
                    value: format!("{} ({})", manifest.positive_labels, positive_share),
                },
                FieldRow {
                    field: "Saved at".to_string(),
                    value: manifest.saved_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                },
            ]);

            let artifacts: Vec<ArtifactRow> = manifest
                .artifacts
                .iter()
                .map(|(name, entry)| ArtifactRow {
                    name: name.clone(),
                    digest: short_digest(&entry.sha256),
                    size: format_bytes(entry.size_bytes as u64),
                })
                .collect();
            println!();
            print_table(artifacts);

            if verify {
                print_success("All artifacts match their checksums");
            }
            match details {
                Some(details) => {
                    print_info(&format!(
                        "{} trees, horizon {}, anomaly threshold {:.3}",
                        details.trees, details.horizon, details.anomaly_threshold
                    ));
                    let rows: Vec<ImportanceRow> = details
                        .feature_importances
                        .iter()
                        .map(|(feature, importance)| ImportanceRow {
                            feature: feature.clone(),
                            importance: format!("{:.3}", importance),
                        })
                        .collect();
                    print_table(rows);
                }
                None if verify => print_info("Only the Q-table is saved; no model group yet"),
                None => {}
            }
        }
    }

    Ok(())
}
