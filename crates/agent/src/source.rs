//! Metric snapshots sampled from the Prometheus HTTP API

use anyhow::{Context, Result};
use repair_lib::engine::async_trait;
use repair_lib::{HealthStatus, MetricSnapshot, MetricsSource};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// PromQL templates, one per snapshot field; `{service}` is substituted.
///
/// CPU is cores in use over the container's CPU quota, so an unlimited
/// container yields no sample and reads as 0.0.
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    pub cpu_usage: String,
    pub memory_usage: String,
    pub disk_usage: String,
    pub network_error_rate: String,
    pub restart_count: String,
    pub health: String,
    pub p95_response_time: String,
    pub error_rate: String,
    pub request_rate: String,
}

impl Default for QueryTemplates {
    fn default() -> Self {
        Self {
            cpu_usage: r#"sum(rate(container_cpu_usage_seconds_total{container_label_com_docker_compose_service="{service}"}[1m])) / (sum(container_spec_cpu_quota{container_label_com_docker_compose_service="{service}"}) / sum(container_spec_cpu_period{container_label_com_docker_compose_service="{service}"}))"#.to_string(),
            memory_usage: r#"sum(container_memory_usage_bytes{container_label_com_docker_compose_service="{service}"}) / sum(container_spec_memory_limit_bytes{container_label_com_docker_compose_service="{service}"})"#.to_string(),
            disk_usage: "1 - min(node_filesystem_avail_bytes / node_filesystem_size_bytes)".to_string(),
            network_error_rate: r#"sum(rate(container_network_receive_errors_total{container_label_com_docker_compose_service="{service}"}[5m]))"#.to_string(),
            restart_count: r#"max(container_restart_count{container_label_com_docker_compose_service="{service}"})"#.to_string(),
            health: r#"min(up{service="{service}"})"#.to_string(),
            p95_response_time: r#"histogram_quantile(0.95, sum by (le) (rate(http_request_duration_seconds_bucket{service="{service}"}[5m])))"#.to_string(),
            error_rate: r#"sum(rate(http_requests_total{service="{service}",status=~"5.."}[5m])) / sum(rate(http_requests_total{service="{service}"}[5m]))"#.to_string(),
            request_rate: r#"sum(rate(http_requests_total{service="{service}"}[5m]))"#.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    /// `[unix_time, "value"]`
    value: (f64, String),
}

/// Samples services through instant queries against Prometheus
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    client: Client,
    base_url: String,
    queries: QueryTemplates,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            queries: QueryTemplates::default(),
        })
    }

    pub fn with_queries(mut self, queries: QueryTemplates) -> Self {
        self.queries = queries;
        self
    }

    /// Run one instant query and return the first sample's value
    pub async fn query(&self, promql: &str) -> Result<Option<f64>> {
        let response = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", promql)])
            .send()
            .await
            .context("Failed to send query")?;

        if !response.status().is_success() {
            anyhow::bail!("Prometheus error ({})", response.status());
        }

        let body: QueryResponse = response.json().await.context("Failed to parse response")?;
        if body.status != "success" {
            anyhow::bail!("Prometheus query status {}", body.status);
        }

        let value = body
            .data
            .and_then(|d| d.result.into_iter().next())
            .map(|sample| sample.value.1.parse::<f64>())
            .transpose()
            .context("Non-numeric sample value")?;
        Ok(value.filter(|v| v.is_finite()))
    }

    /// Substitute the service and query; anything that goes wrong is `None`
    async fn field(&self, template: &str, service_id: &str) -> Option<f64> {
        let promql = template.replace("{service}", service_id);
        match self.query(&promql).await {
            Ok(value) => value,
            Err(e) => {
                debug!(service = %service_id, query = %promql, error = %e, "Prometheus query failed");
                None
            }
        }
    }
}

/// Ratios can overshoot 1.0 (bursting past a quota, scrape skew); the
/// snapshot contract is [0, 1]
fn unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn health_from_up(value: Option<f64>) -> HealthStatus {
    match value {
        Some(v) if v >= 1.0 => HealthStatus::Healthy,
        Some(_) => HealthStatus::Down,
        None => HealthStatus::Unknown,
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn sample(&self, service_id: &str, _tick: u64) -> MetricSnapshot {
        let q = &self.queries;
        let mut snapshot =
            MetricSnapshot::unavailable(service_id, chrono::Utc::now().timestamp());

        snapshot.cpu_usage = self.field(&q.cpu_usage, service_id).await.map_or(0.0, unit);
        snapshot.memory_usage = self
            .field(&q.memory_usage, service_id)
            .await
            .map_or(0.0, unit);
        snapshot.disk_usage = self.field(&q.disk_usage, service_id).await.map_or(0.0, unit);
        snapshot.network_error_rate = self
            .field(&q.network_error_rate, service_id)
            .await
            .map_or(0.0, |v| v.max(0.0));
        snapshot.restart_count = self
            .field(&q.restart_count, service_id)
            .await
            .map(|v| v.max(0.0) as u64)
            .unwrap_or(0);
        snapshot.health_status = health_from_up(self.field(&q.health, service_id).await);
        snapshot.p95_response_time = self
            .field(&q.p95_response_time, service_id)
            .await
            .map_or(0.0, |v| v.max(0.0));
        snapshot.error_rate = self.field(&q.error_rate, service_id).await.map_or(0.0, unit);
        snapshot.request_rate = self
            .field(&q.request_rate, service_id)
            .await
            .map_or(0.0, |v| v.max(0.0));
        snapshot
    }
}
