//! Action executor used by the agent

use repair_lib::engine::async_trait;
use repair_lib::{Action, ActionExecutor};
use tracing::info;

/// Logs each decision and reports success without touching the service
#[derive(Debug, Default, Clone)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, service_id: &str, action: Action) -> bool {
        info!(service = %service_id, action = %action, "Dry run: action not executed");
        true
    }
}
