use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::services::executor::DcaExecutor;

/// Periodic driver for the executor. One tick at a time; a slow tick simply
/// delays the next one instead of overlapping it.
pub async fn start_executor_job(executor: Arc<DcaExecutor>, tick_secs: u64) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(tick_secs));

        loop {
            interval.tick().await;
            if let Err(e) = executor.run_once(Utc::now()).await {
                tracing::error!("Executor tick failed: {}", e);
            }
        }
    });
}
