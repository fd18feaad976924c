use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::state::AppState;

/// Runs reconciliation on a fixed period until shutdown is requested.
pub async fn start_reconcile_worker(state: AppState) {
    let period = state.config.reconcile_interval;
    info!(period_secs = period.as_secs(), "🔁 Starting reconcile worker");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match state.reconciler.reconcile().await {
            Ok(report) if !report.anomalies.is_empty() => {
                warn!(anomalies = report.anomalies.len(), "Reconciliation found anomalies");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Reconciliation pass failed"),
        }
    }

    info!("🔁 Reconcile worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::common::keys::MediaKeys;
    use crate::common::retry::Backoff;
    use crate::config::settings::{AppConfig, MediaBackend};
    use crate::infrastructure::runner::{JobRunner, MemoryRunner};
    use crate::infrastructure::storage::MemoryStore;
    use crate::modules::jobs::model::{Job, JobStatus};
    use crate::modules::jobs::repository::MemoryJobRepository;

    fn config() -> AppConfig {
        AppConfig {
            server_port: 0,
            database_url: None,
            media_backend: MediaBackend::Memory,
            aws_region: "sa-east-1".into(),
            s3_bucket: "media".into(),
            s3_endpoint: None,
            mediaconvert_endpoint: None,
            mediaconvert_role: "role".into(),
            mediaconvert_preset: "preset".into(),
            mediaconvert_customer: "Amazon".into(),
            output_name_modifier: "_cli".into(),
            output_extension: "mp4".into(),
            keys: MediaKeys::new("uploads/", "outputs/").unwrap(),
            reconcile_interval: Duration::from_secs(30),
            reconcile_concurrency: 2,
            submit_backoff: Backoff {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                max_total_wait: Duration::from_millis(1),
            },
            download_url_ttl: Duration::from_secs(60),
            max_upload_bytes: 1024,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn worker_syncs_on_each_tick_and_stops_on_shutdown() {
        let store = MemoryStore::new("media");
        let runner = MemoryRunner::new();
        let state = AppState::new(
            config(),
            Arc::new(store.clone()),
            Arc::new(runner.clone()),
            Arc::new(MemoryJobRepository::new()),
        );

        store.insert("uploads/clip.mp4", Bytes::from_static(b"x")).await;
        let object = state.store.head("uploads/clip.mp4").await.unwrap().unwrap();
        let job: Job = state
            .orchestrator
            .submit_from_upload(&object, &state.config.job_template(), &state.shutdown)
            .await
            .unwrap();
        runner.set_status(&job.id, JobStatus::Progressing).await.unwrap();

        let worker = tokio::spawn(start_reconcile_worker(state.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            state.registry.require(&job.id).await.unwrap().job.status,
            JobStatus::Progressing
        );

        runner.set_status(&job.id, JobStatus::Complete).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            state.registry.require(&job.id).await.unwrap().job.status,
            JobStatus::Complete
        );
        assert_eq!(runner.get(&job.id).await.unwrap().status, JobStatus::Complete);

        state.shutdown.cancel();
        worker.await.unwrap();
    }
}
