use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::settings::AppConfig;
use crate::infrastructure::runner::JobRunner;
use crate::infrastructure::storage::MediaStore;
use crate::modules::jobs::orchestrator::SubmissionOrchestrator;
use crate::modules::jobs::reconciler::StatusReconciler;
use crate::modules::jobs::registry::JobRegistry;
use crate::modules::jobs::repository::JobRepository;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn MediaStore>,
    pub runner: Arc<dyn JobRunner>,
    pub registry: JobRegistry,
    pub orchestrator: SubmissionOrchestrator,
    pub reconciler: StatusReconciler,
    /// Fired once the process starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn MediaStore>,
        runner: Arc<dyn JobRunner>,
        repository: Arc<dyn JobRepository>,
    ) -> Self {
        let registry = JobRegistry::new(repository);
        let orchestrator = SubmissionOrchestrator::new(
            store.clone(),
            runner.clone(),
            registry.clone(),
            config.keys.clone(),
            config.submit_backoff.clone(),
        );
        let reconciler = StatusReconciler::new(
            store.clone(),
            runner.clone(),
            registry.clone(),
            config.keys.clone(),
            config.reconcile_concurrency,
        );

        Self {
            config: Arc::new(config),
            store,
            runner,
            registry,
            orchestrator,
            reconciler,
            shutdown: CancellationToken::new(),
        }
    }
}
