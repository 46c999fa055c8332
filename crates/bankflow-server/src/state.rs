//! Shared application state and its assembly.

use std::sync::Arc;

use bankflow::core::crypto::Cipher;
use bankflow::{Result, Settings};
use bankflow_cache::RagCache;
use bankflow_ollama::OllamaClient;
use bankflow_rag::{EmbeddingPipeline, RagConfig, RagPipeline};
use bankflow_scheduler::{Scheduler, SchedulerContext, ShutdownFlag, UseCase};
use bankflow_store::{
    init_admin_db, init_preprocessing_db, init_results_db, AlertRepo, AuditRepo, Database,
    DatasetRepo, IntegrationRepo, JobRepo, PreprocessingRepo, ResultsRepo, Text2SqlRepo,
};
use bankflow_training::TrainingService;
use bankflow_vectorstores::{VectorBackend, VectorEngine};

use crate::middleware::RateLimiter;

/// Shared state for all handlers. Clones are cheap; everything heavy is
/// behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub datasets: DatasetRepo,
    pub jobs: JobRepo,
    pub alerts: AlertRepo,
    pub audit: AuditRepo,
    pub integrations: IntegrationRepo,
    pub text2sql: Text2SqlRepo,
    pub results: ResultsRepo,
    pub preprocessing: PreprocessingRepo,
    pub rate_limiter: Arc<RateLimiter>,
    pub ollama: Arc<OllamaClient>,
    pub rag: Arc<RagPipeline>,
    pub store: Arc<VectorBackend>,
    pub cache: Arc<RagCache>,
    pub training: TrainingService,
    pub scheduler: Arc<Scheduler>,
    pub shutdown: ShutdownFlag,
    pub use_cases: Arc<Vec<UseCase>>,
}

impl AppState {
    /// Build the full state: initialize schemas, load the cipher, open the
    /// vector store, and pick the embedding method.
    pub async fn build(settings: Settings, engine: VectorEngine) -> Result<Self> {
        let settings = Arc::new(settings);

        let admin_db = Database::new(settings.admin_db());
        init_admin_db(&admin_db)?;
        let results_db = Database::new(settings.results_db());
        init_results_db(&results_db)?;
        let preprocessing_db = Database::new(settings.preprocessing_db());
        init_preprocessing_db(&preprocessing_db)?;

        let cipher = Arc::new(Cipher::from_settings(&settings)?);
        let datasets = DatasetRepo::new(admin_db.clone());
        let jobs = JobRepo::new(admin_db.clone());
        let alerts = AlertRepo::new(admin_db.clone());
        let audit = AuditRepo::new(admin_db.clone());
        let integrations = IntegrationRepo::new(admin_db.clone(), cipher);
        let text2sql = Text2SqlRepo::new(admin_db);
        let results = ResultsRepo::new(results_db);
        let preprocessing = PreprocessingRepo::new(preprocessing_db);

        let ollama = Arc::new(OllamaClient::new(
            settings.ollama_base_url.clone(),
            settings.ollama_model.clone(),
        ));
        let cache = Arc::new(RagCache::open(&settings.rag_cache_db())?);
        let store = Arc::new(VectorBackend::open(engine, &settings)?);
        let embedder = Arc::new(
            EmbeddingPipeline::build(Arc::clone(&ollama), Arc::clone(&cache)).await,
        );
        let rag = Arc::new(RagPipeline::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&ollama),
            Arc::clone(&cache),
            RagConfig::default(),
        ));

        let training = TrainingService::new(
            Arc::clone(&settings),
            datasets.clone(),
            jobs.clone(),
            audit.clone(),
        );

        let shutdown = ShutdownFlag::new();
        let scheduler_ctx = Arc::new(SchedulerContext {
            settings: Arc::clone(&settings),
            jobs: jobs.clone(),
            audit: audit.clone(),
            results: results.clone(),
            preprocessing: preprocessing.clone(),
            store: Arc::clone(&store),
            embedder,
            rag: Arc::clone(&rag),
        });
        let scheduler = Arc::new(Scheduler::new(scheduler_ctx, shutdown.clone()));

        // Startup reconciliation for jobs left running by an abrupt kill.
        scheduler.reconcile_orphans()?;

        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit));

        Ok(Self {
            settings,
            datasets,
            jobs,
            alerts,
            audit,
            integrations,
            text2sql,
            results,
            preprocessing,
            rate_limiter,
            ollama,
            rag,
            store,
            cache,
            training,
            scheduler,
            shutdown,
            use_cases: Arc::new(bankflow_scheduler::default_catalog()),
        })
    }

    /// Locate a use case in the static registry.
    pub fn find_use_case(&self, key: &str) -> Option<UseCase> {
        self.use_cases.iter().find(|uc| uc.key == key).cloned()
    }
}
