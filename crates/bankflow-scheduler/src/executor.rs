//! Worker pool, shutdown handling, and the per-use-case driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bankflow::{Result, Settings};
use bankflow_rag::{EmbeddingPipeline, RagPipeline};
use bankflow_store::{
    AuditRepo, JobRepo, JobState, PreprocessingRepo, ResultsRepo, SubtaskState,
};
use bankflow_vectorstores::VectorBackend;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::catalog::UseCase;
use crate::plan::PLAN;
use crate::subtasks::{run_subtask, SubtaskOutcome};

/// Grace window after which `running` jobs found at startup are orphans.
pub const ORPHAN_GRACE_SECS: i64 = 600;

/// Process-global shutdown event: atomic set/test, clone-shared.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything the subtasks need, shared across workers.
pub struct SchedulerContext {
    pub settings: Arc<Settings>,
    pub jobs: JobRepo,
    pub audit: AuditRepo,
    pub results: ResultsRepo,
    pub preprocessing: PreprocessingRepo,
    pub store: Arc<VectorBackend>,
    pub embedder: Arc<EmbeddingPipeline>,
    pub rag: Arc<RagPipeline>,
}

/// Per-use-case run result.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub use_case_key: String,
    pub job_id: i64,
    pub status: JobState,
}

/// The scheduler: bounded pool across use cases, strict order within one.
pub struct Scheduler {
    ctx: Arc<SchedulerContext>,
    shutdown: ShutdownFlag,
}

impl Scheduler {
    pub fn new(ctx: Arc<SchedulerContext>, shutdown: ShutdownFlag) -> Self {
        Self { ctx, shutdown }
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Startup reconciliation: abruptly killed runs leave `running` rows;
    /// anything older than the grace window is marked failed/"orphaned".
    pub fn reconcile_orphans(&self) -> Result<usize> {
        let reconciled = self.ctx.jobs.reconcile_orphans(ORPHAN_GRACE_SECS)?;
        if reconciled > 0 {
            warn!(reconciled, "Marked orphaned jobs as failed");
        }
        Ok(reconciled)
    }

    /// Run the full plan for every use case, `max_workers` at a time.
    /// Any interleaving across use cases is valid; a failure in one never
    /// affects the others.
    pub async fn run_all(&self, use_cases: Vec<UseCase>) -> Vec<PipelineRun> {
        let permits = Arc::new(Semaphore::new(self.ctx.settings.max_workers));
        let mut handles = Vec::with_capacity(use_cases.len());

        for uc in use_cases {
            let ctx = Arc::clone(&self.ctx);
            let shutdown = self.shutdown.clone();
            let permits = Arc::clone(&permits);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = permits.acquire().await else {
                    return None;
                };
                if shutdown.is_set() {
                    return None;
                }
                Some(run_use_case(ctx, uc, shutdown).await)
            }));
        }

        let mut runs = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Pipeline worker panicked"),
            }
        }
        runs
    }

    /// Run one use case's plan.
    pub async fn run_one(&self, use_case: UseCase) -> PipelineRun {
        run_use_case(Arc::clone(&self.ctx), use_case, self.shutdown.clone()).await
    }

    /// Create the pipeline job row, then run the plan on a detached task.
    /// Returns the job id immediately so callers can poll it.
    pub fn start_detached(&self, use_case: UseCase) -> Result<i64> {
        let job_id = create_pipeline_job(&self.ctx, &use_case)?;
        let ctx = Arc::clone(&self.ctx);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            run_with_job(ctx, use_case, shutdown, job_id).await;
        });
        Ok(job_id)
    }
}

fn create_pipeline_job(ctx: &SchedulerContext, uc: &UseCase) -> Result<i64> {
    ctx.jobs
        .create(&format!("pipeline_full_{}", uc.key), &json!({"use_case": uc.key}))
}

async fn run_use_case(
    ctx: Arc<SchedulerContext>,
    uc: UseCase,
    shutdown: ShutdownFlag,
) -> PipelineRun {
    let job_id = match create_pipeline_job(&ctx, &uc) {
        Ok(id) => id,
        Err(e) => {
            error!(use_case = %uc.key, error = %e, "Could not create pipeline job");
            return PipelineRun {
                use_case_key: uc.key,
                job_id: -1,
                status: JobState::Failed,
            };
        }
    };
    run_with_job(ctx, uc, shutdown, job_id).await
}

async fn run_with_job(
    ctx: Arc<SchedulerContext>,
    uc: UseCase,
    shutdown: ShutdownFlag,
    job_id: i64,
) -> PipelineRun {
    let _ = ctx.jobs.update_status(job_id, JobState::Running, None);
    let _ = ctx.results.set_use_case_status(&uc.key, "running");
    info!(use_case = %uc.key, job_id, "Pipeline started");

    let timeout = Duration::from_secs(ctx.settings.subtask_timeout_secs);
    let mut final_status = JobState::Completed;
    let mut completed = 0usize;

    for (index, subtask) in PLAN.iter().enumerate() {
        // The flag is checked between subtasks; in-flight work finishes.
        if shutdown.is_set() {
            warn!(use_case = %uc.key, subtask = subtask.name(), "Shutdown requested; cancelling plan");
            let _ = ctx.results.subtask_finished(
                &uc.key,
                subtask.name(),
                SubtaskState::Fail,
                None,
                &[],
                None,
                Some("cancelled"),
            );
            let _ = ctx.jobs.update_status(job_id, JobState::Cancelled, Some("cancelled"));
            final_status = JobState::Cancelled;
            break;
        }

        let _ = ctx.results.subtask_started(&uc.key, subtask.name());

        let outcome = match tokio::time::timeout(
            timeout,
            run_subtask(Arc::clone(&ctx), uc.clone(), *subtask),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => SubtaskOutcome::fail("timeout"),
        };

        let _ = ctx.results.subtask_finished(
            &uc.key,
            subtask.name(),
            outcome.status,
            outcome.input_hash.as_deref(),
            &outcome.artifacts,
            outcome.metrics.as_ref(),
            outcome.error.as_deref(),
        );

        if outcome.status == SubtaskState::Fail {
            let detail = outcome.error.unwrap_or_else(|| "unknown".to_string());
            error!(use_case = %uc.key, subtask = subtask.name(), error = %detail, "Subtask failed; aborting plan");
            ctx.audit.record(
                "pipeline_failed",
                &format!("{}: {} failed: {detail}", uc.key, subtask.name()),
                "error",
            );
            let _ = ctx.jobs.update_status(
                job_id,
                JobState::Failed,
                Some(&format!("{} failed: {detail}", subtask.name())),
            );
            final_status = JobState::Failed;
            break;
        }

        completed = index + 1;
        let _ = ctx
            .jobs
            .update_progress(job_id, (completed * 100 / PLAN.len()) as i64);
    }

    match final_status {
        JobState::Completed => {
            let _ = ctx.jobs.update_result(
                job_id,
                &json!({"subtasks_completed": completed, "use_case": uc.key}),
            );
            let _ = ctx.results.set_use_case_status(&uc.key, "completed");
            ctx.audit.record(
                "pipeline_completed",
                &format!("Pipeline completed for {}", uc.key),
                "system",
            );
            info!(use_case = %uc.key, job_id, "Pipeline complete");
        }
        JobState::Cancelled => {
            let _ = ctx.results.set_use_case_status(&uc.key, "cancelled");
        }
        _ => {
            let _ = ctx.results.set_use_case_status(&uc.key, "failed");
        }
    }

    PipelineRun {
        use_case_key: uc.key,
        job_id,
        status: final_status,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bankflow_cache::RagCache;
    use bankflow_ollama::OllamaClient;
    use bankflow_rag::{HashingTfIdfEmbeddings, RagConfig};
    use bankflow_store::{init_admin_db, init_preprocessing_db, init_results_db, Database};
    use bankflow_vectorstores::SqliteVectorStore;

    fn context(base: &std::path::Path) -> Arc<SchedulerContext> {
        let settings = Arc::new(Settings::for_base_dir(base));
        let admin = Database::new(settings.admin_db());
        init_admin_db(&admin).unwrap();
        let results_db = Database::new(settings.results_db());
        init_results_db(&results_db).unwrap();
        let pre_db = Database::new(settings.preprocessing_db());
        init_preprocessing_db(&pre_db).unwrap();

        let store = Arc::new(VectorBackend::Sqlite(SqliteVectorStore::in_memory().unwrap()));
        let cache = Arc::new(RagCache::in_memory().unwrap());
        let embedder = Arc::new(EmbeddingPipeline::with_embedder(
            Arc::new(HashingTfIdfEmbeddings::new()),
            Arc::clone(&cache),
        ));
        let client = Arc::new(OllamaClient::new("http://127.0.0.1:9", "llama3.2"));
        let rag = Arc::new(RagPipeline::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&client),
            Arc::clone(&cache),
            RagConfig::default(),
        ));

        Arc::new(SchedulerContext {
            settings,
            jobs: JobRepo::new(admin.clone()),
            audit: AuditRepo::new(admin),
            results: ResultsRepo::new(results_db),
            preprocessing: PreprocessingRepo::new(pre_db),
            store,
            embedder,
            rag,
        })
    }

    fn seed_use_case_data(base: &std::path::Path, key: &str) {
        let data_dir = base.join("use_cases").join(key);
        std::fs::create_dir_all(&data_dir).unwrap();
        let mut body = String::from("amount,velocity,is_fraud\n");
        for i in 0..120 {
            let label = i32::from(i % 3 == 0);
            let base_v = if label == 1 { 900.0 } else { 20.0 };
            body.push_str(&format!("{},{},{}\n", base_v + i as f64, base_v / 10.0, label));
        }
        std::fs::write(data_dir.join("transactions.csv"), body).unwrap();
        std::fs::write(
            data_dir.join("policy.md"),
            "Fraud monitoring rules escalate wire transfers above thresholds to analysts.",
        )
        .unwrap();
    }

    fn fraud_uc() -> UseCase {
        UseCase::new(
            "uc_fr_01",
            "Fraud Management",
            "Risk",
            "fraud",
            Some("is_fraud"),
        )
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_pipeline_completes() {
        let dir = tempfile::tempdir().unwrap();
        seed_use_case_data(dir.path(), "uc_fr_01");
        let ctx = context(dir.path());
        let scheduler = Scheduler::new(Arc::clone(&ctx), ShutdownFlag::new());

        let run = scheduler.run_one(fraud_uc()).await;
        assert_eq!(run.status, JobState::Completed, "pipeline should complete");

        // Job row reflects the invariants: terminal completed, progress 100.
        let job = ctx.jobs.find_by_id(run.job_id).unwrap();
        assert_eq!(job.status, JobState::Completed);
        assert_eq!(job.progress, 100);

        // Every subtask recorded ok (or skip).
        let runs = ctx.results.list_subtask_runs("uc_fr_01").unwrap();
        assert_eq!(runs.len(), PLAN.len());
        assert!(runs.iter().all(|r| r.status.succeeded()));

        // Canonical artifacts exist.
        let out = ctx.settings.output_dir().join("uc_fr_01");
        for artifact in [
            "splits/train.csv",
            "clean.csv",
            "models/model.json",
            "reports/model_evaluation.json",
            "reports/governance_scorecard.json",
            "rag/chunks.json",
            "summary.json",
            "full_report.json",
        ] {
            assert!(out.join(artifact).exists(), "missing {artifact}");
        }

        // The collection is queryable afterwards.
        let stats = ctx.store.stats().await.unwrap();
        assert_eq!(stats.total_collections, 1);
        assert!(stats.total_documents > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resume_skips_completed_subtasks() {
        let dir = tempfile::tempdir().unwrap();
        seed_use_case_data(dir.path(), "uc_fr_01");
        let ctx = context(dir.path());
        let scheduler = Scheduler::new(Arc::clone(&ctx), ShutdownFlag::new());

        let first = scheduler.run_one(fraud_uc()).await;
        assert_eq!(first.status, JobState::Completed);

        // Second run with unchanged inputs: deterministic subtasks skip.
        let second = scheduler.run_one(fraud_uc()).await;
        assert_eq!(second.status, JobState::Completed);
        let runs = ctx.results.list_subtask_runs("uc_fr_01").unwrap();
        let skipped = runs.iter().filter(|r| r.status == SubtaskState::Skip).count();
        assert!(skipped >= 6, "expected most subtasks to skip, got {skipped}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_data_fails_only_that_use_case() {
        let dir = tempfile::tempdir().unwrap();
        seed_use_case_data(dir.path(), "uc_fr_01");
        // uc_cr_02 has no data at all.
        let ctx = context(dir.path());
        let scheduler = Scheduler::new(Arc::clone(&ctx), ShutdownFlag::new());

        let credit = UseCase::new("uc_cr_02", "Credit", "Risk", "credit", Some("default")).unwrap();
        let runs = scheduler.run_all(vec![fraud_uc(), credit]).await;
        assert_eq!(runs.len(), 2);

        let by_key: std::collections::HashMap<_, _> = runs
            .iter()
            .map(|r| (r.use_case_key.as_str(), r.status))
            .collect();
        assert_eq!(by_key["uc_fr_01"], JobState::Completed);
        assert_eq!(by_key["uc_cr_02"], JobState::Failed);

        // The failed use case aborted at its first subtask.
        let credit_runs = ctx.results.list_subtask_runs("uc_cr_02").unwrap();
        assert_eq!(credit_runs.len(), 1);
        assert_eq!(credit_runs[0].status, SubtaskState::Fail);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_cancels_before_next_subtask() {
        let dir = tempfile::tempdir().unwrap();
        seed_use_case_data(dir.path(), "uc_fr_01");
        let ctx = context(dir.path());
        let shutdown = ShutdownFlag::new();
        let scheduler = Scheduler::new(Arc::clone(&ctx), shutdown.clone());

        // Flag set before launch: the first subtask check cancels the plan.
        shutdown.set();
        let run = scheduler.run_one(fraud_uc()).await;
        assert_eq!(run.status, JobState::Cancelled);

        let job = ctx.jobs.find_by_id(run.job_id).unwrap();
        assert_eq!(job.status, JobState::Cancelled);
        assert!(job.completed_at.is_some());
        assert_ne!(job.progress, 100);

        let runs = ctx.results.list_subtask_runs("uc_fr_01").unwrap();
        assert_eq!(runs[0].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_subtask_ordering_recorded() {
        let dir = tempfile::tempdir().unwrap();
        seed_use_case_data(dir.path(), "uc_fr_01");
        let ctx = context(dir.path());
        let scheduler = Scheduler::new(Arc::clone(&ctx), ShutdownFlag::new());
        scheduler.run_one(fraud_uc()).await;

        // Insertion order in subtask_runs mirrors the plan: a subtask only
        // ever starts after its predecessor succeeded.
        let runs = ctx.results.list_subtask_runs("uc_fr_01").unwrap();
        let names: Vec<&str> = runs.iter().map(|r| r.subtask.as_str()).collect();
        let expected: Vec<&str> = PLAN.iter().map(|s| s.name()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_shutdown_flag() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        let clone = flag.clone();
        clone.set();
        assert!(flag.is_set());
    }
}
