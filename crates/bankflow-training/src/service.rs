//! Training service with job lifecycle management.
//!
//! Runs as a background worker against a queued job. All stages execute on
//! one worker; failures land in the job row, never in the caller.
//! Cancellation is observed between stages only, not mid-fit.

use std::path::PathBuf;
use std::sync::Arc;

use bankflow::{Error, Result, Settings};
use bankflow_analysis::Frame;
use bankflow_store::{AuditRepo, DatasetRepo, JobRepo, JobState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::metrics::{accuracy, confusion_matrix, roc_auc, weighted_prf};
use crate::model::{Algorithm, ModelArtifact, TrainedModel, TrainingData};
use crate::RANDOM_STATE;

/// Training job parameters.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub dataset_id: i64,
    pub target_column: String,
    pub algorithm: String,
    pub test_size: f64,
}

impl TrainingConfig {
    /// Parse from a job's `config_json`.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Self {
            dataset_id: value
                .get("dataset_id")
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::validation("dataset_id is required"))?,
            target_column: value
                .get("target_column")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("target_column is required"))?
                .to_string(),
            algorithm: value
                .get("algorithm")
                .and_then(Value::as_str)
                .unwrap_or("random_forest")
                .to_string(),
            test_size: value
                .get("test_size")
                .and_then(Value::as_f64)
                .unwrap_or(0.2),
        })
    }
}

/// Background trainer: loads the dataset, fits, evaluates, persists the
/// model, and closes out the job row.
#[derive(Clone)]
pub struct TrainingService {
    settings: Arc<Settings>,
    datasets: DatasetRepo,
    jobs: JobRepo,
    audit: AuditRepo,
}

impl TrainingService {
    pub fn new(
        settings: Arc<Settings>,
        datasets: DatasetRepo,
        jobs: JobRepo,
        audit: AuditRepo,
    ) -> Self {
        Self {
            settings,
            datasets,
            jobs,
            audit,
        }
    }

    /// Run the training job to completion. Errors are recorded on the job
    /// row; this function itself never fails the caller.
    pub fn run(&self, job_id: i64, config: &TrainingConfig) {
        if let Err(e) = self.run_inner(job_id, config) {
            error!(job_id, error = %e, "Training job failed");
            let _ = self
                .jobs
                .update_status(job_id, JobState::Failed, Some(&e.to_string()));
            self.audit.record(
                "training_failed",
                &format!("Job {job_id}: {e}"),
                "error",
            );
        }
    }

    fn cancelled(&self, job_id: i64) -> bool {
        self.jobs
            .find_by_id(job_id)
            .map(|j| j.status == JobState::Cancelled)
            .unwrap_or(false)
    }

    fn run_inner(&self, job_id: i64, config: &TrainingConfig) -> Result<()> {
        let algorithm = Algorithm::parse(&config.algorithm)?;
        if !(0.05..=0.9).contains(&config.test_size) {
            return Err(Error::validation(format!(
                "test_size must be in [0.05, 0.9], got {}",
                config.test_size
            )));
        }

        self.jobs.update_status(job_id, JobState::Running, None)?;

        let file_path = self.datasets.get_file_path(config.dataset_id)?;
        let frame = Frame::load(
            std::path::Path::new(&file_path),
            self.settings.sample_limit,
        )?;
        let data = TrainingData::from_frame(&frame, &config.target_column)?;
        let (train, test) = data.split(config.test_size, RANDOM_STATE);

        self.jobs.update_progress(job_id, 30)?;
        if self.cancelled(job_id) {
            info!(job_id, "Training cancelled before fit");
            return Ok(());
        }

        let model = TrainedModel::fit(algorithm, &train)?;

        self.jobs.update_progress(job_id, 70)?;
        if self.cancelled(job_id) {
            info!(job_id, "Training cancelled before evaluation");
            return Ok(());
        }

        let predictions = model.predict(&test.x);
        let acc = accuracy(&predictions, &test.y);
        let (precision, recall, f1) = weighted_prf(&predictions, &test.y, data.n_classes());
        let matrix = confusion_matrix(&predictions, &test.y, data.n_classes());

        let auc = if data.n_classes() == 2 {
            model
                .predict_proba(&test.x)
                .and_then(|scores| roc_auc(&scores, &test.y))
        } else {
            None
        };

        let importance = self.feature_importance(&model, &test);

        let model_path = self.model_path(job_id, algorithm);
        let artifact = ModelArtifact {
            algorithm,
            features: data.features.clone(),
            classes: data.classes.clone(),
            trained_at: chrono::Utc::now().to_rfc3339(),
            model,
        };
        artifact.save(&model_path)?;

        let result = json!({
            "accuracy": acc,
            "precision": precision,
            "recall": recall,
            "f1": f1,
            "auc_roc": auc,
            "confusion_matrix": matrix,
            "feature_importance": importance,
            "model_path": model_path.to_string_lossy(),
            "features": data.features,
            "classes": data.classes,
            "train_size": train.x.nrows(),
            "test_size": test.x.nrows(),
        });
        self.jobs.update_result(job_id, &result)?;
        self.audit.record(
            "training_completed",
            &format!("Job {job_id}: {} accuracy={acc:.4}", algorithm.as_str()),
            "create",
        );
        info!(job_id, algorithm = algorithm.as_str(), accuracy = acc, "Training complete");
        Ok(())
    }

    fn model_path(&self, job_id: i64, algorithm: Algorithm) -> PathBuf {
        self.settings
            .models_dir()
            .join(format!("job_{job_id}_{}.json", algorithm.as_str()))
    }

    /// Absolute-coefficient means for linear models; seeded permutation
    /// importance (accuracy drop per shuffled column) for ensembles.
    fn feature_importance(&self, model: &TrainedModel, test: &TrainingData) -> Value {
        let values: Vec<f64> = match model.coefficient_importance() {
            Some(coefficients) => coefficients,
            None => permutation_importance(model, test),
        };
        let mut out = serde_json::Map::new();
        for (name, value) in test.features.iter().zip(values) {
            out.insert(name.clone(), json!(value));
        }
        Value::Object(out)
    }
}

fn permutation_importance(model: &TrainedModel, test: &TrainingData) -> Vec<f64> {
    let baseline = accuracy(&model.predict(&test.x), &test.y);
    let n = test.x.nrows();
    let mut rng = StdRng::seed_from_u64(RANDOM_STATE);
    let mut out = Vec::with_capacity(test.features.len());

    for col in 0..test.features.len() {
        let mut shuffled = test.x.clone();
        let mut order: Vec<usize> = (0..n).collect();
        for i in (1..n).rev() {
            let j = rng.gen_range(0..=i);
            order.swap(i, j);
        }
        for (row, src) in order.iter().enumerate() {
            shuffled[[row, col]] = test.x[[*src, col]];
        }
        let permuted = accuracy(&model.predict(&shuffled), &test.y);
        out.push((baseline - permuted).max(0.0));
    }

    let total: f64 = out.iter().sum();
    if total > f64::EPSILON {
        for v in &mut out {
            *v /= total;
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bankflow_store::{init_admin_db, Database};
    use std::io::Write;

    fn setup(dir: &tempfile::TempDir) -> (TrainingService, JobRepo, DatasetRepo) {
        let settings = Arc::new(Settings::for_base_dir(dir.path()));
        let db = Database::new(settings.admin_db());
        init_admin_db(&db).unwrap();
        let datasets = DatasetRepo::new(db.clone());
        let jobs = JobRepo::new(db.clone());
        let audit = AuditRepo::new(db);
        (
            TrainingService::new(settings, datasets.clone(), jobs.clone(), audit),
            jobs,
            datasets,
        )
    }

    fn seed_dataset(dir: &tempfile::TempDir, datasets: &DatasetRepo) -> i64 {
        let path = dir.path().join("train.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "f1,f2,label").unwrap();
        for i in 0..80 {
            let (base, label) = if i % 2 == 0 { (0.0, 0) } else { (8.0, 1) };
            writeln!(f, "{},{},{}", base + (i % 5) as f64 * 0.1, base, label).unwrap();
        }
        datasets
            .create("train", "train.csv", path.to_str().unwrap(), 1, 80, 3, &[])
            .unwrap()
    }

    #[test]
    fn test_full_training_job() {
        let dir = tempfile::tempdir().unwrap();
        let (service, jobs, datasets) = setup(&dir);
        let dataset_id = seed_dataset(&dir, &datasets);

        let job_id = jobs
            .create("training", &json!({"dataset_id": dataset_id}))
            .unwrap();
        let config = TrainingConfig {
            dataset_id,
            target_column: "label".to_string(),
            algorithm: "random_forest".to_string(),
            test_size: 0.2,
        };
        service.run(job_id, &config);

        let job = jobs.find_by_id(job_id).unwrap();
        assert_eq!(job.status, JobState::Completed);
        assert_eq!(job.progress, 100);
        let accuracy = job.result["accuracy"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
        assert!(accuracy > 0.9);
        assert!(job.result["auc_roc"].as_f64().is_some());

        // Model artifact landed where the monitoring endpoints look.
        let model_path = job.result["model_path"].as_str().unwrap();
        assert!(std::path::Path::new(model_path).exists());
        assert!(model_path.contains("job_") && model_path.contains("random_forest"));
    }

    #[test]
    fn test_invalid_algorithm_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let (service, jobs, datasets) = setup(&dir);
        let dataset_id = seed_dataset(&dir, &datasets);

        let job_id = jobs.create("training", &json!({})).unwrap();
        let config = TrainingConfig {
            dataset_id,
            target_column: "label".to_string(),
            algorithm: "deep_net".to_string(),
            test_size: 0.2,
        };
        service.run(job_id, &config);

        let job = jobs.find_by_id(job_id).unwrap();
        assert_eq!(job.status, JobState::Failed);
        assert!(job.error_message.unwrap().contains("deep_net"));
    }

    #[test]
    fn test_missing_target_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let (service, jobs, datasets) = setup(&dir);
        let dataset_id = seed_dataset(&dir, &datasets);

        let job_id = jobs.create("training", &json!({})).unwrap();
        let config = TrainingConfig {
            dataset_id,
            target_column: "nope".to_string(),
            algorithm: "logistic_regression".to_string(),
            test_size: 0.2,
        };
        service.run(job_id, &config);

        let job = jobs.find_by_id(job_id).unwrap();
        assert_eq!(job.status, JobState::Failed);
    }

    #[test]
    fn test_config_from_value() {
        let config = TrainingConfig::from_value(&json!({
            "dataset_id": 3,
            "target_column": "y",
            "algorithm": "gradient_boosting",
        }))
        .unwrap();
        assert_eq!(config.dataset_id, 3);
        assert!((config.test_size - 0.2).abs() < f64::EPSILON);

        assert!(TrainingConfig::from_value(&json!({"target_column": "y"})).is_err());
    }
}
