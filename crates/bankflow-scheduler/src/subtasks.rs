//! Subtask implementations.
//!
//! Each subtask takes the use case plus the artifacts of its predecessors
//! (located by convention under `preprocessing_output/<key>/`) and reports
//! `{ok | skip | fail}` with its artifact paths. Skip means the input
//! hash matches the last successful run and the canonical outputs still
//! exist; it counts as success and reuses the recorded artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bankflow::{Chunk, Error, Result};
use bankflow_analysis as analysis;
use bankflow_analysis::Frame;
use bankflow_splitters::{ChunkStrategy, Chunker};
use bankflow_store::SubtaskState;
use bankflow_training::{
    confusion_matrix, fmt_label, roc_auc, weighted_prf, Algorithm, ModelArtifact, TrainedModel,
    TrainingData, RANDOM_STATE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::catalog::UseCase;
use crate::executor::SchedulerContext;
use crate::plan::Subtask;

/// Outcome of one subtask attempt.
#[derive(Debug, Clone)]
pub struct SubtaskOutcome {
    pub status: SubtaskState,
    pub artifacts: Vec<String>,
    pub metrics: Option<Value>,
    pub error: Option<String>,
    pub input_hash: Option<String>,
}

impl SubtaskOutcome {
    pub fn ok(artifacts: Vec<String>, metrics: Option<Value>, input_hash: Option<String>) -> Self {
        Self {
            status: SubtaskState::Ok,
            artifacts,
            metrics,
            error: None,
            input_hash,
        }
    }

    pub fn skip(artifacts: Vec<String>, input_hash: Option<String>) -> Self {
        Self {
            status: SubtaskState::Skip,
            artifacts,
            metrics: None,
            error: None,
            input_hash,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: SubtaskState::Fail,
            artifacts: Vec::new(),
            metrics: None,
            error: Some(message.into()),
            input_hash: None,
        }
    }
}

/// Filesystem layout for one use case.
pub(crate) struct UcPaths {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
}

impl UcPaths {
    pub fn new(ctx: &SchedulerContext, key: &str) -> Self {
        Self {
            data_dir: ctx.settings.use_cases_dir().join(key),
            out_dir: ctx.settings.output_dir().join(key),
        }
    }

    fn splits_dir(&self) -> PathBuf {
        self.out_dir.join("splits")
    }

    fn models_dir(&self) -> PathBuf {
        self.out_dir.join("models")
    }

    fn reports_dir(&self) -> PathBuf {
        self.out_dir.join("reports")
    }

    fn rag_dir(&self) -> PathBuf {
        self.out_dir.join("rag")
    }

    fn clean_csv(&self) -> PathBuf {
        self.out_dir.join("clean.csv")
    }

    /// First CSV in the use case's data directory (or its `data/`
    /// subdirectory).
    fn primary_csv(&self) -> Option<PathBuf> {
        for dir in [self.data_dir.clone(), self.data_dir.join("data")] {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut csvs: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("csv"))
                            == Some(true)
                })
                .collect();
            csvs.sort();
            if let Some(first) = csvs.into_iter().next() {
                return Some(first);
            }
        }
        None
    }

    /// Every ingestible file in the data directory.
    fn data_files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for dir in [self.data_dir.clone(), self.data_dir.join("data")] {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
                if path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
                        Some("csv" | "json" | "txt" | "md" | "log")
                    )
                {
                    out.push(path);
                }
            }
        }
        out.sort();
        out
    }
}

/// Hash the contents of the given files. `None` when any is missing.
pub(crate) fn input_hash(paths: &[PathBuf]) -> Option<String> {
    let mut hasher = Sha256::new();
    for path in paths {
        let bytes = std::fs::read(path).ok()?;
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&bytes);
    }
    Some(hex::encode(hasher.finalize()))
}

/// Skip when the last run succeeded on the same inputs and its outputs
/// are still on disk.
fn can_skip(ctx: &SchedulerContext, key: &str, subtask: Subtask, hash: &str, outputs: &[PathBuf]) -> bool {
    let Ok(Some(previous)) = ctx.results.get_subtask_run(key, subtask.name()) else {
        return false;
    };
    previous.status.succeeded()
        && previous.input_hash.as_deref() == Some(hash)
        && outputs.iter().all(|p| p.exists())
}

fn paths_to_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().to_string()).collect()
}

/// Dispatch one subtask; blocking work is offloaded.
pub(crate) async fn run_subtask(
    ctx: Arc<SchedulerContext>,
    uc: UseCase,
    subtask: Subtask,
) -> SubtaskOutcome {
    match subtask {
        Subtask::Embedding => run_embedding(&ctx, &uc).await,
        Subtask::VectorDbIngestion => run_vector_db_ingestion(&ctx, &uc).await,
        Subtask::RagEvaluation => run_rag_evaluation(&ctx, &uc).await,
        blocking => {
            let handle = tokio::task::spawn_blocking(move || run_blocking(&ctx, &uc, blocking));
            handle
                .await
                .unwrap_or_else(|e| SubtaskOutcome::fail(format!("Subtask panicked: {e}")))
        }
    }
}

fn run_blocking(ctx: &SchedulerContext, uc: &UseCase, subtask: Subtask) -> SubtaskOutcome {
    match subtask {
        Subtask::DataSplit => run_data_split(ctx, uc),
        Subtask::NoiseRemoval => run_noise_removal(ctx, uc),
        Subtask::ModelTraining => run_model_training(ctx, uc),
        Subtask::ModelEvaluation => run_model_evaluation(ctx, uc),
        Subtask::EnsembleTraining => run_ensemble_training(ctx, uc),
        Subtask::ModelBenchmarking => run_model_benchmarking(ctx, uc),
        Subtask::AiGovernanceScoring => run_governance_scoring(ctx, uc),
        Subtask::Chunking => run_chunking(ctx, uc),
        Subtask::ReportGeneration => run_report_generation(ctx, uc),
        // Async subtasks never reach here.
        other => SubtaskOutcome::fail(format!("{} is not a blocking subtask", other.name())),
    }
}

// ── 1. data_split ────────────────────────────────────────────────────────

fn run_data_split(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let paths = UcPaths::new(ctx, &uc.key);
    let Some(source) = paths.primary_csv() else {
        return SubtaskOutcome::fail(format!("No source CSV for use case '{}'", uc.key));
    };
    let Some(hash) = input_hash(&[source.clone()]) else {
        return SubtaskOutcome::fail("Source CSV unreadable");
    };

    let outputs = [
        paths.splits_dir().join("train.csv"),
        paths.splits_dir().join("val.csv"),
        paths.splits_dir().join("test.csv"),
    ];
    if can_skip(ctx, &uc.key, Subtask::DataSplit, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    match split_csv(&source, &outputs) {
        Ok((train, val, test)) => SubtaskOutcome::ok(
            paths_to_strings(&outputs),
            Some(json!({"train_rows": train, "val_rows": val, "test_rows": test})),
            Some(hash),
        ),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

/// 70/15/15 row split, seeded shuffle, header preserved in each part.
fn split_csv(source: &Path, outputs: &[PathBuf; 3]) -> Result<(usize, usize, usize)> {
    let raw = std::fs::read_to_string(source)?;
    let mut lines = raw.lines();
    let header = lines
        .next()
        .ok_or_else(|| Error::data("Source CSV is empty"))?;
    let mut rows: Vec<&str> = lines.filter(|l| !l.trim().is_empty()).collect();

    let mut rng = StdRng::seed_from_u64(RANDOM_STATE);
    for i in (1..rows.len()).rev() {
        let j = rng.gen_range(0..=i);
        rows.swap(i, j);
    }

    let n = rows.len();
    let n_train = n * 70 / 100;
    let n_val = n * 15 / 100;
    let parts = [
        &rows[..n_train],
        &rows[n_train..n_train + n_val],
        &rows[n_train + n_val..],
    ];

    for (path, part) in outputs.iter().zip(parts) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut body = String::with_capacity(raw.len());
        body.push_str(header);
        body.push('\n');
        for row in part {
            body.push_str(row);
            body.push('\n');
        }
        std::fs::write(path, body)?;
    }
    Ok((parts[0].len(), parts[1].len(), parts[2].len()))
}

// ── 2. noise_removal ─────────────────────────────────────────────────────

fn run_noise_removal(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let paths = UcPaths::new(ctx, &uc.key);
    let train = paths.splits_dir().join("train.csv");
    let Some(hash) = input_hash(&[train.clone()]) else {
        return SubtaskOutcome::fail("train.csv missing; run data_split first");
    };

    let outputs = [paths.clean_csv()];
    if can_skip(ctx, &uc.key, Subtask::NoiseRemoval, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let raw = match std::fs::read_to_string(&train) {
        Ok(raw) => raw,
        Err(e) => return SubtaskOutcome::fail(format!("Failed to read train split: {e}")),
    };
    let mut lines = raw.lines();
    let Some(header) = lines.next() else {
        return SubtaskOutcome::fail("Train split is empty");
    };

    let mut seen = std::collections::HashSet::new();
    let mut kept = Vec::new();
    let mut input_rows = 0usize;
    for line in lines {
        input_rows += 1;
        let all_empty = line.split(',').all(|cell| cell.trim().is_empty());
        if all_empty || !seen.insert(line) {
            continue;
        }
        kept.push(line);
    }

    let mut body = String::with_capacity(raw.len());
    body.push_str(header);
    body.push('\n');
    for row in &kept {
        body.push_str(row);
        body.push('\n');
    }
    if let Err(e) = std::fs::write(&outputs[0], body) {
        return SubtaskOutcome::fail(format!("Failed to write clean.csv: {e}"));
    }

    SubtaskOutcome::ok(
        paths_to_strings(&outputs),
        Some(json!({
            "input_rows": input_rows,
            "kept_rows": kept.len(),
            "dropped": input_rows - kept.len(),
        })),
        Some(hash),
    )
}

// ── 3/5. model + ensemble training ───────────────────────────────────────

fn run_model_training(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    train_subtask(ctx, uc, Subtask::ModelTraining, Algorithm::RandomForest, "model.json", "training_results.json")
}

fn run_ensemble_training(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    train_subtask(ctx, uc, Subtask::EnsembleTraining, Algorithm::GradientBoosting, "ensemble.json", "ensemble_results.json")
}

fn train_subtask(
    ctx: &SchedulerContext,
    uc: &UseCase,
    subtask: Subtask,
    algorithm: Algorithm,
    model_file: &str,
    results_file: &str,
) -> SubtaskOutcome {
    let Some(target) = uc.target_column.clone() else {
        // Unsupervised use cases have no training stage.
        info!(use_case = %uc.key, "No target column; skipping training");
        return SubtaskOutcome::skip(Vec::new(), None);
    };

    let paths = UcPaths::new(ctx, &uc.key);
    let clean = paths.clean_csv();
    let Some(hash) = input_hash(&[clean.clone()]) else {
        return SubtaskOutcome::fail("clean.csv missing; run noise_removal first");
    };

    let outputs = [
        paths.models_dir().join(model_file),
        paths.reports_dir().join(results_file),
    ];
    if can_skip(ctx, &uc.key, subtask, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let result = (|| -> Result<Value> {
        let frame = Frame::load(&clean, ctx.settings.sample_limit)?;
        let data = TrainingData::from_frame(&frame, &target)?;
        let (train, test) = data.split(0.2, RANDOM_STATE);
        let model = TrainedModel::fit(algorithm, &train)?;

        let predictions = model.predict(&test.x);
        let correct = predictions.iter().zip(test.y.iter()).filter(|(p, y)| p == y).count();
        let accuracy = correct as f64 / test.y.len().max(1) as f64;
        let (precision, recall, f1) = weighted_prf(&predictions, &test.y, data.n_classes());
        let auc = if data.n_classes() == 2 {
            model.predict_proba(&test.x).and_then(|s| roc_auc(&s, &test.y))
        } else {
            None
        };

        let artifact = ModelArtifact {
            algorithm,
            features: data.features.clone(),
            classes: data.classes.clone(),
            trained_at: chrono::Utc::now().to_rfc3339(),
            model,
        };
        artifact.save(&outputs[0])?;

        let metrics = json!({
            "best_model": algorithm.as_str(),
            "accuracy": accuracy,
            "precision": precision,
            "recall": recall,
            "f1": f1,
            "auc_roc": auc,
            "train_size": train.x.nrows(),
            "test_size": test.x.nrows(),
        });
        if let Some(parent) = outputs[1].parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&outputs[1], serde_json::to_string_pretty(&metrics)?)?;
        Ok(metrics)
    })();

    match result {
        Ok(metrics) => SubtaskOutcome::ok(paths_to_strings(&outputs), Some(metrics), Some(hash)),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

// ── 4. model_evaluation ──────────────────────────────────────────────────

fn run_model_evaluation(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let Some(target) = uc.target_column.clone() else {
        return SubtaskOutcome::skip(Vec::new(), None);
    };

    let paths = UcPaths::new(ctx, &uc.key);
    let model_path = paths.models_dir().join("model.json");
    let test_path = paths.splits_dir().join("test.csv");
    let Some(hash) = input_hash(&[model_path.clone(), test_path.clone()]) else {
        return SubtaskOutcome::fail("model.json or test.csv missing");
    };

    let outputs = [paths.reports_dir().join("model_evaluation.json")];
    if can_skip(ctx, &uc.key, Subtask::ModelEvaluation, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let result = (|| -> Result<Value> {
        let artifact = ModelArtifact::load(&model_path)?;
        let frame = Frame::load(&test_path, ctx.settings.sample_limit)?;
        let (x, y) = holdout_matrix(&frame, &artifact, &target)?;

        let predictions = artifact.model.predict(&x);
        let correct = predictions.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
        let accuracy = correct as f64 / y.len().max(1) as f64;
        let n_classes = artifact.classes.len();
        let (precision, recall, f1) = weighted_prf(&predictions, &y, n_classes);
        let matrix = confusion_matrix(&predictions, &y, n_classes);
        let auc = if n_classes == 2 {
            artifact.model.predict_proba(&x).and_then(|s| roc_auc(&s, &y))
        } else {
            None
        };

        let metrics = json!({
            "model": artifact.algorithm.as_str(),
            "holdout_rows": y.len(),
            "accuracy": accuracy,
            "precision": precision,
            "recall": recall,
            "f1_score": f1,
            "auc_roc": auc,
            "confusion_matrix": matrix,
        });
        if let Some(parent) = outputs[0].parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&outputs[0], serde_json::to_string_pretty(&metrics)?)?;
        Ok(metrics)
    })();

    match result {
        Ok(metrics) => SubtaskOutcome::ok(paths_to_strings(&outputs), Some(metrics), Some(hash)),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

/// Feature matrix + labels for a holdout frame, aligned to the artifact's
/// feature order and class list. Rows with labels the model never saw are
/// dropped.
fn holdout_matrix(
    frame: &Frame,
    artifact: &ModelArtifact,
    target: &str,
) -> Result<(ndarray::Array2<f64>, ndarray::Array1<usize>)> {
    let target_column = frame
        .column(target)
        .ok_or_else(|| Error::validation(format!("Target column '{target}' not in holdout")))?;

    let labels: Vec<Option<usize>> = match target_column {
        analysis::Column::Numeric { values, .. } => values
            .iter()
            .map(|v| v.and_then(|v| artifact.classes.iter().position(|c| *c == fmt_label(v))))
            .collect(),
        analysis::Column::Text { values, .. } => values
            .iter()
            .map(|v| {
                v.as_ref()
                    .and_then(|v| artifact.classes.iter().position(|c| c == v))
            })
            .collect(),
    };

    let keep: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter_map(|(i, l)| l.map(|_| i))
        .collect();
    if keep.is_empty() {
        return Err(Error::data("Holdout has no rows with known labels"));
    }

    let mut x = ndarray::Array2::<f64>::zeros((keep.len(), artifact.features.len()));
    for (col, feature) in artifact.features.iter().enumerate() {
        if let Some(analysis::Column::Numeric { values, .. }) = frame.column(feature) {
            for (row_out, row_in) in keep.iter().enumerate() {
                x[[row_out, col]] = values[*row_in].unwrap_or(0.0);
            }
        }
    }
    let y = ndarray::Array1::from_vec(
        keep.iter().filter_map(|i| labels[*i]).collect::<Vec<usize>>(),
    );
    Ok((x, y))
}

// ── 6. model_benchmarking ────────────────────────────────────────────────

fn run_model_benchmarking(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let Some(target) = uc.target_column.clone() else {
        return SubtaskOutcome::skip(Vec::new(), None);
    };

    let paths = UcPaths::new(ctx, &uc.key);
    let clean = paths.clean_csv();
    let Some(hash) = input_hash(&[clean.clone()]) else {
        return SubtaskOutcome::fail("clean.csv missing; run noise_removal first");
    };
    let outputs = [paths.reports_dir().join("benchmark.json")];
    if can_skip(ctx, &uc.key, Subtask::ModelBenchmarking, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let result = (|| -> Result<Value> {
        // Benchmarks run on a capped sample; relative timings are the point.
        let frame = Frame::load(&clean, 2000)?;
        let data = TrainingData::from_frame(&frame, &target)?;
        let (train, test) = data.split(0.25, RANDOM_STATE);

        let mut results = Vec::new();
        for algorithm in [
            Algorithm::LogisticRegression,
            Algorithm::RandomForest,
            Algorithm::GradientBoosting,
        ] {
            let started = std::time::Instant::now();
            match TrainedModel::fit(algorithm, &train) {
                Ok(model) => {
                    let predictions = model.predict(&test.x);
                    let (_, _, f1) = weighted_prf(&predictions, &test.y, data.n_classes());
                    let correct =
                        predictions.iter().zip(test.y.iter()).filter(|(p, y)| p == y).count();
                    results.push(json!({
                        "algorithm": algorithm.as_str(),
                        "f1": f1,
                        "accuracy": correct as f64 / test.y.len().max(1) as f64,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }));
                }
                Err(e) => {
                    results.push(json!({"algorithm": algorithm.as_str(), "error": e.to_string()}));
                }
            }
        }

        let best = results
            .iter()
            .filter(|r| r.get("f1").is_some())
            .max_by(|a, b| {
                a["f1"].as_f64()
                    .partial_cmp(&b["f1"].as_f64())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .and_then(|r| r["algorithm"].as_str().map(str::to_string));

        let report = json!({"results": results, "best": best});
        if let Some(parent) = outputs[0].parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&outputs[0], serde_json::to_string_pretty(&report)?)?;
        Ok(report)
    })();

    match result {
        Ok(report) => SubtaskOutcome::ok(paths_to_strings(&outputs), Some(report), Some(hash)),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

// ── 7. ai_governance_scoring ─────────────────────────────────────────────

fn run_governance_scoring(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let paths = UcPaths::new(ctx, &uc.key);
    let evaluation = paths.reports_dir().join("model_evaluation.json");
    let clean = paths.clean_csv();
    let Some(hash) = input_hash(&[clean.clone()]) else {
        return SubtaskOutcome::fail("clean.csv missing; run noise_removal first");
    };
    let outputs = [paths.reports_dir().join("governance_scorecard.json")];
    if can_skip(ctx, &uc.key, Subtask::AiGovernanceScoring, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let result = (|| -> Result<Value> {
        let frame = Frame::load(&clean, ctx.settings.sample_limit)?;
        let quality = data_quality_score(&frame) / 100.0;

        let model_metrics: Value = std::fs::read_to_string(&evaluation)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(Value::Null);
        let accuracy = model_metrics["accuracy"].as_f64();
        let f1 = model_metrics["f1_score"].as_f64();
        let has_model = accuracy.is_some();

        // Eight governance dimensions; heuristic but reproducible.
        let performance = accuracy.unwrap_or(0.0) * 0.6 + f1.unwrap_or(0.0) * 0.4;
        let explainability = if has_model { 0.75 } else { 0.3 };
        let responsible = (quality * 0.5 + if uc.domain == "fraud" || uc.domain == "aml" { 0.3 } else { 0.45 }).min(1.0);
        let trustworthy = (quality * 0.6 + performance * 0.4).min(1.0);
        let ethical = if frame.columns().iter().any(|c| {
            let n = c.name().to_ascii_lowercase();
            n.contains("ssn") || n.contains("passport") || n.contains("dob")
        }) {
            0.4
        } else {
            0.9
        };
        let governance = if uc.target_column.is_some() { 0.8 } else { 0.6 };
        let sustainable = 0.85;
        let portable = if has_model { 0.9 } else { 0.5 };

        let dimensions = [
            ("explainability", explainability),
            ("responsible", responsible),
            ("trustworthy", trustworthy),
            ("ethical", ethical),
            ("governance", governance),
            ("sustainable", sustainable),
            ("portable", portable),
            ("performance", performance),
        ];
        for (dimension, score) in dimensions {
            ctx.results.set_governance_score(&uc.key, dimension, score)?;
        }

        let overall = dimensions.iter().map(|(_, s)| s).sum::<f64>() / dimensions.len() as f64;
        let scorecard = json!({
            "use_case_key": uc.key,
            "overall": overall,
            "dimensions": dimensions.iter().map(|(d, s)| json!({"dimension": d, "score": s})).collect::<Vec<_>>(),
            "generated_at": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(parent) = outputs[0].parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&outputs[0], serde_json::to_string_pretty(&scorecard)?)?;
        Ok(scorecard)
    })();

    match result {
        Ok(scorecard) => SubtaskOutcome::ok(paths_to_strings(&outputs), Some(scorecard), Some(hash)),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

/// 0–100 quality score: completeness-weighted with a duplicate penalty.
pub(crate) fn data_quality_score(frame: &Frame) -> f64 {
    let infos = frame.column_infos();
    if infos.is_empty() || frame.rows() == 0 {
        return 0.0;
    }
    let total_cells: i64 = infos.iter().map(|c| c.non_null + c.null_count).sum();
    let null_cells: i64 = infos.iter().map(|c| c.null_count).sum();
    let completeness = if total_cells > 0 {
        1.0 - null_cells as f64 / total_cells as f64
    } else {
        0.0
    };
    (completeness * 100.0).clamp(0.0, 100.0)
}

// ── 8. chunking ──────────────────────────────────────────────────────────

fn run_chunking(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let paths = UcPaths::new(ctx, &uc.key);
    let files = paths.data_files();
    if files.is_empty() {
        return SubtaskOutcome::fail(format!("No data files to chunk for '{}'", uc.key));
    }
    let Some(hash) = input_hash(&files) else {
        return SubtaskOutcome::fail("Data files unreadable");
    };
    let outputs = [paths.rag_dir().join("chunks.json")];
    if can_skip(ctx, &uc.key, Subtask::Chunking, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let chunker = Chunker::new(ChunkStrategy::Recursive, 512, 50);
    let mut chunks: Vec<Chunk> = Vec::new();
    for file in &files {
        match chunker.chunk_file(file) {
            Ok(file_chunks) => chunks.extend(file_chunks.into_iter().map(|c| {
                c.with_metadata("use_case", uc.key.clone())
                    .with_metadata("domain", uc.domain.clone())
            })),
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Skipping unreadable file");
            }
        }
    }

    let result = (|| -> Result<()> {
        if let Some(parent) = outputs[0].parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&outputs[0], serde_json::to_string(&chunks)?)?;
        Ok(())
    })();

    match result {
        Ok(()) => SubtaskOutcome::ok(
            paths_to_strings(&outputs),
            Some(json!({"files": files.len(), "chunks": chunks.len()})),
            Some(hash),
        ),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

// ── 9. embedding ─────────────────────────────────────────────────────────

async fn run_embedding(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let paths = UcPaths::new(ctx, &uc.key);
    let chunks_path = paths.rag_dir().join("chunks.json");
    let Some(hash) = input_hash(&[chunks_path.clone()]) else {
        return SubtaskOutcome::fail("chunks.json missing; run chunking first");
    };
    let outputs = [paths.rag_dir().join("embeddings.json")];
    if can_skip(ctx, &uc.key, Subtask::Embedding, &hash, &outputs) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let chunks: Vec<Chunk> = match std::fs::read_to_string(&chunks_path)
        .map_err(Error::from)
        .and_then(|raw| serde_json::from_str(&raw).map_err(Error::from))
    {
        Ok(chunks) => chunks,
        Err(e) => return SubtaskOutcome::fail(format!("Failed to read chunks.json: {e}")),
    };

    let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(32) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match ctx.embedder.embed_documents(&texts).await {
            Ok(mut vectors) => embeddings.append(&mut vectors),
            Err(e) => return SubtaskOutcome::fail(format!("Embedding failed: {e}")),
        }
    }

    let result = serde_json::to_string(&embeddings)
        .map_err(Error::from)
        .and_then(|encoded| std::fs::write(&outputs[0], encoded).map_err(Error::from));
    match result {
        Ok(()) => SubtaskOutcome::ok(
            paths_to_strings(&outputs),
            Some(json!({"vectors": embeddings.len(), "method": ctx.embedder.method()})),
            Some(hash),
        ),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

// ── 10. vector_db_ingestion ──────────────────────────────────────────────

async fn run_vector_db_ingestion(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let paths = UcPaths::new(ctx, &uc.key);
    let chunks_path = paths.rag_dir().join("chunks.json");
    let embeddings_path = paths.rag_dir().join("embeddings.json");
    let Some(hash) = input_hash(&[chunks_path.clone(), embeddings_path.clone()]) else {
        return SubtaskOutcome::fail("chunks.json or embeddings.json missing");
    };
    if can_skip(ctx, &uc.key, Subtask::VectorDbIngestion, &hash, &[]) {
        return SubtaskOutcome::skip(Vec::new(), Some(hash));
    }

    let loaded = (|| -> Result<(Vec<Chunk>, Vec<Vec<f32>>)> {
        let chunks: Vec<Chunk> = serde_json::from_str(&std::fs::read_to_string(&chunks_path)?)?;
        let embeddings: Vec<Vec<f32>> =
            serde_json::from_str(&std::fs::read_to_string(&embeddings_path)?)?;
        if chunks.len() != embeddings.len() {
            return Err(Error::data(format!(
                "chunks ({}) and embeddings ({}) disagree; re-run embedding",
                chunks.len(),
                embeddings.len()
            )));
        }
        Ok((chunks, embeddings))
    })();
    let (chunks, embeddings) = match loaded {
        Ok(pair) => pair,
        Err(e) => return SubtaskOutcome::fail(e.to_string()),
    };

    if chunks.is_empty() {
        return SubtaskOutcome::ok(Vec::new(), Some(json!({"indexed": 0})), Some(hash));
    }
    match ctx.store.add_documents(&chunks, &embeddings, &uc.key).await {
        Ok(indexed) => SubtaskOutcome::ok(
            Vec::new(),
            Some(json!({"indexed": indexed, "collection": uc.key})),
            Some(hash),
        ),
        Err(e) => SubtaskOutcome::fail(format!("Vector ingestion failed: {e}")),
    }
}

// ── 11. rag_evaluation ───────────────────────────────────────────────────

fn domain_eval_queries(domain: &str) -> Vec<String> {
    let base: &[&str] = match domain {
        "fraud" => &[
            "What fraud indicators are monitored?",
            "How are suspicious transactions escalated?",
        ],
        "credit" => &[
            "What drives the credit risk score?",
            "How are loan defaults predicted?",
        ],
        "aml" => &[
            "How does sanctions screening work?",
            "What triggers a suspicious activity review?",
        ],
        "governance" => &[
            "What data quality metrics are tracked?",
            "How is model lineage documented?",
        ],
        _ => &[
            "What does this use case measure?",
            "Which metrics are reported?",
        ],
    };
    base.iter().map(|q| (*q).to_string()).collect()
}

async fn run_rag_evaluation(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let paths = UcPaths::new(ctx, &uc.key);
    let outputs = [paths.reports_dir().join("rag_evaluation.json")];

    let queries = domain_eval_queries(&uc.domain);
    let mut individual = Vec::new();
    let mut means = std::collections::BTreeMap::new();

    for query in &queries {
        match ctx.rag.query(query, Some(&uc.key)).await {
            Ok(result) => {
                if let Some(scores) = result.scores {
                    for (name, value) in [
                        ("relevance", scores.relevance),
                        ("groundedness", scores.groundedness),
                        ("completeness", scores.completeness),
                        ("hallucination", scores.hallucination),
                        ("coherence", scores.coherence),
                    ] {
                        means.entry(name).or_insert_with(Vec::new).push(value);
                    }
                }
                individual.push(json!({
                    "query": query,
                    "no_results": result.metadata.get("no_results").cloned().unwrap_or(json!(false)),
                    "scores": result.scores,
                }));
            }
            Err(e) => return SubtaskOutcome::fail(format!("RAG evaluation failed: {e}")),
        }
    }

    let aggregated: serde_json::Map<String, Value> = means
        .into_iter()
        .map(|(name, values)| {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            (name.to_string(), json!(mean))
        })
        .collect();

    let report = json!({
        "use_case_key": uc.key,
        "queries": individual,
        "mean_scores": aggregated,
        "generated_at": chrono::Utc::now().to_rfc3339(),
    });
    let result = (|| -> Result<()> {
        if let Some(parent) = outputs[0].parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&outputs[0], serde_json::to_string_pretty(&report)?)?;
        Ok(())
    })();

    match result {
        Ok(()) => SubtaskOutcome::ok(paths_to_strings(&outputs), Some(report), None),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

// ── 12. report_generation ────────────────────────────────────────────────

fn run_report_generation(ctx: &SchedulerContext, uc: &UseCase) -> SubtaskOutcome {
    let started = std::time::Instant::now();
    let paths = UcPaths::new(ctx, &uc.key);
    let clean = paths.clean_csv();
    let Some(hash) = input_hash(&[clean.clone()]) else {
        return SubtaskOutcome::fail("clean.csv missing; run noise_removal first");
    };

    let outputs = [
        paths.out_dir.join("summary.json"),
        paths.out_dir.join("full_report.json"),
        paths.out_dir.join("column_profiles.json"),
        paths.out_dir.join("correlations.json"),
        paths.out_dir.join("outliers.json"),
        paths.out_dir.join("target_distribution.json"),
        paths.out_dir.join("feature_engineering.json"),
        paths.out_dir.join("training_results.json"),
    ];
    if can_skip(ctx, &uc.key, Subtask::ReportGeneration, &hash, &outputs[..7]) {
        return SubtaskOutcome::skip(paths_to_strings(&outputs), Some(hash));
    }

    let result = (|| -> Result<Value> {
        let frame = Frame::load(&clean, ctx.settings.sample_limit)?;
        let target = uc.target_column.as_deref();

        let profiles = frame.column_infos();
        let quality = data_quality_score(&frame);
        let numeric = frame.numeric_columns().len();
        let categorical = profiles.len() - numeric;
        let total_cells: i64 = profiles.iter().map(|c| c.non_null + c.null_count).sum();
        let null_cells: i64 = profiles.iter().map(|c| c.null_count).sum();
        let avg_missing_pct = if total_cells > 0 {
            null_cells as f64 / total_cells as f64 * 100.0
        } else {
            0.0
        };

        let target_distribution = analysis::class_distribution(&frame, target);
        let imbalance = target_distribution.get("imbalance_ratio").cloned();

        let summary = json!({
            "use_case_key": uc.key,
            "label": uc.label,
            "category": uc.category,
            "domain": uc.domain,
            "data_quality_score": quality,
            "total_rows": frame.rows(),
            "total_columns": frame.cols(),
            "numeric_columns": numeric,
            "categorical_columns": categorical,
            "avg_missing_pct": avg_missing_pct,
            "target_column": target,
            "class_imbalance_ratio": imbalance,
            "run_timestamp": chrono::Utc::now().to_rfc3339(),
        });

        std::fs::create_dir_all(&paths.out_dir)?;
        let correlations = analysis::correlations(&frame);
        let outliers = analysis::outliers(&frame);
        let feature_engineering = analysis::feature_engineering(&frame, target);

        // training_results.json was written by the training subtask under
        // reports/; surface it at the top level for the report compiler.
        let training_results: Value = std::fs::read_to_string(paths.reports_dir().join("model_evaluation.json"))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(Value::Null);

        let full_report = json!({
            "summary": summary,
            "model_metrics": training_results,
            "governance": std::fs::read_to_string(paths.reports_dir().join("governance_scorecard.json"))
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .unwrap_or(Value::Null),
            "rag_evaluation": std::fs::read_to_string(paths.reports_dir().join("rag_evaluation.json"))
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .unwrap_or(Value::Null),
        });

        let profiles_value = serde_json::to_value(&profiles)?;
        let sections = [
            &summary,
            &full_report,
            &profiles_value,
            &correlations,
            &outliers,
            &target_distribution,
            &feature_engineering,
            &training_results,
        ];
        for (path, value) in outputs.iter().zip(sections) {
            std::fs::write(path, serde_json::to_string_pretty(value)?)?;
        }

        let elapsed = started.elapsed().as_secs_f64();
        ctx.preprocessing.record_run(
            &uc.key,
            &uc.label,
            quality,
            frame.rows() as i64,
            frame.cols() as i64,
            elapsed,
            &profiles,
        )?;
        Ok(summary)
    })();

    match result {
        Ok(summary) => SubtaskOutcome::ok(paths_to_strings(&outputs), Some(summary), Some(hash)),
        Err(e) => SubtaskOutcome::fail(e.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_input_hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "x,y\n1,2\n").unwrap();
        let h1 = input_hash(&[path.clone()]).unwrap();
        std::fs::write(&path, "x,y\n1,3\n").unwrap();
        let h2 = input_hash(&[path.clone()]).unwrap();
        assert_ne!(h1, h2);
        assert!(input_hash(&[dir.path().join("missing.csv")]).is_none());
    }

    #[test]
    fn test_split_csv_proportions() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.csv");
        let mut body = String::from("a,b\n");
        for i in 0..100 {
            body.push_str(&format!("{i},{i}\n"));
        }
        std::fs::write(&source, body).unwrap();

        let outputs = [
            dir.path().join("train.csv"),
            dir.path().join("val.csv"),
            dir.path().join("test.csv"),
        ];
        let (train, val, test) = split_csv(&source, &outputs).unwrap();
        assert_eq!(train, 70);
        assert_eq!(val, 15);
        assert_eq!(test, 15);

        // Header preserved, rows partitioned without overlap.
        let train_body = std::fs::read_to_string(&outputs[0]).unwrap();
        assert!(train_body.starts_with("a,b\n"));
        let all: std::collections::HashSet<String> = outputs
            .iter()
            .flat_map(|p| {
                std::fs::read_to_string(p)
                    .unwrap()
                    .lines()
                    .skip(1)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_split_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.csv");
        std::fs::write(&source, "a\n1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n").unwrap();
        let out_a = [
            dir.path().join("a_train.csv"),
            dir.path().join("a_val.csv"),
            dir.path().join("a_test.csv"),
        ];
        let out_b = [
            dir.path().join("b_train.csv"),
            dir.path().join("b_val.csv"),
            dir.path().join("b_test.csv"),
        ];
        split_csv(&source, &out_a).unwrap();
        split_csv(&source, &out_b).unwrap();
        assert_eq!(
            std::fs::read_to_string(&out_a[0]).unwrap(),
            std::fs::read_to_string(&out_b[0]).unwrap()
        );
    }

    #[test]
    fn test_data_quality_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.csv");
        std::fs::write(&path, "a,b\n1,2\n3,\n5,6\n").unwrap();
        let frame = Frame::from_csv_path(&path, 1000).unwrap();
        let score = data_quality_score(&frame);
        // One null of six cells.
        assert!((score - (5.0 / 6.0 * 100.0)).abs() < 1e-6);
    }

    #[test]
    fn test_domain_eval_queries() {
        assert_eq!(domain_eval_queries("fraud").len(), 2);
        assert!(domain_eval_queries("unknown")[0].contains("use case"));
    }
}
