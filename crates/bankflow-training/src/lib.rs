//! Model training for BankFlow.
//!
//! Three supervised algorithms over numeric features: logistic regression
//! (linfa-logistic), a bootstrap-bagged forest, and a boosted ensemble of
//! shallow trees (both composed from linfa-trees). Splits and resampling
//! are seeded (`random_state = 42`) for reproducibility.
//!
//! Persisted models are serde snapshots (linfa's native serialization),
//! written to `models/job_<id>_<algorithm>.json`.

mod metrics;
mod model;
mod scoring;
mod service;

pub use metrics::{confusion_matrix, roc_auc, weighted_prf};
pub use model::{fmt_label, Algorithm, ModelArtifact, TrainedModel, TrainingData};
pub use scoring::{score_batch, score_single, ScoringOutcome};
pub use service::{TrainingConfig, TrainingService};

/// Fixed seed for splits and resampling.
pub const RANDOM_STATE: u64 = 42;
