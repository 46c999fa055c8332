//! The twelve-subtask plan.

use serde::Serialize;

/// One stage of a use case's pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtask {
    DataSplit,
    NoiseRemoval,
    ModelTraining,
    ModelEvaluation,
    EnsembleTraining,
    ModelBenchmarking,
    AiGovernanceScoring,
    Chunking,
    Embedding,
    VectorDbIngestion,
    RagEvaluation,
    ReportGeneration,
}

/// Fixed execution order.
pub const PLAN: [Subtask; 12] = [
    Subtask::DataSplit,
    Subtask::NoiseRemoval,
    Subtask::ModelTraining,
    Subtask::ModelEvaluation,
    Subtask::EnsembleTraining,
    Subtask::ModelBenchmarking,
    Subtask::AiGovernanceScoring,
    Subtask::Chunking,
    Subtask::Embedding,
    Subtask::VectorDbIngestion,
    Subtask::RagEvaluation,
    Subtask::ReportGeneration,
];

impl Subtask {
    pub fn name(self) -> &'static str {
        match self {
            Self::DataSplit => "data_split",
            Self::NoiseRemoval => "noise_removal",
            Self::ModelTraining => "model_training",
            Self::ModelEvaluation => "model_evaluation",
            Self::EnsembleTraining => "ensemble_training",
            Self::ModelBenchmarking => "model_benchmarking",
            Self::AiGovernanceScoring => "ai_governance_scoring",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::VectorDbIngestion => "vector_db_ingestion",
            Self::RagEvaluation => "rag_evaluation",
            Self::ReportGeneration => "report_generation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_has_twelve_distinct_stages() {
        assert_eq!(PLAN.len(), 12);
        let names: std::collections::HashSet<&str> = PLAN.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), 12);
    }

    #[test]
    fn test_plan_order() {
        assert_eq!(PLAN[0], Subtask::DataSplit);
        assert_eq!(PLAN[2], Subtask::ModelTraining);
        assert_eq!(PLAN[9], Subtask::VectorDbIngestion);
        assert_eq!(PLAN[11], Subtask::ReportGeneration);
    }
}
