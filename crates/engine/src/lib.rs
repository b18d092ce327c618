//! Sales Insight Engine: dataset, model and report logic
//!
//! Provides:
//! - Source readers (platform exports, fake orders, tourism, weather and holiday APIs)
//! - Fake-order adjustment and the gap-free daily dataset merger
//! - Gradient boosting / random forest trainer with immutable artifacts
//! - Sampled Shapley factor explainer, critical-day detection and diagnosis
//! - Russian report composer and the read-side report service
//! - Dataset refresh job queue and worker

pub mod api;
pub mod artifact;
pub mod dataset;
pub mod diagnosis;
pub mod etl;
pub mod explainer;
pub mod fraud;
pub mod jobs;
pub mod merger;
pub mod model;
pub mod report;
pub mod service;
pub mod stats;
pub mod trainer;
pub mod types;

// Re-exports for convenience
pub use api::{NagerClient, OpenMeteoClient};
pub use artifact::{CandidateMetrics, ModelArtifact, TrainingMetrics};
pub use dataset::{dataset_hash, read_dataset, write_dataset};
pub use diagnosis::{diagnose, Diagnosis, Priority, RootCause};
pub use etl::{import_platform_stats, import_restaurants, BuildSummary, DatasetBuilder, SourceConfig};
pub use explainer::{
    critical_days, CategoryTotal, CriticalDay, Direction, ExplainError, Explainer, ExplainerConfig,
    FactorCategory, FactorContribution, RowExplanation,
};
pub use fraud::FakeOrderAdjuster;
pub use jobs::{
    process_next, run_worker, InMemoryJobQueue, Job, JobHandler, JobOutcome, JobQueue,
    SqliteJobQueue, WorkerConfig, WorkerProgress,
};
pub use merger::{DatasetMerger, MergeRequest, MergeSources};
pub use model::{ModelKind, Regressor, SalesModel};
pub use report::{compose, MlSection, Report, ReportSection};
pub use service::{FactorsReport, Period, PeriodError, ReportService, ReportSummary, ServiceError};
pub use stats::PeriodStats;
pub use trainer::{train, TrainConfig, TrainError};
pub use types::*;
