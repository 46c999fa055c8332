//! Pipeline scheduler for BankFlow.
//!
//! Runs the twelve-subtask plan per use case: use cases execute in
//! parallel under a bounded worker pool, subtasks within one use case are
//! strictly sequential: a subtask starts only after its predecessor
//! reported ok or skip. Later subtasks consume earlier artifacts, so the
//! ordering is not negotiable.
//!
//! Every subtask transition is one transaction in the results database;
//! that table is the sole source of truth for what has run. Artifacts on
//! disk are a cache, used for skip detection (input hashing) and resume.

mod catalog;
mod executor;
mod plan;
mod subtasks;

pub use catalog::{default_catalog, UseCase};
pub use executor::{PipelineRun, Scheduler, SchedulerContext, ShutdownFlag, ORPHAN_GRACE_SECS};
// Job lifecycle states travel with pipeline results.
pub use bankflow_store::JobState;
pub use plan::{Subtask, PLAN};
pub use subtasks::SubtaskOutcome;
